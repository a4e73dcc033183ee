//! Standard script classification utilities.

use addrindex_primitives::hash::hash160;
use addrindex_primitives::Address;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Unknown,
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else {
        ScriptType::Unknown
    }
}

/// The recognized address an output script pays to, or `None` when the
/// script is not a standard template. Bare pay-to-public-key outputs are
/// folded into the equivalent pay-to-public-key-hash address.
pub fn address_from_script(script: &[u8]) -> Option<Address> {
    match classify_script_pubkey(script) {
        ScriptType::P2Pkh => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[3..23]);
            Some(Address::pubkey_hash(hash))
        }
        ScriptType::P2Sh => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            Some(Address::script_hash(hash))
        }
        ScriptType::P2Pk => {
            let key_len = script[0] as usize;
            let pubkey = script.get(1..1 + key_len)?;
            Some(Address::pubkey_hash(hash160(pubkey)))
        }
        ScriptType::Unknown => None,
    }
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) => len,
        Some(len @ 65) => len,
        _ => return false,
    };

    let expected_len = key_len as usize + 2;
    script.len() == expected_len && script[script.len() - 1] == OP_CHECKSIG
}
