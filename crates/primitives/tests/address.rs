use addrindex_primitives::{Address, AddressError, AddressKind, Network};

#[test]
fn base58_round_trip_all_networks() {
    let address = Address::pubkey_hash([0x42; 20]);
    for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
        let text = address.to_base58(network);
        let decoded = Address::from_base58(&text, network).expect("decode");
        assert_eq!(decoded, address);
    }

    let script = Address::script_hash([0x17; 20]);
    let text = script.to_base58(Network::Mainnet);
    let decoded = Address::from_base58(&text, Network::Mainnet).expect("decode");
    assert_eq!(decoded.kind, AddressKind::ScriptHash);
    assert_eq!(decoded.hash, [0x17; 20]);
}

#[test]
fn known_mainnet_encoding() {
    // All-zero pubkey hash is the canonical "burn" address.
    let address = Address::pubkey_hash([0u8; 20]);
    assert_eq!(
        address.to_base58(Network::Mainnet),
        "1111111111111111111114oLvT2"
    );
}

#[test]
fn rejects_mangled_input() {
    let address = Address::pubkey_hash([7; 20]);
    let mut text = address.to_base58(Network::Mainnet);

    // flip one character, keeping it in the alphabet
    let replacement = if text.ends_with('2') { '3' } else { '2' };
    text.pop();
    text.push(replacement);
    assert_eq!(
        Address::from_base58(&text, Network::Mainnet),
        Err(AddressError::InvalidChecksum)
    );

    assert_eq!(
        Address::from_base58("0OIl", Network::Mainnet),
        Err(AddressError::InvalidCharacter)
    );
    assert_eq!(
        Address::from_base58("", Network::Mainnet),
        Err(AddressError::InvalidLength)
    );
}

#[test]
fn rejects_wrong_network_prefix() {
    let address = Address::pubkey_hash([9; 20]);
    let mainnet = address.to_base58(Network::Mainnet);
    assert_eq!(
        Address::from_base58(&mainnet, Network::Regtest),
        Err(AddressError::UnknownPrefix)
    );
}

#[test]
fn script_pubkey_templates() {
    let p2pkh = Address::pubkey_hash([0xAB; 20]).script_pubkey();
    assert_eq!(p2pkh.len(), 25);
    assert_eq!(p2pkh[0], 0x76);
    assert_eq!(p2pkh[24], 0xac);
    assert_eq!(&p2pkh[3..23], &[0xAB; 20]);

    let p2sh = Address::script_hash([0xCD; 20]).script_pubkey();
    assert_eq!(p2sh.len(), 23);
    assert_eq!(p2sh[0], 0xa9);
    assert_eq!(p2sh[22], 0x87);
    assert_eq!(&p2sh[2..22], &[0xCD; 20]);
}
