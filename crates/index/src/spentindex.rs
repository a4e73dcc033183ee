//! Spent output index backed by the storage trait.
//!
//! Maps an outpoint (txid + vout) to the transaction that consumed it.
//! An entry exists only while the spending block is on the active chain;
//! absence means unspent as of the current tip.

use addrindex_primitives::{Address, AddressKind, Hash256, OutPoint};
use addrindex_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const OUTPOINT_KEY_LEN: usize = 36;

const VALUE_LEN_BASE: usize = 40;
const VALUE_LEN_DETAILED: usize = 69;

/// Resolved description of the consumed output, carried so transaction
/// detail queries can annotate inputs without a transaction index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpentDetails {
    pub satoshis: i64,
    pub address: Address,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpentEntry {
    pub txid: Hash256,
    pub input_index: u32,
    pub height: u32,
    pub details: Option<SpentDetails>,
}

impl SpentEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(if self.details.is_some() {
            VALUE_LEN_DETAILED
        } else {
            VALUE_LEN_BASE
        });
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.input_index.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        if let Some(details) = self.details {
            out.extend_from_slice(&details.satoshis.to_le_bytes());
            out.push(details.address.kind.as_byte());
            out.extend_from_slice(&details.address.hash);
        }
        out
    }

    // Entries written before details existed are 40 bytes; accept both.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != VALUE_LEN_BASE && bytes.len() != VALUE_LEN_DETAILED {
            return None;
        }
        let txid: Hash256 = bytes[0..32].try_into().ok()?;
        let input_index = u32::from_le_bytes(bytes[32..36].try_into().ok()?);
        let height = u32::from_le_bytes(bytes[36..40].try_into().ok()?);
        let details = if bytes.len() == VALUE_LEN_DETAILED {
            let satoshis = i64::from_le_bytes(bytes[40..48].try_into().ok()?);
            let kind = AddressKind::from_byte(bytes[48])?;
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[49..69]);
            Some(SpentDetails {
                satoshis,
                address: Address { kind, hash },
            })
        } else {
            None
        };
        Some(Self {
            txid,
            input_index,
            height,
            details,
        })
    }
}

pub fn outpoint_key(outpoint: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut out = [0u8; OUTPOINT_KEY_LEN];
    out[..32].copy_from_slice(&outpoint.hash);
    out[32..].copy_from_slice(&outpoint.index.to_le_bytes());
    out
}

pub struct SpentIndexStore<S> {
    store: S,
}

impl<S> SpentIndexStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> SpentIndexStore<S> {
    pub fn insert(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &SpentEntry) {
        let key = outpoint_key(outpoint);
        batch.put(Column::SpentIndex, key, entry.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = outpoint_key(outpoint);
        batch.delete(Column::SpentIndex, key);
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<SpentEntry>, StoreError> {
        let key = outpoint_key(outpoint);
        let bytes = match self.store.get(Column::SpentIndex, &key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        SpentEntry::decode(&bytes)
            .ok_or_else(|| StoreError::Backend("invalid spent index entry".to_string()))
            .map(Some)
    }
}
