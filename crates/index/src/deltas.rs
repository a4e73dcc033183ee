//! Per-address ordered delta log backed by the storage trait.
//!
//! Every recognized output credits its address, every spend debits it; the
//! log is the single source of truth for balance, history, and the derived
//! UTXO view. Keys sort by (address, height, tx position, in-tx position),
//! so a prefix scan yields one address's history in chain order.

use addrindex_primitives::{Address, AddressKind, Hash256, OutPoint};
use addrindex_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const ADDRESS_KEY_LEN: usize = 21;
const HEIGHT_LEN: usize = 4;
const TX_INDEX_LEN: usize = 4;
const TXID_LEN: usize = 32;
const POS_LEN: usize = 4;
const SPENDING_LEN: usize = 1;

const KEY_LEN: usize =
    ADDRESS_KEY_LEN + HEIGHT_LEN + TX_INDEX_LEN + TXID_LEN + POS_LEN + SPENDING_LEN;

const CREDIT_VALUE_LEN: usize = 8;
const DEBIT_VALUE_LEN: usize = 8 + 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressDelta {
    pub address: Address,
    pub height: u32,
    pub tx_index: u32,
    pub txid: Hash256,
    /// Output position for credits, input position for debits.
    pub pos: u32,
    pub spending: bool,
    pub satoshis: i64,
    /// The outpoint a debit consumes; `None` for credits.
    pub spent_outpoint: Option<OutPoint>,
}

pub fn address_key(address: &Address) -> [u8; ADDRESS_KEY_LEN] {
    let mut out = [0u8; ADDRESS_KEY_LEN];
    out[0] = address.kind.as_byte();
    out[1..].copy_from_slice(&address.hash);
    out
}

pub(crate) fn delta_key(
    address: &Address,
    height: u32,
    tx_index: u32,
    txid: &Hash256,
    pos: u32,
    spending: bool,
) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let mut offset = 0;
    out[offset..offset + ADDRESS_KEY_LEN].copy_from_slice(&address_key(address));
    offset += ADDRESS_KEY_LEN;
    out[offset..offset + HEIGHT_LEN].copy_from_slice(&height.to_be_bytes());
    offset += HEIGHT_LEN;
    out[offset..offset + TX_INDEX_LEN].copy_from_slice(&tx_index.to_be_bytes());
    offset += TX_INDEX_LEN;
    out[offset..offset + TXID_LEN].copy_from_slice(txid);
    offset += TXID_LEN;
    out[offset..offset + POS_LEN].copy_from_slice(&pos.to_be_bytes());
    offset += POS_LEN;
    out[offset] = if spending { 1 } else { 0 };
    out
}

pub struct AddressDeltaStore<S> {
    store: S,
}

impl<S> AddressDeltaStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AddressDeltaStore<S> {
    pub fn insert_credit(
        &self,
        batch: &mut WriteBatch,
        address: &Address,
        height: u32,
        tx_index: u32,
        txid: &Hash256,
        pos: u32,
        satoshis: i64,
    ) {
        let key = delta_key(address, height, tx_index, txid, pos, false);
        batch.put(Column::AddressDelta, key, satoshis.to_le_bytes());
    }

    pub fn insert_debit(
        &self,
        batch: &mut WriteBatch,
        address: &Address,
        height: u32,
        tx_index: u32,
        txid: &Hash256,
        pos: u32,
        satoshis: i64,
        spent_outpoint: &OutPoint,
    ) {
        let key = delta_key(address, height, tx_index, txid, pos, true);
        let mut value = [0u8; DEBIT_VALUE_LEN];
        value[..8].copy_from_slice(&satoshis.to_le_bytes());
        value[8..40].copy_from_slice(&spent_outpoint.hash);
        value[40..].copy_from_slice(&spent_outpoint.index.to_le_bytes());
        batch.put(Column::AddressDelta, key, value);
    }

    pub fn delete(
        &self,
        batch: &mut WriteBatch,
        address: &Address,
        height: u32,
        tx_index: u32,
        txid: &Hash256,
        pos: u32,
        spending: bool,
    ) {
        let key = delta_key(address, height, tx_index, txid, pos, spending);
        batch.delete(Column::AddressDelta, key);
    }

    pub fn scan(&self, address: &Address) -> Result<Vec<AddressDelta>, StoreError> {
        let prefix = address_key(address);
        let entries = self.store.scan_prefix(Column::AddressDelta, &prefix)?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(entry) = decode_entry(&key, &value) else {
                continue;
            };
            out.push(entry);
        }
        Ok(out)
    }

    pub fn for_each(
        &self,
        address: &Address,
        visitor: &mut dyn FnMut(AddressDelta) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let prefix = address_key(address);
        let mut adapter = |key: &[u8], value: &[u8]| {
            let Some(entry) = decode_entry(key, value) else {
                return Ok(());
            };
            visitor(entry)
        };
        self.store
            .for_each_prefix(Column::AddressDelta, &prefix, &mut adapter)
    }

    /// Sum of every delta and of the positive deltas, over already-deduplicated
    /// addresses.
    pub fn balance(&self, addresses: &[Address]) -> Result<(i64, i64), StoreError> {
        let mut balance = 0i64;
        let mut received = 0i64;
        for address in addresses {
            let mut visitor = |delta: AddressDelta| {
                if delta.satoshis > 0 {
                    received = received
                        .checked_add(delta.satoshis)
                        .ok_or_else(|| StoreError::Backend("address balance overflow".into()))?;
                }
                balance = balance
                    .checked_add(delta.satoshis)
                    .ok_or_else(|| StoreError::Backend("address balance overflow".into()))?;
                Ok(())
            };
            self.for_each(address, &mut visitor)?;
        }
        Ok((balance, received))
    }

    /// Deduplicated transaction ids touching any of the addresses within the
    /// inclusive height range, ordered by (height, txid).
    pub fn txids(
        &self,
        addresses: &[Address],
        range: Option<(u32, u32)>,
    ) -> Result<Vec<Hash256>, StoreError> {
        let mut seen = std::collections::BTreeSet::<(u32, Hash256)>::new();
        for address in addresses {
            let mut visitor = |delta: AddressDelta| {
                if in_range(delta.height, range) {
                    seen.insert((delta.height, delta.txid));
                }
                Ok(())
            };
            self.for_each(address, &mut visitor)?;
        }
        Ok(seen.into_iter().map(|(_, txid)| txid).collect())
    }

    /// Merged delta view over the addresses, ordered by
    /// (height, tx position, in-tx position) with address bytes as the final
    /// tie-break.
    pub fn deltas(
        &self,
        addresses: &[Address],
        range: Option<(u32, u32)>,
    ) -> Result<Vec<AddressDelta>, StoreError> {
        let mut rows = Vec::new();
        for address in addresses {
            let mut visitor = |delta: AddressDelta| {
                if in_range(delta.height, range) {
                    rows.push(delta);
                }
                Ok(())
            };
            self.for_each(address, &mut visitor)?;
        }
        rows.sort_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then_with(|| a.tx_index.cmp(&b.tx_index))
                .then_with(|| a.pos.cmp(&b.pos))
                .then_with(|| a.spending.cmp(&b.spending))
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(rows)
    }

    /// Credit deltas not consumed by any debit delta of the same address.
    /// The UTXO view is always derived from the log, never stored.
    pub fn utxos(&self, address: &Address) -> Result<Vec<AddressDelta>, StoreError> {
        let deltas = self.scan(address)?;
        let mut spent = std::collections::HashSet::<OutPoint>::new();
        for delta in &deltas {
            if let Some(outpoint) = delta.spent_outpoint {
                spent.insert(outpoint);
            }
        }
        let mut out: Vec<AddressDelta> = deltas
            .into_iter()
            .filter(|delta| {
                !delta.spending
                    && !spent.contains(&OutPoint {
                        hash: delta.txid,
                        index: delta.pos,
                    })
            })
            .collect();
        out.sort_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then_with(|| a.txid.cmp(&b.txid))
                .then_with(|| a.pos.cmp(&b.pos))
        });
        Ok(out)
    }
}

fn in_range(height: u32, range: Option<(u32, u32)>) -> bool {
    match range {
        Some((start, end)) => height >= start && height <= end,
        None => true,
    }
}

fn decode_entry(key: &[u8], value: &[u8]) -> Option<AddressDelta> {
    if key.len() != KEY_LEN {
        return None;
    }
    let kind = AddressKind::from_byte(key[0])?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&key[1..21]);
    let height = u32::from_be_bytes(key[21..25].try_into().ok()?);
    let tx_index = u32::from_be_bytes(key[25..29].try_into().ok()?);
    let txid: Hash256 = key[29..61].try_into().ok()?;
    let pos = u32::from_be_bytes(key[61..65].try_into().ok()?);
    let spending = key[65] != 0;

    let (satoshis, spent_outpoint) = match value.len() {
        CREDIT_VALUE_LEN => (i64::from_le_bytes(value.try_into().ok()?), None),
        DEBIT_VALUE_LEN => {
            let satoshis = i64::from_le_bytes(value[..8].try_into().ok()?);
            let hash: Hash256 = value[8..40].try_into().ok()?;
            let index = u32::from_le_bytes(value[40..].try_into().ok()?);
            (satoshis, Some(OutPoint { hash, index }))
        }
        _ => return None,
    };

    Some(AddressDelta {
        address: Address { kind, hash },
        height,
        tx_index,
        txid,
        pos,
        spending,
        satoshis,
        spent_outpoint,
    })
}
