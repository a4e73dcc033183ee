//! Index maintenance driven by block connects and disconnects.
//!
//! The indexer owns the indexed tip and applies every per-block index
//! mutation through a single atomic write batch: either a block's address
//! deltas, spent entries, and tip advance are all visible, or none are.
//! `disconnect_block` is the literal inverse of `connect_block`, so a
//! reorganization reduces to disconnects down to the fork followed by
//! connects up the new branch.

use std::sync::{Arc, Mutex};

use addrindex_primitives::{Address, Block, Hash256, OutPoint};
use addrindex_script::address_from_script;
use addrindex_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::deltas::{AddressDelta, AddressDeltaStore};
use crate::spentindex::{SpentDetails, SpentEntry, SpentIndexStore};

const META_TIP_KEY: &[u8] = b"tip";

/// A consumed output, resolved by the chain-state layer that validated the
/// block. Supplied in input order across all non-coinbase inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexTip {
    pub height: u32,
    pub hash: Hash256,
}

impl IndexTip {
    fn encode(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..4].copy_from_slice(&self.height.to_le_bytes());
        out[4..].copy_from_slice(&self.hash);
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 36 {
            return None;
        }
        let height = u32::from_le_bytes(bytes[..4].try_into().ok()?);
        let hash: Hash256 = bytes[4..].try_into().ok()?;
        Some(Self { height, hash })
    }
}

#[derive(Debug)]
pub enum IndexError {
    Store(StoreError),
    Corrupt(&'static str),
    NonContiguous { tip: Option<u32>, height: u32 },
    StaleTip { indexed: Option<u32>, chain: Option<u32> },
    ValueOutOfRange,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Store(err) => write!(f, "{err}"),
            IndexError::Corrupt(message) => write!(f, "{message}"),
            IndexError::NonContiguous { tip, height } => match tip {
                Some(tip) => write!(f, "block at height {height} does not extend tip {tip}"),
                None => write!(f, "block at height {height} does not extend empty index"),
            },
            IndexError::StaleTip { indexed, chain } => write!(
                f,
                "index tip {indexed:?} does not match chain tip {chain:?}; rebuild required"
            ),
            IndexError::ValueOutOfRange => write!(f, "value out of range"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        IndexError::Store(err)
    }
}

pub struct ChainIndexer<S> {
    store: Arc<S>,
    deltas: AddressDeltaStore<Arc<S>>,
    spent: SpentIndexStore<Arc<S>>,
    tip: Mutex<Option<IndexTip>>,
}

impl<S: KeyValueStore> ChainIndexer<S> {
    /// Opens the indexer over an existing store, restoring the persisted tip.
    pub fn open(store: Arc<S>) -> Result<Self, IndexError> {
        let tip = match store.get(Column::Meta, META_TIP_KEY)? {
            Some(bytes) => {
                Some(IndexTip::decode(&bytes).ok_or(IndexError::Corrupt("invalid index tip"))?)
            }
            None => None,
        };
        Ok(Self {
            deltas: AddressDeltaStore::new(Arc::clone(&store)),
            spent: SpentIndexStore::new(Arc::clone(&store)),
            store,
            tip: Mutex::new(tip),
        })
    }

    pub fn tip(&self) -> Option<IndexTip> {
        *self.tip.lock().expect("indexer tip lock")
    }

    /// Fails with a distinct stale-tip error when the indexed tip does not
    /// match the chain's, e.g. after an unclean shutdown. The caller must
    /// then rebuild before serving queries; there is no incremental repair.
    pub fn verify_tip(&self, chain_tip: Option<&IndexTip>) -> Result<(), IndexError> {
        let indexed = self.tip();
        let matches = match (&indexed, chain_tip) {
            (None, None) => true,
            (Some(indexed), Some(chain)) => indexed == chain,
            _ => false,
        };
        if matches {
            return Ok(());
        }
        addrindex_log::log_warn!(
            "address index tip {:?} does not match chain tip {:?}",
            indexed.map(|tip| tip.height),
            chain_tip.map(|tip| tip.height),
        );
        Err(IndexError::StaleTip {
            indexed: indexed.map(|tip| tip.height),
            chain: chain_tip.map(|tip| tip.height),
        })
    }

    pub fn block_hash_at(&self, height: u32) -> Result<Option<Hash256>, StoreError> {
        let bytes = match self.store.get(Column::HeightIndex, &height.to_be_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let hash: Hash256 = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Backend("invalid height index entry".to_string()))?;
        Ok(Some(hash))
    }

    /// Applies one block's index mutations. `spent` carries the resolved
    /// consumed outputs for every non-coinbase input, in block order.
    pub fn connect_block(
        &self,
        block: &Block,
        height: u32,
        spent: &[SpentOutput],
    ) -> Result<(), IndexError> {
        let mut tip_guard = self.tip.lock().expect("indexer tip lock");
        if let Some(tip) = *tip_guard {
            if height != tip.height + 1 {
                return Err(IndexError::NonContiguous {
                    tip: Some(tip.height),
                    height,
                });
            }
        }

        let mut batch = WriteBatch::new();
        let mut cursor = 0usize;
        let mut credits = 0u64;
        let mut debits = 0u64;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            if !tx.is_coinbase() {
                for (input_index, input) in tx.vin.iter().enumerate() {
                    let resolved = spent
                        .get(cursor)
                        .ok_or(IndexError::Corrupt("spent outputs shorter than block inputs"))?;
                    cursor += 1;
                    if resolved.outpoint != input.prevout {
                        return Err(IndexError::Corrupt("spent output does not match input"));
                    }

                    let address = address_from_script(&resolved.script_pubkey);
                    self.spent.insert(
                        &mut batch,
                        &input.prevout,
                        &SpentEntry {
                            txid,
                            input_index: input_index as u32,
                            height,
                            details: address.map(|address| SpentDetails {
                                satoshis: resolved.value,
                                address,
                            }),
                        },
                    );

                    if let Some(address) = address {
                        let satoshis = resolved
                            .value
                            .checked_neg()
                            .ok_or(IndexError::ValueOutOfRange)?;
                        self.deltas.insert_debit(
                            &mut batch,
                            &address,
                            height,
                            tx_index as u32,
                            &txid,
                            input_index as u32,
                            satoshis,
                            &input.prevout,
                        );
                        debits += 1;
                    }
                }
            }

            for (output_index, output) in tx.vout.iter().enumerate() {
                if let Some(address) = address_from_script(&output.script_pubkey) {
                    self.deltas.insert_credit(
                        &mut batch,
                        &address,
                        height,
                        tx_index as u32,
                        &txid,
                        output_index as u32,
                        output.value,
                    );
                    credits += 1;
                }
            }
        }

        if cursor != spent.len() {
            return Err(IndexError::Corrupt("spent outputs longer than block inputs"));
        }

        let tip = IndexTip {
            height,
            hash: block.hash(),
        };
        batch.put(Column::HeightIndex, height.to_be_bytes(), tip.hash);
        batch.put(Column::Meta, META_TIP_KEY, tip.encode());

        self.store.write_batch(&batch)?;
        *tip_guard = Some(tip);

        addrindex_log::log_debug!(
            "connected block {height}: {credits} credits, {debits} debits, {} spent entries",
            cursor,
        );
        Ok(())
    }

    /// Removes exactly the index entries the matching `connect_block`
    /// inserted, in reverse order, consuming `spent` from the tail.
    pub fn disconnect_block(
        &self,
        block: &Block,
        height: u32,
        spent: &[SpentOutput],
    ) -> Result<(), IndexError> {
        let mut tip_guard = self.tip.lock().expect("indexer tip lock");
        let tip = tip_guard.ok_or(IndexError::Corrupt("disconnect on empty index"))?;
        if tip.height != height || tip.hash != block.hash() {
            return Err(IndexError::Corrupt("disconnect of non-tip block"));
        }

        let mut batch = WriteBatch::new();
        let mut cursor = spent.len();

        for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
            let txid = tx.txid();
            for (output_index, output) in tx.vout.iter().enumerate() {
                if let Some(address) = address_from_script(&output.script_pubkey) {
                    self.deltas.delete(
                        &mut batch,
                        &address,
                        height,
                        tx_index as u32,
                        &txid,
                        output_index as u32,
                        false,
                    );
                }
            }

            if !tx.is_coinbase() {
                for (input_index, input) in tx.vin.iter().enumerate().rev() {
                    if cursor == 0 {
                        return Err(IndexError::Corrupt("spent outputs shorter than block inputs"));
                    }
                    cursor -= 1;
                    let resolved = &spent[cursor];
                    if resolved.outpoint != input.prevout {
                        return Err(IndexError::Corrupt("spent output does not match input"));
                    }

                    self.spent.delete(&mut batch, &input.prevout);
                    if let Some(address) = address_from_script(&resolved.script_pubkey) {
                        self.deltas.delete(
                            &mut batch,
                            &address,
                            height,
                            tx_index as u32,
                            &txid,
                            input_index as u32,
                            true,
                        );
                    }
                }
            }
        }

        if cursor != 0 {
            return Err(IndexError::Corrupt("spent outputs longer than block inputs"));
        }

        batch.delete(Column::HeightIndex, height.to_be_bytes());
        let new_tip = match height.checked_sub(1) {
            Some(prev_height) => self
                .block_hash_at(prev_height)?
                .map(|hash| IndexTip {
                    height: prev_height,
                    hash,
                }),
            None => None,
        };
        match new_tip {
            Some(tip) => batch.put(Column::Meta, META_TIP_KEY, tip.encode()),
            None => batch.delete(Column::Meta, META_TIP_KEY),
        }

        self.store.write_batch(&batch)?;
        *tip_guard = new_tip;

        addrindex_log::log_debug!("disconnected block {height}");
        Ok(())
    }

    pub fn address_balance(
        &self,
        addresses: &[Address],
    ) -> Result<(i64, i64), StoreError> {
        self.deltas.balance(addresses)
    }

    pub fn address_txids(
        &self,
        addresses: &[Address],
        range: Option<(u32, u32)>,
    ) -> Result<Vec<Hash256>, StoreError> {
        self.deltas.txids(addresses, range)
    }

    pub fn address_deltas(
        &self,
        addresses: &[Address],
        range: Option<(u32, u32)>,
    ) -> Result<Vec<AddressDelta>, StoreError> {
        self.deltas.deltas(addresses, range)
    }

    pub fn address_utxos(
        &self,
        address: &Address,
    ) -> Result<Vec<AddressDelta>, StoreError> {
        self.deltas.utxos(address)
    }

    pub fn spent_info(&self, outpoint: &OutPoint) -> Result<Option<SpentEntry>, StoreError> {
        self.spent.get(outpoint)
    }
}
