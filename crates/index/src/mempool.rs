//! Transient address index over unconfirmed transactions.
//!
//! Mirrors the shape of the confirmed delta log but lives only in memory,
//! keyed by the owning transaction so an eviction or a mined confirmation
//! removes a transaction's deltas as one unit.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use addrindex_primitives::{Address, Hash256, OutPoint, Transaction};
use addrindex_script::address_from_script;

use crate::indexer::{IndexError, SpentOutput};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MempoolDelta {
    pub address: Address,
    pub txid: Hash256,
    /// Output position for credits, input position for debits.
    pub pos: u32,
    pub satoshis: i64,
    /// The outpoint a debit consumes; `None` for credits.
    pub prevout: Option<OutPoint>,
}

struct TxDeltas {
    seq: u64,
    deltas: Vec<MempoolDelta>,
}

#[derive(Default)]
struct MempoolInner {
    txs: HashMap<Hash256, TxDeltas>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MempoolAddressIndex {
    inner: RwLock<MempoolInner>,
}

impl MempoolAddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted transaction's deltas, computed the same way
    /// a block connect computes confirmed deltas. `resolved` carries the
    /// consumed output for each input, in input order.
    pub fn insert(&self, tx: &Transaction, resolved: &[SpentOutput]) -> Result<(), IndexError> {
        if tx.is_coinbase() {
            return Err(IndexError::Corrupt("coinbase transaction in mempool"));
        }
        if resolved.len() != tx.vin.len() {
            return Err(IndexError::Corrupt(
                "resolved outputs do not match transaction inputs",
            ));
        }

        let txid = tx.txid();
        let mut deltas = Vec::new();

        for (input_index, input) in tx.vin.iter().enumerate() {
            let spent = &resolved[input_index];
            if spent.outpoint != input.prevout {
                return Err(IndexError::Corrupt("spent output does not match input"));
            }
            if let Some(address) = address_from_script(&spent.script_pubkey) {
                let satoshis = spent
                    .value
                    .checked_neg()
                    .ok_or(IndexError::ValueOutOfRange)?;
                deltas.push(MempoolDelta {
                    address,
                    txid,
                    pos: input_index as u32,
                    satoshis,
                    prevout: Some(input.prevout),
                });
            }
        }

        for (output_index, output) in tx.vout.iter().enumerate() {
            if let Some(address) = address_from_script(&output.script_pubkey) {
                deltas.push(MempoolDelta {
                    address,
                    txid,
                    pos: output_index as u32,
                    satoshis: output.value,
                    prevout: None,
                });
            }
        }

        let mut guard = self.inner.write().expect("mempool index lock");
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.txs.insert(txid, TxDeltas { seq, deltas });
        Ok(())
    }

    /// Drops all deltas of a transaction, whatever the removal cause.
    pub fn remove(&self, txid: &Hash256) {
        let mut guard = self.inner.write().expect("mempool index lock");
        guard.txs.remove(txid);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().expect("mempool index lock");
        guard.txs.clear();
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.read().expect("mempool index lock").txs.len()
    }

    /// Current deltas grouped per requested address, duplicates collapsed to
    /// the first occurrence; each address's entries in admission order.
    pub fn query(&self, addresses: &[Address]) -> Vec<MempoolDelta> {
        let guard = self.inner.read().expect("mempool index lock");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for address in addresses {
            if !seen.insert(*address) {
                continue;
            }
            let mut rows: Vec<(u64, usize, MempoolDelta)> = Vec::new();
            for entry in guard.txs.values() {
                for (order, delta) in entry.deltas.iter().enumerate() {
                    if delta.address == *address {
                        rows.push((entry.seq, order, *delta));
                    }
                }
            }
            rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            out.extend(rows.into_iter().map(|(_, _, delta)| delta));
        }
        out
    }
}
