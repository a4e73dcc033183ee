//! Read-only query surface over the chain and mempool indices.
//!
//! Requests name addresses as strings; a normalization step decodes and
//! deduplicates them before touching the stores. No query mutates state.

use std::sync::Arc;

use addrindex_primitives::{
    hash256_to_hex, Address, Hash256, Network, OutPoint, Transaction, COIN,
};
use addrindex_script::address_from_script;
use addrindex_storage::{KeyValueStore, StoreError};

use crate::indexer::{ChainIndexer, SpentOutput};
use crate::mempool::MempoolAddressIndex;

#[derive(Debug)]
pub enum QueryError {
    /// The index was not enabled at startup or is stale; never answered
    /// with partial data.
    IndexUnavailable,
    InvalidAddress(String),
    InvalidRange(&'static str),
    Store(StoreError),
    Corrupt(&'static str),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::IndexUnavailable => write!(f, "address index is not available"),
            QueryError::InvalidAddress(address) => write!(f, "invalid address: {address}"),
            QueryError::InvalidRange(message) => write!(f, "{message}"),
            QueryError::Store(err) => write!(f, "{err}"),
            QueryError::Corrupt(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        QueryError::Store(err)
    }
}

/// Uniform multi-address request; a bare address expands into this via
/// [`AddressQuery::single`].
#[derive(Clone, Debug, Default)]
pub struct AddressQuery {
    pub addresses: Vec<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub chain_info: bool,
}

impl AddressQuery {
    pub fn single(address: impl Into<String>) -> Self {
        Self {
            addresses: vec![address.into()],
            ..Self::default()
        }
    }

    pub fn addresses<I, T>(addresses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_chain_info(mut self) -> Self {
        self.chain_info = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressBalance {
    pub balance: i64,
    pub received: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeltaRow {
    pub address: String,
    pub txid: String,
    pub height: u32,
    /// Position of the transaction within its block.
    pub block_index: u32,
    /// Output position for credits, input position for debits.
    pub index: u32,
    pub satoshis: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockRef {
    pub height: u32,
    pub hash: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainInfo {
    pub start: BlockRef,
    pub end: BlockRef,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressDeltasResult {
    pub deltas: Vec<DeltaRow>,
    pub chain_info: Option<ChainInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoRow {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub satoshis: i64,
    pub height: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MempoolRow {
    pub address: String,
    pub txid: String,
    pub index: u32,
    pub satoshis: i64,
    pub prev_txid: Option<String>,
    pub prev_vout: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentInfo {
    pub spent_txid: String,
    pub spent_index: u32,
    pub spent_height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputDetail {
    pub address: Option<String>,
    pub value: f64,
    pub value_sat: i64,
    pub prev_txid: String,
    pub prev_vout: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputDetail {
    pub address: Option<String>,
    pub value: f64,
    pub value_sat: i64,
    pub index: u32,
    pub spent_txid: Option<String>,
    pub spent_index: Option<u32>,
    pub spent_height: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionDetail {
    pub txid: String,
    /// Present once the transaction is confirmed.
    pub height: Option<u32>,
    pub inputs: Vec<InputDetail>,
    pub outputs: Vec<OutputDetail>,
}

enum RangeOutcome {
    Empty,
    Filter(Option<(u32, u32)>),
}

pub struct QueryEngine<S> {
    index: Option<Arc<ChainIndexer<S>>>,
    mempool: Arc<MempoolAddressIndex>,
    network: Network,
}

impl<S: KeyValueStore> QueryEngine<S> {
    pub fn new(
        index: Arc<ChainIndexer<S>>,
        mempool: Arc<MempoolAddressIndex>,
        network: Network,
    ) -> Self {
        Self {
            index: Some(index),
            mempool,
            network,
        }
    }

    /// Engine for a node that did not enable the index (or found it stale):
    /// every query fails fast instead of returning partial data.
    pub fn disabled(mempool: Arc<MempoolAddressIndex>, network: Network) -> Self {
        Self {
            index: None,
            mempool,
            network,
        }
    }

    fn indexer(&self) -> Result<&ChainIndexer<S>, QueryError> {
        self.index.as_deref().ok_or(QueryError::IndexUnavailable)
    }

    fn decode_addresses(&self, addresses: &[String]) -> Result<Vec<Address>, QueryError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(addresses.len());
        for text in addresses {
            let address = Address::from_base58(text, self.network)
                .map_err(|_| QueryError::InvalidAddress(text.clone()))?;
            if seen.insert(address) {
                out.push(address);
            }
        }
        Ok(out)
    }

    fn resolve_range(&self, query: &AddressQuery) -> Result<RangeOutcome, QueryError> {
        let start = validate_height(query.start, "start must not be negative")?;
        let end = validate_height(query.end, "end must not be negative")?;
        if start != 0 && end != 0 && start > end {
            return Ok(RangeOutcome::Empty);
        }
        if start == 0 && end == 0 {
            return Ok(RangeOutcome::Filter(None));
        }
        let lo = start;
        let hi = if end == 0 { u32::MAX } else { end };
        Ok(RangeOutcome::Filter(Some((lo, hi))))
    }

    /// Deduplicated transaction ids touching any requested address within
    /// the height range, ordered by height.
    pub fn txids(&self, query: &AddressQuery) -> Result<Vec<String>, QueryError> {
        let indexer = self.indexer()?;
        let addresses = self.decode_addresses(&query.addresses)?;
        let range = match self.resolve_range(query)? {
            RangeOutcome::Empty => return Ok(Vec::new()),
            RangeOutcome::Filter(range) => range,
        };
        let txids = indexer.address_txids(&addresses, range)?;
        Ok(txids.iter().map(hash256_to_hex).collect())
    }

    /// Balance and total received, summed across the requested addresses.
    pub fn balance(&self, query: &AddressQuery) -> Result<AddressBalance, QueryError> {
        let indexer = self.indexer()?;
        let addresses = self.decode_addresses(&query.addresses)?;
        let (balance, received) = indexer.address_balance(&addresses)?;
        Ok(AddressBalance { balance, received })
    }

    pub fn deltas(&self, query: &AddressQuery) -> Result<AddressDeltasResult, QueryError> {
        let indexer = self.indexer()?;
        let addresses = self.decode_addresses(&query.addresses)?;
        let range = match self.resolve_range(query)? {
            RangeOutcome::Empty => {
                return Ok(AddressDeltasResult {
                    deltas: Vec::new(),
                    chain_info: None,
                })
            }
            RangeOutcome::Filter(range) => range,
        };

        let deltas = indexer
            .address_deltas(&addresses, range)?
            .into_iter()
            .map(|delta| DeltaRow {
                address: delta.address.to_base58(self.network),
                txid: hash256_to_hex(&delta.txid),
                height: delta.height,
                block_index: delta.tx_index,
                index: delta.pos,
                satoshis: delta.satoshis,
            })
            .collect();

        let chain_info = if query.chain_info && query.start.is_some() && query.end.is_some() {
            Some(self.chain_info(indexer, query)?)
        } else {
            None
        };

        Ok(AddressDeltasResult { deltas, chain_info })
    }

    fn chain_info(
        &self,
        indexer: &ChainIndexer<S>,
        query: &AddressQuery,
    ) -> Result<ChainInfo, QueryError> {
        let start = validate_height(query.start, "start must not be negative")?;
        let end = validate_height(query.end, "end must not be negative")?;
        let end = if end == 0 {
            indexer
                .tip()
                .ok_or(QueryError::InvalidRange("no blocks indexed"))?
                .height
        } else {
            end
        };
        if start == 0 {
            return Err(QueryError::InvalidRange(
                "chain info requires an explicit start height",
            ));
        }
        let start_hash = indexer
            .block_hash_at(start)?
            .ok_or(QueryError::InvalidRange("start height is not indexed"))?;
        let end_hash = indexer
            .block_hash_at(end)?
            .ok_or(QueryError::InvalidRange("end height is not indexed"))?;
        Ok(ChainInfo {
            start: BlockRef {
                height: start,
                hash: hash256_to_hex(&start_hash),
            },
            end: BlockRef {
                height: end,
                hash: hash256_to_hex(&end_hash),
            },
        })
    }

    /// Currently unspent outputs of the requested addresses, derived from
    /// the delta log, ordered by (height, txid, output index).
    pub fn utxos(&self, query: &AddressQuery) -> Result<Vec<UtxoRow>, QueryError> {
        let indexer = self.indexer()?;
        let addresses = self.decode_addresses(&query.addresses)?;

        let mut rows: Vec<(u32, Hash256, u32, Address, i64)> = Vec::new();
        for address in &addresses {
            for delta in indexer.address_utxos(address)? {
                rows.push((
                    delta.height,
                    delta.txid,
                    delta.pos,
                    delta.address,
                    delta.satoshis,
                ));
            }
        }
        rows.sort();
        Ok(rows
            .into_iter()
            .map(|(height, txid, output_index, address, satoshis)| UtxoRow {
                address: address.to_base58(self.network),
                txid: hash256_to_hex(&txid),
                output_index,
                satoshis,
                height,
            })
            .collect())
    }

    /// Unconfirmed deltas for the requested addresses, grouped per address.
    pub fn mempool(&self, query: &AddressQuery) -> Result<Vec<MempoolRow>, QueryError> {
        // Fails fast when the index is disabled, like every other query.
        self.indexer()?;
        let addresses = self.decode_addresses(&query.addresses)?;
        Ok(self
            .mempool
            .query(&addresses)
            .into_iter()
            .map(|delta| MempoolRow {
                address: delta.address.to_base58(self.network),
                txid: hash256_to_hex(&delta.txid),
                index: delta.pos,
                satoshis: delta.satoshis,
                prev_txid: delta.prevout.as_ref().map(|out| hash256_to_hex(&out.hash)),
                prev_vout: delta.prevout.as_ref().map(|out| out.index),
            })
            .collect())
    }

    /// Which transaction consumed the given output; `None` means unspent as
    /// of the current tip.
    pub fn spent_info(&self, outpoint: &OutPoint) -> Result<Option<SpentInfo>, QueryError> {
        let indexer = self.indexer()?;
        Ok(indexer.spent_info(outpoint)?.map(|entry| SpentInfo {
            spent_txid: hash256_to_hex(&entry.txid),
            spent_index: entry.input_index,
            spent_height: entry.height,
        }))
    }

    /// Annotates a fetched transaction with resolved input provenance and
    /// per-output spent info. `height` is the confirmation height, absent
    /// while the transaction is unconfirmed.
    pub fn transaction_detail(
        &self,
        tx: &Transaction,
        height: Option<u32>,
        resolved: &[SpentOutput],
    ) -> Result<TransactionDetail, QueryError> {
        let indexer = self.indexer()?;
        let txid = tx.txid();

        let inputs = if tx.is_coinbase() {
            Vec::new()
        } else {
            if resolved.len() != tx.vin.len() {
                return Err(QueryError::Corrupt(
                    "resolved outputs do not match transaction inputs",
                ));
            }
            let mut inputs = Vec::with_capacity(tx.vin.len());
            for (input, spent) in tx.vin.iter().zip(resolved) {
                if spent.outpoint != input.prevout {
                    return Err(QueryError::Corrupt("spent output does not match input"));
                }
                inputs.push(InputDetail {
                    address: address_from_script(&spent.script_pubkey)
                        .map(|address| address.to_base58(self.network)),
                    value: spent.value as f64 / COIN as f64,
                    value_sat: spent.value,
                    prev_txid: hash256_to_hex(&input.prevout.hash),
                    prev_vout: input.prevout.index,
                });
            }
            inputs
        };

        let mut outputs = Vec::with_capacity(tx.vout.len());
        for (output_index, output) in tx.vout.iter().enumerate() {
            let spent = indexer.spent_info(&OutPoint {
                hash: txid,
                index: output_index as u32,
            })?;
            outputs.push(OutputDetail {
                address: address_from_script(&output.script_pubkey)
                    .map(|address| address.to_base58(self.network)),
                value: output.value as f64 / COIN as f64,
                value_sat: output.value,
                index: output_index as u32,
                spent_txid: spent.as_ref().map(|entry| hash256_to_hex(&entry.txid)),
                spent_index: spent.as_ref().map(|entry| entry.input_index),
                spent_height: spent.as_ref().map(|entry| entry.height),
            });
        }

        Ok(TransactionDetail {
            txid: hash256_to_hex(&txid),
            height,
            inputs,
            outputs,
        })
    }
}

fn validate_height(value: Option<i64>, message: &'static str) -> Result<u32, QueryError> {
    match value {
        None => Ok(0),
        Some(value) if value < 0 => Err(QueryError::InvalidRange(message)),
        Some(value) => {
            u32::try_from(value).map_err(|_| QueryError::InvalidRange("height out of range"))
        }
    }
}
