#![allow(dead_code)]

use std::sync::Arc;

use addrindex::{ChainIndexer, MempoolAddressIndex, QueryEngine, SpentOutput};
use addrindex_primitives::{
    Address, Block, BlockHeader, Network, OutPoint, Transaction, TxIn, TxOut, COIN,
};
use addrindex_storage::memory::MemoryStore;

pub const NETWORK: Network = Network::Regtest;
pub const MINING_REWARD: i64 = 10 * COIN;
pub const SECONDARY_REWARD: i64 = 5 * COIN / 2;

pub fn p2pkh(byte: u8) -> Address {
    Address::pubkey_hash([byte; 20])
}

pub fn p2sh(byte: u8) -> Address {
    Address::script_hash([byte; 20])
}

pub fn addr58(address: &Address) -> String {
    address.to_base58(NETWORK)
}

pub fn coinbase(height: u32, outputs: &[(Address, i64)]) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: 0xffff_ffff,
        }],
        vout: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: *value,
                script_pubkey: address.script_pubkey(),
            })
            .collect(),
        lock_time: 0,
    }
}

pub fn spend(inputs: &[OutPoint], outputs: &[(Address, i64)]) -> Transaction {
    Transaction {
        version: 1,
        vin: inputs
            .iter()
            .map(|outpoint| TxIn {
                prevout: *outpoint,
                script_sig: Vec::new(),
                sequence: 0xffff_ffff,
            })
            .collect(),
        vout: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: *value,
                script_pubkey: address.script_pubkey(),
            })
            .collect(),
        lock_time: 0,
    }
}

pub fn build_block(height: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 4,
            prev_block: [height as u8; 32],
            merkle_root: transactions
                .first()
                .map(|tx| tx.txid())
                .unwrap_or([0u8; 32]),
            time: 1_700_000_000 + height,
            bits: 0x207f_ffff,
            nonce: height,
        },
        transactions,
    }
}

/// A resolved consumed output, as the chain-state layer would hand it over.
pub fn resolved(outpoint: OutPoint, value: i64, address: &Address) -> SpentOutput {
    SpentOutput {
        outpoint,
        value,
        script_pubkey: address.script_pubkey(),
    }
}

pub fn new_indexer() -> (Arc<MemoryStore>, Arc<ChainIndexer<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(ChainIndexer::open(Arc::clone(&store)).expect("open indexer"));
    (store, indexer)
}

pub fn engine(
    indexer: &Arc<ChainIndexer<MemoryStore>>,
    mempool: &Arc<MempoolAddressIndex>,
) -> QueryEngine<MemoryStore> {
    QueryEngine::new(Arc::clone(indexer), Arc::clone(mempool), NETWORK)
}

/// Builds a block from the transactions, connects it, and returns it.
pub fn connect(
    indexer: &ChainIndexer<MemoryStore>,
    height: u32,
    transactions: Vec<Transaction>,
    spent: &[SpentOutput],
) -> Block {
    let block = build_block(height, transactions);
    indexer
        .connect_block(&block, height, spent)
        .expect("connect block");
    block
}

/// Mines `count` empty-reward blocks paying the miner (and optionally a
/// secondary address) starting at `from_height`.
pub fn mine_rewards(
    indexer: &ChainIndexer<MemoryStore>,
    from_height: u32,
    count: u32,
    miner: &Address,
    secondary: Option<&Address>,
) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count as usize);
    for height in from_height..from_height + count {
        let mut outputs = vec![(*miner, MINING_REWARD)];
        if let Some(secondary) = secondary {
            outputs.push((*secondary, SECONDARY_REWARD));
        }
        blocks.push(connect(indexer, height, vec![coinbase(height, &outputs)], &[]));
    }
    blocks
}
