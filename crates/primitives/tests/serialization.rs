use addrindex_primitives::encoding::{decode, encode};
use addrindex_primitives::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

fn sample_tx() -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint {
                hash: [0x11; 32],
                index: 3,
            },
            script_sig: vec![0x01, 0x02, 0x03],
            sequence: 0xffff_ffff,
        }],
        vout: vec![
            TxOut {
                value: 50_000,
                script_pubkey: vec![0x51],
            },
            TxOut {
                value: 25_000,
                script_pubkey: vec![0x52, 0x53],
            },
        ],
        lock_time: 0,
    }
}

#[test]
fn transaction_round_trip() {
    let tx = sample_tx();
    let bytes = encode(&tx);
    let decoded: Transaction = decode(&bytes).expect("decode");
    assert_eq!(decoded, tx);
    assert_eq!(decoded.txid(), tx.txid());
}

#[test]
fn txid_changes_with_content() {
    let tx = sample_tx();
    let mut other = tx.clone();
    other.vout[0].value += 1;
    assert_ne!(tx.txid(), other.txid());
}

#[test]
fn coinbase_detection() {
    let mut tx = sample_tx();
    assert!(!tx.is_coinbase());
    tx.vin = vec![TxIn {
        prevout: OutPoint::null(),
        script_sig: vec![0x04],
        sequence: 0xffff_ffff,
    }];
    assert!(tx.is_coinbase());
}

#[test]
fn block_round_trip() {
    let block = Block {
        header: BlockHeader {
            version: 4,
            prev_block: [0xAA; 32],
            merkle_root: [0xBB; 32],
            time: 1_700_000_000,
            bits: 0x1d00_ffff,
            nonce: 42,
        },
        transactions: vec![sample_tx()],
    };
    let bytes = encode(&block);
    let decoded: Block = decode(&bytes).expect("decode");
    assert_eq!(decoded, block);
    assert_eq!(decoded.hash(), block.hash());
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut bytes = encode(&sample_tx());
    bytes.push(0x00);
    assert!(decode::<Transaction>(&bytes).is_err());
}
