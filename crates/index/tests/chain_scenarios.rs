//! End-to-end scenarios over connect/disconnect, the mempool index, and the
//! query surface.

mod common;

use std::sync::Arc;

use addrindex::{AddressQuery, IndexError, MempoolAddressIndex, QueryEngine};
use addrindex_primitives::{OutPoint, COIN};
use addrindex_storage::memory::MemoryStore;
use common::*;

#[test]
fn mining_rewards_accrue_per_block() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x11);
    let founders = p2sh(0x22);
    mine_rewards(&indexer, 1, 105, &miner, Some(&founders));

    let mempool = Arc::new(MempoolAddressIndex::new());
    let engine = engine(&indexer, &mempool);

    let balance = engine
        .balance(&AddressQuery::single(addr58(&miner)))
        .expect("balance");
    assert_eq!(balance.balance, 105 * MINING_REWARD);
    assert_eq!(balance.received, 105 * MINING_REWARD);

    let balance = engine
        .balance(&AddressQuery::single(addr58(&founders)))
        .expect("balance");
    assert_eq!(balance.balance, 105 * SECONDARY_REWARD);
    assert_eq!(balance.received, 105 * SECONDARY_REWARD);

    // Multiple address arguments: results are the sum.
    let balance = engine
        .balance(&AddressQuery::addresses([
            addr58(&founders),
            addr58(&miner),
        ]))
        .expect("balance");
    assert_eq!(
        balance.balance,
        105 * (MINING_REWARD + SECONDARY_REWARD)
    );
    assert_eq!(balance.received, balance.balance);

    assert_eq!(
        engine
            .txids(&AddressQuery::single(addr58(&miner)))
            .expect("txids")
            .len(),
        105
    );
    assert_eq!(
        engine
            .txids(&AddressQuery::single(addr58(&founders)))
            .expect("txids")
            .len(),
        105
    );

    // Both reward outputs live in the same coinbase, so requesting both
    // addresses must not duplicate transaction ids.
    let both = engine
        .txids(&AddressQuery::addresses([addr58(&miner), addr58(&founders)]).with_range(1, 5))
        .expect("txids");
    assert_eq!(both.len(), 5);

    // A duplicated address behaves like a single one.
    let dup = engine
        .txids(&AddressQuery::addresses([addr58(&miner), addr58(&miner)]).with_range(1, 5))
        .expect("txids");
    assert_eq!(dup.len(), 5);
}

#[test]
fn staircase_sends_accumulate() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x01);
    let funder = p2pkh(0x02);
    let target = p2pkh(0x03);

    // Heights 1..=5 fund the sender with one 10-coin output per block.
    let mut funding = Vec::new();
    for height in 1..=5u32 {
        let cb = coinbase(height, &[(funder, 10 * COIN)]);
        funding.push(OutPoint {
            hash: cb.txid(),
            index: 0,
        });
        connect(&indexer, height, vec![cb], &[]);
    }

    // Heights 6..=10 each send 1..=5 coins to a fresh address.
    let mut payment_txids = Vec::new();
    for i in 1..=5u32 {
        let height = 5 + i;
        let amount = i64::from(i) * COIN;
        let outpoint = funding[(i - 1) as usize];
        let tx = spend(
            &[outpoint],
            &[(target, amount), (funder, 10 * COIN - amount)],
        );
        payment_txids.push(tx.txid());
        let spent = vec![resolved(outpoint, 10 * COIN, &funder)];
        connect(
            &indexer,
            height,
            vec![coinbase(height, &[(miner, MINING_REWARD)]), tx],
            &spent,
        );
    }

    let mempool = Arc::new(MempoolAddressIndex::new());
    let engine = engine(&indexer, &mempool);
    let query = AddressQuery::single(addr58(&target));

    let balance = engine.balance(&query).expect("balance");
    assert_eq!(balance.balance, 15 * COIN);
    assert_eq!(balance.received, 15 * COIN);

    let deltas = engine.deltas(&query).expect("deltas").deltas;
    assert_eq!(deltas.len(), 5);
    for (i, row) in deltas.iter().enumerate() {
        assert_eq!(row.address, addr58(&target));
        assert_eq!(row.height, 6 + i as u32);
        assert_eq!(row.satoshis, (i as i64 + 1) * COIN);
        assert_eq!(
            row.txid,
            addrindex_primitives::hash256_to_hex(&payment_txids[i])
        );
    }

    let txids = engine.txids(&query).expect("txids");
    assert_eq!(txids.len(), 5);
}

#[test]
fn spend_is_visible_in_mempool_then_settles() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x01);
    let sender = p2pkh(0x0A);
    let recipient = p2pkh(0x0B);
    let change = p2pkh(0x0C);

    // Fund the sender with outputs of 1, 2, 3, and 4 coins.
    let mut funding = Vec::new();
    for i in 1..=4u32 {
        let height = i;
        let cb = coinbase(
            height,
            &[(sender, i64::from(i) * COIN), (miner, MINING_REWARD)],
        );
        funding.push(OutPoint {
            hash: cb.txid(),
            index: 0,
        });
        connect(&indexer, height, vec![cb], &[]);
    }

    // Sending 3 coins must consume the 4-coin output: the fee makes the
    // 3-coin output insufficient on its own.
    let fee = COIN / 10_000;
    let four_coin_output = funding[3];
    let tx = spend(
        &[four_coin_output],
        &[(recipient, 3 * COIN), (change, COIN - fee)],
    );
    let txid = tx.txid();
    let tx_resolved = vec![resolved(four_coin_output, 4 * COIN, &sender)];

    let mempool = Arc::new(MempoolAddressIndex::new());
    mempool.insert(&tx, &tx_resolved).expect("mempool insert");

    let engine = engine(&indexer, &mempool);

    // Duplicate request addresses collapse; entries group per address.
    let rows = engine
        .mempool(&AddressQuery::addresses([
            addr58(&recipient),
            addr58(&sender),
            addr58(&recipient),
        ]))
        .expect("mempool query");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].address, addr58(&recipient));
    assert_eq!(rows[0].satoshis, 3 * COIN);
    assert_eq!(rows[1].address, addr58(&sender));
    assert_eq!(rows[1].satoshis, -4 * COIN);
    for row in &rows {
        assert_eq!(row.txid, addrindex_primitives::hash256_to_hex(&txid));
    }
    assert_eq!(
        rows[1].prev_txid.as_deref(),
        Some(addrindex_primitives::hash256_to_hex(&four_coin_output.hash).as_str())
    );
    assert_eq!(rows[1].prev_vout, Some(0));

    // A single address string queries the same data.
    let sender_rows = engine
        .mempool(&AddressQuery::single(addr58(&sender)))
        .expect("mempool query");
    assert_eq!(sender_rows, vec![rows[1].clone()]);

    // Mine the transaction; its mempool entry disappears as a unit.
    mempool.remove(&txid);
    connect(
        &indexer,
        5,
        vec![coinbase(5, &[(miner, MINING_REWARD)]), tx],
        &tx_resolved,
    );

    assert!(engine
        .mempool(&AddressQuery::addresses([
            addr58(&recipient),
            addr58(&sender)
        ]))
        .expect("mempool query")
        .is_empty());

    let balance = engine
        .balance(&AddressQuery::single(addr58(&sender)))
        .expect("balance");
    assert_eq!(balance.received, 10 * COIN);
    assert_eq!(balance.balance, 6 * COIN);

    // The 4-coin output no longer appears among the sender's utxos.
    let utxos = engine
        .utxos(&AddressQuery::single(addr58(&sender)))
        .expect("utxos");
    let values: Vec<i64> = utxos.iter().map(|row| row.satoshis).collect();
    assert_eq!(values, vec![COIN, 2 * COIN, 3 * COIN]);

    let spent = engine
        .spent_info(&four_coin_output)
        .expect("spent info")
        .expect("entry");
    assert_eq!(spent.spent_txid, addrindex_primitives::hash256_to_hex(&txid));
    assert_eq!(spent.spent_index, 0);
    assert_eq!(spent.spent_height, 5);

    // The recipient never appears in the sender's history.
    let recipient_balance = engine
        .balance(&AddressQuery::single(addr58(&recipient)))
        .expect("balance");
    assert_eq!(recipient_balance.balance, 3 * COIN);
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    tip: Option<(u32, [u8; 32])>,
    deltas: Vec<addrindex::AddressDelta>,
    balance: (i64, i64),
    utxos: Vec<addrindex::AddressDelta>,
    spent: Option<addrindex::SpentEntry>,
}

fn snapshot(
    indexer: &addrindex::ChainIndexer<MemoryStore>,
    address: &addrindex_primitives::Address,
    outpoint: &OutPoint,
) -> Snapshot {
    Snapshot {
        tip: indexer.tip().map(|tip| (tip.height, tip.hash)),
        deltas: indexer
            .address_deltas(&[*address], None)
            .expect("deltas"),
        balance: indexer.address_balance(&[*address]).expect("balance"),
        utxos: indexer.address_utxos(address).expect("utxos"),
        spent: indexer.spent_info(outpoint).expect("spent info"),
    }
}

#[test]
fn disconnect_restores_prior_state_exactly() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x01);
    let owner = p2pkh(0x44);

    let cb1 = coinbase(1, &[(owner, 7 * COIN)]);
    let funded = OutPoint {
        hash: cb1.txid(),
        index: 0,
    };
    connect(&indexer, 1, vec![cb1], &[]);
    connect(
        &indexer,
        2,
        vec![coinbase(2, &[(miner, MINING_REWARD)])],
        &[],
    );

    let before = snapshot(&indexer, &owner, &funded);

    // Block 3 spends the owner's output and pays part of it back.
    let tx = spend(&[funded], &[(owner, 2 * COIN), (miner, 5 * COIN)]);
    let spent = vec![resolved(funded, 7 * COIN, &owner)];
    let block3 = build_block(3, vec![coinbase(3, &[(miner, MINING_REWARD)]), tx]);
    indexer.connect_block(&block3, 3, &spent).expect("connect");

    let after = snapshot(&indexer, &owner, &funded);
    assert_ne!(before, after);
    assert!(after.spent.is_some());

    indexer
        .disconnect_block(&block3, 3, &spent)
        .expect("disconnect");
    assert_eq!(snapshot(&indexer, &owner, &funded), before);

    indexer.connect_block(&block3, 3, &spent).expect("reconnect");
    assert_eq!(snapshot(&indexer, &owner, &funded), after);
}

#[test]
fn restart_recovers_persisted_state() {
    let store = Arc::new(MemoryStore::new());
    let miner = p2pkh(0x11);
    let founders = p2sh(0x22);

    let tip = {
        let indexer =
            addrindex::ChainIndexer::open(Arc::clone(&store)).expect("open indexer");
        mine_rewards(&indexer, 1, 5, &miner, Some(&founders));
        indexer.tip().expect("tip")
    };

    // A fresh indexer over the same store resumes without replaying blocks.
    let indexer =
        Arc::new(addrindex::ChainIndexer::open(Arc::clone(&store)).expect("reopen indexer"));
    assert_eq!(indexer.tip(), Some(tip));
    indexer.verify_tip(Some(&tip)).expect("tip matches");

    let mempool = Arc::new(MempoolAddressIndex::new());
    let engine = engine(&indexer, &mempool);
    let balance = engine
        .balance(&AddressQuery::single(addr58(&miner)))
        .expect("balance");
    assert_eq!(balance.balance, 5 * MINING_REWARD);
    assert_eq!(
        engine
            .txids(&AddressQuery::single(addr58(&miner)))
            .expect("txids")
            .len(),
        5
    );

    // An index behind the chain tip is stale, not silently served.
    let ahead = addrindex::IndexTip {
        height: tip.height + 1,
        hash: [0xEE; 32],
    };
    assert!(matches!(
        indexer.verify_tip(Some(&ahead)),
        Err(IndexError::StaleTip { .. })
    ));
    assert!(matches!(
        indexer.verify_tip(None),
        Err(IndexError::StaleTip { .. })
    ));
}

#[test]
fn connect_enforces_stack_discipline() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x01);

    connect(
        &indexer,
        1,
        vec![coinbase(1, &[(miner, MINING_REWARD)])],
        &[],
    );

    // A gap in heights is rejected.
    let skipped = build_block(3, vec![coinbase(3, &[(miner, MINING_REWARD)])]);
    assert!(matches!(
        indexer.connect_block(&skipped, 3, &[]),
        Err(IndexError::NonContiguous { .. })
    ));

    // Disconnecting a block that is not the tip is rejected.
    let other = build_block(1, vec![coinbase(9, &[(miner, MINING_REWARD)])]);
    assert!(matches!(
        indexer.disconnect_block(&other, 1, &[]),
        Err(IndexError::Corrupt(_))
    ));
}

#[test]
fn connect_rejects_misaligned_spent_outputs() {
    let (_store, indexer) = new_indexer();
    let miner = p2pkh(0x01);
    let owner = p2pkh(0x02);

    let cb = coinbase(1, &[(owner, 5 * COIN)]);
    let outpoint = OutPoint {
        hash: cb.txid(),
        index: 0,
    };
    connect(&indexer, 1, vec![cb], &[]);

    let tx = spend(&[outpoint], &[(miner, 5 * COIN)]);

    // Missing resolution.
    let block = build_block(2, vec![coinbase(2, &[(miner, MINING_REWARD)]), tx.clone()]);
    assert!(matches!(
        indexer.connect_block(&block, 2, &[]),
        Err(IndexError::Corrupt(_))
    ));

    // Wrong outpoint.
    let wrong = vec![resolved(
        OutPoint {
            hash: [0xAB; 32],
            index: 1,
        },
        5 * COIN,
        &owner,
    )];
    assert!(matches!(
        indexer.connect_block(&block, 2, &wrong),
        Err(IndexError::Corrupt(_))
    ));

    // Extra resolution.
    let extra = vec![
        resolved(outpoint, 5 * COIN, &owner),
        resolved(outpoint, 5 * COIN, &owner),
    ];
    assert!(matches!(
        indexer.connect_block(&block, 2, &extra),
        Err(IndexError::Corrupt(_))
    ));

    // The aligned list connects fine.
    let spent = vec![resolved(outpoint, 5 * COIN, &owner)];
    indexer.connect_block(&block, 2, &spent).expect("connect");
}

#[test]
fn disabled_engine_fails_every_query() {
    let mempool = Arc::new(MempoolAddressIndex::new());
    let engine: QueryEngine<MemoryStore> =
        QueryEngine::disabled(Arc::clone(&mempool), NETWORK);
    let query = AddressQuery::single(addr58(&p2pkh(0x01)));

    assert!(matches!(
        engine.balance(&query),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
    assert!(matches!(
        engine.txids(&query),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
    assert!(matches!(
        engine.deltas(&query),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
    assert!(matches!(
        engine.utxos(&query),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
    assert!(matches!(
        engine.mempool(&query),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
    assert!(matches!(
        engine.spent_info(&OutPoint::null()),
        Err(addrindex::QueryError::IndexUnavailable)
    ));
}
