use crate::types::{AncestorLimits, MempoolError, RemovalReason};
use crate::{Mempool, MempoolOptions};
use lumen_primitives::address::TESTNET_PREFIXES;
use lumen_primitives::amount::COIN;
use lumen_primitives::hashes::PubkeyHash;
use lumen_primitives::transaction::{OutPoint, TxIn, TxOut};
use lumen_primitives::{
    script_for_destination, Amount, Destination, Script, Transaction, Txid,
};
use lumen_tokens::{construct_reissue_script, ReissueToken};
use std::collections::HashSet;

fn pool() -> Mempool {
    Mempool::new(MempoolOptions::default(), TESTNET_PREFIXES)
}

/// A transaction spending one outpoint, with `pad` varying the payload so
/// txids stay distinct.
fn spend(prevout: OutPoint, value: i64, pad: u32) -> Transaction {
    let mut script = Script::new();
    script.push_int(pad as i64 + 1);
    Transaction {
        version: 2,
        time: 0,
        inputs: vec![TxIn::new(prevout)],
        outputs: vec![TxOut::new(Amount::from_sat(value), script)],
        lock_time: 0,
        message: String::new(),
    }
}

fn confirmed_outpoint(tag: u8) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([tag; 32]), 0)
}

fn add(
    pool: &Mempool,
    tx: &Transaction,
    fee: i64,
) -> Result<crate::EntryId, MempoolError> {
    pool.add(tx.clone(), Amount::from_sat(fee), 100, 10, false, 4)
}

#[test]
fn singleton_aggregates_count_self() {
    let pool = pool();
    let tx = spend(confirmed_outpoint(1), COIN, 0);
    add(&pool, &tx, 1000).unwrap();

    let inner = pool.read();
    let entry = inner.entry_by_txid(&tx.txid()).unwrap();
    assert_eq!(entry.ancestor_count, 1);
    assert_eq!(entry.ancestor_size, entry.vsize);
    assert_eq!(entry.ancestor_fees.to_sat(), 1000);
    assert_eq!(entry.descendant_count, 1);
    assert_eq!(entry.descendant_fees.to_sat(), 1000);
    assert_eq!(inner.total_vsize(), entry.vsize as u64);
}

#[test]
fn chain_aggregates_are_sums() {
    let pool = pool();
    let parent = spend(confirmed_outpoint(1), COIN, 0);
    let child = spend(OutPoint::new(parent.txid(), 0), COIN - 1000, 1);
    let grandchild = spend(OutPoint::new(child.txid(), 0), COIN - 3000, 2);

    add(&pool, &parent, 1000).unwrap();
    add(&pool, &child, 2000).unwrap();
    add(&pool, &grandchild, 4000).unwrap();

    let inner = pool.read();
    let p = inner.entry_by_txid(&parent.txid()).unwrap();
    let c = inner.entry_by_txid(&child.txid()).unwrap();
    let g = inner.entry_by_txid(&grandchild.txid()).unwrap();

    // ancestor.size == sum of ancestor sizes plus own (invariant 1).
    assert_eq!(g.ancestor_count, 3);
    assert_eq!(g.ancestor_size, p.vsize + c.vsize + g.vsize);
    assert_eq!(g.ancestor_fees.to_sat(), 1000 + 2000 + 4000);
    assert_eq!(g.ancestor_sigops, 3 * 4);
    assert_eq!(c.ancestor_count, 2);

    // Mirrored on the descendant side.
    assert_eq!(p.descendant_count, 3);
    assert_eq!(p.descendant_size, p.vsize + c.vsize + g.vsize);
    assert_eq!(p.descendant_fees.to_sat(), 7000);

    // Strict dominance over every proper ancestor.
    assert!(g.ancestor_size > p.ancestor_size);
    assert!(g.ancestor_fees > p.ancestor_fees);
}

#[test]
fn duplicate_and_coinbase_rejected() {
    let pool = pool();
    let tx = spend(confirmed_outpoint(1), COIN, 0);
    add(&pool, &tx, 1000).unwrap();
    assert!(matches!(
        add(&pool, &tx, 1000),
        Err(MempoolError::Duplicate)
    ));

    let mut coinbase = Transaction::default();
    coinbase.inputs.push(TxIn::new(OutPoint::null()));
    coinbase
        .outputs
        .push(TxOut::new(Amount::from_sat(COIN), Script::new()));
    assert!(matches!(
        add(&pool, &coinbase, 0),
        Err(MempoolError::Coinbase)
    ));
}

#[test]
fn ancestor_limits_enforced() {
    let mut options = MempoolOptions::default();
    options.limits.max_ancestors = 2;
    let pool = Mempool::new(options, TESTNET_PREFIXES);

    let a = spend(confirmed_outpoint(1), COIN, 0);
    let b = spend(OutPoint::new(a.txid(), 0), COIN - 1000, 1);
    let c = spend(OutPoint::new(b.txid(), 0), COIN - 2000, 2);

    add(&pool, &a, 1000).unwrap();
    add(&pool, &b, 1000).unwrap();
    assert!(matches!(
        add(&pool, &c, 1000),
        Err(MempoolError::TooManyAncestors(3))
    ));
}

#[test]
fn descendant_limits_enforced() {
    let mut options = MempoolOptions::default();
    options.limits.max_descendants = 2;
    let pool = Mempool::new(options, TESTNET_PREFIXES);

    let mut parent = spend(confirmed_outpoint(1), COIN, 0);
    parent
        .outputs
        .push(TxOut::new(Amount::from_sat(COIN), Script::new()));
    parent
        .outputs
        .push(TxOut::new(Amount::from_sat(COIN), Script::new()));
    add(&pool, &parent, 1000).unwrap();

    add(&pool, &spend(OutPoint::new(parent.txid(), 0), COIN, 1), 1000).unwrap();
    let third = spend(OutPoint::new(parent.txid(), 1), COIN, 2);
    assert!(matches!(
        add(&pool, &third, 1000),
        Err(MempoolError::TooManyDescendants(3))
    ));
}

#[test]
fn ancestor_score_orders_by_package_feerate() {
    let pool = pool();
    // Low-fee parent, high-fee child, and an independent medium-fee tx of
    // the same size.
    let parent = spend(confirmed_outpoint(1), COIN, 0);
    let medium = spend(confirmed_outpoint(2), COIN, 1);
    let child = spend(OutPoint::new(parent.txid(), 0), COIN - 51_000, 2);

    add(&pool, &parent, 1000).unwrap();
    add(&pool, &medium, 10_000).unwrap();
    add(&pool, &child, 50_000).unwrap();

    let inner = pool.read();
    let order: Vec<Txid> = inner
        .iter_by_ancestor_score()
        .map(|(_, entry)| entry.txid)
        .collect();

    // The child's package rate (51000 / 2 sizes) beats the medium's
    // 10000 / 1, which beats the bare parent's 1000 / 1.
    assert_eq!(order[0], child.txid());
    assert_eq!(order[1], medium.txid());
    assert_eq!(order[2], parent.txid());
}

#[test]
fn remove_for_block_shrinks_survivor_aggregates() {
    let pool = pool();
    let parent = spend(confirmed_outpoint(1), COIN, 0);
    let child = spend(OutPoint::new(parent.txid(), 0), COIN - 1000, 1);
    add(&pool, &parent, 1000).unwrap();
    add(&pool, &child, 2000).unwrap();

    pool.remove_for_block(std::slice::from_ref(&parent));

    let inner = pool.read();
    assert!(!inner.contains(&parent.txid()));
    let c = inner.entry_by_txid(&child.txid()).unwrap();
    assert_eq!(c.ancestor_count, 1);
    assert_eq!(c.ancestor_size, c.vsize);
    assert_eq!(c.ancestor_fees.to_sat(), 2000);
    assert!(c.parents.is_empty());
}

#[test]
fn remove_for_block_drops_conflicts() {
    let pool = pool();
    // Pool holds a spend of outpoint X; the block confirms a different
    // spend of X.
    let ours = spend(confirmed_outpoint(1), COIN, 0);
    let ours_child = spend(OutPoint::new(ours.txid(), 0), COIN - 500, 1);
    add(&pool, &ours, 1000).unwrap();
    add(&pool, &ours_child, 1000).unwrap();

    let theirs = spend(confirmed_outpoint(1), COIN - 9, 9);
    pool.remove_for_block(std::slice::from_ref(&theirs));

    let inner = pool.read();
    assert!(!inner.contains(&ours.txid()));
    assert!(!inner.contains(&ours_child.txid()));
    assert!(inner.is_empty());
}

#[test]
fn remove_recursive_takes_descendants() {
    let pool = pool();
    let a = spend(confirmed_outpoint(1), COIN, 0);
    let b = spend(OutPoint::new(a.txid(), 0), COIN - 100, 1);
    let c = spend(OutPoint::new(b.txid(), 0), COIN - 200, 2);
    let unrelated = spend(confirmed_outpoint(2), COIN, 3);

    for (tx, fee) in [(&a, 1000), (&b, 1000), (&c, 1000), (&unrelated, 1000)] {
        add(&pool, tx, fee).unwrap();
    }

    pool.remove_recursive(&a.txid(), RemovalReason::Conflict);

    let inner = pool.read();
    assert_eq!(inner.len(), 1);
    assert!(inner.contains(&unrelated.txid()));
    // The conflict index forgot the removed spends.
    assert_eq!(inner.conflicting_tx(&confirmed_outpoint(1)), None);
}

#[test]
fn calculate_descendants_is_transitive_closure() {
    let pool = pool();
    let a = spend(confirmed_outpoint(1), COIN, 0);
    let b = spend(OutPoint::new(a.txid(), 0), COIN - 100, 1);
    let c = spend(OutPoint::new(b.txid(), 0), COIN - 200, 2);
    let id_a = add(&pool, &a, 1000).unwrap();
    add(&pool, &b, 1000).unwrap();
    add(&pool, &c, 1000).unwrap();

    let inner = pool.read();
    let mut set = HashSet::new();
    inner.calculate_descendants(id_a, &mut set);
    assert_eq!(set.len(), 3);
}

#[test]
fn expire_removes_old_entries_with_children() {
    let pool = pool();
    let old = spend(confirmed_outpoint(1), COIN, 0);
    let fresh_child = spend(OutPoint::new(old.txid(), 0), COIN - 100, 1);
    let fresh = spend(confirmed_outpoint(2), COIN, 2);

    pool.write()
        .add(
            old.clone(),
            Amount::from_sat(1000),
            50,
            10,
            false,
            0,
            AncestorLimits::unlimited(),
        )
        .unwrap();
    add(&pool, &fresh_child, 1000).unwrap();
    add(&pool, &fresh, 1000).unwrap();

    let removed = pool.write().expire(99);
    assert_eq!(removed, 2);
    assert!(pool.contains(&fresh.txid()));
    assert!(!pool.contains(&old.txid()));
    assert!(!pool.contains(&fresh_child.txid()));
}

#[test]
fn trim_evicts_cheapest_cluster_first() {
    let pool = pool();
    let cheap = spend(confirmed_outpoint(1), COIN, 0);
    let rich = spend(confirmed_outpoint(2), COIN, 1);
    add(&pool, &cheap, 100).unwrap();
    add(&pool, &rich, 100_000).unwrap();

    let total = pool.read().total_vsize();
    pool.write().trim_to_size(total - 1);

    assert!(!pool.contains(&cheap.txid()));
    assert!(pool.contains(&rich.txid()));
}

#[test]
fn prioritise_reorders_and_applies_to_late_arrivals() {
    let pool = pool();
    let a = spend(confirmed_outpoint(1), COIN, 0);
    let b = spend(confirmed_outpoint(2), COIN, 1);
    add(&pool, &a, 1000).unwrap();
    add(&pool, &b, 2000).unwrap();

    {
        let inner = pool.read();
        let first = inner.iter_by_ancestor_score().next().unwrap().1.txid;
        assert_eq!(first, b.txid());
    }

    pool.write()
        .prioritise_transaction(&a.txid(), Amount::from_sat(5000));
    {
        let inner = pool.read();
        let first = inner.iter_by_ancestor_score().next().unwrap().1.txid;
        assert_eq!(first, a.txid());
        assert_eq!(
            inner.entry_by_txid(&a.txid()).unwrap().modified_fee.to_sat(),
            6000
        );
        // The base fee is untouched.
        assert_eq!(inner.entry_by_txid(&a.txid()).unwrap().fee.to_sat(), 1000);
    }

    // A delta registered before arrival applies when the tx shows up.
    let c = spend(confirmed_outpoint(3), COIN, 2);
    pool.write()
        .prioritise_transaction(&c.txid(), Amount::from_sat(9000));
    add(&pool, &c, 100).unwrap();
    let inner = pool.read();
    assert_eq!(
        inner.entry_by_txid(&c.txid()).unwrap().modified_fee.to_sat(),
        9100
    );
}

#[test]
fn prioritise_lifts_descendant_packages() {
    let pool = pool();
    let parent = spend(confirmed_outpoint(1), COIN, 0);
    let child = spend(OutPoint::new(parent.txid(), 0), COIN - 100, 1);
    add(&pool, &parent, 1000).unwrap();
    add(&pool, &child, 1000).unwrap();

    pool.write()
        .prioritise_transaction(&parent.txid(), Amount::from_sat(10_000));

    let inner = pool.read();
    let c = inner.entry_by_txid(&child.txid()).unwrap();
    assert_eq!(c.ancestor_fees.to_sat(), 12_000);
    let p = inner.entry_by_txid(&parent.txid()).unwrap();
    assert_eq!(p.descendant_fees.to_sat(), 12_000);
}

#[test]
fn one_pending_reissue_per_token() {
    let pool = pool();
    let dest = script_for_destination(
        &Destination::PubkeyHash(PubkeyHash::from_byte_array([7; 20])),
        0,
    );
    let reissue = ReissueToken {
        name: "COPPER".to_string(),
        amount: Amount::from_sat(COIN),
        units: -1,
        reissuable: true,
    };

    let mut first = spend(confirmed_outpoint(1), COIN, 0);
    first.outputs.push(TxOut::new(
        Amount::ZERO,
        construct_reissue_script(&dest, &reissue),
    ));
    let mut second = spend(confirmed_outpoint(2), COIN, 1);
    second.outputs.push(TxOut::new(
        Amount::ZERO,
        construct_reissue_script(&dest, &reissue),
    ));

    add(&pool, &first, 1000).unwrap();
    let err = add(&pool, &second, 1000).unwrap_err();
    assert!(matches!(err, MempoolError::ReissueConflict(name) if name == "COPPER"));

    // Once the first leaves the pool the name frees up.
    pool.remove(&first.txid(), RemovalReason::Block).unwrap();
    add(&pool, &second, 1000).unwrap();
}

#[test]
fn snapshot_and_load_rebuild_the_pool() {
    let source = pool();
    let parent = spend(confirmed_outpoint(1), COIN, 0);
    let child = spend(OutPoint::new(parent.txid(), 0), COIN - 1000, 1);
    add(&source, &parent, 1000).unwrap();
    add(&source, &child, 2000).unwrap();

    let snapshots = source.read().snapshot();
    assert_eq!(snapshots.len(), 2);
    // Oldest first keeps parents ahead of children.
    assert_eq!(snapshots[0].tx.txid(), parent.txid());

    let restored = pool();
    assert_eq!(restored.load(snapshots), 2);
    let inner = restored.read();
    let c = inner.entry_by_txid(&child.txid()).unwrap();
    assert_eq!(c.ancestor_count, 2);
    assert_eq!(c.ancestor_fees.to_sat(), 3000);
}
