//! Batch runs through the checkpoint file, merge and Merkle publication.


use std::collections::BTreeMap;
use std::fs;

use airdrop_snapshot::merkle::write_snapshot;
use airdrop_snapshot::pipeline::run_batches;
use airdrop_snapshot::units::ETHER;
use airdrop_snapshot::{
    build_tree, merge_batches, CheckpointStore, JsonlEventStore, MemoryEventStore, PipelineConfig, ProofService,
    SnapshotError,
};
use harness::*;
use num_bigint::BigUint;

fn ether(n: u64) -> BigUint {
    BigUint::from(n) * &*ETHER
}

#[test]
fn failed_batch_resumes_without_rerunning_completed_ones() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (addr(0xa), addr(0xb));
    let (first_token, second_token) = (addr(0xe1), addr(0xe2));
    let config = PipelineConfig::from_toml_str(&pipeline_toml(
        dir.path(),
        &[("first", first_token, 1, (1, 5)), ("second", second_token, 1, (1, 5))],
    ))
    .unwrap();

    let mut store = MemoryEventStore::new(2);
    store.insert(first_token, mint_transfer_burn_with_init(a, b));
    // second token has no history yet
    let mut checkpoints = CheckpointStore::open(&config.checkpoint_path).unwrap();
    let err = run_batches(&config, &store, &mut checkpoints).unwrap_err();
    assert!(matches!(err, SnapshotError::NoTransfers { token, .. } if token == second_token));
    assert!(checkpoints.contains("first"));
    assert!(!checkpoints.contains("second"));

    let first_on_disk = fs::read(&config.checkpoint_path).unwrap();

    // the first token's history would now fail; it must not be replayed again
    store.insert(first_token, vec![]);
    store.insert(second_token, mint_transfer_burn_with_init(b, a));
    let mut checkpoints = CheckpointStore::open(&config.checkpoint_path).unwrap();
    let summary = run_batches(&config, &store, &mut checkpoints).unwrap();
    assert_eq!(summary.skipped, vec!["first".to_string()]);
    assert_eq!(summary.completed, vec!["second".to_string()]);
    assert_ne!(fs::read(&config.checkpoint_path).unwrap(), first_on_disk);

    let first = checkpoints.get("first").unwrap();
    assert_eq!(first.account_allocations.get_or_zero(&a), ether(70));
    assert_eq!(first.account_allocations.get_or_zero(&b), ether(30));

    let merged = merge_batches(checkpoints.batches());
    assert!(merged.reconciliation.is_balanced());
    assert_eq!(merged.table.get_or_zero(&a), ether(100));
    assert_eq!(merged.table.get_or_zero(&b), ether(100));
}

#[test]
fn rerecording_a_batch_does_not_double_count() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, token) = (addr(0xa), addr(0xb), addr(0xe1));
    let config =
        PipelineConfig::from_toml_str(&pipeline_toml(dir.path(), &[("only", token, 1, (1, 5))])).unwrap();
    let mut store = MemoryEventStore::new(10);
    store.insert(token, mint_transfer_burn_with_init(a, b));

    let mut checkpoints = CheckpointStore::open(&config.checkpoint_path).unwrap();
    run_batches(&config, &store, &mut checkpoints).unwrap();
    let once = merge_batches(checkpoints.batches()).table;

    let again = checkpoints.get("only").unwrap().clone();
    assert!(!checkpoints.record("only", again).unwrap());
    let summary = run_batches(&config, &store, &mut checkpoints).unwrap();
    assert!(summary.completed.is_empty());

    let twice = merge_batches(checkpoints.batches()).table;
    assert_eq!(once, twice);

    // a map holds each batch id once, whatever produced it
    let mut results = BTreeMap::new();
    for _ in 0..2 {
        results.insert("only".to_string(), checkpoints.get("only").unwrap().clone());
    }
    assert_eq!(merge_batches(&results).table, once);
}

#[test]
fn start_block_floor_keeps_the_first_record() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, token) = (addr(0xa), addr(0xb), addr(0xe1));
    // created at 0, floor 1: replay starts past creation, nothing to skip
    let mut config =
        PipelineConfig::from_toml_str(&pipeline_toml(dir.path(), &[("floor", token, 0, (1, 5))])).unwrap();
    config.start_block_floor = 1;

    let mut store = MemoryEventStore::new(10);
    store.insert(token, mint_transfer_burn(a, b));
    let mut checkpoints = CheckpointStore::open(&config.checkpoint_path).unwrap();
    run_batches(&config, &store, &mut checkpoints).unwrap();

    let result = checkpoints.get("floor").unwrap();
    assert_eq!(result.account_allocations.get_or_zero(&a), ether(70));
}

#[test]
fn jsonl_files_to_verified_claims() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("airdrop.toml");
    let (a, b, c) = (addr(0xa), addr(0xb), addr(0xc));
    let (t1, t2) = (addr(0xe1), addr(0xe2));
    fs::write(
        &config_path,
        pipeline_toml(dir.path(), &[("one", t1, 1, (1, 5)), ("two", t2, 1, (1, 9))]),
    )
    .unwrap();
    let config = PipelineConfig::load(&config_path).unwrap();

    fs::create_dir_all(&config.events_dir).unwrap();
    let events = JsonlEventStore::new(&config.events_dir, config.page_size);
    write_jsonl(&events, t1, &mint_transfer_burn_with_init(a, b));
    write_jsonl(
        &events,
        t2,
        &[init_record(1), mint(1, 1, c, 10), mint(3, 0, b, 30), transfer(6, 0, c, a, 10)],
    );

    let mut checkpoints = CheckpointStore::open(&config.checkpoint_path).unwrap();
    let summary = run_batches(&config, &events, &mut checkpoints).unwrap();
    assert_eq!(summary.completed.len(), 2);

    let merged = merge_batches(checkpoints.batches());
    assert!(merged.reconciliation.is_balanced());

    let snapshot = build_tree(&merged.table).unwrap();
    write_snapshot(&config.snapshot_path, &snapshot).unwrap();

    let service = ProofService::new(airdrop_snapshot::merkle::read_snapshot(&config.snapshot_path).unwrap()).unwrap();
    for account in [a, b, c] {
        let claim = service.proof(&account).unwrap();
        assert!(service.verify_claim(&claim), "{account}");
    }
    assert!(service.proof(&addr(0xd)).is_none());
}
