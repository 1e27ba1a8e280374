//! Tests for the rules the ledger enforces on its chain, and for how it persists and replaces it.

mod common;

use std::{thread, time::Duration};

use log::LevelFilter;
use tablechain::{
    ledger::{ExtendOutcome, InvalidBlock, Ledger, LedgerError, ReplaceOutcome},
    types::{
        basic::{BlockId, Difficulty, Timestamp},
        block::{proof_of_work, valid_proof, Block, BlockKind},
        crypto_primitives::Keypair,
        value::{Value, MAX_NESTING},
    },
};

use common::{fixtures::person, logging::setup_logger, mem_db::MemDB};

const DIFFICULTY: Difficulty = Difficulty::new(1);

fn open(table_name: &str) -> Ledger<MemDB> {
    Ledger::open(MemDB::new(), table_name, DIFFICULTY).unwrap()
}

fn bootstrapped(table_name: &str, owner: &Keypair) -> Ledger<MemDB> {
    let ledger = open(table_name);
    ledger
        .append(owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    ledger
}

fn is_unauthorized(result: Result<Block, LedgerError>) -> bool {
    matches!(result, Err(LedgerError::Invalid(InvalidBlock::Unauthorized { .. })))
}

#[test]
fn open_writes_genesis_and_reopens_stored_chain() {
    setup_logger(LevelFilter::Trace);

    let kv_store = MemDB::new();
    let ledger = Ledger::open(kv_store.clone(), "people", DIFFICULTY).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.last(), Block::genesis("people"));
    assert_eq!(ledger.last().id, BlockId::GENESIS);

    let owner = Keypair::generate();
    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    let chain = ledger.snapshot();
    drop(ledger);

    let reopened = Ledger::open(kv_store, "people", DIFFICULTY).unwrap();
    assert_eq!(reopened.snapshot(), chain);
}

#[test]
fn open_refuses_store_of_another_table() {
    let kv_store = MemDB::new();
    Ledger::open(kv_store.clone(), "people", DIFFICULTY).unwrap();

    assert!(matches!(
        Ledger::open(kv_store, "pets", DIFFICULTY),
        Err(LedgerError::CorruptStore(InvalidBlock::WrongGenesis))
    ));
}

#[test]
fn genesis_is_deterministic_per_table() {
    assert_eq!(Block::genesis("people"), Block::genesis("people"));
    assert_ne!(Block::genesis("people").hash(), Block::genesis("pets").hash());
    assert!(Block::genesis("people").is_correctly_signed());
}

#[test]
fn first_allow_list_must_authorize_its_writer() {
    let owner = Keypair::generate();
    let stranger = Keypair::generate();
    let ledger = open("people");

    assert!(is_unauthorized(ledger.append(&owner, BlockKind::Row, vec![person("ann", 31)])));
    assert!(is_unauthorized(ledger.append(
        &owner,
        BlockKind::AuthorizedKeys,
        vec![Value::Text(stranger.public_key_string())]
    )));
    assert_eq!(ledger.len(), 1);

    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    assert_eq!(ledger.allow_list(), vec![owner.public_key_string()]);
}

#[test]
fn only_authorized_keys_can_append() {
    let owner = Keypair::generate();
    let stranger = Keypair::generate();
    let ledger = bootstrapped("people", &owner);

    assert!(is_unauthorized(ledger.append(&stranger, BlockKind::Row, vec![person("eve", 1)])));
    // A second allow-list is not a bootstrap, so the stranger cannot let itself in either.
    assert!(is_unauthorized(ledger.append(
        &stranger,
        BlockKind::AuthorizedKeys,
        vec![Value::Text(stranger.public_key_string())]
    )));

    let block = ledger.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();
    assert_eq!(block.id, BlockId::new(3));
}

#[test]
fn latest_allow_list_replaces_earlier_ones() {
    let owner = Keypair::generate();
    let successor = Keypair::generate();
    let ledger = bootstrapped("people", &owner);

    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(successor.public_key_string())])
        .unwrap();

    assert_eq!(ledger.allow_list(), vec![successor.public_key_string()]);
    assert!(is_unauthorized(ledger.append(&owner, BlockKind::Row, vec![person("ann", 31)])));
    assert!(ledger.append(&successor, BlockKind::Row, vec![person("bob", 45)]).is_ok());
}

#[test]
fn genesis_and_unstorable_data_cannot_be_appended() {
    let owner = Keypair::generate();
    let ledger = bootstrapped("people", &owner);

    assert!(matches!(
        ledger.append(&owner, BlockKind::Genesis, vec![]),
        Err(LedgerError::Invalid(InvalidBlock::UnexpectedGenesis))
    ));
    assert!(matches!(
        ledger.append(&owner, BlockKind::Row, vec![Value::Float(f64::NAN)]),
        Err(LedgerError::UnstorableData)
    ));
    assert_eq!(ledger.len(), 2);
}

#[test]
fn appended_blocks_are_linked_mined_and_signed() {
    let owner = Keypair::generate();
    let ledger = bootstrapped("people", &owner);
    for (name, age) in [("ann", 31), ("bob", 45), ("cat", 27)] {
        ledger.append(&owner, BlockKind::Row, vec![person(name, age)]).unwrap();
    }

    let chain = ledger.snapshot();
    assert_eq!(chain.len(), 5);
    for window in chain.windows(2) {
        let (prev, block) = (&window[0], &window[1]);
        assert_eq!(block.id, prev.id.next());
        assert_eq!(block.previous_hash, prev.hash());
        assert!(valid_proof(prev.proof, block.proof, DIFFICULTY));
        assert!(block.is_correctly_signed());
        assert_eq!(block.signer, owner.public_bytes());
    }
    assert!(ledger.is_valid_chain(&chain));
}

#[test]
fn try_extend_appends_only_the_next_valid_block() {
    let owner = Keypair::generate();
    let source = bootstrapped("people", &owner);
    source.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();
    let blocks = source.snapshot();

    let replica = open("people");
    assert_eq!(replica.try_extend(blocks[2].clone()).unwrap(), ExtendOutcome::Behind);
    assert_eq!(replica.try_extend(blocks[1].clone()).unwrap(), ExtendOutcome::Extended);
    assert_eq!(replica.try_extend(blocks[1].clone()).unwrap(), ExtendOutcome::Known);

    let mut tampered = blocks[2].clone();
    tampered.data = vec![person("mallory", 99)];
    assert!(matches!(
        replica.try_extend(tampered).unwrap(),
        ExtendOutcome::Rejected(InvalidBlock::InvalidSignature { .. })
    ));

    let mut unlinked = blocks[2].clone();
    unlinked.previous_hash = blocks[0].hash();
    assert!(matches!(
        replica.try_extend(unlinked).unwrap(),
        ExtendOutcome::Rejected(InvalidBlock::BrokenLink { .. })
    ));

    assert_eq!(replica.try_extend(blocks[2].clone()).unwrap(), ExtendOutcome::Extended);
    assert_eq!(replica.snapshot(), blocks);
}

#[test]
fn try_extend_rejects_conflicting_and_unauthorized_blocks() {
    let owner = Keypair::generate();
    let stranger = Keypair::generate();

    let replica = bootstrapped("people", &owner);
    replica.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();

    // A fork bootstrapped by someone else conflicts at block 2.
    let fork = bootstrapped("people", &stranger);
    assert!(matches!(
        replica.try_extend(fork.last()).unwrap(),
        ExtendOutcome::Rejected(InvalidBlock::Conflicting { .. })
    ));

    // A block the stranger built on top of the replica's chain is not authorized.
    let copy = open("people");
    copy.try_replace(replica.snapshot()).unwrap();
    let mut forged = copy.snapshot();
    let last = forged.last().unwrap().clone();
    let block = Block::new(
        &stranger,
        last.id.next(),
        BlockKind::Row,
        vec![person("eve", 1)],
        Timestamp::now(),
        proof_of_work(last.proof, DIFFICULTY),
        last.hash(),
    )
    .unwrap();
    assert!(matches!(
        replica.try_extend(block.clone()).unwrap(),
        ExtendOutcome::Rejected(InvalidBlock::Unauthorized { .. })
    ));

    forged.push(block);
    assert!(!replica.is_valid_chain(&forged));
}

#[test]
fn try_replace_adopts_only_longer_valid_chains() {
    let owner = Keypair::generate();
    let longer = bootstrapped("people", &owner);
    longer.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();

    let replica = bootstrapped("people", &owner);
    assert_eq!(
        replica.try_replace(longer.snapshot()).unwrap(),
        ReplaceOutcome::Replaced { old_len: 2, new_len: 3 }
    );
    assert_eq!(replica.snapshot(), longer.snapshot());
    assert_eq!(replica.try_replace(longer.snapshot()).unwrap(), ReplaceOutcome::NotLonger);

    let other_table = bootstrapped("pets", &owner);
    for name in ["rex", "tom", "kit"] {
        other_table.append(&owner, BlockKind::Row, vec![person(name, 3)]).unwrap();
    }
    assert_eq!(
        replica.try_replace(other_table.snapshot()).unwrap(),
        ReplaceOutcome::Rejected(InvalidBlock::WrongGenesis)
    );

    longer.append(&owner, BlockKind::Row, vec![person("bob", 45)]).unwrap();
    longer.append(&owner, BlockKind::Row, vec![person("cat", 27)]).unwrap();
    let mut gapped = longer.snapshot();
    gapped.remove(2);
    assert!(matches!(
        replica.try_replace(gapped).unwrap(),
        ReplaceOutcome::Rejected(InvalidBlock::WrongId { .. })
    ));
    assert_eq!(replica.len(), 3);
}

#[test]
fn replaced_chain_is_persisted() {
    let owner = Keypair::generate();
    let longer = bootstrapped("people", &owner);
    longer.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();
    longer.append(&owner, BlockKind::Row, vec![person("bob", 45)]).unwrap();

    let kv_store = MemDB::new();
    let replica = Ledger::open(kv_store.clone(), "people", DIFFICULTY).unwrap();
    replica.try_replace(longer.snapshot()).unwrap();
    drop(replica);

    // One key per block, plus the chain length.
    assert_eq!(kv_store.len(), 5);
    let reopened = Ledger::open(kv_store, "people", DIFFICULTY).unwrap();
    assert_eq!(reopened.snapshot(), longer.snapshot());
}

#[test]
fn wait_for_change_wakes_up_on_append() {
    let owner = Keypair::generate();
    let ledger = bootstrapped("people", &owner);
    let generation = ledger.generation();

    let appender = {
        let ledger = ledger.clone();
        let owner = owner.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            ledger.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();
        })
    };

    let next = ledger.wait_for_change(generation, Duration::from_secs(5));
    assert!(next > generation);
    appender.join().unwrap();
    assert_eq!(ledger.len(), 3);
}

#[test]
fn wait_for_change_times_out_without_changes() {
    let ledger = open("people");
    let generation = ledger.generation();
    assert_eq!(ledger.wait_for_change(generation, Duration::from_millis(20)), generation);
}

#[test]
fn proof_of_work_finds_smallest_valid_proof() {
    let difficulty = Difficulty::new(2);
    let proof = proof_of_work(100, difficulty);

    assert!(valid_proof(100, proof, difficulty));
    assert!((0..proof).all(|smaller| !valid_proof(100, smaller, difficulty)));
    assert!(valid_proof(100, 0, Difficulty::new(0)));
}

#[test]
fn difficulty_is_capped() {
    assert_eq!(Difficulty::new(200), Difficulty::MAX);
    assert_eq!(Difficulty::new(Difficulty::MAX.int()), Difficulty::MAX);
    assert_eq!(Difficulty::new(3).int(), 3);
}

#[test]
fn values_nested_too_deeply_are_refused() {
    let owner = Keypair::generate();
    let ledger = bootstrapped("people", &owner);

    let nested = |depth: usize| (0..depth).fold(Value::Null, |inner, _| Value::List(vec![inner]));

    let deepest = nested(MAX_NESTING);
    assert!(deepest.is_storable());
    ledger.append(&owner, BlockKind::Row, vec![deepest]).unwrap();

    let too_deep = nested(MAX_NESTING + 1);
    assert!(!too_deep.is_storable());
    assert!(matches!(
        ledger.append(&owner, BlockKind::Row, vec![too_deep]),
        Err(LedgerError::UnstorableData)
    ));
    assert_eq!(ledger.len(), 3);
}
