//! Tests for the TCP networking provider: the wire framing on its own, and whole tables replicating
//! over loopback sockets with directory-backed stores.

mod common;

use std::{
    io::{Cursor, ErrorKind, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::Path,
    thread,
    time::Duration,
};

use log::LevelFilter;
use tablechain::{
    config::Configuration,
    jobs::{Instruction, Job},
    networking::{
        tcp::{encode_frame, read_frame, Envelope, TcpNetwork, DEFAULT_MAX_FRAME_LEN, MAX_SEND_FAILURES},
        Message, Network,
    },
    table::{Connection, Table},
    types::{
        basic::{Difficulty, PeerAddr},
        block::Block,
        crypto_primitives::Keypair,
        value::{Value, MAX_NESTING},
    },
};

use common::{
    fixtures::{eventually, person},
    logging::setup_logger,
};

fn configuration(data_dir: &Path) -> Configuration {
    Configuration::builder()
        .table_name("people")
        .data_dir(data_dir)
        .pow_difficulty(Difficulty::new(1))
        .sync_timeout(Duration::from_secs(10))
        .execute_timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_millis(10))
        .build()
}

/// A `NewBlock` frame whose block carries one value: `depth` lists, each holding the next, around a null.
fn nested_block_frame(depth: usize) -> Vec<u8> {
    const MARKER: &str = "nesting-marker";
    let envelope = Envelope {
        origin: PeerAddr::new("127.0.0.1", 5000),
        message: Message::NewBlock(Block::genesis(MARKER)),
    };
    let frame = encode_frame(&envelope).unwrap();

    // The genesis block's only value is the marker text: a tag byte, a u32 length, then the text.
    let marker_at = frame.windows(MARKER.len()).position(|window| window == MARKER.as_bytes()).unwrap();
    let value_at = marker_at - 5;

    let mut nested = Vec::with_capacity(depth * 5 + 1);
    for _ in 0..depth {
        nested.push(6); // list
        nested.extend_from_slice(&1u32.to_le_bytes());
    }
    nested.push(0); // null

    let mut body = frame[4..value_at].to_vec();
    body.extend_from_slice(&nested);
    body.extend_from_slice(&frame[marker_at + MARKER.len()..]);

    let mut nested_frame = (body.len() as u32).to_le_bytes().to_vec();
    nested_frame.extend_from_slice(&body);
    nested_frame
}

#[test]
fn frames_carry_their_origin() {
    let envelope = Envelope {
        origin: PeerAddr::new("127.0.0.1", 5000),
        message: Message::Peers(vec![PeerAddr::new("127.0.0.1", 5001)]),
    };
    let frame = encode_frame(&envelope).unwrap();
    assert_eq!(u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize, frame.len() - 4);

    let decoded = read_frame(&mut Cursor::new(frame), DEFAULT_MAX_FRAME_LEN).unwrap();
    assert_eq!(decoded, envelope);
}

#[test]
fn oversized_and_truncated_frames_are_refused() {
    let envelope = Envelope {
        origin: PeerAddr::new("127.0.0.1", 5000),
        message: Message::GetChain,
    };
    let frame = encode_frame(&envelope).unwrap();

    let oversized = read_frame(&mut Cursor::new(frame.clone()), 4).unwrap_err();
    assert_eq!(oversized.kind(), ErrorKind::InvalidData);

    let truncated = read_frame(&mut Cursor::new(frame[..frame.len() - 1].to_vec()), DEFAULT_MAX_FRAME_LEN).unwrap_err();
    assert_eq!(truncated.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn deeply_nested_values_are_refused() {
    let decoded = read_frame(&mut Cursor::new(nested_block_frame(MAX_NESTING)), DEFAULT_MAX_FRAME_LEN).unwrap();
    match decoded.message {
        Message::NewBlock(block) => assert!(block.data[0].is_storable()),
        other => panic!("expected a block, got {:?}", other),
    }

    let refused = read_frame(&mut Cursor::new(nested_block_frame(MAX_NESTING + 1)), DEFAULT_MAX_FRAME_LEN).unwrap_err();
    assert_eq!(refused.kind(), ErrorKind::InvalidData);

    let frame = nested_block_frame(1_000_000);
    assert!(frame.len() < DEFAULT_MAX_FRAME_LEN as usize);
    let refused = read_frame(&mut Cursor::new(frame), DEFAULT_MAX_FRAME_LEN).unwrap_err();
    assert_eq!(refused.kind(), ErrorKind::InvalidData);
}

#[test]
fn replica_survives_a_deeply_nested_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::open(Connection::default(), configuration(dir.path())).unwrap();

    let mut stream = TcpStream::connect(table.local_addr().to_socket_addr().unwrap()).unwrap();
    // The replica may hang up as soon as it has refused the frame.
    let _ = stream.write_all(&nested_block_frame(1_000_000));
    drop(stream);
    thread::sleep(Duration::from_millis(200));

    table.insert(person("ann", 31)).unwrap();
    assert_eq!(table.select().len(), 1);
    assert_eq!(table.ledger().len(), 3);
}

#[test]
fn failing_peers_are_unregistered() {
    let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut sender = TcpNetwork::bind(any_port, None, DEFAULT_MAX_FRAME_LEN).unwrap();
    let mut receiver = TcpNetwork::bind(any_port, None, DEFAULT_MAX_FRAME_LEN).unwrap();

    // Nothing listens on a port that was bound and released.
    let dead = PeerAddr::from(TcpListener::bind(any_port).unwrap().local_addr().unwrap());
    assert!(sender.register_peer(dead.clone()));
    assert!(sender.register_peer(receiver.local_addr()));

    for _ in 0..MAX_SEND_FAILURES {
        sender.broadcast(Message::GetPeers);
    }

    let mut received = 0;
    eventually(Duration::from_secs(10), || {
        while let Some((origin, message)) = receiver.recv() {
            assert_eq!(origin, sender.local_addr());
            assert_eq!(message, Message::GetPeers);
            received += 1;
        }
        received == MAX_SEND_FAILURES
    });
    eventually(Duration::from_secs(10), || sender.peers() == vec![receiver.local_addr()]);

    // The receiver's writer is unaffected.
    sender.broadcast(Message::GetChain);
    eventually(Duration::from_secs(10), || {
        matches!(receiver.recv(), Some((_, Message::GetChain)))
    });
}

#[test]
fn tables_replicate_and_execute_over_tcp() {
    setup_logger(LevelFilter::Info);

    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let mut first = Table::open(Connection::default(), configuration(first_dir.path())).unwrap();
    let first_addr = first.local_addr();
    assert_eq!(first_addr.host, "127.0.0.1");
    assert_ne!(first_addr.port, 0);

    let second_keypair = Keypair::generate();
    first
        .set_authorized_keys(vec![first.public_key(), second_keypair.public_key_string()])
        .unwrap();
    first.insert(person("ann", 31)).unwrap();

    let connection = Connection::builder()
        .host(first_addr.host.clone())
        .host_port(first_addr.port)
        .private_key(second_keypair.private_key_string())
        .public_key(second_keypair.public_key_string())
        .build();
    let mut second = Table::open(connection, configuration(second_dir.path())).unwrap();
    assert_eq!(second.select().len(), 1);

    second.insert(person("bob", 45)).unwrap();
    eventually(Duration::from_secs(10), || first.select().len() == 2);

    let outcome = second
        .execute(Job::new(vec![Instruction::CountRows { into: "n".into() }]), first_addr)
        .unwrap();
    assert_eq!(outcome.variables().unwrap().get("n"), Some(&Value::Int(2)));

    eventually(Duration::from_secs(10), || first.ledger().len() == second.ledger().len());
    assert_eq!(first.ledger().snapshot(), second.ledger().snapshot());
}
