mod common;

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread::spawn;

use common::{MockServer, MockSubstrate};
use taintrace::error::Error;
use taintrace::replay::Coordinator;
use taintrace::server::{ReplayServer, Request, Response, SocketServer};
use taintrace::taint::TaintStore;
use uuid::Uuid;

#[test]
fn test_taint_only_outside_replay() {
    let coordinator = Coordinator::new();
    let mut store = TaintStore::new();
    let mut substrate = MockSubstrate::new();
    substrate.load(0x2000, b"AAAA");

    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);
    assert!(store.is_mem_tainted(0x2000, 4));
    assert!(!store.is_mem_tainted(0x2004, 1));
    assert_eq!(coordinator.index(), 0);
    assert_eq!(substrate.bytes(0x2000, 4), b"AAAA");
}

#[test]
fn test_no_mutate_advances_index() {
    let run_id = Uuid::new_v4();
    let server = MockServer::new();
    let coordinator = Coordinator::replaying(run_id, Box::new(server.clone()), false);
    let mut store = TaintStore::new();
    let mut substrate = MockSubstrate::new();
    substrate.load(0x2000, b"AAAA");

    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);
    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);

    assert!(store.is_mem_tainted(0x2000, 4));
    assert_eq!(substrate.bytes(0x2000, 4), b"AAAA");
    assert_eq!(coordinator.index(), 2);
    assert!(server.requests().is_empty());
}

#[test]
fn test_mutation_replaces_buffer() {
    let run_id = Uuid::new_v4();
    let mut server = MockServer::new();
    server.mutations.insert(0, b"BBBBBBBB".to_vec());
    server.mutations.insert(1, b"C".to_vec());
    let coordinator = Coordinator::replaying(run_id, Box::new(server.clone()), true);
    let mut store = TaintStore::new();
    let mut substrate = MockSubstrate::new();
    substrate.load(0x2000, b"AAAA");

    // longer mutation is truncated to the buffer
    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);
    assert_eq!(substrate.bytes(0x2000, 5), b"BBBB\0");

    // shorter one overwrites a prefix
    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);
    assert_eq!(substrate.bytes(0x2000, 4), b"CBBB");

    assert_eq!(coordinator.index(), 2);
    assert_eq!(
        server.requests(),
        vec![
            Request::Replay {
                run_id,
                index: 0,
                size: 4
            },
            Request::Replay {
                run_id,
                index: 1,
                size: 4
            },
        ]
    );
}

#[test]
fn test_failed_fetch_still_advances() {
    let coordinator = Coordinator::replaying(Uuid::new_v4(), Box::new(MockServer::new()), true);
    let mut store = TaintStore::new();
    let mut substrate = MockSubstrate::new();
    substrate.load(0x2000, b"AAAA");

    coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 4);
    assert_eq!(coordinator.index(), 1);
    assert_eq!(substrate.bytes(0x2000, 4), b"AAAA");
    assert!(store.is_mem_tainted(0x2000, 4));
}

#[test]
fn test_concurrent_calls_get_distinct_indices() {
    let run_id = Uuid::new_v4();
    let mut server = MockServer::new();
    for i in 0..8 {
        server.mutations.insert(i, vec![i as u8]);
    }
    let coordinator =
        std::sync::Arc::new(Coordinator::replaying(run_id, Box::new(server.clone()), true));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            spawn(move || {
                let mut store = TaintStore::new();
                let mut substrate = MockSubstrate::new();
                coordinator.on_targeted_call(&mut store, &mut substrate, 0x2000, 1);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(coordinator.index(), 8);
    let mut indices: Vec<u32> = server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            Request::Replay { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    indices.sort();
    assert_eq!(indices, (0..8).collect::<Vec<u32>>());
}

/// Answer each request line on `stream` with the matching response
fn serve(stream: UnixStream, responses: Vec<Response>) -> std::thread::JoinHandle<Vec<Request>> {
    spawn(move || {
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut seen = Vec::new();
        for response in responses {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            seen.push(serde_json::from_str(&line).unwrap());
            let mut reply = serde_json::to_string(&response).unwrap();
            reply.push('\n');
            writer.write_all(reply.as_bytes()).unwrap();
        }
        seen
    })
}

#[test]
fn test_socket_round_trip() {
    let (client, server) = UnixStream::pair().unwrap();
    let run_id = Uuid::new_v4();
    let handle = serve(
        server,
        vec![
            Response::Ok,
            Response::CrashPaths {
                crash_path: PathBuf::from("/tmp/crash.json"),
                mem_dump_path: PathBuf::from("/tmp/crash.dmp"),
            },
            Response::Mutation {
                bytes: vec![1, 2, 3],
            },
        ],
    );

    let mut client = SocketServer::from_stream(PathBuf::from("pair"), client).unwrap();
    client.register_pid(run_id, 7, true).unwrap();
    let paths = client.crash_paths(7).unwrap();
    assert_eq!(paths.crash_path, PathBuf::from("/tmp/crash.json"));
    assert_eq!(paths.mem_dump_path, PathBuf::from("/tmp/crash.dmp"));
    assert_eq!(client.replay(run_id, 3, 16).unwrap(), vec![1, 2, 3]);

    let seen = handle.join().unwrap();
    assert_eq!(
        seen,
        vec![
            Request::RegisterPid {
                run_id,
                pid: 7,
                tracing: true
            },
            Request::CrashPaths { pid: 7 },
            Request::Replay {
                run_id,
                index: 3,
                size: 16
            },
        ]
    );
}

#[test]
fn test_socket_errors() {
    let (client, server) = UnixStream::pair().unwrap();
    let handle = serve(
        server,
        vec![
            Response::Error {
                message: "unknown run".to_string(),
            },
            Response::Ok,
        ],
    );

    let mut client = SocketServer::from_stream(PathBuf::from("pair"), client).unwrap();
    match client.replay(Uuid::new_v4(), 0, 4) {
        Err(Error::Protocol(message)) => assert_eq!(message, "unknown run"),
        other => panic!("unexpected {:?}", other),
    }
    // wrong kind of answer
    assert!(matches!(client.crash_paths(1), Err(Error::Protocol(_))));
    handle.join().unwrap();

    // server gone
    assert!(client.register_pid(Uuid::new_v4(), 1, false).is_err());
}

#[test]
fn test_connect_missing_socket() {
    let path = std::env::temp_dir().join(format!("{}.sock", Uuid::new_v4()));
    assert!(matches!(
        SocketServer::connect(&path),
        Err(Error::Server { .. })
    ));
}
