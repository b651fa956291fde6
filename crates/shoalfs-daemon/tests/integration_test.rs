// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end tests: real client facade against a real daemon and engine

use std::net::{Shutdown, TcpListener};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use shoalfs_client::Client;
use shoalfs_daemon::{serve, Session};
use shoalfs_engine::{Engine, EngineConfig};
use shoalfs_proto::DirList;

fn engine_in(tmp: &TempDir) -> Arc<Engine> {
    let config = EngineConfig {
        database_path: tmp.path().join("db"),
        storage_path: tmp.path().join("storage"),
    };
    Arc::new(Engine::open(&config).unwrap())
}

fn start_daemon() -> (String, TempDir) {
    let tmp = TempDir::new().unwrap();
    let engine = engine_in(&tmp);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || serve(listener, engine));
    (addr, tmp)
}

fn names(client: &Client, path: &str) -> Vec<String> {
    DirList::from_bytes(client.read_dir(path).unwrap())
        .names()
        .unwrap()
}

#[test]
fn fresh_daemon_lists_only_dot_entries() {
    let (addr, _tmp) = start_daemon();
    let client = Client::new(addr);
    assert_eq!(names(&client, "/"), vec![".", ".."]);
}

#[test]
fn end_to_end_directory_and_file_lifecycle() {
    let (addr, _tmp) = start_daemon();
    let client = Client::new(addr);

    client.create_dir("/foo/", 0o755).unwrap();
    let attr = client.get_file_attr("/foo/").unwrap();
    assert_eq!(attr.mode, libc::S_IFDIR as u32 | 0o777);
    assert_eq!(attr.nlink, 2);
    assert_eq!(names(&client, "/"), vec![".", "..", "foo/"]);

    client.create_file("/foo/bar", 0o644).unwrap();
    assert_eq!(client.write_file("/foo/bar", b"hello", 0).unwrap(), 5);
    assert_eq!(client.read_file("/foo/bar", 5, 0).unwrap(), b"hello");

    let attr = client.get_file_attr("/foo/bar").unwrap();
    assert_eq!(attr.mode, libc::S_IFREG as u32 | 0o777);
    assert_eq!(attr.nlink, 1);

    assert_eq!(client.create_file("/foo/bar", 0o644), Err(libc::EEXIST));
    assert_eq!(client.create_dir("/foo/", 0o755), Err(libc::EEXIST));
    assert_eq!(client.get_file_attr("/nope"), Err(libc::ENOENT));

    assert_eq!(names(&client, "/foo/"), vec![".", "..", "bar"]);

    client.open_file("/foo/bar", libc::O_RDWR).unwrap();
    assert_eq!(client.open_file("/foo/", libc::O_RDONLY), Err(libc::EISDIR));
}

#[test]
fn type_mismatches_surface_posix_errors() {
    let (addr, _tmp) = start_daemon();
    let client = Client::new(addr);

    client.create_file("/plain", 0o644).unwrap();
    assert_eq!(client.read_dir("/plain"), Err(libc::ENOTDIR));
    assert_eq!(client.read_file("/", 16, 0), Err(libc::EISDIR));
    assert_eq!(client.create_file("/missing/x", 0o644), Err(libc::ENOENT));
    assert_eq!(client.create_dir("/missing/x/", 0o755), Err(libc::ENOENT));
}

#[test]
fn writes_and_reads_honor_offsets() {
    let (addr, _tmp) = start_daemon();
    let client = Client::new(addr);

    client.create_file("/off", 0o644).unwrap();
    client.write_file("/off", b"abcdef", 1000).unwrap();
    assert_eq!(client.read_file("/off", 4, 1001).unwrap(), b"bcde");
    // a read past the written range comes back short
    assert_eq!(client.read_file("/off", 64, 1004).unwrap(), b"ef");
}

#[test]
fn concurrent_operations_multiplex_one_connection() {
    let (addr, _tmp) = start_daemon();
    let client = Arc::new(Client::new(addr));
    client.create_dir("/load/", 0o755).unwrap();

    let mut workers = Vec::new();
    for i in 0..16 {
        let client = Arc::clone(&client);
        workers.push(thread::spawn(move || {
            let path = format!("/load/file-{i}");
            client.create_file(&path, 0o644).unwrap();
            let body = format!("payload-{i}");
            client.write_file(&path, body.as_bytes(), 0).unwrap();
            assert_eq!(
                client.read_file(&path, body.len() as u32, 0).unwrap(),
                body.as_bytes()
            );
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(names(&client, "/load/").len(), 2 + 16);
}

#[test]
fn daemon_restart_reconnects_transparently() {
    // fixed port so the restarted daemon reoccupies the endpoint
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    let addr = format!("127.0.0.1:{port}");

    let tmp1 = TempDir::new().unwrap();
    let engine1 = engine_in(&tmp1);
    let listener1 = TcpListener::bind(&addr).unwrap();
    let (stream_tx, stream_rx) = mpsc::channel();
    let first_daemon = thread::spawn(move || {
        let (stream, _) = listener1.accept().unwrap();
        stream_tx.send(stream.try_clone().unwrap()).unwrap();
        Session::new(stream, engine1).unwrap().run();
    });

    let client = Client::new(addr.clone());
    client.get_file_attr("/").unwrap();

    // kill the first daemon: every socket it owns goes with it
    let raw = stream_rx.recv().unwrap();
    raw.shutdown(Shutdown::Both).unwrap();
    first_daemon.join().unwrap();
    thread::sleep(Duration::from_millis(200));

    let tmp2 = TempDir::new().unwrap();
    let engine2 = engine_in(&tmp2);
    let listener2 = TcpListener::bind(&addr).unwrap();
    thread::spawn(move || serve(listener2, engine2));

    // the next call reconnects without any explicit recovery step
    client.get_file_attr("/").unwrap();
}
