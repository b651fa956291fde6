// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Connection-level tests against scripted stub daemons

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shoalfs_client::Client;
use shoalfs_proto::{encode_response, OpCode, Request, RequestHeader, REQUEST_HEADER_SIZE};

/// Read one whole request frame off the stream.
fn read_request(stream: &mut TcpStream) -> (u32, Request) {
    let mut header_bytes = [0u8; REQUEST_HEADER_SIZE];
    stream.read_exact(&mut header_bytes).expect("request header");
    let header = RequestHeader::parse(&header_bytes);
    let mut body = vec![0u8; header.total_length as usize];
    stream.read_exact(&mut body).expect("request body");
    let op = OpCode::try_from(header.op).expect("known op");
    (header.id, Request::decode_body(op, &body).expect("request body decodes"))
}

/// Respond to a `ReadFile` request with the request's own path as data, so
/// callers can tell whose response they got.
fn echo_path_response(id: u32, request: &Request) -> Vec<u8> {
    encode_response(id, 0, 0, &[], request.path().as_bytes())
}

#[test]
fn out_of_order_responses_correlate_by_id() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // hold both requests, then answer them in reverse arrival order
        let first = read_request(&mut stream);
        let second = read_request(&mut stream);
        for (id, request) in [&second, &first] {
            stream.write_all(&echo_path_response(*id, request)).unwrap();
        }
        stream
    });

    let client = Arc::new(Client::new(addr));
    let mut workers = Vec::new();
    for path in ["/alpha", "/beta"] {
        let client = Arc::clone(&client);
        workers.push(thread::spawn(move || {
            let data = client.read_file(path, 32, 0).unwrap();
            assert_eq!(data, path.as_bytes());
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    drop(server.join().unwrap());
}

#[test]
fn late_reply_is_drained_and_connection_survives() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let (slow_id, slow_request) = read_request(&mut stream);
        // outlive the client's 3-second slot timeout
        thread::sleep(Duration::from_secs(4));
        stream
            .write_all(&echo_path_response(slow_id, &slow_request))
            .unwrap();
        let (fast_id, fast_request) = read_request(&mut stream);
        stream
            .write_all(&echo_path_response(fast_id, &fast_request))
            .unwrap();
        stream
    });

    let client = Client::new(addr);

    let started = Instant::now();
    assert_eq!(client.read_file("/slow", 32, 0), Err(libc::ETIMEDOUT));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3), "timed out after {waited:?}");
    assert!(waited < Duration::from_secs(4), "timed out after {waited:?}");

    // the stale reply for /slow must be discarded, not delivered here
    let data = client.read_file("/fast", 32, 0).unwrap();
    assert_eq!(data, b"/fast");
    drop(server.join().unwrap());
}

#[test]
fn reconnects_after_daemon_restart() {
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    let addr = format!("127.0.0.1:{port}");

    let serve_once = |listener: TcpListener| {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (id, request) = read_request(&mut stream);
            stream.write_all(&echo_path_response(id, &request)).unwrap();
            let _ = stream.shutdown(Shutdown::Both);
        })
    };

    let first_daemon = serve_once(TcpListener::bind(&addr).unwrap());
    let client = Client::new(addr.clone());
    assert_eq!(client.read_file("/before", 32, 0).unwrap(), b"/before");
    first_daemon.join().unwrap();

    // let the receive thread notice the close and flag the connection dead
    thread::sleep(Duration::from_millis(200));

    let second_daemon = serve_once(TcpListener::bind(&addr).unwrap());
    assert_eq!(client.read_file("/after", 32, 0).unwrap(), b"/after");
    second_daemon.join().unwrap();
}

#[test]
fn oversized_response_id_tears_the_connection_down() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let (_, _) = read_request(&mut stream);
        // an id far outside the slot ring is a protocol violation
        stream
            .write_all(&encode_response(u32::MAX, 0, 0, &[], &[]))
            .unwrap();
        stream
    });

    let client = Client::new(addr);
    // the bogus frame is ignored and the connection torn down, so the
    // caller times out rather than seeing a corrupted reply
    assert_eq!(client.read_file("/x", 8, 0), Err(libc::ETIMEDOUT));
    drop(server.join().unwrap());
}
