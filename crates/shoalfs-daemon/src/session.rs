// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-connection session: receive loop, request fan-out, response sending

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use shoalfs_engine::{Engine, EngineResult};
use shoalfs_proto::{
    encode_response, validate_request_header, Request, RequestHeader, LENGTH_FIELD_SIZE,
    MAX_FRAME_BODY, REQUEST_HEADER_SIZE,
};

/// Largest meta+data payload a response can carry.
const MAX_RESPONSE_PAYLOAD: usize = MAX_FRAME_BODY - 2 * LENGTH_FIELD_SIZE;

/// Accept loop: one session thread per connection, all sharing one engine.
pub fn serve(listener: TcpListener, engine: Arc<Engine>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                thread::spawn(move || match Session::new(stream, engine) {
                    Ok(session) => session.run(),
                    Err(e) => warn!(error = %e, "failed to set up session"),
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

pub struct Session {
    reader: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    engine: Arc<Engine>,
    peer: SocketAddr,
}

impl Session {
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        Ok(Self {
            reader: stream,
            writer,
            engine,
            peer,
        })
    }

    /// Receive loop. Reads the 16-byte header and exactly `total_length`
    /// body bytes per request (wait-all), then hands the frame to a worker.
    /// Any short read or invalid header closes the socket and exits.
    pub fn run(mut self) {
        info!(peer = %self.peer, "session started");
        loop {
            let mut header_bytes = [0u8; REQUEST_HEADER_SIZE];
            if self.reader.read_exact(&mut header_bytes).is_err() {
                debug!(peer = %self.peer, "connection closed");
                break;
            }
            let header = RequestHeader::parse(&header_bytes);
            let op = match validate_request_header(&header) {
                Ok(op) => op,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "invalid request header, closing session");
                    break;
                }
            };
            let mut body = vec![0u8; header.total_length as usize];
            if let Err(e) = self.reader.read_exact(&mut body) {
                warn!(peer = %self.peer, error = %e, "short read on request body, closing session");
                break;
            }

            let engine = Arc::clone(&self.engine);
            let writer = Arc::clone(&self.writer);
            let peer = self.peer;
            let id = header.id;
            let flags = header.flags;
            thread::spawn(move || {
                let request = match Request::decode_body(op, &body) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(peer = %peer, id, error = %e, "malformed request body, closing session");
                        if let Ok(w) = writer.lock() {
                            let _ = w.shutdown(Shutdown::Both);
                        }
                        return;
                    }
                };
                handle_request(&engine, &writer, peer, id, flags, request);
            });
        }
        let _ = self.reader.shutdown(Shutdown::Both);
        info!(peer = %self.peer, "session ended");
    }
}

/// Worker body: run the engine operation and serialize the response under
/// the session's send lock. Engine errors become negative statuses and do
/// not tear the session down.
fn handle_request(
    engine: &Engine,
    writer: &Mutex<TcpStream>,
    peer: SocketAddr,
    id: u32,
    flags: u32,
    request: Request,
) {
    debug!(peer = %peer, id, op = ?request.op(), path = request.path(), "dispatching request");
    let (mut status, mut meta, mut data) = execute(engine, &request);
    if meta.len() + data.len() > MAX_RESPONSE_PAYLOAD {
        warn!(peer = %peer, id, "response payload exceeds frame limit");
        status = -libc::EIO;
        meta = Vec::new();
        data = Vec::new();
    }
    let frame = encode_response(id, status, flags, &meta, &data);
    let mut w = writer.lock().unwrap();
    if w.write_all(&frame).is_err() {
        warn!(peer = %peer, id, "failed to send response");
        let _ = w.shutdown(Shutdown::Both);
    }
}

fn execute(engine: &Engine, request: &Request) -> (i32, Vec<u8>, Vec<u8>) {
    match request {
        Request::CreateFile { path, mode } => status_only(engine.create_file(path, *mode)),
        Request::CreateDir { path, mode } => status_only(engine.create_dir(path, *mode)),
        Request::GetFileAttr { path } => match engine.get_file_attr(path) {
            Ok(attr) => match bincode::serialize(&attr) {
                Ok(meta) => (0, meta, Vec::new()),
                Err(_) => (-libc::EIO, Vec::new(), Vec::new()),
            },
            Err(e) => (e.errno(), Vec::new(), Vec::new()),
        },
        Request::ReadDir { path } => data_reply(engine.read_dir(path)),
        Request::OpenFile { path, flags } => status_only(engine.open_file(path, *flags)),
        Request::ReadFile { path, size, offset } => {
            // never let a single read blow the frame limit
            let capped = (*size).min(MAX_RESPONSE_PAYLOAD as u32);
            data_reply(engine.read_file(path, capped, *offset))
        }
        Request::WriteFile { path, offset, data } => {
            status_only(engine.write_file(path, data, *offset).map(|_| ()))
        }
    }
}

fn status_only(result: EngineResult<()>) -> (i32, Vec<u8>, Vec<u8>) {
    match result {
        Ok(()) => (0, Vec::new(), Vec::new()),
        Err(e) => (e.errno(), Vec::new(), Vec::new()),
    }
}

fn data_reply(result: EngineResult<Vec<u8>>) -> (i32, Vec<u8>, Vec<u8>) {
    match result {
        Ok(data) => (0, Vec::new(), data),
        Err(e) => (e.errno(), Vec::new(), Vec::new()),
    }
}
