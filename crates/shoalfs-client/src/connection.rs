// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One long-lived TCP connection to a daemon
//!
//! Many operations are in flight on the connection at once; a dedicated
//! receive thread is the only writer of slot result state and dispatches
//! completions by correlation id. Connects lazily, reconnects lazily after
//! any teardown, and serializes outbound frames behind a send lock so a
//! partially written frame never interleaves with another request.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use shoalfs_proto::{
    validate_response_header, Request, ResponseHeader, RESPONSE_HEADER_SIZE,
};

use crate::slots::{FillOutcome, Reply, SlotTable, CALL_TIMEOUT};

pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    address: String,
    connected: AtomicBool,
    connect_lock: Mutex<()>,
    /// The stream slot doubles as the send lock.
    stream: Mutex<Option<TcpStream>>,
    /// Bumped on every successful connect; a receive thread may only tear
    /// down the connection it was spawned for.
    epoch: AtomicU64,
    slots: SlotTable,
}

impl Connection {
    /// A connection handle for the given `host:port`. The socket is opened
    /// lazily on first use.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: address.into(),
                connected: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                stream: Mutex::new(None),
                epoch: AtomicU64::new(0),
                slots: SlotTable::new(),
            }),
        }
    }

    /// Issue one request and wait for its response.
    ///
    /// `meta_capacity`/`data_capacity` bound what the response may carry
    /// into this caller's buffers. Returns the raw reply (whose `status`
    /// is 0 or a negative errno from the daemon), or a positive errno:
    /// `EIO` when the endpoint is unreachable or the send fails,
    /// `ETIMEDOUT` when the slot wait expires.
    pub fn call(
        &self,
        request: &Request,
        meta_capacity: usize,
        data_capacity: usize,
    ) -> Result<Reply, i32> {
        self.ensure_connected()?;

        let id = self.shared.slots.acquire();
        // In flight before the frame can reach the wire; a fast reply must
        // find the slot waiting.
        self.shared.slots.begin(id, meta_capacity, data_capacity);

        let frame = match request.encode_frame(id as u32, 0) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode request");
                self.shared.slots.abort(id);
                return Err(libc::EIO);
            }
        };
        if let Err(e) = self.send_frame(&frame) {
            warn!(error = %e, "send failed");
            self.shared.slots.abort(id);
            self.shared.disconnect();
            return Err(libc::EIO);
        }

        match self.shared.slots.wait(id, CALL_TIMEOUT) {
            Some(reply) => Ok(reply),
            None => {
                debug!(id, op = ?request.op(), "request timed out");
                Err(libc::ETIMEDOUT)
            }
        }
    }

    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.shared.stream.lock().unwrap();
        match guard.as_mut() {
            Some(stream) => stream.write_all(frame),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "disconnected")),
        }
    }

    /// Lazy, double-checked reconnect. Spawns the receive thread for the
    /// fresh socket.
    fn ensure_connected(&self) -> Result<(), i32> {
        if self.shared.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.shared.connect_lock.lock().unwrap();
        if self.shared.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let stream = match TcpStream::connect(&self.shared.address) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(address = %self.shared.address, error = %e, "connect failed");
                return Err(libc::EIO);
            }
        };
        let reader = stream.try_clone().map_err(|_| libc::EIO)?;
        *self.shared.stream.lock().unwrap() = Some(stream);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.connected.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || receive_loop(shared, reader, epoch));
        info!(address = %self.shared.address, "connected");
        Ok(())
    }
}

impl Shared {
    /// Idempotent teardown; the next call reconnects.
    fn disconnect(&self) {
        self.teardown(None);
    }

    fn teardown(&self, epoch: Option<u64>) {
        let _guard = self.connect_lock.lock().unwrap();
        if let Some(epoch) = epoch {
            // a newer connection already took over; leave it alone
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
        }
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(stream) = self.stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        debug!(address = %self.address, "disconnected");
    }
}

/// Dedicated receive loop: the only thread that completes slots. Late
/// replies (the caller already timed out) are drained byte-for-byte;
/// anything that violates the framing tears the connection down.
fn receive_loop(shared: Arc<Shared>, mut reader: TcpStream, epoch: u64) {
    loop {
        let mut header_bytes = [0u8; RESPONSE_HEADER_SIZE];
        if reader.read_exact(&mut header_bytes).is_err() {
            debug!(address = %shared.address, "receive loop: connection closed");
            break;
        }
        let header = ResponseHeader::parse(&header_bytes);
        if let Err(e) = validate_response_header(&header) {
            warn!(address = %shared.address, error = %e, "invalid response header");
            break;
        }
        if !SlotTable::id_in_range(header.id) {
            warn!(address = %shared.address, id = header.id, "response id out of range");
            break;
        }

        let total = header.total_length as usize;
        match shared.slots.fill_from(
            header.id as u16,
            header.status,
            header.flags,
            total,
            &mut reader,
        ) {
            Ok(FillOutcome::Done) => {}
            Ok(FillOutcome::Late) => {
                debug!(id = header.id, "discarding late reply");
                if drain(&mut reader, total).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(address = %shared.address, error = %e, "failed to deliver response");
                break;
            }
        }
    }
    shared.teardown(Some(epoch));
}

fn drain(reader: &mut TcpStream, count: usize) -> io::Result<()> {
    let copied = io::copy(&mut reader.by_ref().take(count as u64), &mut io::sink())?;
    if copied as usize != count {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read while draining a late reply",
        ));
    }
    Ok(())
}
