//! Transport Adapter
//!
//! Wraps a blocking byte-transport behind two operations: send exactly N
//! bytes, and receive until a complete frame is in the scratch buffer.
//! Framing is entirely defined by the LEN-prefix rule (§4.2.4); this module
//! introduces none of its own.

use std::io;

use log::{debug, trace};

use crate::buffer::FrameBuffer;
use crate::error::Result;

/// A blocking byte-stream in both directions. Any transport meeting this
/// contract — a real hardware channel, a serial port, or an in-memory pair —
/// can drive a `SessionEngine`.
pub trait Transport {
    /// Write as many bytes as the transport currently accepts. May return
    /// fewer than `buf.len()`, including zero; the caller polls until done.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read as many bytes as are currently available into `buf`. May return
    /// zero; the caller polls until data arrives.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Blocking send: loops over `transport.write` until every byte is accepted.
pub fn send_all<T: Transport>(transport: &mut T, bytes: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        let n = transport.write(&bytes[sent..])?;
        if n > 0 {
            trace!("sent {n} bytes ({sent}/{} total)", bytes.len());
        }
        sent += n;
    }
    Ok(())
}

/// Blocking receive: reads into `buf` until it holds a complete frame
/// (§4.2.4). `buf` must be empty on entry; this function does not clear it.
///
/// Each underlying read is bounded to exactly the bytes still needed to
/// complete the current frame (one byte while the LEN prefix itself is
/// outstanding, then `LEN - len` once it is known), so a transport that has
/// more than one frame queued up never has the second frame's bytes pulled
/// into this one's buffer.
pub fn receive_frame<T: Transport>(transport: &mut T, buf: &mut FrameBuffer) -> Result<()> {
    while !buf.is_frame_complete() {
        let capacity = buf.capacity_remaining();
        if capacity == 0 {
            break;
        }
        let want = match buf.declared_len() {
            Some(declared) => declared.saturating_sub(buf.len()).clamp(1, capacity),
            None => 1,
        };
        let n = transport.read(&mut buf.spare_mut()[..want])?;
        if n > 0 {
            buf.advance(n);
            trace!("received {n} bytes ({}/{:?} so far)", buf.len(), buf.declared_len());
        }
    }
    debug!("frame complete: {} bytes", buf.len());
    Ok(())
}

/// An in-memory byte-stream pair: writes to one end are readable from the
/// other. Used by the demo binaries and the engine's own test suite to play
/// the host side of a session without real hardware (§10.5, §10.7).
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    /// Bytes this side has written, waiting to be read by the peer.
    outbox: std::collections::VecDeque<u8>,
    /// Bytes the peer has written, waiting to be read by this side.
    inbox: std::collections::VecDeque<u8>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connected pair: `a`'s writes are `b`'s reads and vice versa.
    pub fn pair() -> (LoopbackHalf, LoopbackHalf) {
        let a_to_b = std::sync::Arc::new(std::sync::Mutex::new(std::collections::VecDeque::new()));
        let b_to_a = std::sync::Arc::new(std::sync::Mutex::new(std::collections::VecDeque::new()));
        (
            LoopbackHalf {
                outbox: a_to_b.clone(),
                inbox: b_to_a.clone(),
            },
            LoopbackHalf {
                outbox: b_to_a,
                inbox: a_to_b,
            },
        )
    }
}

impl Transport for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbox.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbox.pop_front().unwrap();
        }
        Ok(n)
    }
}

/// One side of a connected loopback pair, shareable across two local
/// engines (e.g. a device-side `SessionEngine` and a hand-driven host-side
/// test harness) within a single process.
#[derive(Debug, Clone)]
pub struct LoopbackHalf {
    outbox: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
    inbox: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
}

impl Transport for LoopbackHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbox.lock().unwrap().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbox = self.inbox.lock().unwrap();
        let n = buf.len().min(inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().unwrap();
        }
        Ok(n)
    }
}

/// Adapts any blocking `std::io::Read + std::io::Write` byte-stream (e.g. a
/// serial port) to the `Transport` contract.
pub struct StdIoTransport<S> {
    stream: S,
}

impl<S> StdIoTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: io::Read + io::Write> Transport for StdIoTransport<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
