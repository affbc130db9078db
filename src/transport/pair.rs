//! Pair-socket backend (§4.4.1): a point-to-point bidirectional stream.
//!
//! The original tool binds `backend_name = "nng"` to `libnng`'s `NNG_PAIR1`
//! protocol, a message-preserving transport. This crate implements the same
//! framing — a two-byte `"TW"` literal ahead of every application frame,
//! inbound frames with a missing or wrong prefix silently dropped — over a
//! plain `TcpStream`, which needs its own length delimiter to recover
//! message boundaries from a byte stream; the `"TW"` tag is layered on top
//! of that length prefix exactly as the spec describes it, rather than
//! replacing it.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::config::Role;
use crate::transport::{ConnStateCb, ConnState, RecvCb, TransportBackend, TransportError, TRANSMIT_TIMEOUT};

const FRAME_TAG: [u8; 2] = *b"TW";
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub struct PairTransport {
    write_stream: Mutex<TcpStream>,
    shutdown_stream: TcpStream,
    reader_handle: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl PairTransport {
    pub fn create(
        role: Role,
        endpoint: &str,
        conn_state_cb: ConnStateCb,
        recv_cb: RecvCb,
    ) -> Result<PairTransport, TransportError> {
        let stream = match role {
            Role::Server => {
                let listener = TcpListener::bind(endpoint).map_err(|_| TransportError::Io)?;
                let (stream, _) = listener.accept().map_err(|_| TransportError::Io)?;
                stream
            }
            Role::Client => TcpStream::connect(endpoint).map_err(|_| TransportError::Io)?,
        };
        stream.set_nodelay(true).ok();
        let write_stream = stream.try_clone().map_err(|_| TransportError::Io)?;
        let shutdown_stream = stream.try_clone().map_err(|_| TransportError::Io)?;

        conn_state_cb(ConnState::Connected);

        let stopping = Arc::new(AtomicBool::new(false));
        let reader_handle = {
            let stopping = stopping.clone();
            std::thread::spawn(move || {
                read_loop(stream, recv_cb, conn_state_cb, stopping);
            })
        };

        Ok(PairTransport {
            write_stream: Mutex::new(write_stream),
            shutdown_stream,
            reader_handle: Some(reader_handle),
            stopping,
        })
    }
}

fn read_loop(mut stream: TcpStream, recv_cb: RecvCb, conn_state_cb: ConnStateCb, stopping: Arc<AtomicBool>) {
    loop {
        match read_frame(&mut stream) {
            Ok(Some(payload)) => recv_cb(payload),
            Ok(None) => continue, // malformed prefix, already logged; keep reading
            Err(_) => break,
        }
        if stopping.load(Ordering::SeqCst) {
            break;
        }
    }
    conn_state_cb(ConnState::Disconnected);
}

/// Reads one length-prefixed frame. `Ok(None)` means a frame arrived but
/// was missing/had the wrong `"TW"` tag and was dropped; the caller should
/// keep reading rather than treat this as a connection failure.
fn read_frame(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let len = stream.read_u32::<BigEndian>()?;
    if len < FRAME_TAG.len() as u32 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame length out of range"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf)?;
    if buf[..FRAME_TAG.len()] != FRAME_TAG {
        tracing::warn!("dropping inbound frame with missing/wrong \"TW\" prefix");
        return Ok(None);
    }
    Ok(Some(buf[FRAME_TAG.len()..].to_vec()))
}

impl TransportBackend for PairTransport {
    fn transmit(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.write_stream.lock().unwrap();
        stream.set_write_timeout(Some(TRANSMIT_TIMEOUT)).ok();
        let len = (bytes.len() + FRAME_TAG.len()) as u32;
        let result = (|| -> io::Result<()> {
            stream.write_u32::<BigEndian>(len)?;
            stream.write_all(&FRAME_TAG)?;
            stream.write_all(bytes)?;
            stream.flush()
        })();
        result.map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io,
        })
    }

    fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Unblocks the reader thread's blocking read with a sentinel error,
        // distinguishing deliberate shutdown from a genuine peer failure.
        self.shutdown_stream.shutdown(std::net::Shutdown::Both).ok();
        if let Some(handle) = self.reader_handle.take() {
            handle.join().ok();
        }
    }
}
