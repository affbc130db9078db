//! The transport abstraction (§4.4): a reliable-framing, connection-
//! oriented, bidirectional byte-frame channel with two interchangeable
//! backends.

pub mod chunked;
pub mod pair;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Backend;
use crate::error::Error;

/// Level-triggered connection state (§4.4): invoked on every transition,
/// never twice in the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Io,
    Protocol,
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Error::Timeout,
            TransportError::Io | TransportError::Protocol => {
                Error::InvalidArgument("transport error".into())
            }
        }
    }
}

/// Reference: the transmit timeout a blocking `transmit` call is bounded
/// by (§4.4).
pub const TRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);

pub type ConnStateCb = Arc<dyn Fn(ConnState) + Send + Sync>;
pub type RecvCb = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// What a concrete backend (`pair`, `chunked`) must provide. `Transport`
/// wraps one of these and is the thing the RPC skeleton actually holds.
pub trait TransportBackend: Send {
    fn transmit(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Abort in-flight I/O and join any backend threads. Called at most
    /// once, from `Transport::drop`.
    fn shutdown(&mut self);
}

/// A connected transport instance, parameterized over one of the two
/// backends (§4.4.1, §4.4.2) behind a single interface.
pub struct Transport {
    backend: Box<dyn TransportBackend>,
    conn_state_cb: ConnStateCb,
    ever_connected: Arc<std::sync::atomic::AtomicBool>,
}

impl Transport {
    pub fn create(
        config: &crate::config::ContextConfig,
        conn_state_cb: ConnStateCb,
        recv_cb: RecvCb,
    ) -> Result<Transport, TransportError> {
        let ever_connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let wrapped_conn_state_cb: ConnStateCb = {
            let ever_connected = ever_connected.clone();
            let conn_state_cb = conn_state_cb.clone();
            Arc::new(move |state: ConnState| {
                if state == ConnState::Connected {
                    ever_connected.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                conn_state_cb(state);
            })
        };
        let backend: Box<dyn TransportBackend> = match config.backend {
            Backend::Nng => Box::new(pair::PairTransport::create(
                config.role,
                &config.endpoint,
                wrapped_conn_state_cb,
                recv_cb,
            )?),
            Backend::Rpmsg => Box::new(chunked::ChunkedTransport::create(
                config.role,
                &config.endpoint,
                wrapped_conn_state_cb,
                recv_cb,
            )?),
        };
        Ok(Transport { backend, conn_state_cb, ever_connected })
    }

    pub fn transmit(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.backend.transmit(bytes)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.backend.shutdown();
        if self.ever_connected.load(std::sync::atomic::Ordering::SeqCst) {
            (self.conn_state_cb)(ConnState::Disconnected);
        }
    }
}

