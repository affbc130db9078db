//! The public error taxonomy (§7 of the design doc).
//!
//! Every fallible call in the user-facing API returns `Result<T>` built on
//! this single enum. Transport-layer timeouts and codec parse failures are
//! logged at the point they occur and do not reach the user as `Error`
//! values — see the propagation rules in §7.
//!
//! `Success` and `SuccessLastKnownValue` from §7's table are not error
//! variants here: they're both `Ok`, distinguished at the one call site that
//! needs it (`clone_current_value`) by returning `Freshness` alongside the
//! value instead of overloading the error channel with a non-error outcome.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Whether a value read from a client context reflects a live connection or
/// is the last value observed before disconnecting (§4.7, `clone_current_value`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    LastKnown,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// No item exists for the given id or uri.
    #[error("no item found for {0}")]
    ItemNotFound(String),

    /// The supplied value's type (or, for vectors, element count) is
    /// incompatible with the item's current value.
    #[error("value type or shape incompatible with current value")]
    TypeMismatch,

    /// Null or ill-formed input (e.g. an empty uri, a malformed metadata
    /// JSON document that is required to parse for the call to proceed).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A client mutation was requested while disconnected from its server.
    #[error("peer is disconnected")]
    PeerDisconnected,

    /// A bounded wait (`wait_uris`, `transport::transmit`) elapsed before
    /// its condition was satisfied.
    #[error("operation timed out")]
    Timeout,
}
