//! Tweak: a bidirectional remote parameter-tuning runtime.
//!
//! A server exposes a tree of named, typed, mutable values ("items") over a
//! framed transport; one or more clients subscribe and stay synchronized,
//! reading and writing values with change notifications in both directions.
//! See `DESIGN.md` for the module-by-module grounding of this crate's
//! design against its sources.
//!
//! ```no_run
//! use tweak::{config::ContextConfig, context::{Listeners, server::ServerContext}, variant::Variant};
//!
//! # fn main() -> tweak::error::Result<()> {
//! let config = ContextConfig::parse("nng", "role=server", "127.0.0.1:7777")?;
//! let listeners = Listeners {
//!     on_connection_status_changed: Box::new(|connected| tracing::info!(connected, "peer state")),
//!     on_new_item: Box::new(|_id| {}),
//!     on_item_removed: Box::new(|_id| {}),
//!     on_current_value_changed: Box::new(|_id, _value| {}),
//! };
//! let server = ServerContext::create(&config, listeners)?;
//! server.add_item("/gain", "input gain", "", Variant::F64(1.0), None);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod metadata;
pub mod model;
pub mod queue;
pub mod rpc;
pub mod transport;
pub mod uri_index;
pub mod variant;
pub mod wire;

pub use context::client::ClientContext;
pub use context::server::ServerContext;
pub use context::Listeners;
pub use error::{Error, Freshness, Result};
pub use model::{Cookie, Snapshot, TweakId};
pub use variant::Variant;
