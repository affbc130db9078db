//! The application context (§4.7): the shared base state and user API
//! common to both specializations, plus the `RoleOps` capability trait that
//! stands in for the source's function-pointer table (Design Note, §9).
//!
//! `context::server` and `context::client` hold the two concrete types;
//! this module only has what's genuinely role-independent.

pub mod client;
pub mod server;

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Freshness, Result};
use crate::metadata::Metadata;
use crate::model::{Item, Model, Snapshot, TweakId};
use crate::queue::{Job, JobQueue, Pulled};
use crate::variant::Variant;
use crate::wire::Features;

/// The set of callbacks a caller registers at context creation (§6.3).
/// Closures rather than a raw cookie-bearing function pointer, per the
/// Design Note on re-architecting `void*` callback state.
pub struct Listeners {
    pub on_connection_status_changed: Box<dyn Fn(bool) + Send + Sync>,
    pub on_new_item: Box<dyn Fn(TweakId) + Send + Sync>,
    pub on_item_removed: Box<dyn Fn(TweakId) + Send + Sync>,
    pub on_current_value_changed: Box<dyn Fn(TweakId, Variant) + Send + Sync>,
}

/// Replaces the source's `clone_current_value_proc` / `replace_current_value_proc`
/// / `push_changes_proc` function-pointer trio with a trait implemented once
/// by each specialization. The fourth slot in the original table,
/// `destroy_context`, doesn't need a virtual call here: both specializations'
/// teardown is the same sequence (`Base::destroy` followed by dropping the
/// RPC skeleton), so it's an ordinary inherent `destroy` method on each
/// context type rather than a trait member.
pub trait RoleOps: Send + Sync {
    fn clone_current_value(&self, id: TweakId) -> Result<(Variant, Freshness)>;
    fn replace_current_value(&self, id: TweakId, value: Variant) -> Result<()>;
    /// Called by the worker thread for every job drained from the queue.
    fn push_changes(&self, job: Job);
}

/// Common fields named in §4.7's "Base state": the connected flag, the
/// model, the queue, its worker thread, and the peer's most recently
/// announced feature set.
pub(crate) struct Base {
    pub connected: Mutex<bool>,
    pub peer_features: Mutex<Features>,
    pub model: RwLock<Model>,
    pub queue: Arc<JobQueue>,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    pub listeners: Listeners,
}

impl Base {
    pub fn new(listeners: Listeners, queue: Arc<JobQueue>) -> Base {
        Base {
            connected: Mutex::new(false),
            peer_features: Mutex::new(Features::minimal()),
            model: RwLock::new(Model::new()),
            queue,
            worker: Mutex::new(None),
            listeners,
        }
    }

    pub fn find_id(&self, uri: &str) -> TweakId {
        self.model.read().id_for_uri(uri)
    }

    pub fn get_snapshot(&self, id: TweakId) -> Option<Snapshot> {
        self.model.read().find_by_id(id).map(Item::snapshot)
    }

    pub fn traverse_items<F: FnMut(&Item) -> bool>(&self, visitor: F) {
        self.model.read().walk(visitor);
    }

    /// §9 Design Note on metadata caching: try the read lock first; only on
    /// a cache miss do we drop it, take the write lock, and re-check before
    /// parsing, rather than upgrading in place.
    pub fn get_metadata(&self, id: TweakId) -> Result<Metadata> {
        {
            let guard = self.model.read();
            let item = guard.find_by_id(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
            if let Some(cached) = item.metadata_cached() {
                return Ok(cached.clone());
            }
        }
        let mut guard = self.model.write();
        let item = guard.find_by_id_mut(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
        item.metadata().map(|m| m.clone())
    }

    pub fn flush_queue(&self) {
        self.queue.wait_empty();
    }

    /// Stops the queue, joins the worker, and synthesises a final
    /// `on_item_removed` for every item still in the model. Tearing down
    /// the transport is each specialization's own job, since only it holds
    /// the RPC skeleton.
    pub fn destroy(&self) {
        self.queue.stop();
        if let Some(handle) = self.worker.lock().take() {
            handle.join().ok();
        }
        let ids = self.model.write().drain_ids();
        for id in ids {
            (self.listeners.on_item_removed)(id);
        }
    }
}

/// Spawns the worker thread named in §4.7's base state: it pulls batches
/// from `queue` in a loop and, for each job, calls back into `ctx`'s
/// role-specific `push_changes` — the Rust equivalent of the source's
/// `job.procedure(job.id, job.cookie)` dispatch.
pub(crate) fn spawn_worker<C>(queue: Arc<JobQueue>, ctx: Arc<C>) -> JoinHandle<()>
where
    C: RoleOps + Send + Sync + 'static,
{
    std::thread::spawn(move || loop {
        match queue.pull() {
            Pulled::Stopped => break,
            Pulled::Batch(jobs) => {
                for job in jobs {
                    ctx.push_changes(job);
                }
            }
        }
    })
}
