//! The client specialization of §4.7.2. Item creation is purely reactive:
//! there is no user-facing `add_item`, only the inbound handlers below.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::ContextConfig;
use crate::context::{spawn_worker, Base, Listeners, RoleOps};
use crate::error::{Error, Freshness, Result};
use crate::model::{Item, Snapshot, TweakId};
use crate::queue::{Job, JobKind};
use crate::rpc::{ClientListener, ClientSkeleton};
use crate::uri_index::INVALID_ID;
use crate::variant::{check_value_compatibility, Variant};
use crate::wire::Features;

/// Every subscription this crate issues asks for the whole tree; the wire
/// message carries a pattern string for forward compatibility with a
/// filtering server, but this client always sends the match-all pattern.
const SUBSCRIBE_ALL: &str = "*";

pub struct ClientContext {
    pub(crate) base: Base,
    skeleton: Mutex<Option<ClientSkeleton>>,
    /// Broadcast whenever `connected` or the model's uri set changes, so
    /// `wait_uris` can wake without polling.
    wait_cv: Condvar,
}

impl ClientContext {
    pub fn create(config: &ContextConfig, listeners: Listeners) -> Result<Arc<ClientContext>> {
        let queue = Arc::new(crate::queue::JobQueue::new());
        let base = Base::new(listeners, queue.clone());
        let ctx = Arc::new(ClientContext {
            base,
            skeleton: Mutex::new(None),
            wait_cv: Condvar::new(),
        });

        let handle = spawn_worker(queue, ctx.clone());
        *ctx.base.worker.lock() = Some(handle);

        let skeleton = ClientSkeleton::create(config, ctx.clone() as Arc<dyn ClientListener>)
            .map_err(Error::from)?;
        *ctx.skeleton.lock() = Some(skeleton);

        Ok(ctx)
    }

    pub fn find_id(&self, uri: &str) -> TweakId {
        self.base.find_id(uri)
    }

    pub fn get_snapshot(&self, id: TweakId) -> Option<Snapshot> {
        self.base.get_snapshot(id)
    }

    pub fn traverse_items<F: FnMut(&Item) -> bool>(&self, visitor: F) {
        self.base.traverse_items(visitor);
    }

    pub fn clone_current_value(&self, id: TweakId) -> Result<(Variant, Freshness)> {
        RoleOps::clone_current_value(self, id)
    }

    pub fn replace_current_value(&self, id: TweakId, value: Variant) -> Result<()> {
        RoleOps::replace_current_value(self, id, value)
    }

    pub fn get_metadata(&self, id: TweakId) -> Result<crate::metadata::Metadata> {
        self.base.get_metadata(id)
    }

    pub fn flush_queue(&self) {
        self.base.flush_queue();
    }

    pub fn destroy(&self) {
        self.base.destroy();
        // Release the skeleton mutex before the taken skeleton (and so the
        // transport it owns) actually drops: dropping the transport may
        // synthesise a final `on_connection_state(false)` callback, and that
        // callback must never run while this lock is still held.
        let taken = {
            let mut guard = self.skeleton.lock();
            guard.take()
        };
        drop(taken);
    }

    /// §4.7.2: blocks until connected and every `uris` entry resolves, or
    /// `timeout` elapses.
    pub fn wait_uris(&self, uris: &[String], timeout: Duration) -> Result<Vec<TweakId>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.base.connected.lock();
        loop {
            if *guard {
                let ids: Vec<TweakId> = {
                    let model = self.base.model.read();
                    uris.iter().map(|uri| model.id_for_uri(uri)).collect()
                };
                if ids.iter().all(|&id| id != INVALID_ID) {
                    return Ok(ids);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            self.wait_cv.wait_for(&mut guard, remaining);
        }
    }
}

impl RoleOps for ClientContext {
    fn clone_current_value(&self, id: TweakId) -> Result<(Variant, Freshness)> {
        let connected = *self.base.connected.lock();
        let model = self.base.model.read();
        let item = model.find_by_id(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
        let freshness = if connected { Freshness::Fresh } else { Freshness::LastKnown };
        Ok((item.current_value.clone(), freshness))
    }

    fn replace_current_value(&self, id: TweakId, value: Variant) -> Result<()> {
        let connected = *self.base.connected.lock();
        let mut model = self.base.model.write();
        let item = model.find_by_id_mut(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
        if !check_value_compatibility(&item.current_value, &value) {
            return Err(Error::TypeMismatch);
        }
        if !connected {
            return Err(Error::PeerDisconnected);
        }
        item.current_value = value;
        drop(model);
        self.base.queue.push(Job { kind: JobKind::Change, id });
        Ok(())
    }

    fn push_changes(&self, job: Job) {
        let guard = self.skeleton.lock();
        let Some(skeleton) = guard.as_ref() else {
            tracing::warn!("client rpc skeleton not ready yet; dropping job");
            return;
        };
        match job.kind {
            JobKind::Subscribe => {
                skeleton.transmit_announce_features(Features::supported());
                skeleton.transmit_subscribe(SUBSCRIBE_ALL.to_string());
            }
            JobKind::Change => {
                let connected = *self.base.connected.lock();
                if connected {
                    if let Some(value) = self.base.model.read().find_by_id(job.id).map(|item| item.current_value.clone()) {
                        skeleton.transmit_change_item(job.id, value);
                    }
                }
            }
            JobKind::Append | JobKind::Remove => {
                tracing::warn!(?job.kind, "client context received a server-only job kind; ignoring");
            }
        }
    }
}

impl ClientListener for ClientContext {
    fn on_add_item(
        &self,
        id: TweakId,
        uri: String,
        description: String,
        meta: String,
        default_value: Variant,
        current_value: Variant,
    ) {
        enum Outcome {
            New,
            Refreshed(Variant),
            Unchanged,
        }

        let outcome = {
            let mut model = self.base.model.write();
            // Snapshot the existing entry (if any) into owned fields first:
            // the comparison below needs `model` mutably further down, and a
            // borrow from `find_by_uri` would otherwise still be alive.
            let existing = model
                .find_by_uri(&uri)
                .map(|item| (item.id, item.description.clone(), item.meta.clone(), item.default_value.clone(), item.current_value.clone()));

            match existing {
                Some((existing_id, existing_description, existing_meta, existing_default, existing_current)) => {
                    if existing_id == id
                        && existing_description == description
                        && existing_meta == meta
                        && existing_default == default_value
                    {
                        if existing_current != current_value {
                            let item = model.find_by_id_mut(id).expect("just looked up by uri");
                            item.current_value = current_value.clone();
                            Outcome::Refreshed(current_value)
                        } else {
                            Outcome::Unchanged
                        }
                    } else {
                        // The server's model is authoritative; an add_item for an
                        // existing uri with different identity/metadata means this
                        // client's replica has desynced beyond repair (§7 fatal
                        // conditions).
                        panic!(
                            "fatal: inconsistent client model for uri {uri:?}: server re-announced with different id/metadata"
                        );
                    }
                }
                None => {
                    let inserted = model.create_item(
                        id,
                        uri.clone(),
                        description,
                        meta,
                        default_value,
                        current_value,
                        None,
                    );
                    if inserted.is_err() {
                        panic!("fatal: client model insertion failed while replaying server state for uri {uri:?}");
                    }
                    Outcome::New
                }
            }
        };

        match outcome {
            Outcome::New => (self.base.listeners.on_new_item)(id),
            Outcome::Refreshed(value) => (self.base.listeners.on_current_value_changed)(id, value),
            Outcome::Unchanged => {}
        }
        self.wait_cv.notify_all();
    }

    fn on_change_item(&self, id: TweakId, value: Variant) {
        let changed = {
            let mut model = self.base.model.write();
            let Some(item) = model.find_by_id_mut(id) else {
                tracing::warn!(id, "inbound change_item for unknown id, dropping");
                return;
            };
            if !check_value_compatibility(&item.current_value, &value) {
                tracing::warn!(id, "inbound change_item type mismatch, dropping");
                return;
            }
            let differs = item.current_value != value;
            item.current_value = value.clone();
            differs.then_some(value)
        };
        if let Some(value) = changed {
            (self.base.listeners.on_current_value_changed)(id, value);
        }
    }

    fn on_remove_item(&self, id: TweakId) {
        if self.base.model.write().remove_item(id).is_ok() {
            (self.base.listeners.on_item_removed)(id);
            self.wait_cv.notify_all();
        } else {
            tracing::warn!(id, "inbound remove_item for unknown id, dropping");
        }
    }

    fn on_connection_state(&self, connected: bool) {
        if connected {
            *self.base.peer_features.lock() = Features::minimal();

            let surviving_ids = self.base.model.write().drain_ids();
            for id in surviving_ids {
                (self.base.listeners.on_item_removed)(id);
            }

            *self.base.connected.lock() = true;
            (self.base.listeners.on_connection_status_changed)(true);
            self.wait_cv.notify_all();

            self.base.queue.push(Job { kind: JobKind::Subscribe, id: 0 });
        } else {
            *self.base.connected.lock() = false;
            (self.base.listeners.on_connection_status_changed)(false);
            self.wait_cv.notify_all();
        }
    }
}
