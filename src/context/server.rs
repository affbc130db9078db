//! The server specialization of §4.7.1.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ContextConfig;
use crate::context::{spawn_worker, Base, Listeners, RoleOps};
use crate::error::{Error, Freshness, Result};
use crate::model::{Cookie, Item, Snapshot, TweakId};
use crate::queue::{Job, JobKind};
use crate::rpc::{ServerListener, ServerSkeleton};
use crate::variant::{check_value_compatibility, Variant};
use crate::wire::Features;

pub struct ServerContext {
    pub(crate) base: Base,
    skeleton: Mutex<Option<ServerSkeleton>>,
    next_id: AtomicU64,
    /// Whether this side's own `AnnounceFeatures` has gone out to the
    /// current peer yet; reset on every fresh Connected transition.
    features_announced: AtomicBool,
}

impl ServerContext {
    pub fn create(config: &ContextConfig, listeners: Listeners) -> Result<Arc<ServerContext>> {
        let queue = Arc::new(crate::queue::JobQueue::new());
        let base = Base::new(listeners, queue.clone());
        let ctx = Arc::new(ServerContext {
            base,
            skeleton: Mutex::new(None),
            next_id: AtomicU64::new(1),
            features_announced: AtomicBool::new(false),
        });

        let handle = spawn_worker(queue, ctx.clone());
        *ctx.base.worker.lock() = Some(handle);

        let skeleton = ServerSkeleton::create(config, ctx.clone() as Arc<dyn ServerListener>)
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

    /// §4.2 `create_item`: allocates a fresh id and inserts into the model.
    /// Returns `0` (`uri_index::INVALID_ID`) if `uri` is already present.
    #[allow(clippy::too_many_arguments)]
    pub fn add_item(
        &self,
        uri: impl Into<String>,
        description: impl Into<String>,
        meta: impl Into<String>,
        initial_value: Variant,
        cookie: Option<Cookie>,
    ) -> TweakId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let uri = uri.into();
        let result = self.base.model.write().create_item(
            id,
            uri,
            description.into(),
            meta.into(),
            initial_value.clone(),
            initial_value.clone(),
            cookie,
        );
        if result.is_err() {
            return crate::uri_index::INVALID_ID;
        }
        let connected = *self.base.connected.lock();
        let supported = self.base.peer_features.lock().supports(&initial_value);
        if connected && supported {
            self.base.queue.push(Job { kind: JobKind::Append, id });
        }
        id
    }

    /// §4.2: removes the item, emitting a `RemoveItem` to a subscribed,
    /// connected peer only if the removed item's type was one the peer
    /// currently accepts.
    pub fn remove_item(&self, id: TweakId) -> bool {
        let removed = self.base.model.write().remove_item(id);
        let item = match removed {
            Ok(item) => item,
            Err(_) => return false,
        };
        let connected = *self.base.connected.lock();
        let supported = self.base.peer_features.lock().supports(&item.default_value);
        if connected && supported {
            self.base.queue.push(Job { kind: JobKind::Remove, id });
        }
        true
    }

    pub fn get_cookie<T: 'static + Clone>(&self, id: TweakId) -> Option<T> {
        self.base.model.read().find_by_id(id)?.cookie_as::<T>().cloned()
    }
}

impl RoleOps for ServerContext {
    fn clone_current_value(&self, id: TweakId) -> Result<(Variant, Freshness)> {
        let model = self.base.model.read();
        let item = model.find_by_id(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
        Ok((item.current_value.clone(), Freshness::Fresh))
    }

    fn replace_current_value(&self, id: TweakId, value: Variant) -> Result<()> {
        let mut model = self.base.model.write();
        let item = model.find_by_id_mut(id).ok_or_else(|| Error::ItemNotFound(id.to_string()))?;
        if !check_value_compatibility(&item.current_value, &value) {
            return Err(Error::TypeMismatch);
        }
        item.current_value = value;
        drop(model);
        self.base.queue.push(Job { kind: JobKind::Change, id });
        Ok(())
    }

    fn push_changes(&self, job: Job) {
        // The skeleton guard is scoped to the transmit calls only: user
        // listener callbacks (fired below, outside this block) must never
        // run with an internal lock held, or a reentrant call from a
        // callback (e.g. `destroy()`) would deadlock on this non-reentrant
        // mutex.
        match job.kind {
            JobKind::Subscribe => {
                let announce_first_time = !self.features_announced.swap(true, Ordering::SeqCst);
                let peer = *self.base.peer_features.lock();
                let mut outgoing: Vec<Snapshot> = Vec::new();
                self.base.model.read().walk(|item| {
                    if peer.supports(&item.default_value) {
                        outgoing.push(item.snapshot());
                    }
                    true
                });
                {
                    let guard = self.skeleton.lock();
                    let Some(skeleton) = guard.as_ref() else {
                        tracing::warn!("server rpc skeleton not ready yet; dropping job");
                        return;
                    };
                    if announce_first_time {
                        skeleton.transmit_announce_features(Features::supported());
                    }
                    for item in outgoing {
                        skeleton.transmit_add_item(
                            item.id,
                            item.uri,
                            item.description,
                            item.meta,
                            item.default_value,
                            item.current_value,
                        );
                    }
                }
                *self.base.connected.lock() = true;
                (self.base.listeners.on_connection_status_changed)(true);
            }
            JobKind::Append => {
                let connected = *self.base.connected.lock();
                let peer = *self.base.peer_features.lock();
                if let Some(snap) = self.base.model.read().find_by_id(job.id).map(Item::snapshot) {
                    if connected && peer.supports(&snap.default_value) {
                        let guard = self.skeleton.lock();
                        let Some(skeleton) = guard.as_ref() else {
                            tracing::warn!("server rpc skeleton not ready yet; dropping job");
                            return;
                        };
                        skeleton.transmit_add_item(
                            snap.id,
                            snap.uri,
                            snap.description,
                            snap.meta,
                            snap.default_value,
                            snap.current_value,
                        );
                    }
                }
            }
            JobKind::Remove => {
                let guard = self.skeleton.lock();
                let Some(skeleton) = guard.as_ref() else {
                    tracing::warn!("server rpc skeleton not ready yet; dropping job");
                    return;
                };
                skeleton.transmit_remove_item(job.id);
            }
            JobKind::Change => {
                let connected = *self.base.connected.lock();
                let peer = *self.base.peer_features.lock();
                if let Some((value, default_value)) = self
                    .base
                    .model
                    .read()
                    .find_by_id(job.id)
                    .map(|item| (item.current_value.clone(), item.default_value.clone()))
                {
                    if connected && peer.supports(&default_value) {
                        let guard = self.skeleton.lock();
                        let Some(skeleton) = guard.as_ref() else {
                            tracing::warn!("server rpc skeleton not ready yet; dropping job");
                            return;
                        };
                        skeleton.transmit_change_item(job.id, value);
                    }
                }
            }
        }
    }
}

impl ServerListener for ServerContext {
    fn on_subscribe(&self) {
        self.base.queue.push(Job { kind: JobKind::Subscribe, id: 0 });
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
            // Computed before the swap per the documented, not literal,
            // behavior of the original handler (Design Note §9a).
            let differs = item.current_value != value;
            item.current_value = value.clone();
            differs.then_some(value)
        };
        if let Some(value) = changed {
            (self.base.listeners.on_current_value_changed)(id, value);
        }
        // Unconditional echo (Design Note §9b), reusing the ordinary Change
        // job path: the worker will read back exactly the value just swapped in.
        self.base.queue.push(Job { kind: JobKind::Change, id });
    }

    fn on_announce_features(&self, features: Features) {
        *self.base.peer_features.lock() = features;
    }

    fn on_connection_state(&self, connected: bool) {
        if connected {
            *self.base.peer_features.lock() = Features::minimal();
            self.features_announced.store(false, Ordering::SeqCst);
        } else {
            let was_connected = {
                let mut guard = self.base.connected.lock();
                std::mem::replace(&mut *guard, false)
            };
            if was_connected {
                (self.base.listeners.on_connection_status_changed)(false);
            }
        }
    }
}
