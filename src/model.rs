//! The item store (§3, §4.2): an `id -> Item` map coupled with a `uri -> id`
//! index, always created and destroyed together.
//!
//! `Model` itself is `Send` but not internally synchronized — the enclosing
//! `Context` wraps it in a single `parking_lot::RwLock` (the `model_lock` of
//! §5) so that readers can observe consistent `(id, uri)` pairs and writers
//! get exclusive access. `Model`'s methods assume that lock is already held;
//! see the "thread-neutral" note in §4.2.

use std::any::Any;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::uri_index::{InsertError, UriIndex, INVALID_ID};
use crate::variant::Variant;

pub type TweakId = u64;

/// Opaque server-side user pointer (§3). Redesigned from the source's
/// `void*` into a boxed trait object per the Design Notes (§9): no raw
/// pointer crosses the API boundary, and `Item::cookie_as` downcasts safely.
pub type Cookie = Box<dyn Any + Send + Sync>;

pub struct Item {
    pub id: TweakId,
    pub uri: String,
    pub description: String,
    pub meta: String,
    pub default_value: Variant,
    pub current_value: Variant,
    metadata: Option<Metadata>,
    pub cookie: Option<Cookie>,
}

impl Item {
    /// Lazily parse and cache `meta` against `default_value`'s type. The
    /// "drop the read lock, take the write lock, re-check" pattern this
    /// implies at the `Model`/`Context` level is documented in §9 and
    /// implemented in `context::get_metadata`; `Item` itself just owns the
    /// cache slot and never re-derives it once set.
    pub fn metadata(&mut self) -> Result<&Metadata> {
        if self.metadata.is_none() {
            self.metadata = Some(Metadata::parse(&self.meta, &self.default_value)?);
        }
        Ok(self.metadata.as_ref().unwrap())
    }

    pub fn metadata_cached(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn cookie_as<T: 'static>(&self) -> Option<&T> {
        self.cookie.as_ref()?.downcast_ref::<T>()
    }

    /// A deep copy of this item's observable state, for `get_snapshot`
    /// (§4.7). Cookies are server-internal and never cross into a
    /// snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            uri: self.uri.clone(),
            description: self.description.clone(),
            meta: self.meta.clone(),
            default_value: self.default_value.clone(),
            current_value: self.current_value.clone(),
        }
    }
}

/// An owned, deep copy of an item at a moment in time (§9 Design Notes:
/// "return an owned value by move; no paired release call is needed").
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: TweakId,
    pub uri: String,
    pub description: String,
    pub meta: String,
    pub default_value: Variant,
    pub current_value: Variant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ModelError {
    IndexError,
}

#[derive(Debug, Default)]
pub struct Model {
    items: HashMap<TweakId, Item>,
    index: UriIndex,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.2 `create_item`: copies all inputs into a newly owned `Item`.
    /// Fails with `IndexError` if `id` is already present or `uri` is
    /// already indexed (the two maps are created together; a uri
    /// collision without an id collision would violate the invariant in
    /// §3 just as surely).
    #[allow(clippy::too_many_arguments)]
    pub fn create_item(
        &mut self,
        id: TweakId,
        uri: String,
        description: String,
        meta: String,
        default_value: Variant,
        current_value: Variant,
        cookie: Option<Cookie>,
    ) -> std::result::Result<(), ModelError> {
        if self.items.contains_key(&id) {
            return Err(ModelError::IndexError);
        }
        match self.index.insert(&uri, id) {
            Ok(()) => {}
            Err(InsertError::KeyAlreadyExists) => return Err(ModelError::IndexError),
        }
        self.items.insert(
            id,
            Item {
                id,
                uri,
                description,
                meta,
                default_value,
                current_value,
                metadata: None,
                cookie,
            },
        );
        Ok(())
    }

    pub fn find_by_id(&self, id: TweakId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn find_by_id_mut(&mut self, id: TweakId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    pub fn find_by_uri(&self, uri: &str) -> Option<&Item> {
        let id = self.index.lookup(uri);
        if id == INVALID_ID {
            None
        } else {
            self.items.get(&id)
        }
    }

    pub fn id_for_uri(&self, uri: &str) -> TweakId {
        self.index.lookup(uri)
    }

    pub fn remove_item(&mut self, id: TweakId) -> std::result::Result<Item, ModelError> {
        let item = self.items.remove(&id).ok_or(ModelError::IndexError)?;
        // The two maps are created and destroyed together (§3 invariant);
        // a missing uri entry here would mean they'd already desynced.
        self.index.remove(&item.uri).expect("uri index desynced from id map");
        Ok(item)
    }

    pub fn walk<F: FnMut(&Item) -> bool>(&self, mut visitor: F) {
        for item in self.items.values() {
            if !visitor(item) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drains every item, returning their ids. Used by the client
    /// specialization on reconnect (§4.7.2) to synthesize `on_item_removed`
    /// for each surviving item before repopulating from scratch.
    pub fn drain_ids(&mut self) -> Vec<TweakId> {
        let ids: Vec<TweakId> = self.items.keys().copied().collect();
        self.items.clear();
        self.index = UriIndex::new();
        ids
    }
}

impl From<ModelError> for Error {
    fn from(_: ModelError) -> Self {
        Error::ItemNotFound(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: TweakId, uri: &str) -> (TweakId, String, String, String, Variant, Variant, Option<Cookie>) {
        (id, uri.to_string(), "desc".into(), "".into(), Variant::F64(1.0), Variant::F64(1.0), None)
    }

    #[test]
    fn create_then_find_round_trips() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, cookie).unwrap();
        let found = m.find_by_id(1).unwrap();
        assert_eq!(found.uri, "/a");
        assert_eq!(m.id_for_uri("/a"), 1);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, cookie).unwrap();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/b");
        assert_eq!(
            m.create_item(id, uri, desc, meta, def, cur, cookie),
            Err(ModelError::IndexError)
        );
    }

    #[test]
    fn duplicate_uri_rejected() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, cookie).unwrap();
        let (id, uri, desc, meta, def, cur, cookie) = item(2, "/a");
        assert_eq!(
            m.create_item(id, uri, desc, meta, def, cur, cookie),
            Err(ModelError::IndexError)
        );
    }

    #[test]
    fn remove_keeps_maps_in_sync() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, cookie).unwrap();
        m.remove_item(1).unwrap();
        assert!(m.find_by_id(1).is_none());
        assert_eq!(m.id_for_uri("/a"), INVALID_ID);
    }

    #[test]
    fn cookie_downcasts() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, _) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, Some(Box::new(42u32))).unwrap();
        let found = m.find_by_id(1).unwrap();
        assert_eq!(found.cookie_as::<u32>(), Some(&42));
        assert_eq!(found.cookie_as::<String>(), None);
    }

    #[test]
    fn drain_ids_clears_both_maps() {
        let mut m = Model::new();
        let (id, uri, desc, meta, def, cur, cookie) = item(1, "/a");
        m.create_item(id, uri, desc, meta, def, cur, cookie).unwrap();
        let drained = m.drain_ids();
        assert_eq!(drained, vec![1]);
        assert!(m.is_empty());
        assert_eq!(m.id_for_uri("/a"), INVALID_ID);
    }
}
