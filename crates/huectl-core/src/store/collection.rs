// ── Reactive resource collection ──
//
// Concurrent storage keyed by resource id, with push-based change
// notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;

/// A reactive collection for a single resource type.
///
/// Every mutation rebuilds the snapshot that subscribers receive.
pub(crate) struct ResourceCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<String, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

/// Result of merging a partial update into a collection.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    /// An existing resource was updated.
    Merged,
    /// The id was unknown and the partial described a whole resource.
    Inserted,
    /// The id was unknown and the partial was not a whole resource.
    Ignored,
}

impl<T: Clone + Send + Sync + 'static> ResourceCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace a resource. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: String, resource: T) -> bool {
        let is_new = self.by_id.insert(id, Arc::new(resource)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Swap the whole contents for `items` with a single notification.
    pub(crate) fn replace_all(&self, items: impl IntoIterator<Item = (String, T)>) {
        self.by_id.clear();
        for (id, item) in items {
            self.by_id.insert(id, Arc::new(item));
        }
        self.rebuild_snapshot();
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Collect all values, ordered by id, and broadcast to subscribers.
    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl<T> ResourceCollection<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Deep-merge `patch` into the resource with `id`.
    ///
    /// Nested objects merge key by key; anything else replaces the cached
    /// value. The result must still be a valid `T` or nothing changes.
    pub(crate) fn merge(
        &self,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<MergeOutcome, serde_json::Error> {
        let Some(current) = self.get(id) else {
            let mut whole = Value::Object(Map::new());
            merge_fields(&mut whole, patch);
            return Ok(match serde_json::from_value::<T>(whole) {
                Ok(resource) => {
                    self.upsert(id.to_owned(), resource);
                    MergeOutcome::Inserted
                }
                Err(_) => MergeOutcome::Ignored,
            });
        };

        let mut value = serde_json::to_value(current.as_ref())?;
        merge_fields(&mut value, patch);
        let updated: T = serde_json::from_value(value)?;
        self.upsert(id.to_owned(), updated);
        Ok(MergeOutcome::Merged)
    }
}

/// Recursive merge of `patch` into `target`. The `type` discriminator is
/// not a resource field and is skipped.
pub(crate) fn merge_fields(target: &mut Value, patch: &Map<String, Value>) {
    let Value::Object(target) = target else {
        *target = Value::Object(patch.clone());
        return;
    };
    for (key, incoming) in patch {
        if key == "type" {
            continue;
        }
        if let (Some(existing), Value::Object(nested)) = (target.get_mut(key), incoming) {
            if existing.is_object() {
                merge_fields(existing, nested);
                continue;
            }
        }
        target.insert(key.clone(), incoming.clone());
    }
}
