// ── Resource cache ──
//
// Latest known state of every tracked resource. Fed by full refreshes,
// event stream partials, and optimistic command writes. Mutations are
// serialized through one lock.
//
// Optimistic writes are kept as pending patches on top of the last
// authoritative state (snapshot or event) of their resource. A failed
// command drops its own patch and the rest are replayed; a success folds
// its patch into the base. Any authoritative update clears the pending
// patches, after which rollbacks are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use huectl_api::models::{Group, GroupedLight, Light, Scene};
use huectl_api::{Resource, ResourcePartial, ResourceType};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::collection::{MergeOutcome, ResourceCollection, merge_fields};
use crate::stream::ResourceStream;

/// Handle on an optimistic write, settled with [`ResourceCache::commit`]
/// or [`ResourceCache::rollback`].
#[derive(Debug)]
pub struct OptimisticWrite {
    pub resource_type: ResourceType,
    pub id: String,
    token: u64,
}

/// Unconfirmed writes to one resource.
#[derive(Debug)]
struct Pending {
    /// Last authoritative state plus every confirmed write.
    base: Resource,
    patches: Vec<(u64, Map<String, Value>)>,
}

/// Reactive cache of bridge resources.
pub struct ResourceCache {
    lights: ResourceCollection<Light>,
    grouped_lights: ResourceCollection<GroupedLight>,
    rooms: ResourceCollection<Group>,
    zones: ResourceCollection<Group>,
    scenes: ResourceCollection<Scene>,
    pending: DashMap<String, Pending>,
    next_token: AtomicU64,
    write_lock: Mutex<()>,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("lights", &self.lights.len())
            .field("grouped_lights", &self.grouped_lights.len())
            .field("rooms", &self.rooms.len())
            .field("zones", &self.zones.len())
            .field("scenes", &self.scenes.len())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            lights: ResourceCollection::new(),
            grouped_lights: ResourceCollection::new(),
            rooms: ResourceCollection::new(),
            zones: ResourceCollection::new(),
            scenes: ResourceCollection::new(),
            pending: DashMap::new(),
            next_token: AtomicU64::new(1),
            write_lock: Mutex::new(()),
            last_event_at: Mutex::new(None),
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Replace every resource of `rtype` with a freshly fetched list.
    /// Entries of another type are ignored.
    pub fn apply_snapshot(&self, rtype: ResourceType, resources: Vec<Resource>) {
        let _guard = self.lock();
        self.pending.retain(|_, p| p.base.resource_type() != rtype);

        let count = resources.len();
        match rtype {
            ResourceType::Light => self.lights.replace_all(resources.into_iter().filter_map(
                |r| match r {
                    Resource::Light(l) => Some((l.id.clone(), l)),
                    _ => None,
                },
            )),
            ResourceType::GroupedLight => {
                self.grouped_lights
                    .replace_all(resources.into_iter().filter_map(|r| match r {
                        Resource::GroupedLight(g) => Some((g.id.clone(), g)),
                        _ => None,
                    }));
            }
            ResourceType::Room => self.rooms.replace_all(resources.into_iter().filter_map(
                |r| match r {
                    Resource::Room(g) => Some((g.id.clone(), g)),
                    _ => None,
                },
            )),
            ResourceType::Zone => self.zones.replace_all(resources.into_iter().filter_map(
                |r| match r {
                    Resource::Zone(g) => Some((g.id.clone(), g)),
                    _ => None,
                },
            )),
            ResourceType::Scene => self.scenes.replace_all(resources.into_iter().filter_map(
                |r| match r {
                    Resource::Scene(s) => Some((s.id.clone(), s)),
                    _ => None,
                },
            )),
        }
        debug!(resource_type = %rtype, count, "snapshot applied");
    }

    /// Merge partial updates of `rtype`, in order. Unknown ids are inserted
    /// when the partial is a whole resource and ignored otherwise. Returns
    /// how many partials changed the cache.
    pub fn apply_partial(&self, rtype: ResourceType, partials: &[ResourcePartial]) -> usize {
        let _guard = self.lock();
        let mut applied = 0;

        for partial in partials {
            let Some(id) = partial.id() else {
                debug!(resource_type = %rtype, "partial without id ignored");
                continue;
            };
            if partial.resource_type().is_some_and(|t| t != rtype) {
                continue;
            }

            match self.merge_one(rtype, id, partial.fields()) {
                Ok(MergeOutcome::Merged | MergeOutcome::Inserted) => {
                    self.supersede(id);
                    applied += 1;
                    trace!(resource_type = %rtype, id, "partial applied");
                }
                Ok(MergeOutcome::Ignored) => {
                    trace!(resource_type = %rtype, id, "partial for unknown resource ignored");
                }
                Err(e) => {
                    warn!(resource_type = %rtype, id, error = %e, "partial update rejected");
                }
            }
        }

        applied
    }

    /// Insert or replace one whole resource.
    pub fn insert(&self, resource: Resource) {
        let _guard = self.lock();
        self.supersede(resource.id());
        self.insert_unlocked(resource);
    }

    /// Remove a resource. Returns `true` if it was cached.
    pub fn remove(&self, rtype: ResourceType, id: &str) -> bool {
        let _guard = self.lock();
        self.supersede(id);
        match rtype {
            ResourceType::Light => self.lights.remove(id).is_some(),
            ResourceType::GroupedLight => self.grouped_lights.remove(id).is_some(),
            ResourceType::Room => self.rooms.remove(id).is_some(),
            ResourceType::Zone => self.zones.remove(id).is_some(),
            ResourceType::Scene => self.scenes.remove(id).is_some(),
        }
    }

    /// Merge `patch` into a cached resource ahead of the bridge confirming
    /// it. Returns `None` if the resource is not cached or the patch does
    /// not fit it.
    pub fn apply_optimistic(
        &self,
        rtype: ResourceType,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Option<OptimisticWrite> {
        let _guard = self.lock();
        let previous = self.get(rtype, id)?;

        match self.merge_one(rtype, id, patch) {
            Ok(MergeOutcome::Merged) => {}
            Ok(_) => return None,
            Err(e) => {
                warn!(resource_type = %rtype, id, error = %e, "optimistic patch does not fit resource");
                return None;
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.pending
            .entry(id.to_owned())
            .or_insert_with(|| Pending {
                base: previous,
                patches: Vec::new(),
            })
            .patches
            .push((token, patch.clone()));
        trace!(resource_type = %rtype, id, token, "optimistic write");
        Some(OptimisticWrite {
            resource_type: rtype,
            id: id.to_owned(),
            token,
        })
    }

    /// The bridge accepted the write: keep its values even if an earlier
    /// pending write is rolled back later.
    pub fn commit(&self, write: OptimisticWrite) {
        let _guard = self.lock();
        let Some(mut pending) = self.pending.get_mut(&write.id) else {
            return;
        };
        let Some(pos) = pending.patches.iter().position(|(t, _)| *t == write.token) else {
            return;
        };
        let (_, patch) = pending.patches.remove(pos);
        match replay(&pending.base, [&patch]) {
            Ok(base) => pending.base = base,
            Err(e) => warn!(id = %write.id, error = %e, "confirmed patch does not fit base"),
        }
        let settled = pending.patches.is_empty();
        drop(pending);
        if settled {
            self.pending.remove(&write.id);
        }
    }

    /// Undo a failed optimistic write: its patch is dropped and any other
    /// pending writes are replayed on the base. A no-op (returning `false`)
    /// when an authoritative update arrived after the write.
    pub fn rollback(&self, write: OptimisticWrite) -> bool {
        let _guard = self.lock();
        let Some(mut pending) = self.pending.get_mut(&write.id) else {
            debug!(id = %write.id, "newer state arrived, rollback skipped");
            return false;
        };
        let Some(pos) = pending.patches.iter().position(|(t, _)| *t == write.token) else {
            return false;
        };
        pending.patches.remove(pos);

        debug!(
            resource_type = %write.resource_type,
            id = %write.id,
            remaining = pending.patches.len(),
            "rolling back optimistic write"
        );
        let restored = if pending.patches.is_empty() {
            drop(pending);
            match self.pending.remove(&write.id) {
                Some((_, settled)) => Ok(settled.base),
                None => return false,
            }
        } else {
            replay(&pending.base, pending.patches.iter().map(|(_, p)| p))
        };

        match restored {
            Ok(resource) => {
                self.insert_unlocked(resource);
                true
            }
            Err(e) => {
                warn!(id = %write.id, error = %e, "cannot replay pending writes");
                false
            }
        }
    }

    /// Note that an event arrived, for staleness reporting.
    pub fn record_event(&self) {
        *self
            .last_event_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get(&self, rtype: ResourceType, id: &str) -> Option<Resource> {
        match rtype {
            ResourceType::Light => self.lights.get(id).map(|l| Resource::Light((*l).clone())),
            ResourceType::GroupedLight => self
                .grouped_lights
                .get(id)
                .map(|g| Resource::GroupedLight((*g).clone())),
            ResourceType::Room => self.rooms.get(id).map(|g| Resource::Room((*g).clone())),
            ResourceType::Zone => self.zones.get(id).map(|g| Resource::Zone((*g).clone())),
            ResourceType::Scene => self.scenes.get(id).map(|s| Resource::Scene((*s).clone())),
        }
    }

    /// Number of cached resources of `rtype`.
    pub fn len(&self, rtype: ResourceType) -> usize {
        match rtype {
            ResourceType::Light => self.lights.len(),
            ResourceType::GroupedLight => self.grouped_lights.len(),
            ResourceType::Room => self.rooms.len(),
            ResourceType::Zone => self.zones.len(),
            ResourceType::Scene => self.scenes.len(),
        }
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_event_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lights(&self) -> Arc<Vec<Arc<Light>>> {
        self.lights.snapshot()
    }

    pub fn light(&self, id: &str) -> Option<Arc<Light>> {
        self.lights.get(id)
    }

    pub fn grouped_lights(&self) -> Arc<Vec<Arc<GroupedLight>>> {
        self.grouped_lights.snapshot()
    }

    pub fn grouped_light(&self, id: &str) -> Option<Arc<GroupedLight>> {
        self.grouped_lights.get(id)
    }

    pub fn rooms(&self) -> Arc<Vec<Arc<Group>>> {
        self.rooms.snapshot()
    }

    pub fn room(&self, id: &str) -> Option<Arc<Group>> {
        self.rooms.get(id)
    }

    pub fn zones(&self) -> Arc<Vec<Arc<Group>>> {
        self.zones.snapshot()
    }

    pub fn zone(&self, id: &str) -> Option<Arc<Group>> {
        self.zones.get(id)
    }

    pub fn scenes(&self) -> Arc<Vec<Arc<Scene>>> {
        self.scenes.snapshot()
    }

    pub fn scene(&self, id: &str) -> Option<Arc<Scene>> {
        self.scenes.get(id)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_lights(&self) -> ResourceStream<Light> {
        ResourceStream::new(self.lights.subscribe())
    }

    pub fn subscribe_grouped_lights(&self) -> ResourceStream<GroupedLight> {
        ResourceStream::new(self.grouped_lights.subscribe())
    }

    pub fn subscribe_rooms(&self) -> ResourceStream<Group> {
        ResourceStream::new(self.rooms.subscribe())
    }

    pub fn subscribe_zones(&self) -> ResourceStream<Group> {
        ResourceStream::new(self.zones.subscribe())
    }

    pub fn subscribe_scenes(&self) -> ResourceStream<Scene> {
        ResourceStream::new(self.scenes.subscribe())
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// An authoritative update landed; pending writes no longer roll back.
    fn supersede(&self, id: &str) {
        self.pending.remove(id);
    }

    fn merge_one(
        &self,
        rtype: ResourceType,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<MergeOutcome, serde_json::Error> {
        match rtype {
            ResourceType::Light => self.lights.merge(id, patch),
            ResourceType::GroupedLight => self.grouped_lights.merge(id, patch),
            ResourceType::Room => self.rooms.merge(id, patch),
            ResourceType::Zone => self.zones.merge(id, patch),
            ResourceType::Scene => self.scenes.merge(id, patch),
        }
    }

    fn insert_unlocked(&self, resource: Resource) {
        match resource {
            Resource::Light(l) => {
                self.lights.upsert(l.id.clone(), l);
            }
            Resource::GroupedLight(g) => {
                self.grouped_lights.upsert(g.id.clone(), g);
            }
            Resource::Room(g) => {
                self.rooms.upsert(g.id.clone(), g);
            }
            Resource::Zone(g) => {
                self.zones.upsert(g.id.clone(), g);
            }
            Resource::Scene(s) => {
                self.scenes.upsert(s.id.clone(), s);
            }
        }
    }
}

/// `base` with `patches` merged in order.
fn replay<'a>(
    base: &Resource,
    patches: impl IntoIterator<Item = &'a Map<String, Value>>,
) -> Result<Resource, serde_json::Error> {
    let mut value = serde_json::to_value(base)?;
    for patch in patches {
        merge_fields(&mut value, patch);
    }
    serde_json::from_value(value)
}
