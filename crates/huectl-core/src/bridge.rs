// ── Bridge facade ──
//
// One connected bridge: the session, the per-class command queue, the
// resource cache, and the task feeding the cache from the event stream.
// Writes go through `execute`, which mirrors the change into the cache,
// waits its turn in the queue, and rolls the cache back if the bridge
// refuses.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::join_all;
use huectl_api::models::{LightUpdate, ResourceIdentifier};
use huectl_api::{
    BridgeIdentity, BridgeSession, Credentials, EventKind, FingerprintStore, Resource,
    ResourceType, UpdateEvent,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{
    Command, DEFAULT_MIREK_SCHEMA, Step, clamp_brightness, step_brightness, step_mirek,
};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::queue::CommandQueue;
use crate::storage::{BridgeStorage, StoredFingerprint, StoredPairing, load_pairing};
use crate::store::ResourceCache;

// ── StreamState ──────────────────────────────────────────────────────

/// Whether the cache is being kept current by the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Event stream turned off in the configuration.
    Disabled,
    Live,
    /// The stream ended; the cache stays as it was until
    /// [`Bridge::resume_events`] is called.
    Closed { reason: String },
}

// ── Bridge ───────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    identity: BridgeIdentity,
    config: BridgeConfig,
    session: BridgeSession,
    queue: CommandQueue,
    cache: Arc<ResourceCache>,
    stream_state: watch::Sender<StreamState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("identity", &self.inner.identity)
            .field("cache", &self.inner.cache)
            .field("stream_state", &*self.inner.stream_state.borrow())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open a session, load every tracked resource, and start consuming
    /// events (unless disabled in `config`).
    pub async fn connect(
        identity: BridgeIdentity,
        credentials: &Credentials,
        config: BridgeConfig,
        pins: Arc<dyn FingerprintStore>,
    ) -> Result<Self, CoreError> {
        info!(bridge = %identity, "connecting to bridge");
        let session = BridgeSession::open(&identity, credentials, &config.transport, pins).await?;
        Self::from_session(identity, session, config).await
    }

    /// Connect to the bridge saved in `storage` by an earlier pairing.
    ///
    /// Fails with [`CoreError::NoBridgeConfigured`] unless both the bridge
    /// and its application key are stored. Legacy certificate pins are read
    /// from and written to the same storage.
    pub async fn connect_stored(
        config: BridgeConfig,
        storage: Arc<dyn BridgeStorage>,
    ) -> Result<Self, CoreError> {
        let StoredPairing::Complete(identity, credentials) = load_pairing(storage.as_ref())?
        else {
            return Err(CoreError::NoBridgeConfigured);
        };
        let pins = Arc::new(StoredFingerprint::new(storage, &identity.id));
        Self::connect(identity, &credentials, config, pins).await
    }

    /// Build on an already open session.
    pub async fn from_session(
        identity: BridgeIdentity,
        session: BridgeSession,
        config: BridgeConfig,
    ) -> Result<Self, CoreError> {
        let cancel = CancellationToken::new();
        let queue = CommandQueue::new(config.limits, cancel.child_token());
        let (stream_state, _) = watch::channel(StreamState::Disabled);

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                identity,
                config,
                session,
                queue,
                cache: Arc::new(ResourceCache::new()),
                stream_state,
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        };

        if let Err(e) = bridge.full_refresh().await {
            bridge.shutdown();
            return Err(e);
        }
        if bridge.inner.config.event_stream {
            bridge.spawn_event_task().await;
        }

        Ok(bridge)
    }

    /// Connect, run `f`, disconnect. The event stream is skipped since a
    /// single command needs no live cache.
    pub async fn oneshot<F, Fut, T>(
        identity: BridgeIdentity,
        credentials: &Credentials,
        config: BridgeConfig,
        pins: Arc<dyn FingerprintStore>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Bridge) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.event_stream = false;

        let bridge = Self::connect(identity, credentials, cfg, pins).await?;
        let result = f(bridge.clone()).await;
        bridge.disconnect().await;
        result
    }

    /// Fetch every tracked collection concurrently and replace the cache
    /// contents. Nothing is replaced unless all five fetches succeed.
    pub async fn full_refresh(&self) -> Result<(), CoreError> {
        let session = &self.inner.session;
        let (lights, grouped_lights, rooms, zones, scenes) = tokio::join!(
            session.list(ResourceType::Light),
            session.list(ResourceType::GroupedLight),
            session.list(ResourceType::Room),
            session.list(ResourceType::Zone),
            session.list(ResourceType::Scene),
        );
        let (lights, grouped_lights, rooms, zones, scenes) =
            (lights?, grouped_lights?, rooms?, zones?, scenes?);

        let cache = &self.inner.cache;
        cache.apply_snapshot(ResourceType::Light, lights);
        cache.apply_snapshot(ResourceType::GroupedLight, grouped_lights);
        cache.apply_snapshot(ResourceType::Room, rooms);
        cache.apply_snapshot(ResourceType::Zone, zones);
        cache.apply_snapshot(ResourceType::Scene, scenes);

        info!(
            lights = cache.len(ResourceType::Light),
            rooms = cache.len(ResourceType::Room),
            zones = cache.len(ResourceType::Zone),
            scenes = cache.len(ResourceType::Scene),
            "resources loaded"
        );
        Ok(())
    }

    /// Reopen a closed event stream. The cache is refreshed first since
    /// events missed while closed are not replayed.
    pub async fn resume_events(&self) -> Result<(), CoreError> {
        if self.inner.session.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        if *self.inner.stream_state.borrow() == StreamState::Live {
            return Ok(());
        }

        self.full_refresh().await?;
        self.spawn_event_task().await;
        Ok(())
    }

    /// Stop background tasks and close the session. Queued commands fail
    /// with [`CoreError::SessionClosed`].
    pub async fn disconnect(&self) {
        self.shutdown();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!(bridge_id = %self.inner.identity.id, "disconnected");
    }

    /// Synchronous half of [`disconnect`](Self::disconnect): signal every
    /// task to stop without waiting for them.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.queue.shutdown();
        self.inner.session.close();
    }

    async fn spawn_event_task(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        self.inner.stream_state.send_replace(StreamState::Live);
        handles.push(tokio::spawn(event_task(
            self.clone(),
            self.inner.cancel.clone(),
        )));
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn identity(&self) -> &BridgeIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.inner.cache
    }

    pub fn session(&self) -> &BridgeSession {
        &self.inner.session
    }

    pub fn stream_state(&self) -> watch::Receiver<StreamState> {
        self.inner.stream_state.subscribe()
    }

    /// Find a resource by id or, failing that, by case-insensitive name.
    pub fn find(&self, rtype: ResourceType, query: &str) -> Result<Resource, CoreError> {
        let cache = &self.inner.cache;
        if let Some(resource) = cache.get(rtype, query) {
            return Ok(resource);
        }

        let by_name = |name: &str| name.eq_ignore_ascii_case(query);
        let found = match rtype {
            ResourceType::Light => cache
                .lights()
                .iter()
                .find(|l| by_name(&l.metadata.name))
                .map(|l| Resource::Light((**l).clone())),
            ResourceType::Room => cache
                .rooms()
                .iter()
                .find(|g| by_name(&g.metadata.name))
                .map(|g| Resource::Room((**g).clone())),
            ResourceType::Zone => cache
                .zones()
                .iter()
                .find(|g| by_name(&g.metadata.name))
                .map(|g| Resource::Zone((**g).clone())),
            ResourceType::Scene => cache
                .scenes()
                .iter()
                .find(|s| by_name(&s.metadata.name))
                .map(|s| Resource::Scene((**s).clone())),
            ResourceType::GroupedLight => None,
        };

        found.ok_or_else(|| CoreError::ResourceNotFound {
            resource_type: rtype.to_string(),
            identifier: query.to_owned(),
        })
    }

    /// The grouped-light service behind a room or zone.
    pub fn grouped_light_of(&self, rtype: ResourceType, query: &str) -> Result<String, CoreError> {
        let group = match self.find(rtype, query)? {
            Resource::Room(g) | Resource::Zone(g) => g,
            other => {
                return Err(CoreError::Unsupported {
                    message: format!("{} has no grouped light", other.resource_type()),
                });
            }
        };
        group
            .grouped_light_id()
            .map(str::to_owned)
            .ok_or_else(|| CoreError::ResourceNotFound {
                resource_type: ResourceType::GroupedLight.to_string(),
                identifier: group.metadata.name.clone(),
            })
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a write.
    ///
    /// Absolute changes appear in the cache immediately. If the bridge
    /// rejects the command only its own change is undone; other writes
    /// still in flight stay applied. An event for the resource in the
    /// meantime takes precedence over the rollback.
    pub async fn execute(&self, command: Command) -> Result<Vec<ResourceIdentifier>, CoreError> {
        let rtype = command.resource_type();
        let id = command.target().to_owned();
        let body = command.body()?;
        debug!(resource_type = %rtype, id, "executing command");

        let optimistic = command
            .optimistic_patch()
            .and_then(|patch| self.inner.cache.apply_optimistic(rtype, &id, &patch));

        let session = self.inner.session.clone();
        let target = id.clone();
        let result = self
            .inner
            .queue
            .enqueue(command.class(), move || async move {
                session.update(rtype, &target, &body).await
            })
            .await;

        match (&result, optimistic) {
            (Ok(_), Some(write)) => self.inner.cache.commit(write),
            (Err(e), write) => {
                warn!(resource_type = %rtype, id, error = %e, "command failed");
                if let Some(write) = write {
                    self.inner.cache.rollback(write);
                }
            }
            (Ok(_), None) => {}
        }
        result
    }

    pub async fn set_light_on(&self, id: &str, on: bool) -> Result<(), CoreError> {
        self.update_light(id, LightUpdate::new().on(on)).await
    }

    /// Flip a light. Returns the new on state.
    pub async fn toggle_light(&self, id: &str) -> Result<bool, CoreError> {
        let on = !self.cached_light(id)?.on.on;
        self.set_light_on(id, on).await?;
        Ok(on)
    }

    /// Set brightness (clamped to 1–100), switching the light on.
    pub async fn set_light_brightness(&self, id: &str, brightness: f64) -> Result<(), CoreError> {
        let update = LightUpdate::new()
            .on(true)
            .brightness(clamp_brightness(brightness));
        self.update_light(id, update).await
    }

    /// Brighten or dim by one step from the cached value.
    pub async fn step_light_brightness(&self, id: &str, step: Step) -> Result<f64, CoreError> {
        let light = self.cached_light(id)?;
        let current = if light.on.on {
            light.brightness().ok_or_else(|| CoreError::Unsupported {
                message: format!("{} is not dimmable", light.metadata.name),
            })?
        } else {
            0.0
        };
        let next = step_brightness(current, step);
        self.set_light_brightness(id, next).await?;
        Ok(next)
    }

    /// Make a light warmer (`Up`) or cooler (`Down`) by one step.
    pub async fn step_light_temperature(&self, id: &str, step: Step) -> Result<u16, CoreError> {
        let light = self.cached_light(id)?;
        let Some(temperature) = light.color_temperature else {
            return Err(CoreError::Unsupported {
                message: format!("{} has no colour temperature", light.metadata.name),
            });
        };
        let schema = temperature.mirek_schema.unwrap_or(DEFAULT_MIREK_SCHEMA);
        let current = temperature
            .mirek
            .unwrap_or((schema.mirek_minimum + schema.mirek_maximum) / 2);
        let next = step_mirek(current, schema, step);
        self.update_light(id, LightUpdate::new().on(true).mirek(next))
            .await?;
        Ok(next)
    }

    pub async fn set_light_color(&self, id: &str, x: f64, y: f64) -> Result<(), CoreError> {
        self.update_light(id, LightUpdate::new().on(true).xy(x, y))
            .await
    }

    pub async fn set_group_on(&self, grouped_light_id: &str, on: bool) -> Result<(), CoreError> {
        self.execute(Command::UpdateGroupedLight {
            id: grouped_light_id.to_owned(),
            update: LightUpdate::new().on(on),
        })
        .await
        .map(drop)
    }

    pub async fn set_group_brightness(
        &self,
        grouped_light_id: &str,
        brightness: f64,
    ) -> Result<(), CoreError> {
        self.execute(Command::UpdateGroupedLight {
            id: grouped_light_id.to_owned(),
            update: LightUpdate::new()
                .on(true)
                .brightness(clamp_brightness(brightness)),
        })
        .await
        .map(drop)
    }

    pub async fn recall_scene(&self, id: &str) -> Result<(), CoreError> {
        self.execute(Command::RecallScene { id: id.to_owned() })
            .await
            .map(drop)
    }

    /// Switch off every light the cache shows as on. All commands are
    /// attempted; the first failure is returned. Returns how many lights
    /// were switched off.
    pub async fn turn_off_all_lights(&self) -> Result<usize, CoreError> {
        let targets: Vec<String> = self
            .inner
            .cache
            .lights()
            .iter()
            .filter(|l| l.on.on)
            .map(|l| l.id.clone())
            .collect();

        let results = join_all(targets.iter().map(|id| self.set_light_on(id, false))).await;

        let mut switched = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => switched += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(switched),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn update_light(&self, id: &str, update: LightUpdate) -> Result<(), CoreError> {
        self.execute(Command::UpdateLight {
            id: id.to_owned(),
            update,
        })
        .await
        .map(drop)
    }

    fn cached_light(&self, id: &str) -> Result<Arc<huectl_api::models::Light>, CoreError> {
        self.inner
            .cache
            .light(id)
            .ok_or_else(|| CoreError::ResourceNotFound {
                resource_type: ResourceType::Light.to_string(),
                identifier: id.to_owned(),
            })
    }
}

// ── Event ingestion ──────────────────────────────────────────────────

/// Feed the cache from the event stream until it ends or the bridge is
/// disconnected. The stream is not reopened here.
async fn event_task(bridge: Bridge, cancel: CancellationToken) {
    let inner = &bridge.inner;
    let mut events = std::pin::pin!(inner.session.events());

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break "bridge disconnected".to_owned(),
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => apply_event(&inner.cache, &event),
            Some(Err(e)) => break e.to_string(),
            None => break "event stream ended".to_owned(),
        }
    };

    if !cancel.is_cancelled() {
        warn!(reason, "event stream closed; cache is no longer updated");
    }
    inner
        .stream_state
        .send_replace(StreamState::Closed { reason });
}

/// Apply one event's partials to the cache, in order.
pub(crate) fn apply_event(cache: &ResourceCache, event: &UpdateEvent) {
    cache.record_event();

    match event.kind {
        EventKind::Update | EventKind::Add => {
            for partial in &event.data {
                let Some(rtype) = partial.resource_type() else {
                    continue;
                };
                cache.apply_partial(rtype, std::slice::from_ref(partial));
            }
        }
        EventKind::Delete => {
            for partial in &event.data {
                if let (Some(rtype), Some(id)) = (partial.resource_type(), partial.id()) {
                    cache.remove(rtype, id);
                }
            }
        }
        EventKind::Error => warn!(event_id = ?event.id, "bridge reported an error event"),
        EventKind::Unknown => trace!(event_id = ?event.id, "ignoring event of unknown kind"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> UpdateEvent {
        UpdateEvent::from_element(value).unwrap()
    }

    fn seeded() -> ResourceCache {
        let cache = ResourceCache::new();
        cache.apply_snapshot(
            ResourceType::Light,
            vec![
                serde_json::from_value(json!({
                    "id": "l1",
                    "type": "light",
                    "metadata": { "name": "Desk" },
                    "on": { "on": true },
                    "dimming": { "brightness": 50.0 }
                }))
                .unwrap(),
            ],
        );
        cache
    }

    #[test]
    fn update_event_merges_partials() {
        let cache = seeded();
        apply_event(
            &cache,
            &event(json!({
                "id": "e1",
                "type": "update",
                "data": [
                    { "id": "l1", "type": "light", "on": { "on": false } },
                    { "id": "m1", "type": "motion", "motion": { "motion": true } }
                ]
            })),
        );
        assert!(!cache.light("l1").unwrap().on.on);
        assert!(cache.last_event_at().is_some());
    }

    #[test]
    fn delete_event_removes_resource() {
        let cache = seeded();
        apply_event(
            &cache,
            &event(json!({
                "id": "e2",
                "type": "delete",
                "data": [{ "id": "l1", "type": "light" }]
            })),
        );
        assert!(cache.light("l1").is_none());
    }

    #[test]
    fn add_event_inserts_resource() {
        let cache = seeded();
        apply_event(
            &cache,
            &event(json!({
                "id": "e3",
                "type": "add",
                "data": [{
                    "id": "s1",
                    "type": "scene",
                    "metadata": { "name": "Relax" },
                    "group": { "rid": "room-1", "rtype": "room" }
                }]
            })),
        );
        assert_eq!(cache.scene("s1").unwrap().metadata.name, "Relax");
    }
}
