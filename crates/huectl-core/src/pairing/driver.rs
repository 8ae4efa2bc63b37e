// ── Pairing driver ──
//
// Runs the effects the machine asks for. Long steps (discovery, linking,
// connecting) run as spawned tasks tagged with an epoch; any accepted
// transition cancels the running step and bumps the epoch, so a late
// outcome from an abandoned step is dropped on arrival.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use huectl_api::{BridgeIdentity, Credentials};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::machine::{Effect, Guidance, PairingEvent, PairingMachine, PairingState, transition};
use crate::error::CoreError;
use crate::storage::{self, BridgeStorage, StoredPairing};

/// The I/O pairing needs. [`BridgeBackend`](super::BridgeBackend) is the
/// real one; tests supply fakes.
pub trait PairingBackend: Send + Sync + 'static {
    /// What a successful connection yields.
    type Session: Clone + Send + Sync + 'static;

    fn discover(&self) -> impl Future<Output = Result<Option<BridgeIdentity>, CoreError>> + Send;

    fn link(
        &self,
        bridge: &BridgeIdentity,
    ) -> impl Future<Output = Result<Credentials, CoreError>> + Send;

    fn connect(
        &self,
        bridge: &BridgeIdentity,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Session, CoreError>> + Send;

    fn disconnect(&self, _session: &Self::Session) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Observable pairing status.
#[derive(Clone)]
pub struct PairingSnapshot<S> {
    pub state: PairingState,
    pub guidance: Guidance,
    pub bridge: Option<BridgeIdentity>,
    pub last_error: Option<String>,
    /// Present only while `Connected`.
    pub session: Option<S>,
}

impl<S> PairingSnapshot<S> {
    fn initial() -> Self {
        let state = PairingState::LoadStoredCredentials;
        Self {
            state,
            guidance: state.guidance(),
            bridge: None,
            last_error: None,
            session: None,
        }
    }
}

enum StepOutcome<S> {
    Event(PairingEvent),
    Connected(S),
}

struct Request {
    event: PairingEvent,
    reply: oneshot::Sender<Result<PairingState, CoreError>>,
}

// ── Handle ───────────────────────────────────────────────────────────

/// Front end of a running pairing driver.
pub struct PairingHandle<S> {
    inbox: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<PairingSnapshot<S>>,
    cancel: CancellationToken,
}

impl<S> Clone for PairingHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
            snapshot: self.snapshot.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> PairingHandle<S> {
    /// Start pairing on the current runtime.
    pub fn start<B>(backend: B, storage: Arc<dyn BridgeStorage>, cancel: CancellationToken) -> Self
    where
        B: PairingBackend<Session = S>,
    {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (step_tx, step_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(PairingSnapshot::initial());

        let driver = Driver {
            backend: Arc::new(backend),
            storage,
            machine: PairingMachine::new(),
            session: None,
            step: None,
            epoch: 0,
            step_tx,
            snapshot: snapshot_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(inbox_rx, step_rx));

        Self {
            inbox,
            snapshot,
            cancel,
        }
    }

    /// Deliver `event` and return the state it led to.
    pub async fn send(&self, event: PairingEvent) -> Result<PairingState, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(Request { event, reply })
            .map_err(|_| CoreError::SessionClosed)?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    pub async fn link(&self) -> Result<PairingState, CoreError> {
        self.send(PairingEvent::Link).await
    }

    pub async fn retry(&self) -> Result<PairingState, CoreError> {
        self.send(PairingEvent::Retry).await
    }

    pub async fn unlink(&self) -> Result<PairingState, CoreError> {
        self.send(PairingEvent::Unlink).await
    }

    pub fn current(&self) -> PairingSnapshot<S> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingSnapshot<S>> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot satisfies `pred`.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&PairingSnapshot<S>) -> bool,
    ) -> Result<PairingSnapshot<S>, CoreError> {
        let mut rx = self.snapshot.clone();
        let snap = rx
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| CoreError::SessionClosed)?;
        Ok(snap.clone())
    }

    /// Wait until no step is running and the user has to act.
    pub async fn settled(&self) -> Result<PairingSnapshot<S>, CoreError> {
        self.wait_for(|s| s.state.awaits_user()).await
    }

    /// The connected session, if pairing has reached `Connected`.
    pub fn session(&self) -> Result<S, CoreError> {
        self.snapshot
            .borrow()
            .session
            .clone()
            .ok_or(CoreError::NoBridgeConfigured)
    }

    /// Stop the driver, cancelling any running step.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Driver ───────────────────────────────────────────────────────────

struct Driver<B: PairingBackend> {
    backend: Arc<B>,
    storage: Arc<dyn BridgeStorage>,
    machine: PairingMachine,
    session: Option<B::Session>,
    /// Token of the step in flight, if any.
    step: Option<CancellationToken>,
    epoch: u64,
    step_tx: mpsc::UnboundedSender<(u64, StepOutcome<B::Session>)>,
    snapshot: watch::Sender<PairingSnapshot<B::Session>>,
    cancel: CancellationToken,
}

impl<B: PairingBackend> Driver<B> {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Request>,
        mut step_rx: mpsc::UnboundedReceiver<(u64, StepOutcome<B::Session>)>,
    ) {
        let cancel = self.cancel.clone();
        let mut pending = VecDeque::new();
        self.run_effects(self.machine.initial_effects(), &mut pending)
            .await;

        loop {
            while let Some(event) = pending.pop_front() {
                if let Err(e) = self.apply(event, &mut pending).await {
                    warn!(error = %e, "pairing step outcome rejected");
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                request = inbox.recv() => {
                    let Some(Request { event, reply }) = request else { break };
                    let result = self.apply(event, &mut pending).await;
                    let _ = reply.send(result);
                }
                Some((epoch, outcome)) = step_rx.recv() => {
                    if epoch != self.epoch {
                        trace!(epoch, current = self.epoch, "dropping stale step outcome");
                        self.discard(outcome).await;
                        continue;
                    }
                    self.step = None;
                    match outcome {
                        StepOutcome::Event(event) => pending.push_back(event),
                        StepOutcome::Connected(session) => {
                            self.session = Some(session);
                            pending.push_back(PairingEvent::ConnectSucceeded);
                        }
                    }
                }
            }
        }

        self.cancel_step();
        step_rx.close();
        while let Ok((_, outcome)) = step_rx.try_recv() {
            self.discard(outcome).await;
        }
        if let Some(session) = self.session.take() {
            self.backend.disconnect(&session).await;
        }
        debug!("pairing driver stopped");
    }

    /// A session opened by a step nobody waits for any more is closed.
    async fn discard(&mut self, outcome: StepOutcome<B::Session>) {
        if let StepOutcome::Connected(session) = outcome {
            debug!("closing session from a superseded connect");
            self.backend.disconnect(&session).await;
        }
    }

    async fn apply(
        &mut self,
        event: PairingEvent,
        pending: &mut VecDeque<PairingEvent>,
    ) -> Result<PairingState, CoreError> {
        let from = self.machine.state();
        if transition(from, &event).is_none() {
            return Err(CoreError::InvalidTransition {
                state: from.to_string(),
                event: event.name().to_owned(),
            });
        }

        self.cancel_step();
        self.epoch += 1;

        let name = event.name();
        let effects = self.machine.handle(event)?;
        let to = self.machine.state();
        info!(%from, %to, event = name, "pairing transition");

        self.run_effects(&effects, pending).await;
        self.publish();
        Ok(to)
    }

    async fn run_effects(&mut self, effects: &[Effect], pending: &mut VecDeque<PairingEvent>) {
        for effect in effects {
            match effect {
                Effect::LoadStoredCredentials => pending.push_back(self.load_stored()),
                Effect::Discover => self.spawn_discover(),
                Effect::CreateApplicationKey => self.spawn_link(pending),
                Effect::OpenSession => self.spawn_connect(pending),
                Effect::PersistCredentials => self.persist(),
                Effect::EraseCredentials => self.erase().await,
                Effect::ShowGuidance => {
                    let guidance = self.machine.state().guidance();
                    info!(title = guidance.title, "{}", guidance.body);
                }
            }
        }
    }

    fn publish(&self) {
        let state = self.machine.state();
        let ctx = self.machine.context();
        let session = if state == PairingState::Connected {
            self.session.clone()
        } else {
            None
        };
        self.snapshot.send_replace(PairingSnapshot {
            state,
            guidance: state.guidance(),
            bridge: ctx.bridge.clone(),
            last_error: ctx.last_error.clone(),
            session,
        });
    }

    fn cancel_step(&mut self) {
        if let Some(token) = self.step.take() {
            debug!("cancelling in-flight pairing step");
            token.cancel();
        }
    }

    fn spawn_step<F>(&mut self, step: F)
    where
        F: Future<Output = StepOutcome<B::Session>> + Send + 'static,
    {
        let token = self.cancel.child_token();
        self.step = Some(token.clone());
        let epoch = self.epoch;
        let tx = self.step_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                outcome = step => {
                    let _ = tx.send((epoch, outcome));
                }
            }
        });
    }

    // ── Effects ──────────────────────────────────────────────────────

    fn load_stored(&self) -> PairingEvent {
        match storage::load_pairing(self.storage.as_ref()) {
            Ok(StoredPairing::Complete(bridge, credentials)) => {
                PairingEvent::StoredCredentialsFound {
                    bridge,
                    credentials,
                }
            }
            Ok(StoredPairing::BridgeOnly(bridge)) => PairingEvent::StoredBridgeFound { bridge },
            Ok(StoredPairing::Nothing) => PairingEvent::NothingStored,
            Err(e) => {
                warn!(error = %e, "cannot read saved bridge, starting discovery");
                PairingEvent::NothingStored
            }
        }
    }

    fn spawn_discover(&mut self) {
        let backend = Arc::clone(&self.backend);
        self.spawn_step(async move {
            let event = match backend.discover().await {
                Ok(Some(bridge)) => PairingEvent::BridgeDiscovered { bridge },
                Ok(None) => PairingEvent::NoBridgeDiscovered,
                Err(e) => {
                    warn!(error = %e, "bridge discovery failed");
                    PairingEvent::NoBridgeDiscovered
                }
            };
            StepOutcome::Event(event)
        });
    }

    fn spawn_link(&mut self, pending: &mut VecDeque<PairingEvent>) {
        let Some(bridge) = self.machine.context().bridge.clone() else {
            pending.push_back(PairingEvent::LinkFailed {
                reason: CoreError::NoBridgeConfigured.to_string(),
            });
            return;
        };
        let backend = Arc::clone(&self.backend);
        self.spawn_step(async move {
            let event = match backend.link(&bridge).await {
                Ok(credentials) => PairingEvent::Linked { credentials },
                Err(e) => PairingEvent::LinkFailed {
                    reason: e.to_string(),
                },
            };
            StepOutcome::Event(event)
        });
    }

    fn spawn_connect(&mut self, pending: &mut VecDeque<PairingEvent>) {
        let ctx = self.machine.context();
        let (Some(bridge), Some(credentials)) = (ctx.bridge.clone(), ctx.credentials.clone())
        else {
            pending.push_back(PairingEvent::ConnectFailed {
                reason: CoreError::NoBridgeConfigured.to_string(),
            });
            return;
        };
        let backend = Arc::clone(&self.backend);
        self.spawn_step(async move {
            match backend.connect(&bridge, &credentials).await {
                Ok(session) => StepOutcome::Connected(session),
                Err(e) => StepOutcome::Event(PairingEvent::ConnectFailed {
                    reason: e.to_string(),
                }),
            }
        });
    }

    fn persist(&mut self) {
        let ctx = self.machine.context();
        if !ctx.unsaved {
            return;
        }
        let (Some(bridge), Some(credentials)) = (&ctx.bridge, &ctx.credentials) else {
            return;
        };
        match storage::save_pairing(self.storage.as_ref(), bridge, credentials) {
            Ok(()) => self.machine.mark_saved(),
            Err(e) => warn!(error = %e, "cannot save pairing"),
        }
    }

    async fn erase(&mut self) {
        if let Err(e) = storage::erase_pairing(self.storage.as_ref()) {
            warn!(error = %e, "cannot erase saved pairing");
        }
        if let Some(session) = self.session.take() {
            self.backend.disconnect(&session).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::storage::{MemoryStorage, StorageKey};

    #[derive(Clone, Debug, PartialEq)]
    struct FakeSession(String);

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        bridge: Option<BridgeIdentity>,
        link_failures: AtomicUsize,
        connect_hangs: bool,
        connect_dropped: Arc<AtomicBool>,
        connect_gate: Option<Arc<Semaphore>>,
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    impl PairingBackend for FakeBackend {
        type Session = FakeSession;

        async fn discover(&self) -> Result<Option<BridgeIdentity>, CoreError> {
            Ok(self.bridge.clone())
        }

        async fn link(&self, _bridge: &BridgeIdentity) -> Result<Credentials, CoreError> {
            let remaining = self.link_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.link_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(CoreError::LinkButtonNotPressed);
            }
            Ok(Credentials::new("fresh-key"))
        }

        async fn connect(
            &self,
            bridge: &BridgeIdentity,
            _credentials: &Credentials,
        ) -> Result<FakeSession, CoreError> {
            if self.connect_hangs {
                let _guard = DropFlag(Arc::clone(&self.connect_dropped));
                std::future::pending::<()>().await;
            }
            if let Some(gate) = &self.connect_gate {
                gate.acquire().await.unwrap().forget();
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession(bridge.id.clone()))
        }

        async fn disconnect(&self, _session: &FakeSession) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts writes of the application key.
    #[derive(Debug, Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        key_writes: AtomicUsize,
    }

    impl BridgeStorage for CountingStorage {
        fn get(&self, key: StorageKey) -> Result<Option<String>, CoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: StorageKey, value: &str) -> Result<(), CoreError> {
            if key == StorageKey::ApplicationKey {
                self.key_writes.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: StorageKey) -> Result<(), CoreError> {
            self.inner.remove(key)
        }
    }

    fn bridge() -> BridgeIdentity {
        BridgeIdentity::new("001788FFFE6A1B2C", "192.168.1.20".parse().unwrap())
    }

    async fn reach(
        handle: &PairingHandle<FakeSession>,
        state: PairingState,
    ) -> PairingSnapshot<FakeSession> {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("never reached {state}"))
            .unwrap()
    }

    #[tokio::test]
    async fn discovers_links_connects_and_persists_once() {
        let storage = Arc::new(CountingStorage::default());
        let backend = FakeBackend {
            bridge: Some(bridge()),
            ..FakeBackend::default()
        };
        let handle = PairingHandle::start(backend, storage.clone(), CancellationToken::new());

        let snap = reach(&handle, PairingState::LinkWithBridge).await;
        assert_eq!(snap.bridge.unwrap().id, "001788fffe6a1b2c");
        assert!(handle.session().is_err());

        handle.link().await.unwrap();
        let snap = reach(&handle, PairingState::Connected).await;
        assert_eq!(snap.session, Some(FakeSession("001788fffe6a1b2c".into())));
        assert_eq!(handle.session().unwrap().0, "001788fffe6a1b2c");

        assert_eq!(
            storage.get(StorageKey::BridgeId).unwrap().as_deref(),
            Some("001788fffe6a1b2c")
        );
        assert_eq!(
            storage.get(StorageKey::BridgeIpAddress).unwrap().as_deref(),
            Some("192.168.1.20")
        );
        assert_eq!(
            storage.get(StorageKey::ApplicationKey).unwrap().as_deref(),
            Some("fresh-key")
        );
        assert_eq!(storage.key_writes.load(Ordering::SeqCst), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn stored_credentials_connect_without_rewriting() {
        let storage = Arc::new(CountingStorage::default());
        storage::save_pairing(storage.as_ref(), &bridge(), &Credentials::new("old-key")).unwrap();
        storage.key_writes.store(0, Ordering::SeqCst);

        let handle = PairingHandle::start(
            FakeBackend::default(),
            storage.clone(),
            CancellationToken::new(),
        );
        reach(&handle, PairingState::Connected).await;
        assert_eq!(storage.key_writes.load(Ordering::SeqCst), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn failed_link_is_retried() {
        let backend = FakeBackend {
            bridge: Some(bridge()),
            link_failures: AtomicUsize::new(1),
            ..FakeBackend::default()
        };
        let handle = PairingHandle::start(
            backend,
            Arc::new(MemoryStorage::new()),
            CancellationToken::new(),
        );

        reach(&handle, PairingState::LinkWithBridge).await;
        handle.link().await.unwrap();
        let snap = reach(&handle, PairingState::FailedToLink).await;
        assert_eq!(snap.last_error.as_deref(), Some("Link button not pressed"));
        assert_eq!(snap.guidance.title, "Failed to link with the Hue Bridge");

        handle.retry().await.unwrap();
        let snap = reach(&handle, PairingState::Connected).await;
        assert!(snap.last_error.is_none());
        handle.shutdown();
    }

    #[tokio::test]
    async fn no_bridge_found_then_user_action_rejected() {
        let handle = PairingHandle::start(
            FakeBackend::default(),
            Arc::new(MemoryStorage::new()),
            CancellationToken::new(),
        );
        reach(&handle, PairingState::NoBridgeFound).await;

        let err = handle.link().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(handle.current().state, PairingState::NoBridgeFound);
        handle.shutdown();
    }

    #[tokio::test]
    async fn unlink_while_connecting_cancels_and_erases() {
        let storage = Arc::new(MemoryStorage::new());
        storage::save_pairing(storage.as_ref(), &bridge(), &Credentials::new("old-key")).unwrap();
        let dropped = Arc::new(AtomicBool::new(false));
        let backend = FakeBackend {
            connect_hangs: true,
            connect_dropped: Arc::clone(&dropped),
            ..FakeBackend::default()
        };
        let handle = PairingHandle::start(backend, storage.clone(), CancellationToken::new());

        reach(&handle, PairingState::Connecting).await;
        assert_eq!(handle.unlink().await.unwrap(), PairingState::Discovering);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped.load(Ordering::SeqCst), "connect step was not cancelled");
        assert!(storage.get(StorageKey::ApplicationKey).unwrap().is_none());
        assert!(storage.get(StorageKey::BridgeId).unwrap().is_none());

        reach(&handle, PairingState::NoBridgeFound).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn unlink_when_connected_closes_the_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage::save_pairing(storage.as_ref(), &bridge(), &Credentials::new("key")).unwrap();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let backend = FakeBackend {
            disconnects: Arc::clone(&disconnects),
            ..FakeBackend::default()
        };
        let handle = PairingHandle::start(backend, storage.clone(), CancellationToken::new());

        reach(&handle, PairingState::Connected).await;
        handle.unlink().await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(handle.session().is_err());
        handle.shutdown();
    }

    #[tokio::test]
    async fn session_finished_during_unlink_is_closed() {
        let storage = Arc::new(MemoryStorage::new());
        storage::save_pairing(storage.as_ref(), &bridge(), &Credentials::new("key")).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let backend = FakeBackend {
            connect_gate: Some(Arc::clone(&gate)),
            connects: Arc::clone(&connects),
            disconnects: Arc::clone(&disconnects),
            ..FakeBackend::default()
        };
        let handle = PairingHandle::start(backend, storage, CancellationToken::new());

        reach(&handle, PairingState::Connecting).await;
        gate.add_permits(1);
        handle.unlink().await.unwrap();
        reach(&handle, PairingState::NoBridgeFound).await;

        for _ in 0..100 {
            if disconnects.load(Ordering::SeqCst) == connects.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            disconnects.load(Ordering::SeqCst),
            connects.load(Ordering::SeqCst)
        );
        assert!(handle.session().is_err());
        handle.shutdown();
    }
}
