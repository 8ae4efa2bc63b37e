// ── Rate-limited command queue ──
//
// One FIFO worker per resource class. A worker starts the next command no
// sooner than `per / max_requests` after the previous one started, so a
// burst is smoothed into an even cadence instead of being rejected.
// Commands in different classes never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use huectl_api::ResourceType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CoreError;

// ── Budgets ──────────────────────────────────────────────────────────

/// Resource classes with independent request budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceClass {
    /// Individual lights.
    Light,
    /// Grouped lights and scene recalls, which fan out on the bridge.
    Group,
}

impl ResourceClass {
    pub fn of(rtype: ResourceType) -> Self {
        match rtype {
            ResourceType::Light => Self::Light,
            ResourceType::GroupedLight
            | ResourceType::Room
            | ResourceType::Zone
            | ResourceType::Scene => Self::Group,
        }
    }
}

/// At most `max_requests` command starts per `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    #[serde(with = "duration_ms")]
    pub per: Duration,
}

impl RateLimit {
    pub const fn new(max_requests: u32, per: Duration) -> Self {
        Self { max_requests, per }
    }

    /// Spacing enforced between consecutive command starts.
    pub fn min_interval(&self) -> Duration {
        self.per / self.max_requests.max(1)
    }
}

/// Budgets for both classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLimits {
    pub light: RateLimit,
    pub group: RateLimit,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            light: RateLimit::new(10, Duration::from_secs(1)),
            group: RateLimit::new(1, Duration::from_secs(1)),
        }
    }
}

impl QueueLimits {
    pub fn for_class(&self, class: ResourceClass) -> RateLimit {
        match class {
            ResourceClass::Light => self.light,
            ResourceClass::Group => self.group,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ── Queue ────────────────────────────────────────────────────────────

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Per-class FIFO queues with enforced spacing.
///
/// Cheaply cloneable. Workers run until the cancellation token fires;
/// queued commands that never started then resolve to
/// [`CoreError::SessionClosed`].
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    senders: HashMap<ResourceClass, mpsc::UnboundedSender<Job>>,
    limits: QueueLimits,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("limits", &self.inner.limits)
            .field("closed", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CommandQueue {
    /// Spawn one worker per class. Must be called inside a Tokio runtime.
    pub fn new(limits: QueueLimits, cancel: CancellationToken) -> Self {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for class in ResourceClass::iter() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(class, tx);
            workers.push(tokio::spawn(class_worker(
                class,
                limits.for_class(class),
                rx,
                cancel.clone(),
            )));
        }

        Self {
            inner: Arc::new(QueueInner {
                senders,
                limits,
                cancel,
                workers: Mutex::new(workers),
            }),
        }
    }

    pub fn limits(&self) -> QueueLimits {
        self.inner.limits
    }

    /// Append `thunk` to the FIFO for `class` and wait for its outcome.
    ///
    /// The thunk is not invoked until its turn comes and the class budget
    /// allows it. A failing command does not affect the ones behind it.
    pub async fn enqueue<F, Fut, T>(&self, class: ResourceClass, thunk: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, huectl_api::Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        let sender = self
            .inner
            .senders
            .get(&class)
            .ok_or_else(|| CoreError::Internal(format!("no worker for class {class}")))?;

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = tx.send(thunk().await);
            })
        });

        sender.send(job).map_err(|_| CoreError::SessionClosed)?;
        trace!(%class, "command queued");

        rx.await
            .map_err(|_| CoreError::SessionClosed)?
            .map_err(CoreError::from)
    }

    /// Stop both workers. Pending commands resolve to `SessionClosed`.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for worker in self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            worker.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

/// Drain one class FIFO, one command at a time, respecting the budget.
async fn class_worker(
    class: ResourceClass,
    limit: RateLimit,
    mut rx: mpsc::UnboundedReceiver<Job>,
    cancel: CancellationToken,
) {
    let interval = limit.min_interval();
    let mut next_start: Option<Instant> = None;

    loop {
        let job = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else { break };
                job
            }
        };

        if let Some(at) = next_start {
            let now = Instant::now();
            if at > now {
                let delay = at - now;
                debug!(
                    %class,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "rate limit reached, deferring command"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep_until(at) => {}
                }
            }
        }

        next_start = Some(Instant::now() + interval);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = job() => {}
        }
    }

    debug!(%class, "command worker stopped");
}
