//! 🚌 The Batch Aggregator -- where write requests wait for their ride.
//!
//! 🎬 COLD OPEN: EXT. BUS STOP, 2:14 AM
//!
//! The bus leaves when it is full. Or when nobody new has shown up for a while.
//! Never both. Never twice. Nobody gets left at the stop, nobody rides two buses.
//!
//! There is exactly one group (every message shares the same correlation key).
//! Its lifecycle:
//!
//! ```text
//!   EMPTY ──append──▶ ACCUMULATING ──size == batch_size──▶ released (count)
//!                        │   ▲                              │
//!                        │   └─append (timer re-armed)      ▼
//!                        └──idle timer fires──▶ released (timeout) ──▶ EMPTY
//! ```
//!
//! 🔒 Every mutation happens under one mutex. The idle timer is a spawned task that
//! takes the same mutex, and only releases the group if it is still the exact
//! group *and* the exact arming it was started for. A count release aborts the
//! timer; a stale timer that woke up anyway finds a different generation and
//! goes back to sleep forever. Exactly once, both ways.
//!
//! Released batches are handed off *after* the lock is dropped, so a slow store
//! never blocks the next append.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::common::{Batch, WriteRequest};
use crate::executor::InFlight;

/// 📬 Where timer-released batches go. There is no caller waiting for those.
pub type ExpiryHandler = Arc<dyn Fn(Batch) -> BoxFuture<'static, ()> + Send + Sync>;

/// 🚌 Groups write requests into batches by count and by idle time.
///
/// Cheap to clone; clones share the same group.
#[derive(Clone)]
pub struct BatchAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    batch_size: usize,
    idle_timeout: Option<Duration>,
    state: Mutex<GroupState>,
    on_expiry: ExpiryHandler,
    expiring: InFlight,
}

#[derive(Default)]
struct GroupState {
    // -- None is the EMPTY state. Some is ACCUMULATING. There is no third option.
    group: Option<Group>,
    generations: u64,
}

struct Group {
    generation: u64,
    requests: Vec<WriteRequest>,
    arms: u64,
    timer: Option<JoinHandle<()>>,
}

impl Group {
    fn new(generation: u64, capacity: usize) -> Self {
        Self {
            generation,
            requests: Vec::with_capacity(capacity),
            arms: 0,
            timer: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn into_batch(mut self) -> Batch {
        self.disarm();
        Batch::new(self.requests)
    }
}

impl std::fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🔧 the expiry handler is a closure and closures don't do Debug. they do vibes.
        f.debug_struct("BatchAggregator")
            .field("batch_size", &self.inner.batch_size)
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl BatchAggregator {
    /// 🚀 `batch_size` below 1 is treated as 1. `idle_timeout: None` means count-only.
    ///
    /// `Some(Duration::ZERO)` does not release inline. The timer task still runs and
    /// releases on its next tick, so nobody is awaiting that batch and its failures
    /// go to `on_expiry`.
    pub fn new(batch_size: usize, idle_timeout: Option<Duration>, on_expiry: ExpiryHandler) -> Self {
        Self {
            inner: Arc::new(Inner {
                batch_size: batch_size.max(1),
                idle_timeout,
                state: Mutex::new(GroupState::default()),
                on_expiry,
                expiring: InFlight::default(),
            }),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// 📥 Add one request to the group.
    ///
    /// Returns the released batch when this request filled the group. The caller
    /// owns it from there. Otherwise returns `None` and (re)arms the idle timer.
    pub async fn append(&self, request: WriteRequest) -> Option<Batch> {
        let mut state = self.inner.state.lock().await;
        let GroupState { group, generations } = &mut *state;

        let group = group.get_or_insert_with(|| {
            *generations += 1;
            debug!("🆕 group #{} started accumulating", generations);
            Group::new(*generations, self.inner.batch_size)
        });
        group.requests.push(request);

        if group.requests.len() >= self.inner.batch_size {
            let generation = group.generation;
            let released = state.group.take().map(Group::into_batch);
            debug!("📦 group #{} is full, released by count", generation);
            return released;
        }

        if let Some(timeout) = self.inner.idle_timeout {
            self.arm_idle_timer(group, timeout);
        }
        None
    }

    /// 🚿 Release whatever is pending right now, timer or no timer. For shutdown.
    ///
    /// Also waits for a timer release that is already in flight, so after this
    /// returns nothing is left holding on to a request.
    pub async fn flush(&self) -> Option<Batch> {
        let released = {
            let mut state = self.inner.state.lock().await;
            state.group.take().map(Group::into_batch)
        };
        self.inner.expiring.wait_idle().await;
        if let Some(batch) = &released {
            info!("🚿 flushed a pending group of {} requests", batch.len());
        }
        released
    }

    /// 📏 How many requests are waiting in the current group.
    pub async fn pending(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.group.as_ref().map_or(0, |group| group.requests.len())
    }

    fn arm_idle_timer(&self, group: &mut Group, timeout: Duration) {
        // -- ⏳ idle semantics: every append restarts the countdown
        group.disarm();
        group.arms += 1;

        let generation = group.generation;
        let arm = group.arms;
        let inner = Arc::clone(&self.inner);
        group.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.expire(generation, arm).await;
        }));
    }
}

impl Inner {
    async fn expire(&self, generation: u64, arm: u64) {
        let _guard = self.expiring.enter();
        let released = {
            let mut state = self.state.lock().await;
            let still_ours = state
                .group
                .as_ref()
                .is_some_and(|group| group.generation == generation && group.arms == arm);
            if still_ours {
                // -- 🔒 take the handle without aborting it: that handle is us
                state.group.take().map(|mut group| {
                    group.timer = None;
                    Batch::new(group.requests)
                })
            } else {
                None
            }
        };

        if let Some(batch) = released {
            info!(
                "⏰ group #{} sat idle for {:?}, releasing a partial batch of {} requests",
                generation,
                self.idle_timeout.unwrap_or_default(),
                batch.len()
            );
            (self.on_expiry)(batch).await;
        }
    }
}
