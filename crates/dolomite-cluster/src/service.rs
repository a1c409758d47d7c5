//! Cluster-state service and observer.
//!
//! [`ClusterService`] owns the current [`ClusterState`] snapshot and a list
//! of single-shot listeners waiting for the next change. Publishing a newer
//! state (or closing the service) drains the listeners; each listener fires
//! exactly once with one of the three [`StateChange`] outcomes.
//!
//! [`ClusterStateObserver`] wraps the service for retry loops: it remembers
//! which state the caller last acted on, optionally bounds the total wait
//! with a deadline, and latches `timed_out` once the deadline fires so the
//! caller can make its next decision final.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::state::ClusterState;

/// Outcome of a single-shot wait for the next cluster-state change.
#[derive(Debug, Clone)]
pub enum StateChange {
    /// A newer state was published.
    Changed(Arc<ClusterState>),
    /// The cluster service is shutting down; no further states will come.
    ServiceClosed,
    /// The observer's deadline elapsed first.
    TimedOut,
}

/// Single-shot listener for the next state change.
pub type ChangeListener = Box<dyn FnOnce(StateChange) + Send + 'static>;

/// A registered waiter. The slot is shared with the timeout watchdog; whoever
/// takes the listener out first gets to fire it.
type WaiterSlot = Arc<Mutex<Option<ChangeListener>>>;

struct ServiceState {
    current: Arc<ClusterState>,
    closed: bool,
    waiters: Vec<WaiterSlot>,
}

/// Holds the current cluster state and notifies single-shot waiters.
pub struct ClusterService {
    inner: Mutex<ServiceState>,
}

impl ClusterService {
    pub fn new(initial: ClusterState) -> Self {
        Self {
            inner: Mutex::new(ServiceState {
                current: Arc::new(initial),
                closed: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<ClusterState> {
        Arc::clone(&self.inner.lock().expect("cluster service lock").current)
    }

    /// Installs a newer state and wakes every waiter.
    ///
    /// States are versioned; a publish that does not advance the version is
    /// dropped so a late-arriving older state cannot roll the node back.
    pub fn publish(&self, state: ClusterState) {
        let (current, waiters) = {
            let mut inner = self.inner.lock().expect("cluster service lock");
            if inner.closed {
                return;
            }
            if state.version <= inner.current.version {
                tracing::debug!(
                    published = state.version,
                    current = inner.current.version,
                    "dropping stale cluster state"
                );
                return;
            }
            inner.current = Arc::new(state);
            let waiters = std::mem::take(&mut inner.waiters);
            (Arc::clone(&inner.current), waiters)
        };

        tracing::debug!(version = current.version, "published cluster state");
        for slot in waiters {
            if let Some(listener) = slot.lock().expect("waiter slot lock").take() {
                listener(StateChange::Changed(Arc::clone(&current)));
            }
        }
    }

    /// Shuts the service down, failing every waiter with `ServiceClosed`.
    pub fn close(&self) {
        let waiters = {
            let mut inner = self.inner.lock().expect("cluster service lock");
            inner.closed = true;
            std::mem::take(&mut inner.waiters)
        };

        for slot in waiters {
            if let Some(listener) = slot.lock().expect("waiter slot lock").take() {
                listener(StateChange::ServiceClosed);
            }
        }
    }
}

// ============================================================================
// ClusterStateObserver
// ============================================================================

struct ObserverShared {
    observed: Mutex<Arc<ClusterState>>,
    timed_out: AtomicBool,
    deadline: Option<Instant>,
}

/// Observes the cluster service on behalf of one retry loop.
///
/// The deadline is fixed at construction and bounds the *total* time spent
/// across all waits on this observer. Once it fires, `timed_out` stays set:
/// the caller gets one wake-up with [`StateChange::TimedOut`] and any later
/// wait short-circuits to the same outcome immediately.
pub struct ClusterStateObserver {
    service: Arc<ClusterService>,
    shared: Arc<ObserverShared>,
}

impl ClusterStateObserver {
    pub fn new(service: Arc<ClusterService>, timeout: Option<Duration>) -> Self {
        let observed = service.current();
        Self {
            service,
            shared: Arc::new(ObserverShared {
                observed: Mutex::new(observed),
                timed_out: AtomicBool::new(false),
                deadline: timeout.map(|timeout| Instant::now() + timeout),
            }),
        }
    }

    /// The snapshot the caller last acted on. Updated whenever a wait
    /// completes with a changed state.
    pub fn observed_state(&self) -> Arc<ClusterState> {
        Arc::clone(&self.shared.observed.lock().expect("observer lock"))
    }

    /// True once the observer's deadline has fired.
    pub fn is_timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::SeqCst)
    }

    /// Registers a single-shot listener for the next change.
    ///
    /// Fires immediately (on the calling thread) if the service is closed,
    /// a newer state than the observed one is already current, or the
    /// deadline has already elapsed.
    pub fn wait_for_next_change(&self, listener: ChangeListener) {
        let shared = Arc::clone(&self.shared);
        let mut wrapped: Option<ChangeListener> = Some(Box::new(move |change: StateChange| {
            match &change {
                StateChange::Changed(state) => {
                    *shared.observed.lock().expect("observer lock") = Arc::clone(state);
                }
                StateChange::TimedOut => shared.timed_out.store(true, Ordering::SeqCst),
                StateChange::ServiceClosed => {}
            }
            listener(change);
        }));

        let immediate = {
            let mut inner = self.service.inner.lock().expect("cluster service lock");
            if inner.closed {
                Some(StateChange::ServiceClosed)
            } else if inner.current.version > self.observed_version() {
                Some(StateChange::Changed(Arc::clone(&inner.current)))
            } else if self.deadline_elapsed() {
                Some(StateChange::TimedOut)
            } else {
                let slot: WaiterSlot = Arc::new(Mutex::new(wrapped.take()));
                inner.waiters.push(Arc::clone(&slot));
                if let Some(deadline) = self.shared.deadline {
                    spawn_timeout_watchdog(slot, deadline);
                }
                None
            }
        };

        // Fired outside the service lock: the listener may re-enter the
        // observer (schedule another wait) from the same call stack.
        if let Some(change) = immediate {
            if let Some(listener) = wrapped.take() {
                listener(change);
            }
        }
    }

    fn observed_version(&self) -> u64 {
        self.shared.observed.lock().expect("observer lock").version
    }

    fn deadline_elapsed(&self) -> bool {
        self.shared
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Fires `TimedOut` on the slot if nothing else has claimed it by the
/// deadline. The publish path and the watchdog race for the slot; the
/// single `Option::take` under the slot lock decides the winner.
fn spawn_timeout_watchdog(slot: WaiterSlot, deadline: Instant) {
    thread::spawn(move || {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        if let Some(listener) = slot.lock().expect("waiter slot lock").take() {
            listener(StateChange::TimedOut);
        }
    });
}
