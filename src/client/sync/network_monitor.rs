//! # Network Monitor
//!
//! Decides whether the remote system is reachable by combining two signals:
//!
//! - **Native status**: what the platform reports. Going offline is trusted
//!   immediately, and so is coming back online.
//! - **Reachability probe**: a periodic lightweight request. One failed probe is
//!   treated as noise; only `failure_threshold` consecutive failures declare the
//!   network offline. A successful probe restores online unless the platform
//!   itself says it is offline.
//!
//! Transitions are published on a `watch` channel and to listeners registered with
//! [`NetworkMonitor::subscribe`]. Dropping the returned [`Subscription`] unregisters
//! the listener.
//!
//! ## Usage
//!
//! ```rust
//! use garage_sync::client::sync::network_monitor::{ConnectivityEvent, NetworkMonitor};
//!
//! let monitor = NetworkMonitor::new(2);
//! let subscription = monitor.subscribe(|event| {
//!     if event == ConnectivityEvent::Online {
//!         println!("back online");
//!     }
//! });
//!
//! monitor.set_native_status(false);
//! assert!(!monitor.is_online());
//! subscription.dispose();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::shared::error::Result;

/// A connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// Lightweight check that the remote system answers
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that sends `HEAD` to a fixed URL
///
/// Any answer below 500 counts as reachable: a 401 or 404 still proves the proxy is up.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "reachability probe failed");
                false
            }
        }
    }
}

type Listener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;
type Listeners = Mutex<HashMap<u64, Listener>>;

/// Handle to a registered connectivity listener; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Unsubscribe now
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct ProbeTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    status: watch::Sender<bool>,
    native_online: AtomicBool,
    consecutive_failures: Mutex<u32>,
    failure_threshold: u32,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    probe_task: Mutex<Option<ProbeTask>>,
}

/// Online/offline detector
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .field("failure_threshold", &self.inner.failure_threshold)
            .finish_non_exhaustive()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(2)
    }
}

impl NetworkMonitor {
    /// Monitor driven by native status and manually recorded probe results only
    pub fn new(failure_threshold: u32) -> Self {
        Self::build(None, failure_threshold)
    }

    /// Monitor that can poll `probe` with [`Self::start_probing`]
    pub fn with_probe(probe: Arc<dyn ReachabilityProbe>, failure_threshold: u32) -> Self {
        Self::build(Some(probe), failure_threshold)
    }

    fn build(probe: Option<Arc<dyn ReachabilityProbe>>, failure_threshold: u32) -> Self {
        let (status, _) = watch::channel(true);
        Self {
            inner: Arc::new(MonitorInner {
                status,
                native_online: AtomicBool::new(true),
                consecutive_failures: Mutex::new(0),
                failure_threshold: failure_threshold.max(1),
                listeners: Arc::new(Mutex::new(HashMap::new())),
                next_listener: AtomicU64::new(0),
                probe,
                probe_task: Mutex::new(None),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.status.borrow()
    }

    /// Receiver that yields the current reachability and every change to it
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.status.subscribe()
    }

    /// Feed the platform's connectivity signal
    pub fn set_native_status(&self, online: bool) {
        self.inner.native_online.store(online, Ordering::SeqCst);
        if online {
            *lock(&self.inner.consecutive_failures) = 0;
        }
        self.transition(online, "native");
    }

    /// Feed the result of one reachability probe
    pub fn record_probe(&self, success: bool) {
        if success {
            *lock(&self.inner.consecutive_failures) = 0;
            if self.inner.native_online.load(Ordering::SeqCst) {
                self.transition(true, "probe");
            }
            return;
        }

        let failures = {
            let mut failures = lock(&self.inner.consecutive_failures);
            *failures += 1;
            *failures
        };
        if failures >= self.inner.failure_threshold {
            self.transition(false, "probe");
        } else {
            tracing::warn!(failures, threshold = self.inner.failure_threshold, "reachability probe failed");
        }
    }

    /// Run the configured probe once. Returns `None` without a probe.
    pub async fn run_probe_cycle(&self) -> Option<bool> {
        let probe = self.inner.probe.clone()?;
        let success = probe.probe().await;
        self.record_probe(success);
        Some(success)
    }

    /// Poll the probe every `interval` until [`Self::stop_probing`]
    ///
    /// Returns false when there is no probe or polling already runs.
    pub fn start_probing(&self, interval: Duration) -> bool {
        if self.inner.probe.is_none() {
            return false;
        }

        let mut task = lock(&self.inner.probe_task);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                NetworkMonitor { inner }.run_probe_cycle().await;
            }
        });

        *task = Some(ProbeTask { stop, handle });
        tracing::info!(interval_secs = interval.as_secs(), "reachability probing started");
        true
    }

    pub async fn stop_probing(&self) {
        let task = lock(&self.inner.probe_task).take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                tracing::error!(error = %e, "probe task ended abnormally");
            }
            tracing::info!("reachability probing stopped");
        }
    }

    /// Register a listener for connectivity transitions
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn transition(&self, online: bool, source: &'static str) {
        let changed = self.inner.status.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if !changed {
            return;
        }

        let event = if online {
            tracing::info!(source, "network is online");
            ConnectivityEvent::Online
        } else {
            tracing::warn!(source, "network is offline");
            ConnectivityEvent::Offline
        };

        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<Listener> = lock(&self.inner.listeners).values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
