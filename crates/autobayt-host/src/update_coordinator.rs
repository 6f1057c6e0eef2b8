//! Polling data coordinator
//!
//! [`DataUpdateCoordinator`] holds the latest snapshot produced by a
//! [`DataFetcher`], whether the last refresh succeeded, and the listeners to
//! notify after each refresh. The fetcher owns its coordinator and drives it
//! through the provided trait methods, so a single `Arc` is enough to poll.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::integration::SetupError;

/// A refresh failed; the message is shown as the setup/availability reason
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

pub type Listener = Arc<dyn Fn() + Send + Sync>;

pub struct DataUpdateCoordinator<T> {
    name: String,
    update_interval: Duration,
    data: RwLock<Option<Arc<T>>>,
    last_update_success: AtomicBool,
    last_error: RwLock<Option<UpdateFailed>>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<T> DataUpdateCoordinator<T> {
    pub fn new(name: impl Into<String>, update_interval: Duration) -> Self {
        Self {
            name: name.into(),
            update_interval,
            data: RwLock::new(None),
            last_update_success: AtomicBool::new(true),
            last_error: RwLock::new(None),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Latest successful snapshot
    pub fn data(&self) -> Option<Arc<T>> {
        self.data.read().ok().and_then(|d| d.clone())
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Register a callback invoked after every refresh; returns its id
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        id
    }

    pub fn remove_listener(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn notify_listeners(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }

    fn set_data(&self, data: T) {
        if let Ok(mut slot) = self.data.write() {
            *slot = Some(Arc::new(data));
        }
        if let Ok(mut last_error) = self.last_error.write() {
            *last_error = None;
        }
        if !self.last_update_success.swap(true, Ordering::SeqCst) {
            info!("Fetching {} data recovered", self.name);
        }
    }

    fn set_failed(&self, err: UpdateFailed) {
        if self.last_update_success.swap(false, Ordering::SeqCst) {
            error!("Error fetching {} data: {}", self.name, err);
        } else {
            debug!("Error fetching {} data: {}", self.name, err);
        }
        if let Ok(mut last_error) = self.last_error.write() {
            *last_error = Some(err);
        }
    }

    fn set_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop polling and drop all listeners
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
        debug!("Shut down {} coordinator", self.name);
    }
}

/// Source of coordinator snapshots
#[async_trait]
pub trait DataFetcher<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    fn coordinator(&self) -> &DataUpdateCoordinator<T>;

    async fn fetch(&self) -> Result<T, UpdateFailed>;

    /// Hook run after a successful refresh, once listeners have been told
    async fn refreshed(&self) {}

    /// Fetch a new snapshot; a failure keeps the previous one
    async fn refresh(&self) {
        let coordinator = self.coordinator();
        let succeeded = {
            let _guard = coordinator.refresh_lock.lock().await;
            if coordinator.is_shut_down() {
                return;
            }
            match self.fetch().await {
                Ok(data) => {
                    coordinator.set_data(data);
                    true
                }
                Err(err) => {
                    coordinator.set_failed(err);
                    false
                }
            }
        };

        coordinator.notify_listeners();
        if succeeded {
            self.refreshed().await;
        }
    }

    /// Refresh on behalf of an entity action
    async fn request_refresh(&self) {
        self.refresh().await;
    }

    /// Initial refresh during setup; failure means the entry is not ready
    async fn first_refresh(&self) -> Result<(), SetupError> {
        self.refresh().await;
        let coordinator = self.coordinator();
        if coordinator.last_update_success() {
            Ok(())
        } else {
            let reason = coordinator
                .last_error()
                .map(|e| e.0)
                .unwrap_or_else(|| format!("{} refresh failed", coordinator.name()));
            Err(SetupError::NotReady(reason))
        }
    }

    /// Poll at the update interval until shutdown or the fetcher is dropped
    fn start_polling(self: &Arc<Self>)
    where
        Self: Sized + 'static,
    {
        let weak = Arc::downgrade(self);
        let period = self.coordinator().update_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(fetcher) = weak.upgrade() else {
                    break;
                };
                if fetcher.coordinator().is_shut_down() {
                    break;
                }
                fetcher.refresh().await;
            }
        });
        self.coordinator().set_task(handle);
    }
}
