//! Cast framework event registry
//!
//! The external cast framework reports session and cast-state changes
//! asynchronously. Hosts dispatch them into a [`CastEventRegistry`];
//! listeners hold a [`Registration`] and are removed when it drops.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Cast framework availability as reported by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CastFrameworkState {
    NoDevicesAvailable,
    NotConnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CastFrameworkEvent {
    SessionStarted { device_name: Option<String> },
    SessionResumed { device_name: Option<String> },
    SessionEnded,
    CastStateChanged { state: CastFrameworkState },
}

type Handler = Arc<dyn Fn(&CastFrameworkEvent) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    handlers: DashMap<u64, Handler>,
    next_id: AtomicU64,
}

/// Explicit subscription point for cast framework events
#[derive(Clone, Default)]
pub struct CastEventRegistry {
    inner: Arc<RegistryInner>,
}

impl CastEventRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; it stays registered while the returned handle lives
    pub fn register<F>(&self, handler: F) -> Registration
    where
        F: Fn(&CastFrameworkEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.insert(id, Arc::new(handler));
        debug!(listener_id = id, "Cast event listener registered");

        Registration {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every listener; returns how many received it
    pub fn dispatch(&self, event: &CastFrameworkEvent) -> usize {
        // Snapshot first so listeners may unregister while handling
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.handlers.len()
    }
}

impl std::fmt::Debug for CastEventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastEventRegistry")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Listener handle; unregisters on drop
#[derive(Debug)]
pub struct Registration {
    id: u64,
    registry: Weak<RegistryInner>,
}

impl Registration {
    pub fn unregister(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.remove(&self.id);
            debug!(listener_id = self.id, "Cast event listener unregistered");
        }
    }
}
