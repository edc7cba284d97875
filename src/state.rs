use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::session::SessionManager;

/// Shared application state passed to all handlers and middleware.
///
/// `SessionManager` and `BackendClient` are cheaply cloneable (they wrap
/// `Arc`s internally), so cloning `AppState` per request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub backend: BackendClient,
    pub config: Arc<Config>,
    pub debug: DebugToggle,
    pub started_at: DateTime<Utc>,
}

/// Live debug-logging switch.
///
/// The flag itself lives here; the side effect of applying it (swapping the
/// tracing env filter through a reload handle) is injected at startup so the
/// rest of the app — and the tests — never touch subscriber plumbing.
#[derive(Clone)]
pub struct DebugToggle {
    inner: Arc<DebugToggleInner>,
}

struct DebugToggleInner {
    enabled: AtomicBool,
    apply: Box<dyn Fn(bool) + Send + Sync>,
}

impl DebugToggle {
    pub fn new(initial: bool, apply: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(DebugToggleInner {
                enabled: AtomicBool::new(initial),
                apply: Box::new(apply),
            }),
        }
    }

    /// A switch with no side effect, for tests.
    pub fn noop(initial: bool) -> Self {
        Self::new(initial, |_| {})
    }

    pub fn set(&self, enabled: bool) -> bool {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        (self.inner.apply)(enabled);
        enabled
    }

    pub fn flip(&self) -> bool {
        self.set(!self.is_enabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }
}
