use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use serde_json::Value;
use strum::Display;

use crate::models::AuthIdentity;

// ============================================================================
// Events
// ============================================================================

/// Lifecycle events observable by extensions.
#[derive(Debug, Clone)]
pub enum Event {
    ClientConnection {
        session_id: String,
    },
    ClientAuthenticated {
        session_id: String,
        identity: AuthIdentity,
    },
    ClientToClientMessage {
        session_id: String,
        message: Value,
    },
    ClientToChannelMessage {
        session_id: String,
        message: Value,
    },
    ClientDisconnect {
        session_id: String,
    },
    MessagePublished {
        message: Value,
    },
}

/// The event names extensions subscribe by; `Display` renders the wire form
/// (`client-connection`, `message-published`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    ClientConnection,
    ClientAuthenticated,
    ClientToClientMessage,
    ClientToChannelMessage,
    ClientDisconnect,
    MessagePublished,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ClientConnection { .. } => EventKind::ClientConnection,
            Event::ClientAuthenticated { .. } => EventKind::ClientAuthenticated,
            Event::ClientToClientMessage { .. } => EventKind::ClientToClientMessage,
            Event::ClientToChannelMessage { .. } => EventKind::ClientToChannelMessage,
            Event::ClientDisconnect { .. } => EventKind::ClientDisconnect,
            Event::MessagePublished { .. } => EventKind::MessagePublished,
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Process-wide pub/sub of lifecycle events, passed to extensions as an
/// explicit value rather than relying on process-global emitters.
///
/// Subscribers are registered at startup; delivery is synchronous in emission
/// order. A panicking subscriber is isolated so the ones after it still run.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&Event) + Send + Sync + 'static) {
        let Ok(mut map) = self.subscribers.write() else {
            tracing::error!(event = %kind, "event bus lock poisoned; subscriber dropped");
            return;
        };
        map.entry(kind).or_default().push(Box::new(handler));
    }

    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let Ok(map) = self.subscribers.read() else {
            tracing::error!(event = %kind, "event bus lock poisoned; event dropped");
            return;
        };
        let Some(handlers) = map.get(&kind) else {
            return;
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(event = %kind, "event subscriber panicked; continuing delivery");
            }
        }
    }
}
