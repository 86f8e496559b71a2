//! Notifications delivered to registered listeners and to the requester of
//! a connect or disconnect.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::error::HandoverStatus;

/// Something the profile tells the rest of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProfileEvent {
    /// Service registration finished and the profile accepts connections.
    InitCfm,
    /// The handover channel to the peer is up.
    ConnectionInd,
    /// Answer to a `connect` request.
    ConnectCfm { status: HandoverStatus },
    /// Answer to a `disconnect` request.
    DisconnectCfm { status: HandoverStatus },
    /// The handover channel went down.
    DisconnectionInd { link_loss: bool },
    /// A handover finished. `is_primary` is the role this device now holds.
    HandoverCompleteInd { is_primary: bool },
}

/// Receiver of [`ProfileEvent`]s.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProfileEvent);
}

impl<F> EventListener for F
where
    F: Fn(&ProfileEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProfileEvent) {
        self(event)
    }
}

/// Shared handle to a listener.
pub type ListenerRef = Arc<dyn EventListener>;

/// Token returned by `client_register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners, notified in registration order.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, ListenerRef)>,
}

impl Listeners {
    pub fn register(&mut self, listener: ListenerRef) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify(&self, event: &ProfileEvent) {
        trace!(?event, listeners = self.entries.len(), "notify");
        for (_, listener) in &self.entries {
            listener.on_event(event);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Listener that keeps every event it sees.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProfileEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProfileEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<ProfileEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventListener for EventLog {
    fn on_event(&self, event: &ProfileEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn listeners_are_notified_until_unregistered() {
        let mut listeners = Listeners::default();
        let log = EventLog::new();
        let id = listeners.register(Arc::new(log.clone()));

        listeners.notify(&ProfileEvent::ConnectionInd);
        assert!(listeners.unregister(id));
        assert!(!listeners.unregister(id));
        listeners.notify(&ProfileEvent::InitCfm);

        assert_eq!(log.events(), vec![ProfileEvent::ConnectionInd]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn closures_are_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut listeners = Listeners::default();
        listeners.register(Arc::new(move |_: &ProfileEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.notify(&ProfileEvent::DisconnectionInd { link_loss: true });
        listeners.notify(&ProfileEvent::HandoverCompleteInd { is_primary: true });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_string(&ProfileEvent::ConnectCfm {
            status: HandoverStatus::PeerConnectFailed,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"connect_cfm","status":"peer_connect_failed"}"#);
    }
}
