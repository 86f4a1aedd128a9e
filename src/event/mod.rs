//! Event system for async telemetry handling.
//!
//! The event system fans decoded telemetry and connection-lifecycle changes
//! out to any number of subscribers, and is what command submission uses to
//! correlate responses.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::command::FieldCode;
use crate::protocol::parser::TelemetryUpdate;
use crate::types::DeviceState;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection lost or closed.
    Disconnected,
    /// Consecutive malformed frames crossed the burst threshold; the
    /// session stays up.
    LinkDegraded { malformed_frames: u32 },
    /// One inbound frame was decoded (solicited or unsolicited).
    Update(TelemetryUpdate),
    /// The state snapshot changed; carries the complete new copy.
    Snapshot(Arc<DeviceState>),
}

impl Event {
    /// Returns the associated field code if this is a telemetry update.
    #[must_use]
    pub const fn field(&self) -> Option<FieldCode> {
        match self {
            Self::Update(update) => update.field(),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` if the dispatcher is gone. A lagged receiver skips
    /// ahead rather than erroring.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific telemetry fields.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match updates for these field codes.
    pub fields: Option<Vec<FieldCode>>,
}

impl EventFilter {
    /// Creates a filter for specific field codes.
    #[must_use]
    pub const fn fields(fields: Vec<FieldCode>) -> Self {
        Self {
            fields: Some(fields),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref fields) = self.fields {
            if let Some(field) = event.field() {
                return fields.contains(&field);
            }
            return false;
        }
        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine; telemetry may be unobserved.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        Subscription { receiver }
    }

    /// Waits for an event matching the filter, up to the timeout.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
