use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{
    dto::ws::{ProgressUpdatedEvent, QuizCompletedEvent},
    transport::channel::CloseInfo,
};

/// Notification emitted by the realtime client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection opened.
    Opened,
    /// The connection closed, with the reported code.
    Closed(CloseInfo),
    /// Transport error. Reconnection is driven by the close that usually follows.
    Error(String),
    /// Server push: chapter progress changed.
    ProgressUpdated(ProgressUpdatedEvent),
    /// Server push: a quiz was graded.
    QuizCompleted(QuizCompletedEvent),
    /// Automatic reconnection stopped after this many attempts.
    ReconnectExhausted {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
}

/// Discriminant of [`ChannelEvent`] used to subscribe to one kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`ChannelEvent::Opened`].
    Opened,
    /// See [`ChannelEvent::Closed`].
    Closed,
    /// See [`ChannelEvent::Error`].
    Error,
    /// See [`ChannelEvent::ProgressUpdated`].
    ProgressUpdated,
    /// See [`ChannelEvent::QuizCompleted`].
    QuizCompleted,
    /// See [`ChannelEvent::ReconnectExhausted`].
    ReconnectExhausted,
}

impl ChannelEvent {
    /// Kind used to route this event to listeners.
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Opened => EventKind::Opened,
            ChannelEvent::Closed(_) => EventKind::Closed,
            ChannelEvent::Error(_) => EventKind::Error,
            ChannelEvent::ProgressUpdated(_) => EventKind::ProgressUpdated,
            ChannelEvent::QuizCompleted(_) => EventKind::QuizCompleted,
            ChannelEvent::ReconnectExhausted { .. } => EventKind::ReconnectExhausted,
        }
    }
}

/// Handle returned by [`EventHub::on`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Fan-out of channel events to per-kind callbacks and broadcast subscribers.
pub struct EventHub {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, (EventKind, Callback)>,
    sender: broadcast::Sender<ChannelEvent>,
}

impl EventHub {
    /// Hub whose broadcast stream buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
            sender,
        }
    }

    /// Call `callback` for every future event of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, (kind, Arc::new(callback)));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }

    /// Number of registered callbacks.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` to matching callbacks, then to broadcast subscribers.
    ///
    /// Callbacks run after the map is released, so they may add or remove listeners.
    pub fn emit(&self, event: ChannelEvent) {
        let kind = event.kind();
        let callbacks: Vec<Callback> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| entry.value().1.clone())
            .collect();
        for callback in callbacks {
            callback(&event);
        }
        let _ = self.sender.send(event);
    }
}
