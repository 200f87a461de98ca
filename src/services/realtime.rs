//! Realtime channel client: one duplex connection with automatic reconnection.
//!
//! Lifecycle transitions go through [`ConnectionStateMachine`] and are published on a `watch`
//! channel. Every connection attempt gets a generation number; tasks belonging to an older
//! generation (superseded by `disconnect()` or a manual `connect()`) are ignored when they report
//! back, so a stale close can never schedule a reconnect.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::RealtimeSettings,
    dto::ws::PushMessage,
    state::{
        connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine},
        events::{ChannelEvent, EventHub, EventKind, ListenerId},
    },
    transport::{
        CredentialStore,
        channel::{CloseInfo, Connection, Connector, Frame, Outgoing},
    },
};

const EVENT_CAPACITY: usize = 64;

/// Cloneable handle to the realtime channel.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    settings: RealtimeSettings,
    state: watch::Sender<ConnectionState>,
    events: EventHub,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    machine: ConnectionStateMachine,
    generation: u64,
    attempts: u32,
    next_delay: Option<Duration>,
    manual_close: bool,
    connection: Option<ActiveConnection>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct ActiveConnection {
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    task: JoinHandle<()>,
}

enum AfterClose {
    Stay,
    Scheduled,
    Exhausted(u32),
}

impl RealtimeClient {
    /// Client for `endpoint`; nothing happens until [`RealtimeClient::connect`].
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        settings: RealtimeSettings,
    ) -> Self {
        let (state, _receiver) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                connector,
                credentials,
                settings,
                state,
                events: EventHub::new(EVENT_CAPACITY),
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Open the channel unless a connection is already being made or live.
    ///
    /// Clears the manual-close flag and cancels any pending reconnect timer.
    pub fn connect(&self) {
        let mut control = self.inner.lock();
        if control.machine.state().is_active() {
            warn!(state = ?control.machine.state(), "realtime channel already connecting or open");
            return;
        }
        control.manual_close = false;
        if let Some(timer) = control.reconnect_timer.take() {
            timer.abort();
        }
        Inner::dial(&self.inner, &mut control);
    }

    /// Close the channel and stop reconnecting. Safe to call in any state.
    pub fn disconnect(&self) {
        let mut control = self.inner.lock();
        control.manual_close = true;
        control.generation += 1;
        control.next_delay = None;
        if let Some(timer) = control.reconnect_timer.take() {
            timer.abort();
            debug!("pending realtime reconnect cancelled");
        }

        let had_connection = match control.connection.take() {
            Some(active) => {
                if let Some(outgoing) = &active.outgoing {
                    let _ = outgoing.send(Outgoing::Close);
                }
                active.task.abort();
                true
            }
            None => false,
        };
        if control.machine.state() != ConnectionState::Idle {
            self.inner
                .transition(&mut control, ConnectionEvent::CloseRequested);
        }
        drop(control);

        if had_connection {
            info!("realtime channel closed by client");
            self.inner.events.emit(ChannelEvent::Closed(CloseInfo::normal()));
        }
    }

    /// Serialize `message` and send it if the channel is open. Returns whether it was queued.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialize realtime message");
                return false;
            }
        };

        let control = self.inner.lock();
        let outgoing = control
            .connection
            .as_ref()
            .and_then(|active| active.outgoing.as_ref())
            .filter(|_| control.machine.state() == ConnectionState::Open);
        match outgoing {
            Some(outgoing) => outgoing.send(Outgoing::Text(text)).is_ok(),
            None => {
                warn!("realtime channel not open; message dropped");
                false
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver following every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the channel is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts made in the current failure streak.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Delay of the pending reconnect, if one is scheduled.
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        self.inner.lock().next_delay
    }

    /// Call `callback` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback)
    }

    /// Remove a listener. Returns whether it existed.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Stream of every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, control: &mut Control, event: ConnectionEvent) {
        match control.machine.apply(event) {
            Ok(next) => {
                self.state.send_replace(next);
            }
            Err(err) => warn!(error = %err, "ignoring realtime state transition"),
        }
    }

    fn authorized_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(token) = self.credentials.access_token() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        url
    }

    fn dial(inner: &Arc<Self>, control: &mut Control) {
        control.generation += 1;
        control.next_delay = None;
        inner.transition(control, ConnectionEvent::Dial);
        info!(
            endpoint = %inner.endpoint,
            attempt = control.attempts,
            "connecting realtime channel"
        );

        let task = tokio::spawn(run_connection(
            inner.clone(),
            control.generation,
            inner.authorized_url(),
        ));
        control.connection = Some(ActiveConnection {
            outgoing: None,
            task,
        });
    }

    fn handle_open(&self, generation: u64, outgoing: mpsc::UnboundedSender<Outgoing>) -> bool {
        let mut control = self.lock();
        if control.generation != generation {
            return false;
        }
        control.attempts = 0;
        if let Some(active) = control.connection.as_mut() {
            active.outgoing = Some(outgoing);
        }
        self.transition(&mut control, ConnectionEvent::Opened);
        drop(control);

        info!(endpoint = %self.endpoint, "realtime channel open");
        self.events.emit(ChannelEvent::Opened);
        true
    }

    fn handle_message(&self, text: &str) {
        match PushMessage::from_json_str(text) {
            Ok(PushMessage::ProgressUpdated(event)) => {
                self.events.emit(ChannelEvent::ProgressUpdated(event))
            }
            Ok(PushMessage::QuizCompleted(event)) => {
                self.events.emit(ChannelEvent::QuizCompleted(event))
            }
            Ok(PushMessage::Unknown(event)) => {
                warn!(event = %event, "dropping unknown realtime event")
            }
            Err(err) => warn!(error = %err, "dropping malformed realtime payload"),
        }
    }

    fn handle_error(&self, message: String) {
        warn!(error = %message, "realtime channel error");
        self.events.emit(ChannelEvent::Error(message));
    }

    fn handle_close(inner: &Arc<Self>, generation: u64, close: CloseInfo) {
        let mut control = inner.lock();
        if control.generation != generation {
            return;
        }
        control.connection = None;
        inner.transition(&mut control, ConnectionEvent::Dropped);

        let after = if control.manual_close || !inner.settings.auto_reconnect {
            AfterClose::Stay
        } else {
            Self::schedule_reconnect(inner, &mut control)
        };
        drop(control);

        info!(code = close.code, reason = %close.reason, "realtime channel closed");
        inner.events.emit(ChannelEvent::Closed(close));
        match after {
            AfterClose::Exhausted(attempts) => {
                inner
                    .events
                    .emit(ChannelEvent::ReconnectExhausted { attempts });
            }
            AfterClose::Stay | AfterClose::Scheduled => {}
        }
    }

    fn schedule_reconnect(inner: &Arc<Self>, control: &mut Control) -> AfterClose {
        let attempts = control.attempts;
        if attempts >= inner.settings.max_reconnect_attempts {
            error!(attempts, "realtime reconnect attempts exhausted; giving up");
            inner.transition(control, ConnectionEvent::GiveUp);
            return AfterClose::Exhausted(attempts);
        }

        let delay = inner.settings.backoff.delay(attempts);
        inner.transition(control, ConnectionEvent::ScheduleReconnect);
        control.next_delay = Some(delay);
        if let Some(stale) = control.reconnect_timer.take() {
            stale.abort();
        }

        let generation = control.generation;
        let timer_inner = inner.clone();
        control.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            Inner::fire_reconnect(&timer_inner, generation);
        }));
        info!(
            attempt = attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling realtime reconnect"
        );
        AfterClose::Scheduled
    }

    fn fire_reconnect(inner: &Arc<Self>, generation: u64) {
        let mut control = inner.lock();
        if control.generation != generation || control.manual_close {
            return;
        }
        // Detach our own handle rather than aborting the running task.
        control.reconnect_timer = None;
        control.attempts += 1;
        if control.machine.state().is_active() {
            warn!("realtime channel already connecting or open");
            return;
        }
        Self::dial(inner, &mut control);
    }
}

async fn run_connection(inner: Arc<Inner>, generation: u64, url: Url) {
    let Connection {
        mut frames,
        outgoing,
    } = match inner.connector.connect(url).await {
        Ok(connection) => connection,
        Err(err) => {
            inner.handle_error(err.to_string());
            Inner::handle_close(&inner, generation, CloseInfo::abnormal());
            return;
        }
    };

    if !inner.handle_open(generation, outgoing) {
        return;
    }

    while let Some(frame) = frames.next().await {
        match frame {
            Frame::Text(text) => inner.handle_message(&text),
            Frame::Error(message) => inner.handle_error(message),
            Frame::Close(close) => {
                Inner::handle_close(&inner, generation, close);
                return;
            }
        }
    }
    Inner::handle_close(&inner, generation, CloseInfo::abnormal());
}
