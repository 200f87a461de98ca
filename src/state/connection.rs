use thiserror::Error;

/// Lifecycle phases of the realtime channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing has been attempted yet.
    #[default]
    Idle,
    /// A handshake is in flight.
    Connecting,
    /// The channel is live and delivering pushes.
    Open,
    /// The channel dropped and a reconnect timer is pending.
    Reconnecting,
    /// The channel is down with no reconnect pending (manual close or auto-reconnect off).
    Closed,
    /// The reconnect budget ran out; only a manual `connect()` leaves this state.
    Failed,
}

impl ConnectionState {
    /// Whether a connection attempt is in flight or live.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Events driving [`ConnectionStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Start a handshake, manually or from the reconnect timer.
    Dial,
    /// The handshake completed.
    Opened,
    /// The connection ended or the handshake failed.
    Dropped,
    /// A reconnect timer has been armed.
    ScheduleReconnect,
    /// The reconnect budget is exhausted.
    GiveUp,
    /// The caller asked to close the channel.
    CloseRequested,
}

/// Error returned when an event cannot be applied in the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid event was received.
    pub from: ConnectionState,
    /// The event that cannot be applied from this phase.
    pub event: ConnectionEvent,
}

/// State machine implementing the realtime channel lifecycle.
///
/// `Idle -> Connecting -> Open -> {Closed (manual), Closed -> Reconnecting -> Connecting}` with
/// `Closed -> Failed` once reconnecting gives up.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    version: usize,
}

impl ConnectionStateMachine {
    /// Machine in [`ConnectionState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.state = next;
        self.version += 1;
        Ok(next)
    }

    fn compute_transition(
        &self,
        event: ConnectionEvent,
    ) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self.state, event) {
            (S::Idle | S::Closed | S::Failed | S::Reconnecting, E::Dial) => S::Connecting,
            (S::Connecting, E::Opened) => S::Open,
            (S::Connecting | S::Open, E::Dropped) => S::Closed,
            (S::Closed, E::ScheduleReconnect) => S::Reconnecting,
            (S::Closed, E::GiveUp) => S::Failed,
            (_, E::CloseRequested) => S::Closed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
