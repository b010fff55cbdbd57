use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::models::{BillingEvent, BillingStatus, ConnectionState};

/// Holds the current connection state and fans out lifecycle events.
///
/// The state lives in a watch channel so late subscribers always see the
/// latest value; events go through a broadcast channel and may be missed
/// by receivers that lag behind.
pub struct StateBus {
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<BillingEvent>,
}

impl StateBus {
    pub fn new(capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::None);
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state_tx,
            events_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn transition(
        &self,
        state: ConnectionState,
        success: bool,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let previous = self.state_tx.send_replace(state);
        debug!(
            "Connection state: {} -> {} ({})",
            previous.as_str(),
            state.as_str(),
            message
        );
        self.publish(BillingEvent::Connection {
            state,
            success,
            message,
        });
    }

    /// Moves to CONNECTING unless an attempt is already running.
    /// Returns false when another attempt holds the CONNECTING state.
    pub(crate) fn begin_connecting(&self) -> bool {
        let mut previous = ConnectionState::None;
        let started = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                return false;
            }
            previous = *state;
            *state = ConnectionState::Connecting;
            true
        });

        if started {
            debug!(
                "Connection state: {} -> {}",
                previous.as_str(),
                ConnectionState::Connecting.as_str()
            );
            self.publish(BillingEvent::Connection {
                state: ConnectionState::Connecting,
                success: true,
                message: BillingStatus::Connecting.message().to_string(),
            });
        }
        started
    }

    pub(crate) fn status(&self, status: BillingStatus) {
        debug!("Billing status: {}", status.message());
        self.publish(BillingEvent::Status(status));
    }

    fn publish(&self, event: BillingEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
