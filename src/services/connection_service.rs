use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::{
    error::{ConnectionError, Result},
    models::{BillingStatus, ConnectionState},
    platform::{CommercePlatform, PlatformListener},
    services::StateBus,
};

pub struct ConnectionService<P: CommercePlatform> {
    platform: Arc<P>,
    bus: Arc<StateBus>,
    lifecycle: Mutex<()>,
}

impl<P: CommercePlatform> ConnectionService<P> {
    pub fn new(platform: Arc<P>, bus: Arc<StateBus>) -> Self {
        Self {
            platform,
            bus,
            lifecycle: Mutex::new(()),
        }
    }

    /// Opens the billing connection.
    ///
    /// Already connected: returns Ok without touching the platform.
    /// Attempt in flight: returns `AlreadyConnecting`; nothing is queued.
    /// `listener` is built under the lifecycle lock, so the platform never
    /// receives a listener that a concurrent teardown is about to close.
    #[instrument(skip(self, listener))]
    pub async fn connect<F>(&self, listener: F) -> Result<String>
    where
        F: FnOnce() -> PlatformListener + Send,
    {
        if self.platform.is_ready() {
            return Ok(self.already_connected());
        }

        if !self.bus.begin_connecting() {
            self.bus.status(BillingStatus::ConnectingInProgress);
            return Err(ConnectionError::AlreadyConnecting.into());
        }

        let _lifecycle = self.lifecycle.lock().await;
        if self.platform.is_ready() {
            return Ok(self.already_connected());
        }

        let response = self.platform.start_connection(listener()).await;

        if response.is_ok() {
            info!("Billing connection established");
            let message = BillingStatus::Connected.message().to_string();
            self.bus
                .transition(ConnectionState::Connected, true, message.clone());
            Ok(message)
        } else {
            warn!("Billing setup failed: {}", response);
            self.bus.status(BillingStatus::ConnectFailed);
            self.bus
                .transition(ConnectionState::ConnectFailed, false, response.to_string());
            Err(ConnectionError::SetupFailed(response.to_string()).into())
        }
    }

    /// Platform reported service loss. No reconnect is attempted.
    pub fn on_service_disconnected(&self) {
        warn!("Billing service disconnected");
        self.bus.transition(
            ConnectionState::Disconnected,
            false,
            BillingStatus::Disconnected.message(),
        );
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.platform.is_ready() {
            return Ok(());
        }
        match self.bus.state() {
            ConnectionState::Disconnected => Err(ConnectionError::Disconnected.into()),
            _ => Err(ConnectionError::NotReady.into()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.bus.state()
    }

    /// Held across connect and teardown so the two never interleave
    pub(crate) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    /// Ends the platform connection. Callers hold [`Self::lock_lifecycle`].
    pub(crate) async fn teardown(&self) {
        self.platform.end_connection().await;
        self.bus
            .transition(ConnectionState::None, false, "Billing connection closed");
        info!("Billing connection torn down");
    }

    fn already_connected(&self) -> String {
        self.bus.status(BillingStatus::AlreadyConnected);
        BillingStatus::AlreadyConnected.message().to_string()
    }
}
