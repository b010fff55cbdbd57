use serde::{Deserialize, Serialize};

/// Connection lifecycle. Starts at `None`; only the connection service moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    None,
    Connecting,
    Connected,
    ConnectFailed,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::ConnectFailed => "CONNECT_FAILED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

/// Fine-grained progress notices for observers (UI spinners, logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Connecting,
    Connected,
    AlreadyConnected,
    ConnectingInProgress,
    ConnectFailed,
    Disconnected,
    FetchingProducts,
    ProductsFetched,
    ProductsFetchFailed,
    FetchingPurchases,
    PurchasesFetched,
    PurchasesFetchFailed,
    LaunchingBillingFlow,
    BillingFlowLaunched,
    BillingFlowFailed,
    PurchaseSucceeded,
    PurchaseFailed,
    Acknowledging,
    AcknowledgeSucceeded,
    AcknowledgeFailed,
    Consuming,
    ConsumeSucceeded,
    ConsumeFailed,
}

impl BillingStatus {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting to billing service",
            Self::Connected => "Connected to billing service",
            Self::AlreadyConnected => "Already connected to billing service",
            Self::ConnectingInProgress => "Connection attempt already in progress",
            Self::ConnectFailed => "Failed to connect to billing service",
            Self::Disconnected => "Billing service disconnected",
            Self::FetchingProducts => "Fetching products",
            Self::ProductsFetched => "Products fetched",
            Self::ProductsFetchFailed => "Failed to fetch products",
            Self::FetchingPurchases => "Fetching purchases",
            Self::PurchasesFetched => "Purchases fetched",
            Self::PurchasesFetchFailed => "Failed to fetch purchases",
            Self::LaunchingBillingFlow => "Launching billing flow",
            Self::BillingFlowLaunched => "Billing flow launched successfully",
            Self::BillingFlowFailed => "Failed to launch billing flow",
            Self::PurchaseSucceeded => "Purchase succeeded",
            Self::PurchaseFailed => "Purchase failed",
            Self::Acknowledging => "Acknowledging purchase",
            Self::AcknowledgeSucceeded => "Acknowledge succeeded",
            Self::AcknowledgeFailed => "Acknowledge failed",
            Self::Consuming => "Consuming purchase",
            Self::ConsumeSucceeded => "Consume succeeded",
            Self::ConsumeFailed => "Consume failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// A connection state transition; `success` is false for failure states
    Connection {
        state: ConnectionState,
        success: bool,
        message: String,
    },
    Status(BillingStatus),
}
