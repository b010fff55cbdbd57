use serde::{Deserialize, Serialize};
use std::fmt;

/// Response codes reported by the commerce platform.
///
/// Numeric values follow the platform's wire codes so adapters can convert
/// raw integers with [`ResponseCode::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    UserCanceled,
    ServiceUnavailable,
    BillingUnavailable,
    ItemUnavailable,
    DeveloperError,
    Error,
    ItemAlreadyOwned,
    ItemNotOwned,
    NetworkError,
    ServiceDisconnected,
    FeatureNotSupported,
}

impl ResponseCode {
    /// Unknown codes map to [`ResponseCode::Error`]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::UserCanceled,
            2 => Self::ServiceUnavailable,
            3 => Self::BillingUnavailable,
            4 => Self::ItemUnavailable,
            5 => Self::DeveloperError,
            6 => Self::Error,
            7 => Self::ItemAlreadyOwned,
            8 => Self::ItemNotOwned,
            12 => Self::NetworkError,
            -1 => Self::ServiceDisconnected,
            -2 => Self::FeatureNotSupported,
            _ => Self::Error,
        }
    }

    pub fn as_code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserCanceled => 1,
            Self::ServiceUnavailable => 2,
            Self::BillingUnavailable => 3,
            Self::ItemUnavailable => 4,
            Self::DeveloperError => 5,
            Self::Error => 6,
            Self::ItemAlreadyOwned => 7,
            Self::ItemNotOwned => 8,
            Self::NetworkError => 12,
            Self::ServiceDisconnected => -1,
            Self::FeatureNotSupported => -2,
        }
    }
}

/// Result of a single platform call: a code plus the platform's debug text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingResponse {
    pub code: ResponseCode,
    pub debug_message: String,
}

impl BillingResponse {
    pub fn new(code: ResponseCode, debug_message: impl Into<String>) -> Self {
        Self {
            code,
            debug_message: debug_message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(ResponseCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.code == ResponseCode::UserCanceled
    }

    pub fn is_already_owned(&self) -> bool {
        self.code == ResponseCode::ItemAlreadyOwned
    }

    pub fn is_recoverable_error(&self) -> bool {
        matches!(
            self.code,
            ResponseCode::Error | ResponseCode::ServiceDisconnected | ResponseCode::NetworkError
        )
    }

    pub fn is_nonrecoverable_error(&self) -> bool {
        matches!(
            self.code,
            ResponseCode::ServiceUnavailable
                | ResponseCode::BillingUnavailable
                | ResponseCode::DeveloperError
        )
    }

    pub fn is_terrible_failure(&self) -> bool {
        matches!(
            self.code,
            ResponseCode::ItemUnavailable
                | ResponseCode::FeatureNotSupported
                | ResponseCode::ItemNotOwned
        )
    }
}

impl fmt::Display for BillingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.debug_message.is_empty() {
            write!(f, "{:?} ({})", self.code, self.code.as_code())
        } else {
            write!(
                f,
                "{:?} ({}): {}",
                self.code,
                self.code.as_code(),
                self.debug_message
            )
        }
    }
}

/// Product families as the platform partitions them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformProductKind {
    InApp,
    Subs,
}

impl PlatformProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "inapp",
            Self::Subs => "subs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceMode {
    InfiniteRecurring,
    FiniteRecurring,
    NonRecurring,
}

/// Raw pricing phase of a subscription offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPricingPhase {
    pub formatted_price: String,
    pub price_currency_code: String,
    pub price_amount_micros: i64,
    /// ISO-8601 duration, e.g. P1W, P1M, P1Y
    pub billing_period: String,
    pub billing_cycle_count: u32,
    pub recurrence_mode: RecurrenceMode,
}

impl PlatformPricingPhase {
    pub fn recurring(
        formatted_price: impl Into<String>,
        price_amount_micros: i64,
        currency: impl Into<String>,
        billing_period: impl Into<String>,
    ) -> Self {
        Self {
            formatted_price: formatted_price.into(),
            price_currency_code: currency.into(),
            price_amount_micros,
            billing_period: billing_period.into(),
            billing_cycle_count: 0,
            recurrence_mode: RecurrenceMode::InfiniteRecurring,
        }
    }

    pub fn free_trial(currency: impl Into<String>, billing_period: impl Into<String>) -> Self {
        Self {
            formatted_price: "Free".to_string(),
            price_currency_code: currency.into(),
            price_amount_micros: 0,
            billing_period: billing_period.into(),
            billing_cycle_count: 1,
            recurrence_mode: RecurrenceMode::FiniteRecurring,
        }
    }

    pub fn discounted(
        formatted_price: impl Into<String>,
        price_amount_micros: i64,
        currency: impl Into<String>,
        billing_period: impl Into<String>,
        billing_cycle_count: u32,
    ) -> Self {
        Self {
            formatted_price: formatted_price.into(),
            price_currency_code: currency.into(),
            price_amount_micros,
            billing_period: billing_period.into(),
            billing_cycle_count,
            recurrence_mode: RecurrenceMode::FiniteRecurring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeOffer {
    pub formatted_price: String,
    pub price_currency_code: String,
    pub price_amount_micros: i64,
    #[serde(default)]
    pub offer_token: Option<String>,
}

/// One purchasable offer of a subscription base plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOffer {
    pub base_plan_id: String,
    #[serde(default)]
    pub offer_id: Option<String>,
    pub offer_token: String,
    #[serde(default)]
    pub offer_tags: Vec<String>,
    pub pricing_phases: Vec<PlatformPricingPhase>,
}

impl SubscriptionOffer {
    pub fn new(
        base_plan_id: impl Into<String>,
        offer_token: impl Into<String>,
        pricing_phases: Vec<PlatformPricingPhase>,
    ) -> Self {
        Self {
            base_plan_id: base_plan_id.into(),
            offer_id: None,
            offer_token: offer_token.into(),
            offer_tags: Vec::new(),
            pricing_phases,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.offer_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Lowest micros amount across this offer's phases
    pub fn lowest_price_micros(&self) -> i64 {
        self.pricing_phases
            .iter()
            .map(|phase| phase.price_amount_micros)
            .min()
            .unwrap_or(i64::MAX)
    }
}

/// Product details as returned by the platform's product query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProduct {
    pub product_id: String,
    pub title: String,
    pub kind: PlatformProductKind,
    #[serde(default)]
    pub one_time_offer: Option<OneTimeOffer>,
    #[serde(default)]
    pub subscription_offers: Vec<SubscriptionOffer>,
}

impl PlatformProduct {
    pub fn one_time(
        product_id: impl Into<String>,
        title: impl Into<String>,
        formatted_price: impl Into<String>,
        price_amount_micros: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            title: title.into(),
            kind: PlatformProductKind::InApp,
            one_time_offer: Some(OneTimeOffer {
                formatted_price: formatted_price.into(),
                price_currency_code: currency.into(),
                price_amount_micros,
                offer_token: None,
            }),
            subscription_offers: Vec::new(),
        }
    }

    pub fn subscription(
        product_id: impl Into<String>,
        title: impl Into<String>,
        offers: Vec<SubscriptionOffer>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            title: title.into(),
            kind: PlatformProductKind::Subs,
            one_time_offer: None,
            subscription_offers: offers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Unspecified,
    Purchased,
    Pending,
}

/// A purchase as reported by the platform (history query or settlement push)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPurchase {
    pub purchase_token: String,
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    pub purchase_time_millis: i64,
    pub purchase_state: PurchaseState,
    pub is_acknowledged: bool,
    pub is_auto_renewing: bool,
}

impl PlatformPurchase {
    pub fn purchased(purchase_token: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            purchase_token: purchase_token.into(),
            product_ids: vec![product_id.into()],
            order_id: None,
            purchase_time_millis: 0,
            purchase_state: PurchaseState::Purchased,
            is_acknowledged: false,
            is_auto_renewing: false,
        }
    }
}

/// How an upgraded/downgraded subscription replaces the old one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementMode {
    WithTimeProration,
    ChargeProratedPrice,
    WithoutProration,
    #[default]
    ChargeFullPrice,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub old_purchase_token: String,
    pub replacement_mode: ReplacementMode,
}

/// Parameters handed to the platform's purchase UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseFlowParams {
    pub product_id: String,
    pub kind: PlatformProductKind,
    pub offer_token: Option<String>,
    pub subscription_update: Option<SubscriptionUpdate>,
}
