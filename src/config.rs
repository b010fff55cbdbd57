use serde::Deserialize;

use crate::platform::ReplacementMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub products: ProductsConfig,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Product ids the application sells, grouped by type
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductsConfig {
    #[serde(default)]
    pub non_consumable_ids: Vec<String>,
    #[serde(default)]
    pub consumable_ids: Vec<String>,
    #[serde(default)]
    pub subscription_ids: Vec<String>,
}

impl ProductsConfig {
    pub fn new<S: Into<String>>(
        non_consumable_ids: impl IntoIterator<Item = S>,
        consumable_ids: impl IntoIterator<Item = S>,
        subscription_ids: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            non_consumable_ids: non_consumable_ids.into_iter().map(Into::into).collect(),
            consumable_ids: consumable_ids.into_iter().map(Into::into).collect(),
            subscription_ids: subscription_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.non_consumable_ids.is_empty()
            && self.consumable_ids.is_empty()
            && self.subscription_ids.is_empty()
    }
}

/// How a subscription offer token is picked for a requested plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferSelection {
    /// First offer whose base plan id equals the requested plan id
    #[default]
    BasePlan,
    /// Cheapest offer among those tagged with the requested plan id
    LowestPricedTag,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseConfig {
    #[serde(default)]
    pub offer_selection: OfferSelection,
    #[serde(default)]
    pub replacement_mode: ReplacementMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    64
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        // billing.{yml,toml,json} is optional, every field has a default
        let config = config::Config::builder()
            .add_source(config::File::with_name("billing").required(false))
            .add_source(
                config::Environment::with_prefix("BILLING")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("products.non_consumable_ids")
                    .with_list_parse_key("products.consumable_ids")
                    .with_list_parse_key("products.subscription_ids")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn with_products(mut self, products: ProductsConfig) -> Self {
        self.products = products;
        self
    }

    pub fn with_offer_selection(mut self, offer_selection: OfferSelection) -> Self {
        self.purchase.offer_selection = offer_selection;
        self
    }
}
