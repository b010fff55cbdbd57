use serde::{Deserialize, Serialize};

use crate::platform::{PlatformPricingPhase, PlatformProduct, RecurrenceMode};

/// Product type as the application sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Consumable,
    NonConsumable,
    Subscription,
}

/// Pricing phase classification, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringMode {
    Free,
    Discounted,
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPhase {
    pub recurring_mode: RecurringMode,
    pub price: String,
    pub currency_code: String,
    pub plan_title: String,
    pub billing_period: String,
    pub price_amount_micros: i64,
    pub free_trial_days: u32,
    pub billing_cycle_count: u32,
}

impl PricingPhase {
    pub fn from_platform(phase: &PlatformPricingPhase) -> Self {
        let recurring_mode = classify_phase(phase);

        Self {
            recurring_mode,
            price: clean_price(&phase.formatted_price),
            currency_code: phase.price_currency_code.clone(),
            plan_title: plan_title(&phase.billing_period).to_string(),
            billing_period: phase.billing_period.clone(),
            price_amount_micros: phase.price_amount_micros,
            free_trial_days: match recurring_mode {
                RecurringMode::Free => trial_days(&phase.billing_period),
                _ => 0,
            },
            billing_cycle_count: match recurring_mode {
                RecurringMode::Discounted => phase.billing_cycle_count,
                _ => 0,
            },
        }
    }
}

/// One purchasable listing: a one-time product, or one base plan of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCatalogEntry {
    pub product_id: String,
    /// Empty for one-time products
    pub plan_id: String,
    pub title: String,
    pub product_type: ProductType,
    pub pricing_phases: Vec<PricingPhase>,
}

impl ProductCatalogEntry {
    /// Expands platform product details into catalog entries.
    ///
    /// Subscriptions yield one entry per offer; one-time products yield a
    /// single entry with an empty plan id and one original-priced phase.
    pub fn from_platform(product: &PlatformProduct, product_type: ProductType) -> Vec<Self> {
        if product_type == ProductType::Subscription {
            return product
                .subscription_offers
                .iter()
                .map(|offer| {
                    let mut pricing_phases: Vec<PricingPhase> = offer
                        .pricing_phases
                        .iter()
                        .map(PricingPhase::from_platform)
                        .collect();
                    // stable: keeps platform order within a class
                    pricing_phases.sort_by_key(|phase| phase.recurring_mode);

                    Self {
                        product_id: product.product_id.clone(),
                        plan_id: offer.base_plan_id.clone(),
                        title: product.title.clone(),
                        product_type,
                        pricing_phases,
                    }
                })
                .collect();
        }

        let pricing_phases = product
            .one_time_offer
            .iter()
            .map(|offer| PricingPhase {
                recurring_mode: RecurringMode::Original,
                price: clean_price(&offer.formatted_price),
                currency_code: offer.price_currency_code.clone(),
                plan_title: String::new(),
                billing_period: String::new(),
                price_amount_micros: offer.price_amount_micros,
                free_trial_days: 0,
                billing_cycle_count: 0,
            })
            .collect();

        vec![Self {
            product_id: product.product_id.clone(),
            plan_id: String::new(),
            title: product.title.clone(),
            product_type,
            pricing_phases,
        }]
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.product_id, &self.plan_id)
    }
}

const ZERO_PERIOD: &str = "P0D";

/// Free when nothing is charged over a real period, discounted when the
/// phase repeats a finite number of times, original otherwise.
pub fn classify_phase(phase: &PlatformPricingPhase) -> RecurringMode {
    let zero_priced = phase.price_amount_micros == 0 || phase.formatted_price == "Free";
    if zero_priced && phase.billing_period != ZERO_PERIOD {
        RecurringMode::Free
    } else if phase.recurrence_mode == RecurrenceMode::FiniteRecurring {
        RecurringMode::Discounted
    } else {
        RecurringMode::Original
    }
}

/// Display label for an ISO-8601 billing period; unknown periods map to ""
pub fn plan_title(billing_period: &str) -> &'static str {
    match billing_period {
        "P1W" => "Weekly",
        "P4W" => "Four weeks",
        "P1M" => "Monthly",
        "P2M" => "2 months",
        "P3M" => "3 months",
        "P4M" => "4 months",
        "P6M" => "6 months",
        "P8M" => "8 months",
        "P1Y" => "Yearly",
        _ => "",
    }
}

/// Trial length in days for a free phase's billing period; unknown periods map to 0
pub fn trial_days(billing_period: &str) -> u32 {
    match billing_period {
        "P1D" => 1,
        "P2D" => 2,
        "P3D" => 3,
        "P4D" => 4,
        "P5D" => 5,
        "P6D" => 6,
        "P7D" | "P1W" => 7,
        "P2W" => 14,
        "P3W" => 21,
        "P4W" => 28,
        "P1M" => 30,
        _ => 0,
    }
}

/// Drops a trailing ".00" so "$5.00" displays as "$5"
pub fn clean_price(formatted_price: &str) -> String {
    formatted_price
        .strip_suffix(".00")
        .unwrap_or(formatted_price)
        .to_string()
}
