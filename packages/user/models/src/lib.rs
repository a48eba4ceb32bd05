#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Subscription user record types.
//!
//! A [`UserRecord`] is one vendor subscription user as returned by the
//! paginated subscription user listing. Field names on the wire follow the
//! vendor's `snake_case` JSON so the same type deserializes straight from
//! an API page and round-trips through the local store.

use serde::{Deserialize, Serialize};

/// A single payment (last or next) attached to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment amount in the subscription currency.
    pub amount: f64,
    /// ISO 4217 currency code (e.g., `"USD"`).
    pub currency: String,
    /// Payment date (`yyyy-MM-dd`).
    pub date: String,
}

/// Stored payment method details for a subscription.
///
/// Card fields are absent for non-card methods such as `PayPal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInformation {
    /// Payment method (e.g., `"card"`, `"paypal"`).
    #[serde(rename = "payment_method")]
    pub method: String,
    /// Card brand, when the method is a card.
    #[serde(default)]
    pub card_type: Option<String>,
    /// Last four digits of the card number.
    #[serde(default)]
    pub last_four_digits: Option<String>,
    /// Card expiry as reported by the vendor (e.g., `"02/2027"`).
    #[serde(default)]
    pub expiry_date: Option<String>,
}

/// One vendor subscription user.
///
/// `subscription_id` is the identity: re-ingesting the same id overwrites
/// every other attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Vendor subscription identifier (unique key).
    pub subscription_id: i64,
    /// Subscription plan identifier.
    pub plan_id: i64,
    /// Vendor user identifier.
    pub user_id: i64,
    /// Customer email address.
    #[serde(rename = "user_email")]
    pub email: String,
    /// Whether the customer opted into marketing.
    pub marketing_consent: bool,
    /// URL the customer can use to update payment details.
    #[serde(default)]
    pub update_url: Option<String>,
    /// URL the customer can use to cancel the subscription.
    #[serde(default)]
    pub cancel_url: Option<String>,
    /// Free-text subscription state (e.g., `"active"`, `"deleted"`).
    pub state: String,
    /// Signup timestamp; the first ten characters are an ISO date.
    pub signup_date: String,
    /// Number of seats/units on the subscription.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Most recent payment, if any.
    #[serde(default)]
    pub last_payment: Option<Payment>,
    /// Next scheduled payment, if any.
    #[serde(default)]
    pub next_payment: Option<Payment>,
    /// Stored payment method.
    #[serde(default)]
    pub payment_information: Option<PaymentInformation>,
}

impl UserRecord {
    /// Returns the `yyyy-MM-dd` portion of [`Self::signup_date`].
    #[must_use]
    pub fn signup_day(&self) -> &str {
        self.signup_date.get(..10).unwrap_or(&self.signup_date)
    }
}
