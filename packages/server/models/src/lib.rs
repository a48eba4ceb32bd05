#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the paddle mirror server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the stored record types to allow independent evolution of the API
//! contract.

use paddle_mirror_ingest_models::{IngestionStatus, StatusKind};
use paddle_mirror_user_models::{Payment, PaymentInformation, UserRecord};
use serde::{Deserialize, Serialize};

/// A payment as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPayment {
    /// Payment amount.
    pub amount: f64,
    /// Currency code.
    pub currency: String,
    /// Payment date.
    pub date: String,
}

impl From<Payment> for ApiPayment {
    fn from(p: Payment) -> Self {
        Self {
            amount: p.amount,
            currency: p.currency,
            date: p.date,
        }
    }
}

/// Payment method details as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPaymentInformation {
    /// Payment method.
    pub method: String,
    /// Card brand.
    pub card_type: Option<String>,
    /// Last four card digits.
    pub last_four_digits: Option<String>,
    /// Card expiry.
    pub expiry_date: Option<String>,
}

impl From<PaymentInformation> for ApiPaymentInformation {
    fn from(p: PaymentInformation) -> Self {
        Self {
            method: p.method,
            card_type: p.card_type,
            last_four_digits: p.last_four_digits,
            expiry_date: p.expiry_date,
        }
    }
}

/// A mirrored subscription user as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    /// Vendor subscription identifier.
    pub subscription_id: i64,
    /// Plan identifier.
    pub plan_id: i64,
    /// Vendor user identifier.
    pub user_id: i64,
    /// Customer email.
    pub email: String,
    /// Marketing opt-in.
    pub marketing_consent: bool,
    /// Payment update URL.
    pub update_url: Option<String>,
    /// Cancellation URL.
    pub cancel_url: Option<String>,
    /// Subscription state.
    pub state: String,
    /// Signup timestamp.
    pub signup_date: String,
    /// Seat count.
    pub quantity: Option<i64>,
    /// Last payment.
    pub last_payment: Option<ApiPayment>,
    /// Next payment.
    pub next_payment: Option<ApiPayment>,
    /// Payment method.
    pub payment_information: Option<ApiPaymentInformation>,
}

impl From<UserRecord> for ApiUser {
    fn from(u: UserRecord) -> Self {
        Self {
            subscription_id: u.subscription_id,
            plan_id: u.plan_id,
            user_id: u.user_id,
            email: u.email,
            marketing_consent: u.marketing_consent,
            update_url: u.update_url,
            cancel_url: u.cancel_url,
            state: u.state,
            signup_date: u.signup_date,
            quantity: u.quantity,
            last_payment: u.last_payment.map(ApiPayment::from),
            next_payment: u.next_payment.map(ApiPayment::from),
            payment_information: u.payment_information.map(ApiPaymentInformation::from),
        }
    }
}

/// Query parameters for `GET /api/users`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQueryParams {
    /// Earliest signup date (`yyyy-MM-dd`, inclusive).
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    /// Latest signup date (`yyyy-MM-dd`, inclusive).
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Whether an ingestion run is active.
    pub ingesting: bool,
}

/// Generic confirmation body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable detail.
    pub message: String,
}

/// Body returned when an ingestion run is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCancelled {
    /// Always `"cancelled"`.
    pub status: String,
}

impl Default for ApiCancelled {
    fn default() -> Self {
        Self {
            status: "cancelled".to_string(),
        }
    }
}

/// Response of `POST /api/users/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCancelResponse {
    /// Whether a run was active and got cancelled.
    pub was_running: bool,
}

/// Structured error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable error.
    pub error: String,
    /// Vendor error code, for remote API failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl ApiError {
    /// An error without a vendor code.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }
}

/// The combined `message_or_progress` field of a stream frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageOrProgress {
    /// Percentage complete.
    Progress(u8),
    /// Free-text status.
    Message(String),
}

/// One server-push frame on the status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    /// Coarse run state.
    pub status: StatusKind,
    /// Progress when present, else the message.
    pub message_or_progress: Option<MessageOrProgress>,
    /// Human-readable description.
    pub message: Option<String>,
    /// Percentage complete.
    pub progress: Option<u8>,
    /// Key of the emitting run.
    #[serde(rename = "correlationKey")]
    pub correlation_key: String,
}

impl From<IngestionStatus> for StatusFrame {
    fn from(s: IngestionStatus) -> Self {
        let message_or_progress = s
            .progress
            .map(MessageOrProgress::Progress)
            .or_else(|| s.message.clone().map(MessageOrProgress::Message));

        Self {
            status: s.status,
            message_or_progress,
            message: s.message,
            progress: s.progress,
            correlation_key: s.correlation_key,
        }
    }
}

impl StatusFrame {
    /// Renders the frame as `data: {json}\n\n`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which only happens for non-string
    /// map keys and cannot occur for this type.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
