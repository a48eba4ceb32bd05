#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion settings, status events, and status-filter definitions.

pub mod sink;

pub use sink::{NullStatusSink, StatusSink, null_sink};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

/// Highest page number a run may request.
pub const MAX_PAGE_CAP: u32 = 1_000;

/// Status filters swept by every run, in order.
///
/// `None` lists users without a state filter; `"deleted"` picks up
/// cancelled subscriptions that the unfiltered listing omits.
pub const STATUS_FILTERS: [Option<&str>; 2] = [None, Some("deleted")];

/// Length of the hex-encoded correlation key.
const CORRELATION_KEY_LEN: usize = 16;

/// Which remote endpoint a run targets.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ApiProfile {
    /// Vendor-hosted mock of the subscription user listing.
    #[default]
    Mock,
    /// Production vendor API.
    Live,
}

impl ApiProfile {
    /// Returns the built-in endpoint URL for this profile.
    #[must_use]
    pub const fn default_url(self) -> &'static str {
        match self {
            Self::Mock => {
                "https://stoplight.io/mocks/paddle/api-reference/30744711/2.0/subscription/users"
            }
            Self::Live => "https://vendors.paddle.com/api/2.0/subscription/users",
        }
    }
}

/// Reasons a settings snapshot cannot start a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Vendor id or auth code is blank.
    #[error("vendor credentials are empty")]
    EmptyCredentials,

    /// Pages are 1-based.
    #[error("start page must be at least 1 (got {0})")]
    StartPageZero(u32),

    /// `max_pages` exceeds [`MAX_PAGE_CAP`].
    #[error("max pages {0} exceeds the cap of {MAX_PAGE_CAP}")]
    MaxPagesOverCap(u32),
}

/// Configuration snapshot read once at the start of a run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSettings {
    /// Vendor id credential.
    pub vendor_id: String,
    /// Vendor auth code credential.
    pub vendor_auth_code: String,
    /// First page (1-based) of every status filter sweep.
    pub start_page: u32,
    /// Last page (inclusive) of every status filter sweep.
    pub max_pages: u32,
    /// Restrict the listing to one subscription.
    pub subscription_id: Option<i64>,
    /// Restrict the listing to one plan.
    pub plan_id: Option<i64>,
    /// Target endpoint.
    pub api_profile: ApiProfile,
}

impl std::fmt::Debug for IngestionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionSettings")
            .field("vendor_id", &self.vendor_id)
            .field("vendor_auth_code", &"***")
            .field("start_page", &self.start_page)
            .field("max_pages", &self.max_pages)
            .field("subscription_id", &self.subscription_id)
            .field("plan_id", &self.plan_id)
            .field("api_profile", &self.api_profile)
            .finish()
    }
}

impl IngestionSettings {
    /// Checks that the snapshot can drive a run.
    ///
    /// `start_page > max_pages` is accepted: the sweeps simply fetch
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.vendor_id.trim().is_empty() || self.vendor_auth_code.trim().is_empty() {
            return Err(SettingsError::EmptyCredentials);
        }
        if self.start_page == 0 {
            return Err(SettingsError::StartPageZero(self.start_page));
        }
        if self.max_pages > MAX_PAGE_CAP {
            return Err(SettingsError::MaxPagesOverCap(self.max_pages));
        }
        Ok(())
    }

    /// Derives a stable key identifying runs started from this snapshot.
    ///
    /// The auth code is not part of the digest.
    #[must_use]
    pub fn correlation_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.vendor_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.start_page.to_le_bytes());
        hasher.update(self.max_pages.to_le_bytes());
        hasher.update(self.subscription_id.unwrap_or(0).to_le_bytes());
        hasher.update(self.plan_id.unwrap_or(0).to_le_bytes());
        hasher.update(self.api_profile.as_ref().as_bytes());
        let mut key = hex::encode(hasher.finalize());
        key.truncate(CORRELATION_KEY_LEN);
        key
    }
}

/// Coarse run state shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum StatusKind {
    /// No run in progress (also used for terminal events).
    Idle,
    /// A run is fetching and storing pages.
    Uploading,
}

/// A transient progress notification. Never persisted.
///
/// Page events carry both `progress` and `message`; terminal events carry
/// `message`, with `progress` set to 100 only on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStatus {
    /// Coarse run state.
    pub status: StatusKind,
    /// Human-readable description.
    pub message: Option<String>,
    /// Percentage of the page range completed (0-100).
    pub progress: Option<u8>,
    /// Key derived from the settings snapshot of the emitting run.
    pub correlation_key: String,
}

impl IngestionStatus {
    /// An `Uploading` event with a message and optional percentage.
    #[must_use]
    pub fn uploading(
        correlation_key: impl Into<String>,
        message: impl Into<String>,
        progress: Option<u8>,
    ) -> Self {
        Self {
            status: StatusKind::Uploading,
            message: Some(message.into()),
            progress,
            correlation_key: correlation_key.into(),
        }
    }

    /// An `Idle` event with a message and optional percentage.
    #[must_use]
    pub fn idle(
        correlation_key: impl Into<String>,
        message: impl Into<String>,
        progress: Option<u8>,
    ) -> Self {
        Self {
            status: StatusKind::Idle,
            message: Some(message.into()),
            progress,
            correlation_key: correlation_key.into(),
        }
    }
}

/// Percentage of the page range reached at `current_page`:
/// `round(current_page / max_pages * 100)`, clamped to 100.
///
/// Returns 0 when `max_pages` is 0.
#[must_use]
pub fn progress_percent(current_page: u32, max_pages: u32) -> u8 {
    if max_pages == 0 {
        return 0;
    }
    let pct = (f64::from(current_page) / f64::from(max_pages) * 100.0).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pct = pct.min(100.0) as u8;
    pct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> IngestionSettings {
        IngestionSettings {
            vendor_id: "12345".to_string(),
            vendor_auth_code: "secret".to_string(),
            start_page: 1,
            max_pages: 10,
            subscription_id: None,
            plan_id: None,
            api_profile: ApiProfile::Mock,
        }
    }

    #[test]
    fn validates_credentials_and_pages() {
        assert_eq!(settings().validate(), Ok(()));

        let mut s = settings();
        s.vendor_auth_code = "  ".to_string();
        assert_eq!(s.validate(), Err(SettingsError::EmptyCredentials));

        let mut s = settings();
        s.start_page = 0;
        assert_eq!(s.validate(), Err(SettingsError::StartPageZero(0)));

        let mut s = settings();
        s.max_pages = MAX_PAGE_CAP + 1;
        assert_eq!(s.validate(), Err(SettingsError::MaxPagesOverCap(MAX_PAGE_CAP + 1)));

        let mut s = settings();
        s.start_page = 5;
        s.max_pages = 2;
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn correlation_key_is_deterministic() {
        let a = settings().correlation_key();
        assert_eq!(a, settings().correlation_key());
        assert_eq!(a.len(), CORRELATION_KEY_LEN);

        let mut other = settings();
        other.api_profile = ApiProfile::Live;
        assert_ne!(a, other.correlation_key());

        let mut rotated = settings();
        rotated.vendor_auth_code = "rotated".to_string();
        assert_eq!(a, rotated.correlation_key());
    }

    #[test]
    fn debug_masks_auth_code() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("12345"));
    }

    #[test]
    fn computes_progress_percent() {
        assert_eq!(progress_percent(1, 10), 10);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(4, 3), 100);
        assert_eq!(progress_percent(1, 0), 0);
    }

    #[test]
    fn parses_api_profile() {
        assert_eq!("LIVE".parse::<ApiProfile>(), Ok(ApiProfile::Live));
        assert_eq!("mock".parse::<ApiProfile>(), Ok(ApiProfile::Mock));
        assert_eq!(ApiProfile::Live.to_string(), "LIVE");
        assert!(ApiProfile::Live.default_url().starts_with("https://vendors."));
    }

    #[test]
    fn serializes_status_kind_by_name() {
        let status = IngestionStatus::uploading("abc", "page 1", Some(10));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "Uploading");
        assert_eq!(json["progress"], 10);
        assert_eq!(json["correlationKey"], "abc");
    }
}
