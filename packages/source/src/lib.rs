#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Page fetcher for the vendor subscription user listing.
//!
//! A [`PageFetcher`] issues exactly one request per call and folds every
//! outcome into a [`PageResult`]. Nothing here retries: the ingestion
//! controller decides what a failed page means for the run.

pub mod paddle;

use async_trait::async_trait;
use paddle_mirror_ingest_models::IngestionSettings;
use paddle_mirror_user_models::UserRecord;

pub use paddle::PaddleUserSource;

/// Fixed number of users requested per page.
pub const PAGE_SIZE: u32 = 250;

/// Errors that can occur while setting up a fetcher.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Normalized outcome of one page request.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    /// The page held at least one user.
    Records(Vec<UserRecord>),
    /// The page held zero users: the current status filter sweep is done.
    Empty,
    /// The remote API answered with a structured failure.
    RemoteError {
        /// Vendor error code.
        code: i64,
        /// Vendor error message.
        message: String,
    },
    /// Network, timeout, HTTP status, or body decoding failure.
    TransportError {
        /// Description of what went wrong.
        message: String,
    },
}

impl PageResult {
    /// Builds a [`PageResult`] from a decoded page, mapping an empty page to
    /// [`PageResult::Empty`].
    #[must_use]
    pub fn from_records(records: Vec<UserRecord>) -> Self {
        if records.is_empty() {
            Self::Empty
        } else {
            Self::Records(records)
        }
    }
}

/// Fetches single pages of the subscription user listing.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Requests page `page` (1-based) filtered by `status_filter`.
    ///
    /// `settings` must already be validated.
    async fn fetch_page(
        &self,
        settings: &IngestionSettings,
        page: u32,
        status_filter: Option<&str>,
    ) -> PageResult;
}
