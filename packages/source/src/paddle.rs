//! HTTP page fetcher for the vendor's `subscription/users` endpoint.
//!
//! The endpoint takes a form-encoded `POST` and answers with an envelope:
//! `{"success": true, "response": [...]}` on success or
//! `{"success": false, "error": {"code": .., "message": ..}}` on failure.

use std::time::Duration;

use async_trait::async_trait;
use paddle_mirror_ingest_models::{ApiProfile, IngestionSettings, MAX_PAGE_CAP};
use paddle_mirror_user_models::UserRecord;
use serde::Deserialize;

use crate::{PAGE_SIZE, PageFetcher, PageResult, SourceError};

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// Default per-request timeout of the underlying HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    response: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RemoteErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// [`PageFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct PaddleUserSource {
    client: reqwest::Client,
    mock_url: String,
    live_url: String,
}

impl PaddleUserSource {
    /// Creates a fetcher using the built-in profile URLs and the given
    /// per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("paddle_mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            mock_url: ApiProfile::Mock.default_url().to_string(),
            live_url: ApiProfile::Live.default_url().to_string(),
        })
    }

    /// Overrides the endpoint used for `profile`.
    #[must_use]
    pub fn with_endpoint(mut self, profile: ApiProfile, url: impl Into<String>) -> Self {
        match profile {
            ApiProfile::Mock => self.mock_url = url.into(),
            ApiProfile::Live => self.live_url = url.into(),
        }
        self
    }

    /// Returns the endpoint used for `profile`.
    #[must_use]
    pub fn endpoint(&self, profile: ApiProfile) -> &str {
        match profile {
            ApiProfile::Mock => &self.mock_url,
            ApiProfile::Live => &self.live_url,
        }
    }
}

/// Builds the form body for one page request.
#[must_use]
pub fn form_params(
    settings: &IngestionSettings,
    page: u32,
    status_filter: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("vendor_id", settings.vendor_id.clone()),
        ("vendor_auth_code", settings.vendor_auth_code.clone()),
        ("page", page.to_string()),
        ("results_per_page", PAGE_SIZE.to_string()),
    ];

    if let Some(state) = status_filter {
        params.push(("state", state.to_string()));
    }
    if let Some(id) = settings.subscription_id {
        params.push(("subscription_id", id.to_string()));
    }
    if let Some(id) = settings.plan_id {
        params.push(("plan_id", id.to_string()));
    }

    params
}

/// Normalizes a decoded response envelope into a [`PageResult`].
#[must_use]
pub fn parse_page_body(body: serde_json::Value) -> PageResult {
    let envelope: Envelope = match serde_json::from_value(body) {
        Ok(e) => e,
        Err(e) => {
            return PageResult::TransportError {
                message: format!("unexpected response shape: {e}"),
            };
        }
    };

    if !envelope.success {
        return envelope.error.map_or_else(
            || PageResult::RemoteError {
                code: 0,
                message: "request was not successful".to_string(),
            },
            |err| PageResult::RemoteError {
                code: err.code,
                message: err.message,
            },
        );
    }

    let Some(response) = envelope.response else {
        return PageResult::TransportError {
            message: "successful response without a `response` field".to_string(),
        };
    };

    match serde_json::from_value::<Vec<UserRecord>>(response) {
        Ok(records) => PageResult::from_records(records),
        Err(e) => PageResult::TransportError {
            message: format!("failed to decode users: {e}"),
        },
    }
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

#[async_trait]
impl PageFetcher for PaddleUserSource {
    async fn fetch_page(
        &self,
        settings: &IngestionSettings,
        page: u32,
        status_filter: Option<&str>,
    ) -> PageResult {
        debug_assert!((1..=MAX_PAGE_CAP).contains(&page), "page {page} out of range");

        let url = self.endpoint(settings.api_profile);
        let label = status_filter.unwrap_or("all");

        log::debug!("[{label}] Requesting page {page} from {url}");

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form_params(settings, page, status_filter));

        if settings.api_profile == ApiProfile::Mock {
            request = request.header("Prefer", "code=200");
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[{label}] Page {page} request failed: {e}");
                return PageResult::TransportError {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[{label}] Page {page} body read failed (status {status}): {e}");
                return PageResult::TransportError {
                    message: format!("failed to read response body: {e}"),
                };
            }
        };

        let body: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                log::warn!(
                    "[{label}] Page {page} JSON parse failed\n  \
                     status: {status}\n  \
                     received: {} bytes\n  \
                     parse error: {e}\n  \
                     body preview: {}",
                    text.len(),
                    preview(&text),
                );
                return PageResult::TransportError {
                    message: format!("JSON parse failed: {e} (status={status})"),
                };
            }
        };

        let result = parse_page_body(body);

        // A non-2xx status without a structured vendor error is a transport
        // failure, even if the body happened to decode.
        if !status.is_success() && !matches!(result, PageResult::RemoteError { .. }) {
            log::warn!("[{label}] Page {page} returned HTTP {status}");
            return PageResult::TransportError {
                message: format!("HTTP {status}"),
            };
        }

        match &result {
            PageResult::Records(records) => {
                log::info!("[{label}] Page {page}: {} users", records.len());
            }
            PageResult::Empty => log::info!("[{label}] Page {page}: no users"),
            PageResult::RemoteError { code, message } => {
                log::error!("[{label}] Page {page} rejected by remote: {code} {message}");
            }
            PageResult::TransportError { message } => {
                log::error!("[{label}] Page {page} transport error: {message}");
            }
        }

        result
    }
}
