//! The fetch-and-upsert loop over every status filter and page.
//!
//! A run sweeps [`STATUS_FILTERS`] in order. Each sweep walks pages
//! `start_page..=max_pages`, stopping early on an empty page. Every
//! non-empty page is upserted as one batch before its progress event is
//! emitted, so an observer that re-reads the store after an event always
//! sees that page.
//!
//! Cancellation is cooperative and observed only at the top of each page
//! iteration (and during the inter-page pause); an in-flight fetch always
//! runs to completion and its records are kept. There is no pause after a
//! sweep's last page.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use paddle_mirror_database::{DbError, UserStore};
use paddle_mirror_ingest_models::{
    IngestionSettings, IngestionStatus, STATUS_FILTERS, SettingsError, StatusSink,
    progress_percent,
};
use paddle_mirror_source::{PageFetcher, PageResult};
use paddle_mirror_user_models::UserRecord;
use tokio_util::sync::CancellationToken;

/// Default pause between successful pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

/// Reasons a run did not complete.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// No settings were ever saved.
    #[error("Ingestion settings are missing")]
    MissingSettings,

    /// Saved settings cannot drive a run.
    #[error("Invalid ingestion settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// Another run is active in this process.
    #[error("An ingestion run is already active")]
    AlreadyRunning,

    /// The remote API rejected a page.
    #[error("Remote API error {code}: {message}")]
    Remote {
        /// Vendor error code.
        code: i64,
        /// Vendor error message.
        message: String,
    },

    /// A page could not be fetched or decoded.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of what went wrong.
        message: String,
    },

    /// The store failed.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Every sweep finished; holds the full stored record set.
    Completed(Vec<UserRecord>),
    /// The run was cancelled; records persisted so far are kept.
    Cancelled,
}

/// Clears the active-run slot when a run ends, however it ends.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

enum SweepEnd {
    Finished,
    Cancelled,
}

/// Drives ingestion runs against an injected fetcher, store, and sink.
pub struct IngestionController {
    store: Arc<UserStore>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn StatusSink>,
    page_delay: Duration,
    active: Mutex<Option<CancellationToken>>,
}

impl IngestionController {
    /// Creates a controller with the [`DEFAULT_PAGE_DELAY`].
    #[must_use]
    pub fn new(
        store: Arc<UserStore>,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
            page_delay: DEFAULT_PAGE_DELAY,
            active: Mutex::new(None),
        }
    }

    /// Sets the pause between successful pages.
    #[must_use]
    pub const fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// The store this controller writes to.
    #[must_use]
    pub fn store(&self) -> &UserStore {
        &self.store
    }

    /// Whether a run is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancels the active run, if any. Returns whether one was active.
    pub fn cancel_active(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = active.as_ref() {
            log::info!("Cancelling active ingestion run");
            token.cancel();
            true
        } else {
            false
        }
    }

    fn begin(&self, cancel: &CancellationToken) -> Result<ActiveRun<'_>, IngestError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(IngestError::AlreadyRunning);
        }
        *active = Some(cancel.clone());
        Ok(ActiveRun { slot: &self.active })
    }

    async fn load_settings(&self) -> Result<IngestionSettings, IngestError> {
        let settings = self
            .store
            .load_settings()
            .await?
            .ok_or(IngestError::MissingSettings)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Runs one full ingestion.
    ///
    /// Settings are read once from the store. `cancel` is checked before
    /// every page; once it fires the run stops, emits an idle event, and
    /// returns [`IngestOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// * [`IngestError::AlreadyRunning`] if another run is active
    /// * [`IngestError::MissingSettings`] / [`IngestError::InvalidSettings`]
    ///   before any request is made
    /// * [`IngestError::Remote`] / [`IngestError::Transport`] on the first
    ///   failed page; earlier pages stay persisted
    /// * [`IngestError::Database`] if the store fails
    pub async fn run(&self, cancel: &CancellationToken) -> Result<IngestOutcome, IngestError> {
        let _active = self.begin(cancel)?;

        let settings = match self.load_settings().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Ingestion not started: {e}");
                return Err(e);
            }
        };

        let key = settings.correlation_key();
        let start = Instant::now();

        log::info!(
            "Starting ingestion [{key}] pages {}..={} via {}",
            settings.start_page,
            settings.max_pages,
            settings.api_profile,
        );

        let mut stored: u64 = 0;

        for status_filter in STATUS_FILTERS {
            match self
                .sweep(&settings, &key, status_filter, cancel, &mut stored)
                .await
            {
                Ok(SweepEnd::Finished) => {}
                Ok(SweepEnd::Cancelled) => {
                    log::info!(
                        "Ingestion [{key}] cancelled after storing {stored} users in {:.1}s",
                        start.elapsed().as_secs_f64(),
                    );
                    self.sink
                        .emit(IngestionStatus::idle(&key, "Ingestion cancelled", None));
                    return Ok(IngestOutcome::Cancelled);
                }
                Err(e) => {
                    log::error!("Ingestion [{key}] failed: {e}");
                    self.sink.emit(IngestionStatus::idle(
                        &key,
                        format!("Ingestion failed: {e}"),
                        None,
                    ));
                    return Err(e);
                }
            }
        }

        let users = match self.store.get_all_users().await {
            Ok(users) => users,
            Err(e) => {
                log::error!("Ingestion [{key}] could not read back users: {e}");
                self.sink.emit(IngestionStatus::idle(
                    &key,
                    format!("Ingestion failed: {e}"),
                    None,
                ));
                return Err(e.into());
            }
        };

        log::info!(
            "Ingestion [{key}] complete: {stored} rows written, {} users stored, {:.1}s",
            users.len(),
            start.elapsed().as_secs_f64(),
        );
        self.sink.emit(IngestionStatus::idle(
            &key,
            format!("Ingestion complete: {} users stored", users.len()),
            Some(100),
        ));

        Ok(IngestOutcome::Completed(users))
    }

    async fn sweep(
        &self,
        settings: &IngestionSettings,
        key: &str,
        status_filter: Option<&str>,
        cancel: &CancellationToken,
        stored: &mut u64,
    ) -> Result<SweepEnd, IngestError> {
        let label = status_filter.unwrap_or("all");

        for page in settings.start_page..=settings.max_pages {
            if cancel.is_cancelled() {
                return Ok(SweepEnd::Cancelled);
            }

            let records = match self.fetcher.fetch_page(settings, page, status_filter).await {
                PageResult::Records(records) => records,
                PageResult::Empty => {
                    log::info!("[{label}] Page {page} empty, sweep finished");
                    return Ok(SweepEnd::Finished);
                }
                PageResult::RemoteError { code, message } => {
                    return Err(IngestError::Remote { code, message });
                }
                PageResult::TransportError { message } => {
                    return Err(IngestError::Transport { message });
                }
            };

            *stored += self.store.upsert_users(&records).await?;

            let percent = progress_percent(page, settings.max_pages);
            log::info!(
                "[{label}] Page {page}/{}: stored {} users ({percent}%)",
                settings.max_pages,
                records.len(),
            );
            self.sink.emit(IngestionStatus::uploading(
                key,
                format!(
                    "[{label}] page {page}/{}: {} users stored",
                    settings.max_pages,
                    records.len()
                ),
                Some(percent),
            ));

            if page < settings.max_pages && !self.page_delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.page_delay) => {}
                    () = cancel.cancelled() => {}
                }
            }
        }

        Ok(SweepEnd::Finished)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use paddle_mirror_ingest_models::{ApiProfile, StatusKind};
    use tokio::sync::Notify;

    use super::*;

    type Call = (Option<String>, u32);

    #[derive(Default)]
    struct ScriptedFetcher {
        pages: HashMap<Call, PageResult>,
        calls: Mutex<Vec<Call>>,
        cancel_on_call: Option<(usize, CancellationToken)>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedFetcher {
        fn page(mut self, filter: Option<&str>, page: u32, result: PageResult) -> Self {
            self.pages.insert((filter.map(str::to_string), page), result);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(
            &self,
            _settings: &IngestionSettings,
            page: u32,
            status_filter: Option<&str>,
        ) -> PageResult {
            let call = (status_filter.map(str::to_string), page);
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(call.clone());
                calls.len()
            };

            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }

            if let Some((after, token)) = &self.cancel_on_call {
                if count == *after {
                    token.cancel();
                }
            }

            self.pages.get(&call).cloned().unwrap_or(PageResult::Empty)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<IngestionStatus>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<IngestionStatus> {
            self.events.lock().unwrap().clone()
        }
    }

    impl StatusSink for RecordingSink {
        fn emit(&self, status: IngestionStatus) {
            self.events.lock().unwrap().push(status);
        }
    }

    fn user(id: i64) -> UserRecord {
        UserRecord {
            subscription_id: id,
            plan_id: 1,
            user_id: id,
            email: format!("user{id}@example.com"),
            marketing_consent: false,
            update_url: None,
            cancel_url: None,
            state: "active".to_string(),
            signup_date: format!("2023-01-{:02}", id % 28 + 1),
            quantity: Some(1),
            last_payment: None,
            next_payment: None,
            payment_information: None,
        }
    }

    fn records(ids: &[i64]) -> PageResult {
        PageResult::Records(ids.iter().copied().map(user).collect())
    }

    fn settings(start_page: u32, max_pages: u32) -> IngestionSettings {
        IngestionSettings {
            vendor_id: "123".to_string(),
            vendor_auth_code: "auth".to_string(),
            start_page,
            max_pages,
            subscription_id: None,
            plan_id: None,
            api_profile: ApiProfile::Mock,
        }
    }

    struct Harness {
        controller: IngestionController,
        fetcher: Arc<ScriptedFetcher>,
        sink: Arc<RecordingSink>,
        path: PathBuf,
    }

    impl Harness {
        async fn new(settings: Option<IngestionSettings>, fetcher: ScriptedFetcher) -> Self {
            let path = std::env::temp_dir().join(format!(
                "paddle-mirror-ingest-test-{}.db",
                uuid::Uuid::new_v4()
            ));
            let store = UserStore::open(&path).await.unwrap();
            if let Some(settings) = settings {
                store.save_settings(&settings).await.unwrap();
            }

            let fetcher = Arc::new(fetcher);
            let sink = Arc::new(RecordingSink::default());
            let controller =
                IngestionController::new(Arc::new(store), fetcher.clone(), sink.clone())
                    .with_page_delay(Duration::ZERO);

            Self {
                controller,
                fetcher,
                sink,
                path,
            }
        }

        async fn stored_ids(&self) -> Vec<i64> {
            let mut ids: Vec<i64> = self
                .controller
                .store()
                .get_all_users()
                .await
                .unwrap()
                .iter()
                .map(|u| u.subscription_id)
                .collect();
            ids.sort_unstable();
            ids
        }

        fn teardown(self) {
            drop(self.controller);
            let _ = std::fs::remove_file(self.path);
        }
    }

    fn all(page: u32) -> Call {
        (None, page)
    }

    fn deleted(page: u32) -> Call {
        (Some("deleted".to_string()), page)
    }

    #[tokio::test]
    async fn missing_settings_fails_before_any_fetch() {
        let h = Harness::new(None, ScriptedFetcher::default()).await;

        let result = h.controller.run(&CancellationToken::new()).await;

        assert!(matches!(result, Err(IngestError::MissingSettings)));
        assert!(h.fetcher.calls().is_empty());
        assert!(!h.controller.is_running());
        h.teardown();
    }

    #[tokio::test]
    async fn invalid_settings_fail_before_any_fetch() {
        let mut bad = settings(1, 2);
        bad.vendor_id = String::new();
        let h = Harness::new(Some(bad), ScriptedFetcher::default()).await;

        let result = h.controller.run(&CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(IngestError::InvalidSettings(SettingsError::EmptyCredentials))
        ));
        assert!(h.fetcher.calls().is_empty());
        h.teardown();
    }

    #[tokio::test]
    async fn sweeps_both_filters_and_returns_stored_set() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1, 2]))
            .page(None, 2, records(&[3]))
            .page(Some("deleted"), 1, records(&[4]));
        let h = Harness::new(Some(settings(1, 3)), fetcher).await;

        let outcome = h.controller.run(&CancellationToken::new()).await.unwrap();

        let IngestOutcome::Completed(users) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(users.len(), 4);
        assert_eq!(
            h.fetcher.calls(),
            vec![all(1), all(2), all(3), deleted(1), deleted(2)]
        );

        let last = h.sink.events().pop().unwrap();
        assert_eq!(last.status, StatusKind::Idle);
        assert_eq!(last.progress, Some(100));
        h.teardown();
    }

    #[tokio::test]
    async fn empty_first_page_moves_to_next_filter() {
        let fetcher = ScriptedFetcher::default().page(Some("deleted"), 1, records(&[9]));
        let h = Harness::new(Some(settings(1, 5)), fetcher).await;

        let outcome = h.controller.run(&CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Completed(ref u) if u.len() == 1));
        assert_eq!(h.fetcher.calls(), vec![all(1), deleted(1), deleted(2)]);
        h.teardown();
    }

    #[tokio::test]
    async fn single_page_range_fetches_one_page_per_filter() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 4, records(&[1]))
            .page(Some("deleted"), 4, records(&[2]));
        let h = Harness::new(Some(settings(4, 4)), fetcher).await;

        h.controller.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.fetcher.calls(), vec![all(4), deleted(4)]);
        h.teardown();
    }

    #[tokio::test]
    async fn start_after_max_fetches_nothing() {
        let h = Harness::new(Some(settings(5, 2)), ScriptedFetcher::default()).await;

        let outcome = h.controller.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, IngestOutcome::Completed(vec![]));
        assert!(h.fetcher.calls().is_empty());
        h.teardown();
    }

    #[tokio::test]
    async fn remote_error_short_circuits_and_keeps_earlier_pages() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1]))
            .page(None, 2, records(&[2]))
            .page(
                None,
                3,
                PageResult::RemoteError {
                    code: 107,
                    message: "denied".to_string(),
                },
            )
            .page(None, 4, records(&[4]))
            .page(Some("deleted"), 1, records(&[5]));
        let h = Harness::new(Some(settings(1, 5)), fetcher).await;

        let result = h.controller.run(&CancellationToken::new()).await;

        let Err(IngestError::Remote { code, message }) = result else {
            panic!("expected remote error");
        };
        assert_eq!(code, 107);
        assert_eq!(message, "denied");
        assert_eq!(h.fetcher.calls(), vec![all(1), all(2), all(3)]);
        assert_eq!(h.stored_ids().await, vec![1, 2]);

        let last = h.sink.events().pop().unwrap();
        assert_eq!(last.status, StatusKind::Idle);
        assert!(last.message.unwrap().contains("denied"));
        h.teardown();
    }

    #[tokio::test]
    async fn transport_error_is_fatal() {
        let fetcher = ScriptedFetcher::default().page(
            None,
            1,
            PageResult::TransportError {
                message: "timed out".to_string(),
            },
        );
        let h = Harness::new(Some(settings(1, 3)), fetcher).await;

        let result = h.controller.run(&CancellationToken::new()).await;

        assert!(matches!(result, Err(IngestError::Transport { .. })));
        assert_eq!(h.fetcher.calls(), vec![all(1)]);
        h.teardown();
    }

    #[tokio::test]
    async fn cancellation_keeps_pages_up_to_the_cancel_point() {
        let cancel = CancellationToken::new();
        let mut fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1]))
            .page(None, 2, records(&[2]))
            .page(None, 3, records(&[3]))
            .page(Some("deleted"), 1, records(&[4]));
        fetcher.cancel_on_call = Some((2, cancel.clone()));
        let h = Harness::new(Some(settings(1, 3)), fetcher).await;

        let outcome = h.controller.run(&cancel).await.unwrap();

        assert_eq!(outcome, IngestOutcome::Cancelled);
        assert_eq!(h.fetcher.calls(), vec![all(1), all(2)]);
        assert_eq!(h.stored_ids().await, vec![1, 2]);

        let last = h.sink.events().pop().unwrap();
        assert_eq!(last.status, StatusKind::Idle);
        assert_eq!(last.message.as_deref(), Some("Ingestion cancelled"));
        assert!(!h.controller.is_running());
        h.teardown();
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1, 2]))
            .page(Some("deleted"), 1, records(&[2, 3]));
        let h = Harness::new(Some(settings(1, 2)), fetcher).await;

        let first = h.controller.run(&CancellationToken::new()).await.unwrap();
        let second = h.controller.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.stored_ids().await, vec![1, 2, 3]);
        h.teardown();
    }

    #[tokio::test]
    async fn progress_is_monotonic_within_a_sweep() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1]))
            .page(None, 2, records(&[2]))
            .page(None, 3, records(&[3]));
        let h = Harness::new(Some(settings(1, 3)), fetcher).await;

        h.controller.run(&CancellationToken::new()).await.unwrap();

        let percents: Vec<u8> = h
            .sink
            .events()
            .iter()
            .filter(|e| e.status == StatusKind::Uploading)
            .filter_map(|e| e.progress)
            .collect();
        assert_eq!(percents, vec![33, 67, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        h.teardown();
    }

    #[tokio::test]
    async fn progress_event_follows_persisted_page() {
        let fetcher = ScriptedFetcher::default().page(None, 1, records(&[7]));
        let h = Harness::new(Some(settings(1, 1)), fetcher).await;

        h.controller.run(&CancellationToken::new()).await.unwrap();

        let events = h.sink.events();
        assert_eq!(events[0].status, StatusKind::Uploading);
        assert_eq!(events[0].progress, Some(100));
        assert_eq!(
            events[0].correlation_key,
            settings(1, 1).correlation_key()
        );
        h.teardown();
    }

    #[tokio::test]
    async fn no_pause_after_the_last_page_of_a_sweep() {
        let fetcher = ScriptedFetcher::default()
            .page(None, 1, records(&[1]))
            .page(Some("deleted"), 1, records(&[2]));
        let mut h = Harness::new(Some(settings(1, 1)), fetcher).await;
        h.controller = h.controller.with_page_delay(Duration::from_secs(60));

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            h.controller.run(&CancellationToken::new()),
        )
        .await
        .expect("run waited out the page delay")
        .unwrap();

        assert!(matches!(outcome, IngestOutcome::Completed(ref u) if u.len() == 2));
        h.teardown();
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut fetcher = ScriptedFetcher::default();
        fetcher.gate = Some((started.clone(), release.clone()));
        let h = Harness::new(Some(settings(1, 1)), fetcher).await;

        let cancel = CancellationToken::new();
        let (first, second) = tokio::join!(h.controller.run(&cancel), async {
            started.notified().await;
            let second = h.controller.run(&CancellationToken::new()).await;
            assert!(h.controller.cancel_active());
            release.notify_one();
            second
        });

        assert!(matches!(second, Err(IngestError::AlreadyRunning)));
        assert_eq!(first.unwrap(), IngestOutcome::Cancelled);
        assert!(!h.controller.cancel_active());
        h.teardown();
    }
}
