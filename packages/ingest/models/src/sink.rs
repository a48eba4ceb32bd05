//! Status sink trait for ingestion runs.
//!
//! Decouples the ingestion controller from whoever renders its
//! [`IngestionStatus`] events (a server-push stream, a terminal progress
//! bar, or nothing at all).

use std::sync::Arc;

use crate::IngestionStatus;

/// Receives status events in emission order.
///
/// Emitting must not fail or block the caller: a sink with no live
/// observer drops the event.
pub trait StatusSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, status: IngestionStatus);
}

/// A [`StatusSink`] that discards every event.
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn emit(&self, _status: IngestionStatus) {}
}

/// Returns a shared [`NullStatusSink`].
#[must_use]
pub fn null_sink() -> Arc<dyn StatusSink> {
    Arc::new(NullStatusSink)
}
