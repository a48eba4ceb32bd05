//! Process-wide relay of ingestion status events to one live observer.
//!
//! [`StatusChannel`] is a single-slot registry: [`StatusChannel::subscribe`]
//! installs a fresh receiver and drops the previous sender, which ends the
//! older subscriber's stream. Events emitted while nobody is subscribed are
//! discarded; late subscribers never see past events.

use std::sync::{Mutex, PoisonError};

use paddle_mirror_ingest_models::{IngestionStatus, StatusSink};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Single-subscriber relay implementing [`StatusSink`].
#[derive(Default)]
pub struct StatusChannel {
    slot: Mutex<Option<UnboundedSender<IngestionStatus>>>,
}

impl StatusChannel {
    /// Creates a channel with no subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber, detaching the previous one.
    ///
    /// The returned receiver yields events in emission order until another
    /// subscriber replaces it.
    pub fn subscribe(&self) -> UnboundedReceiver<IngestionStatus> {
        let (tx, rx) = unbounded_channel();
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);

        if previous.is_some() {
            log::info!("Status stream replaced; previous subscriber detached");
        } else {
            log::info!("Status stream subscribed");
        }

        rx
    }

    #[cfg(test)]
    fn has_subscriber(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl StatusSink for StatusChannel {
    fn emit(&self, status: IngestionStatus) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(tx) = slot.as_ref() else {
            return;
        };

        if tx.send(status).is_err() {
            log::debug!("Status subscriber disconnected; clearing slot");
            *slot = None;
        }
    }
}
