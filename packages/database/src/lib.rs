#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `SQLite` record store for mirrored subscription users.
//!
//! Uses `switchy_database` with the `rusqlite` backend. The store is an
//! explicitly opened [`UserStore`] handed to whoever needs it; nothing in
//! this crate keeps a global connection.
//!
//! Two tables live here:
//! - `users`: one row per subscription, keyed by `subscription_id`, with
//!   the nested payment blocks stored as JSON text.
//! - `settings`: a single row holding the current
//!   [`IngestionSettings`](paddle_mirror_ingest_models::IngestionSettings).

pub mod paths;
pub mod settings;
pub mod users;

use std::path::Path;

use paddle_mirror_ingest_models::IngestionSettings;
use paddle_mirror_user_models::UserRecord;
use switchy_database::Database;
use switchy_database_connection::init_sqlite_rusqlite;

pub use users::{DateRange, InvalidDate};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The database file could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON blob serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Handle to the local store.
///
/// Open once at startup with [`UserStore::open`] and release with
/// [`UserStore::close`] on shutdown.
pub struct UserStore {
    db: Box<dyn Database>,
}

impl UserStore {
    /// Opens (or creates) the store at `path` and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or schema creation
    /// fails.
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        log::info!("Opening store at {}", path.display());
        let db = init_sqlite_rusqlite(Some(path)).map_err(|e| DbError::Connection(e.to_string()))?;

        users::ensure_schema(db.as_ref()).await?;
        settings::ensure_schema(db.as_ref()).await?;

        Ok(Self { db })
    }

    /// Releases the underlying connection.
    pub fn close(self) {
        log::info!("Closing store");
        drop(self.db);
    }

    #[cfg(test)]
    pub(crate) fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    /// Upserts a page of users in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any row fails; no row of the batch is kept.
    pub async fn upsert_users(&self, records: &[UserRecord]) -> Result<u64, DbError> {
        users::upsert_users(self.db.as_ref(), records).await
    }

    /// Returns every stored user ordered by signup date.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn get_all_users(&self) -> Result<Vec<UserRecord>, DbError> {
        users::get_users(self.db.as_ref(), &DateRange::default()).await
    }

    /// Returns users whose signup date falls in `range`, date-ascending.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn get_users(&self, range: &DateRange) -> Result<Vec<UserRecord>, DbError> {
        users::get_users(self.db.as_ref(), range).await
    }

    /// Returns the number of stored users.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn count_users(&self) -> Result<u64, DbError> {
        users::count_users(self.db.as_ref()).await
    }

    /// Deletes every user and resets the identity sequence.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails; nothing is deleted then.
    pub async fn delete_all_users(&self) -> Result<u64, DbError> {
        users::delete_all_users(self.db.as_ref()).await
    }

    /// Loads the current ingestion settings, if any were saved.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn load_settings(&self) -> Result<Option<IngestionSettings>, DbError> {
        settings::load_settings(self.db.as_ref()).await
    }

    /// Replaces the current ingestion settings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    pub async fn save_settings(&self, settings: &IngestionSettings) -> Result<(), DbError> {
        settings::save_settings(self.db.as_ref(), settings).await
    }
}
