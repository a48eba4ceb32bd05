//! Single-row `settings` table holding the current [`IngestionSettings`].

use moosicbox_json_utils::database::ToValue as _;
use paddle_mirror_ingest_models::{ApiProfile, IngestionSettings};
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

/// Creates the `settings` table.
///
/// # Errors
///
/// Returns [`DbError`] if the DDL fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            vendor_id TEXT NOT NULL,
            vendor_auth_code TEXT NOT NULL,
            start_page INTEGER NOT NULL,
            max_pages INTEGER NOT NULL,
            subscription_id INTEGER,
            plan_id INTEGER,
            api_profile TEXT NOT NULL
        )",
    )
    .await?;
    Ok(())
}

fn page_from_row(row: &Row, column: &str) -> Result<u32, DbError> {
    let value: i64 = row.to_value(column).unwrap_or_default();
    u32::try_from(value).map_err(|e| DbError::Conversion {
        message: format!("{column} out of range ({value}): {e}"),
    })
}

fn settings_from_row(row: &Row) -> Result<IngestionSettings, DbError> {
    let profile: String = row.to_value("api_profile").unwrap_or_default();
    let api_profile = profile.parse::<ApiProfile>().unwrap_or_else(|_| {
        log::warn!("Unknown api_profile {profile:?}, using {}", ApiProfile::default());
        ApiProfile::default()
    });

    Ok(IngestionSettings {
        vendor_id: row.to_value("vendor_id").unwrap_or_default(),
        vendor_auth_code: row.to_value("vendor_auth_code").unwrap_or_default(),
        start_page: page_from_row(row, "start_page")?,
        max_pages: page_from_row(row, "max_pages")?,
        subscription_id: row.to_value("subscription_id").unwrap_or(None),
        plan_id: row.to_value("plan_id").unwrap_or(None),
        api_profile,
    })
}

/// Loads the saved settings, or `None` if none were ever saved.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored page number does not
/// fit in a `u32`.
pub async fn load_settings(db: &dyn Database) -> Result<Option<IngestionSettings>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT vendor_id, vendor_auth_code, start_page, max_pages,
                    subscription_id, plan_id, api_profile
             FROM settings WHERE id = 1",
            &[],
        )
        .await?;

    rows.first().map(settings_from_row).transpose()
}

/// Replaces the saved settings.
///
/// # Errors
///
/// Returns [`DbError`] if the write fails.
pub async fn save_settings(db: &dyn Database, settings: &IngestionSettings) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO settings (
            id, vendor_id, vendor_auth_code, start_page, max_pages,
            subscription_id, plan_id, api_profile
         ) VALUES (1, $1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT(id) DO UPDATE SET
            vendor_id = excluded.vendor_id,
            vendor_auth_code = excluded.vendor_auth_code,
            start_page = excluded.start_page,
            max_pages = excluded.max_pages,
            subscription_id = excluded.subscription_id,
            plan_id = excluded.plan_id,
            api_profile = excluded.api_profile",
        &[
            DatabaseValue::String(settings.vendor_id.clone()),
            DatabaseValue::String(settings.vendor_auth_code.clone()),
            DatabaseValue::Int64(i64::from(settings.start_page)),
            DatabaseValue::Int64(i64::from(settings.max_pages)),
            settings
                .subscription_id
                .map_or(DatabaseValue::Null, DatabaseValue::Int64),
            settings.plan_id.map_or(DatabaseValue::Null, DatabaseValue::Int64),
            DatabaseValue::String(settings.api_profile.to_string()),
        ],
    )
    .await?;

    log::info!("Saved ingestion settings for vendor {}", settings.vendor_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_temp_store, teardown};

    fn sample() -> IngestionSettings {
        IngestionSettings {
            vendor_id: "1234".to_string(),
            vendor_auth_code: "auth".to_string(),
            start_page: 1,
            max_pages: 10,
            subscription_id: None,
            plan_id: Some(55),
            api_profile: ApiProfile::Live,
        }
    }

    #[tokio::test]
    async fn no_settings_until_saved() {
        let (store, path) = open_temp_store().await;
        assert_eq!(store.load_settings().await.unwrap(), None);
        teardown(store, path);
    }

    #[tokio::test]
    async fn save_replaces_the_single_row() {
        let (store, path) = open_temp_store().await;

        store.save_settings(&sample()).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), Some(sample()));

        let mut updated = sample();
        updated.max_pages = 3;
        updated.subscription_id = Some(77);
        updated.api_profile = ApiProfile::Mock;
        store.save_settings(&updated).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), Some(updated));

        let rows = store
            .database()
            .query_raw_params("SELECT COUNT(*) as cnt FROM settings", &[])
            .await
            .unwrap();
        let count: i64 = rows.first().map_or(0, |r| r.to_value("cnt").unwrap_or(0));
        assert_eq!(count, 1);

        teardown(store, path);
    }

    #[tokio::test]
    async fn unknown_profile_falls_back_to_default() {
        let (store, path) = open_temp_store().await;

        store.save_settings(&sample()).await.unwrap();
        store
            .database()
            .exec_raw("UPDATE settings SET api_profile = 'STAGING' WHERE id = 1")
            .await
            .unwrap();

        let loaded = store.load_settings().await.unwrap().unwrap();
        assert_eq!(loaded.api_profile, ApiProfile::Mock);

        teardown(store, path);
    }
}
