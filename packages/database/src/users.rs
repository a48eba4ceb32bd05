//! `users` table: schema, batch upsert, date-range reads, and reset.

use chrono::NaiveDate;
use moosicbox_json_utils::database::ToValue as _;
use paddle_mirror_user_models::{Payment, PaymentInformation, UserRecord};
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

const UPSERT_SQL: &str = "INSERT INTO users (
        subscription_id, plan_id, user_id, user_email, marketing_consent,
        update_url, cancel_url, state, signup_date, quantity,
        last_payment_json, next_payment_json, payment_information_json
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT(subscription_id) DO UPDATE SET
        plan_id = excluded.plan_id,
        user_id = excluded.user_id,
        user_email = excluded.user_email,
        marketing_consent = excluded.marketing_consent,
        update_url = excluded.update_url,
        cancel_url = excluded.cancel_url,
        state = excluded.state,
        signup_date = excluded.signup_date,
        quantity = excluded.quantity,
        last_payment_json = excluded.last_payment_json,
        next_payment_json = excluded.next_payment_json,
        payment_information_json = excluded.payment_information_json";

const SELECT_COLUMNS: &str = "subscription_id, plan_id, user_id, user_email, marketing_consent,
        update_url, cancel_url, state, signup_date, quantity,
        last_payment_json, next_payment_json, payment_information_json";

/// Inclusive signup-date bounds (`yyyy-MM-dd`). A missing bound is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Earliest signup day included.
    pub start: Option<String>,
    /// Latest signup day included.
    pub end: Option<String>,
}

/// A date bound that is not a valid `yyyy-MM-dd` day.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} must be yyyy-MM-dd (got {value:?})")]
pub struct InvalidDate {
    /// Name of the rejected bound.
    pub field: &'static str,
    /// The rejected input.
    pub value: String,
}

fn check_day(field: &'static str, value: Option<&String>) -> Result<(), InvalidDate> {
    match value {
        Some(v) if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() => Err(InvalidDate {
            field,
            value: v.clone(),
        }),
        _ => Ok(()),
    }
}

impl DateRange {
    /// Builds a range from user input, rejecting bounds that are not
    /// calendar days in `yyyy-MM-dd` form.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDate`] for the first malformed bound.
    pub fn parse(start: Option<String>, end: Option<String>) -> Result<Self, InvalidDate> {
        check_day("start_date", start.as_ref())?;
        check_day("end_date", end.as_ref())?;
        Ok(Self { start, end })
    }

    /// Range bounded on both sides.
    #[must_use]
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }
}

/// Creates the `users` table and its signup-date index.
///
/// # Errors
///
/// Returns [`DbError`] if the DDL fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id INTEGER NOT NULL UNIQUE,
            plan_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            user_email TEXT NOT NULL,
            marketing_consent INTEGER NOT NULL DEFAULT 0,
            update_url TEXT,
            cancel_url TEXT,
            state TEXT NOT NULL,
            signup_date TEXT NOT NULL,
            quantity INTEGER,
            last_payment_json TEXT,
            next_payment_json TEXT,
            payment_information_json TEXT
        )",
    )
    .await?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_users_signup_date ON users (signup_date)")
        .await?;

    Ok(())
}

fn optional_json<T: serde::Serialize>(value: Option<&T>) -> Result<DatabaseValue, DbError> {
    Ok(match value {
        Some(v) => DatabaseValue::String(serde_json::to_string(v)?),
        None => DatabaseValue::Null,
    })
}

fn optional_string(value: Option<&String>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone()))
}

fn user_params(user: &UserRecord) -> Result<Vec<DatabaseValue>, DbError> {
    Ok(vec![
        DatabaseValue::Int64(user.subscription_id),
        DatabaseValue::Int64(user.plan_id),
        DatabaseValue::Int64(user.user_id),
        DatabaseValue::String(user.email.clone()),
        DatabaseValue::Int64(i64::from(user.marketing_consent)),
        optional_string(user.update_url.as_ref()),
        optional_string(user.cancel_url.as_ref()),
        DatabaseValue::String(user.state.clone()),
        DatabaseValue::String(user.signup_date.clone()),
        user.quantity.map_or(DatabaseValue::Null, DatabaseValue::Int64),
        optional_json(user.last_payment.as_ref())?,
        optional_json(user.next_payment.as_ref())?,
        optional_json(user.payment_information.as_ref())?,
    ])
}

async fn insert_rows(db: &dyn Database, records: &[UserRecord]) -> Result<u64, DbError> {
    let mut written = 0;
    for user in records {
        written += db.exec_raw_params(UPSERT_SQL, &user_params(user)?).await?;
    }
    Ok(written)
}

/// Upserts `records` keyed by `subscription_id` inside one transaction.
///
/// Either every record of the batch is written or none is.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the transaction is rolled
/// back before returning.
pub async fn upsert_users(db: &dyn Database, records: &[UserRecord]) -> Result<u64, DbError> {
    if records.is_empty() {
        return Ok(0);
    }

    let txn = db.begin_transaction().await?;

    match insert_rows(txn.as_ref(), records).await {
        Ok(written) => {
            txn.commit().await?;
            log::debug!("Upserted {written} users");
            Ok(written)
        }
        Err(e) => {
            log::warn!("Rolling back batch of {} users: {e}", records.len());
            if let Err(rollback_err) = txn.rollback().await {
                log::error!("Rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

fn optional_from_json<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    column: &str,
) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring unreadable {column}: {e}");
            None
        }
    }
}

fn id_from_row(row: &Row, column: &str) -> Result<i64, DbError> {
    row.to_value(column).map_err(|e| DbError::Conversion {
        message: format!("{column}: {e:?}"),
    })
}

fn user_from_row(row: &Row) -> Result<UserRecord, DbError> {
    let consent: i64 = row.to_value("marketing_consent").unwrap_or(0);

    Ok(UserRecord {
        subscription_id: id_from_row(row, "subscription_id")?,
        plan_id: id_from_row(row, "plan_id")?,
        user_id: id_from_row(row, "user_id")?,
        email: row.to_value("user_email").unwrap_or_default(),
        marketing_consent: consent != 0,
        update_url: row.to_value("update_url").unwrap_or(None),
        cancel_url: row.to_value("cancel_url").unwrap_or(None),
        state: row.to_value("state").unwrap_or_default(),
        signup_date: row.to_value("signup_date").unwrap_or_default(),
        quantity: row.to_value("quantity").unwrap_or(None),
        last_payment: optional_from_json::<Payment>(
            row.to_value("last_payment_json").unwrap_or(None),
            "last_payment_json",
        ),
        next_payment: optional_from_json::<Payment>(
            row.to_value("next_payment_json").unwrap_or(None),
            "next_payment_json",
        ),
        payment_information: optional_from_json::<PaymentInformation>(
            row.to_value("payment_information_json").unwrap_or(None),
            "payment_information_json",
        ),
    })
}

/// Returns users whose signup day lies in `range`, ordered by signup date
/// ascending (ties broken by `subscription_id`).
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row has a non-integer id.
pub async fn get_users(db: &dyn Database, range: &DateRange) -> Result<Vec<UserRecord>, DbError> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(start) = &range.start {
        params.push(DatabaseValue::String(start.clone()));
        clauses.push(format!("substr(signup_date, 1, 10) >= ${}", params.len()));
    }
    if let Some(end) = &range.end {
        params.push(DatabaseValue::String(end.clone()));
        clauses.push(format!("substr(signup_date, 1, 10) <= ${}", params.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM users{where_clause}
         ORDER BY signup_date ASC, subscription_id ASC"
    );

    let rows = db.query_raw_params(&sql, &params).await?;

    rows.iter().map(user_from_row).collect()
}

/// Returns the number of stored users.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_users(db: &dyn Database) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params("SELECT COUNT(*) as cnt FROM users", &[])
        .await?;
    let count: i64 = rows.first().map_or(0, |r| r.to_value("cnt").unwrap_or(0));
    u64::try_from(count).map_err(|e| DbError::Conversion {
        message: format!("negative user count {count}: {e}"),
    })
}

async fn clear_rows(db: &dyn Database) -> Result<u64, DbError> {
    db.exec_raw_params(
        "DELETE FROM sqlite_sequence WHERE name = $1",
        &[DatabaseValue::String("users".to_string())],
    )
    .await?;
    Ok(db.exec_raw_params("DELETE FROM users", &[]).await?)
}

/// Deletes every user and resets the row-id sequence in one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if either statement fails; the transaction is rolled
/// back and no row is deleted.
pub async fn delete_all_users(db: &dyn Database) -> Result<u64, DbError> {
    let txn = db.begin_transaction().await?;

    match clear_rows(txn.as_ref()).await {
        Ok(deleted) => {
            txn.commit().await?;
            log::info!("Deleted {deleted} users");
            Ok(deleted)
        }
        Err(e) => {
            log::warn!("Rolling back user reset: {e}");
            if let Err(rollback_err) = txn.rollback().await {
                log::error!("Rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}
