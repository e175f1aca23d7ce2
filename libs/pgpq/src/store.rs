//! Store boundary: pool construction and store error translation.
//!
//! Store-specific failures are mapped into the queue's taxonomy only here, so
//! the claim protocol and the facade stay free of SQLSTATE codes.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{Error, Result};

/// Conditions the queue recognizes in store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Condition {
    DuplicateId,
    /// The server ended a claim's session after `idle_in_transaction_session_timeout`.
    ClaimSessionTimedOut,
}

/// (SQLSTATE, constraint, condition). A `None` constraint matches any.
const TRANSLATIONS: &[(&str, Option<&str>, Condition)] = &[
    // unique_violation on the task primary key
    ("23505", Some("pgpq_tasks_pkey"), Condition::DuplicateId),
    // idle_in_transaction_session_timeout
    ("25P03", None, Condition::ClaimSessionTimedOut),
];

pub(crate) fn classify(code: Option<&str>, constraint: Option<&str>) -> Option<Condition> {
    let code = code?;
    TRANSLATIONS
        .iter()
        .find(|(c, k, _)| *c == code && (k.is_none() || *k == constraint))
        .map(|(_, _, condition)| *condition)
}

fn condition_of(err: &sqlx::Error) -> Option<Condition> {
    err.as_database_error()
        .and_then(|db| classify(db.code().as_deref(), db.constraint()))
}

/// Whether the server already ended the claim's session, and with it the
/// transaction and its row lock.
pub(crate) fn is_claim_session_timeout(err: &sqlx::Error) -> bool {
    condition_of(err) == Some(Condition::ClaimSessionTimedOut)
}

/// Translate an error raised while inserting task `id`.
pub(crate) fn translate_insert(err: sqlx::Error, id: Uuid) -> Error {
    match condition_of(&err) {
        Some(Condition::DuplicateId) => Error::DuplicateId(id),
        _ => Error::Database(err),
    }
}

/// Translate an error raised while committing a resolve of task `id`.
pub(crate) fn translate_resolve(err: sqlx::Error, id: Uuid, deadline: DateTime<Utc>) -> Error {
    match condition_of(&err) {
        Some(Condition::ClaimSessionTimedOut) => Error::ClaimExpired { id, deadline },
        _ => Error::Database(err),
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Applied to every statement on every pooled connection.
    pub statement_timeout: Option<Duration>,
    /// Applied to every lock wait on every pooled connection.
    pub lock_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: None,
            lock_timeout: None,
        }
    }
}

impl PoolSettings {
    pub(crate) fn session_options(&self) -> Vec<(&'static str, String)> {
        let mut options = Vec::new();
        if let Some(timeout) = self.statement_timeout {
            options.push(("statement_timeout", format!("{}ms", timeout.as_millis())));
        }
        if let Some(timeout) = self.lock_timeout {
            options.push(("lock_timeout", format!("{}ms", timeout.as_millis())));
        }
        options
    }
}

/// Open a pool for `url` with the given settings.
pub async fn connect_pool(url: &str, settings: &PoolSettings) -> Result<PgPool> {
    let connect_options = PgConnectOptions::from_str(url)?.options(settings.session_options());

    let pool = PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(connect_options)
        .await?;

    tracing::debug!(
        max_connections = settings.max_connections,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}
