//! Schema bootstrap
//!
//! Checks the server version, reads the stored schema version and applies
//! whatever migrations are missing. Migrations are idempotent and run in one
//! transaction under an advisory lock, so concurrent bootstraps serialize.

use sqlx::{PgConnection, PgPool};

use crate::stmt::{self, META_TABLE};
use crate::{Error, Result};

/// Schema version this crate writes and expects.
pub const TARGET_VERSION: i32 = 2;

/// PostgreSQL 9.6: SKIP LOCKED, ON CONFLICT and ADD COLUMN IF NOT EXISTS.
pub const MIN_SERVER_VERSION: i32 = 90600;

/// Key for `pg_advisory_xact_lock`, shared by all bootstraps.
const BOOTSTRAP_LOCK_KEY: i64 = 0x7067_7071_0001;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_tasks",
        sql: include_str!("../migrations/0001_create_tasks.sql"),
    },
    Migration {
        version: 2,
        name: "attempts_and_pick_index",
        sql: include_str!("../migrations/0002_attempts_and_pick_index.sql"),
    },
];

/// Bring the store to [`TARGET_VERSION`], or fail.
pub(crate) async fn ensure_schema(pool: &PgPool) -> Result<()> {
    check_server_version(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let current = stored_version(&mut tx).await?;
    let pending = match pending_migrations(current) {
        Ok(pending) => pending,
        Err(e) => {
            tx.rollback().await?;
            return Err(e);
        }
    };

    if pending.is_empty() {
        tx.commit().await?;
        tracing::debug!(version = current, "Queue schema is up to date");
        return Ok(());
    }

    for migration in pending {
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied queue schema migration"
        );
    }

    sqlx::query(&format!(
        "INSERT INTO {} (name, value) VALUES ('schema_version', $1) \
         ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value",
        META_TABLE
    ))
    .bind(TARGET_VERSION.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        from = current,
        to = TARGET_VERSION,
        "Queue schema migrated"
    );
    Ok(())
}

async fn check_server_version(pool: &PgPool) -> Result<()> {
    let version: i32 =
        sqlx::query_scalar("SELECT current_setting('server_version_num')::int")
            .fetch_one(pool)
            .await?;

    if version < MIN_SERVER_VERSION {
        return Err(Error::UnsupportedServer {
            version,
            required: MIN_SERVER_VERSION,
        });
    }
    Ok(())
}

/// Stored schema version; 0 when the metadata relation or marker is absent.
async fn stored_version(conn: &mut PgConnection) -> Result<i32> {
    // to_regclass honours search_path, unlike information_schema lookups
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(META_TABLE)
        .fetch_one(&mut *conn)
        .await?;
    if !exists {
        return Ok(0);
    }

    let value: Option<String> = stmt::schema_version()
        .query_scalar()
        .fetch_optional(&mut *conn)
        .await?;

    match value {
        None => Ok(0),
        Some(v) => parse_version(&v),
    }
}

fn parse_version(value: &str) -> Result<i32> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| Error::InvalidSchemaVersion(value.to_string()))
}

fn pending_migrations(current: i32) -> Result<Vec<Migration>> {
    if current > TARGET_VERSION {
        return Err(Error::SchemaTooNew {
            found: current,
            supported: TARGET_VERSION,
        });
    }
    Ok(MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .copied()
        .collect())
}
