use anyhow::Context as _;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt as _;
use pgpq::{ManualClock, PoolSettings, Queue, QueueOptions, Task, TaskDetails};
use serde_json::json;
use sqlx::Connection as _;
use std::sync::{Arc, OnceLock};
use url::Url;
use uuid::Uuid;

pub fn mock_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn mock_id() -> Uuid {
    Uuid::parse_str("28667ce4-1999-4af4-9ff2-1757b3844048").unwrap()
}

pub struct TestQueue {
    pub queue: Queue,
    pub clock: Arc<ManualClock>,
    schema: String,
    admin_database_url: String,
}

impl TestQueue {
    pub async fn new_with_options(
        admin_database_url: String,
        configure: impl FnOnce(QueueOptions) -> QueueOptions,
    ) -> anyhow::Result<Self> {
        init_tracing();

        // Per-test schema and pool.
        let schema = format!("test_{}", Uuid::new_v4().simple());
        let mut admin_conn = sqlx::PgConnection::connect(&admin_database_url)
            .await
            .context("connect admin db for schema create")?;
        sqlx::query(&format!(r#"CREATE SCHEMA "{}""#, schema))
            .execute(&mut admin_conn)
            .await
            .context("create test schema")?;

        let clock = Arc::new(ManualClock::new(mock_now()));
        let options = configure(QueueOptions::default().with_clock(clock.clone()));

        let settings = PoolSettings {
            max_connections: 12,
            ..PoolSettings::default()
        };
        let url = with_search_path(&admin_database_url, &schema)?;
        let queue = Queue::connect_with(&url, &settings, options)
            .await
            .context("connect queue")?;

        Ok(Self {
            queue,
            clock,
            schema,
            admin_database_url,
        })
    }

    pub async fn cleanup(self) -> anyhow::Result<()> {
        self.queue.close().await;

        let mut admin_conn = sqlx::PgConnection::connect(&self.admin_database_url)
            .await
            .context("connect admin db for schema drop")?;
        sqlx::query(&format!(r#"DROP SCHEMA "{}" CASCADE"#, self.schema))
            .execute(&mut admin_conn)
            .await
            .context("drop test schema")?;

        Ok(())
    }

    /// Two tasks in the default namespace (priorities 3 and 2) and one in "baz".
    pub async fn seed_triple(&self) -> anyhow::Result<(TaskDetails, TaskDetails, TaskDetails)> {
        let task1 = self
            .queue
            .push(
                Task::new(json!({"foo": 1}))
                    .with_id(mock_id())
                    .with_priority(3),
            )
            .await?;
        let task2 = self
            .queue
            .push(Task::new(json!({"bar": 2})).with_priority(2))
            .await?;
        let task3 = self
            .queue
            .push(Task::default().with_namespace("baz"))
            .await?;
        Ok((task1, task2, task3))
    }
}

/// Database for tests: `PGPQ_TEST_DATABASE_URL`, else `DATABASE_URL`.
pub fn test_database_url() -> Option<String> {
    std::env::var("PGPQ_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| !url.is_empty())
}

pub async fn with_test_queue<F>(f: F) -> anyhow::Result<()>
where
    F: for<'a> FnOnce(
        &'a TestQueue,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + 'a>,
    >,
{
    with_test_queue_with_options(|options| options, f).await
}

pub async fn with_test_queue_with_options<C, F>(configure: C, f: F) -> anyhow::Result<()>
where
    C: FnOnce(QueueOptions) -> QueueOptions,
    F: for<'a> FnOnce(
        &'a TestQueue,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + 'a>,
    >,
{
    let Some(database_url) = test_database_url() else {
        eprintln!("skipping: PGPQ_TEST_DATABASE_URL / DATABASE_URL not set");
        return Ok(());
    };

    let test_queue = TestQueue::new_with_options(database_url, configure).await?;

    let result = std::panic::AssertUnwindSafe(f(&test_queue))
        .catch_unwind()
        .await;
    let cleanup_result = test_queue.cleanup().await;

    if let Err(e) = cleanup_result {
        eprintln!("test schema cleanup failed: {e:?}");
    }

    match result {
        Ok(r) => r,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn with_search_path(database_url: &str, schema: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(database_url).context("parse database URL")?;
    url.query_pairs_mut()
        .append_pair("options", &format!("-c search_path={}", schema));
    Ok(url.to_string())
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pgpq=info,sqlx=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
