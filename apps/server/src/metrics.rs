//! Queue metrics
//!
//! Two gauges labeled by namespace, refreshed on every scrape:
//! - `queue_len`: number of visible tasks
//! - `queue_oldest_message_age_seconds`: age of the oldest visible task
//!
//! The gauges live in a private [`Registry`] so the exposition only ever
//! contains queue metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgpq::ScopeOption;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::Result;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// The slice of the queue API the exporter reads from.
#[async_trait]
pub trait QueueStats: Send + Sync {
    async fn len(&self, namespace: &str) -> pgpq::Result<i64>;

    async fn min_created_at(&self, namespace: &str) -> pgpq::Result<DateTime<Utc>>;
}

#[async_trait]
impl QueueStats for pgpq::Queue {
    async fn len(&self, namespace: &str) -> pgpq::Result<i64> {
        pgpq::Queue::len(self, &[ScopeOption::namespace(namespace)]).await
    }

    async fn min_created_at(&self, namespace: &str) -> pgpq::Result<DateTime<Utc>> {
        pgpq::Queue::min_created_at(self, &[ScopeOption::namespace(namespace)]).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceStats {
    pub len: i64,
    pub oldest_age_seconds: i64,
}

pub struct QueueMetrics {
    registry: Registry,
    queue_len: IntGaugeVec,
    oldest_age: IntGaugeVec,
    namespaces: Vec<String>,
}

impl QueueMetrics {
    /// An empty namespace list exports the default namespace.
    pub fn new(namespaces: &[String]) -> Result<Self> {
        let registry = Registry::new();

        let queue_len = IntGaugeVec::new(
            Opts::new("queue_len", "Queue length per namespace."),
            &["namespace"],
        )?;
        let oldest_age = IntGaugeVec::new(
            Opts::new(
                "queue_oldest_message_age_seconds",
                "Oldest message age in seconds.",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(queue_len.clone()))?;
        registry.register(Box::new(oldest_age.clone()))?;

        Ok(Self {
            registry,
            queue_len,
            oldest_age,
            namespaces: unique_namespaces(namespaces),
        })
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Read every namespace, then publish. A failing read leaves the gauges
    /// from the previous scrape in place.
    pub async fn collect(&self, stats: &dyn QueueStats, now: DateTime<Utc>) -> Result<()> {
        let mut collected = Vec::with_capacity(self.namespaces.len());
        for namespace in &self.namespaces {
            collected.push(fetch_namespace(stats, namespace, now).await?);
        }

        for (namespace, stats) in self.namespaces.iter().zip(collected) {
            self.queue_len
                .with_label_values(&[namespace.as_str()])
                .set(stats.len);
            self.oldest_age
                .with_label_values(&[namespace.as_str()])
                .set(stats.oldest_age_seconds);
        }
        Ok(())
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub async fn scrape(&self, stats: &dyn QueueStats, now: DateTime<Utc>) -> Result<Vec<u8>> {
        self.collect(stats, now).await?;
        self.render()
    }
}

async fn fetch_namespace(
    stats: &dyn QueueStats,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<NamespaceStats> {
    let len = stats.len(namespace).await?;

    let oldest_age_seconds = match stats.min_created_at(namespace).await {
        Ok(created_at) => (now - created_at).num_seconds().max(0),
        Err(pgpq::Error::NoTask) => 0,
        Err(e) => return Err(e.into()),
    };

    Ok(NamespaceStats {
        len,
        oldest_age_seconds,
    })
}

fn unique_namespaces(namespaces: &[String]) -> Vec<String> {
    if namespaces.is_empty() {
        return vec![String::new()];
    }

    let mut unique = namespaces.to_vec();
    unique.sort();
    unique.dedup();
    unique
}
