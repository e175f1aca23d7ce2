//! Shared application state

use std::sync::Arc;

use anyhow::Context;
use pgpq::Queue;

use crate::config::Config;
use crate::metrics::{QueueMetrics, QueueStats};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stats: Arc<dyn QueueStats>,
    pub metrics: Arc<QueueMetrics>,
}

impl AppState {
    /// Connect to the queue and bootstrap its schema.
    pub async fn new(config: Config) -> anyhow::Result<(Self, Queue)> {
        let queue = Queue::connect_with(
            &config.database.url,
            &config.pool_settings(),
            config.queue_options(),
        )
        .await
        .context("Failed to connect to queue")?;

        tracing::info!(
            schema_version = %queue.schema_version().await?,
            "Queue connected"
        );

        let state = Self::with_stats(config, Arc::new(queue.clone()))?;
        Ok((state, queue))
    }

    pub fn with_stats(config: Config, stats: Arc<dyn QueueStats>) -> anyhow::Result<Self> {
        let metrics = QueueMetrics::new(&config.server.namespaces)
            .context("Failed to register queue metrics")?;

        Ok(Self {
            config: Arc::new(config),
            stats,
            metrics: Arc::new(metrics),
        })
    }
}
