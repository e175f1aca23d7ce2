//! Priority task queue on PostgreSQL
//!
//! Producers [`Queue::push`] tasks carrying an opaque JSON payload, a priority,
//! an optional namespace and an optional "not before" time. Consumers
//! [`Queue::shift`] (or [`Queue::claim`] by id) to obtain a [`Claim`]: an
//! exclusive, transaction-scoped lock on exactly one task, which they resolve
//! with release, update, done or nack.
//!
//! There is no in-process coordinator. Mutual exclusion comes from the row
//! lock held by the claim's transaction, and acquires use `SKIP LOCKED` so
//! that any number of consumers make progress on disjoint tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! use pgpq::{Queue, QueueOptions, Task};
//! use serde_json::json;
//!
//! # async fn example() -> pgpq::Result<()> {
//! let queue = Queue::connect("postgres://localhost/pgpq", QueueOptions::default()).await?;
//!
//! queue.push(Task::new(json!({"email": "a@example.org"})).with_priority(5)).await?;
//!
//! match queue.shift(&[]).await {
//!     Ok(mut claim) => {
//!         // ... process claim.payload ...
//!         claim.done().await?;
//!     }
//!     Err(e) if e.is_empty() => { /* nothing to do, back off */ }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod claim;
pub mod clock;
pub mod error;
pub mod models;
pub mod options;
pub mod queue;
mod stmt;
pub mod store;

pub use claim::Claim;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use models::{validate_namespace, Task, TaskDetails};
pub use options::{ListOption, QueueOptions, ScopeOption, DEFAULT_LIST_LIMIT};
pub use queue::Queue;
pub use store::{connect_pool, PoolSettings};
