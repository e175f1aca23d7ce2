//! Claims: exclusive, transaction-scoped ownership of one task.
//!
//! A claim wraps the locked task row together with the open transaction that
//! holds the row lock. Exactly one of [`Claim::release`], [`Claim::update`],
//! [`Claim::done`] or [`Claim::nack`] ends the transaction; any further resolve
//! fails with [`Error::ClaimClosed`]. Dropping an unresolved claim rolls the
//! transaction back, which returns the task to the queue untouched.
//!
//! A claim pins one pooled connection for its whole lifetime. Resolve it
//! promptly, and configure a claim timeout so that an abandoned claim cannot
//! hold its lock forever.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{normalize_payload, unix_epoch, validate_namespace, TaskDetails};
use crate::stmt::{self, Statement};
use crate::store;
use crate::{Error, Result};

pub struct Claim {
    task: TaskDetails,
    tx: Option<Transaction<'static, Postgres>>,
    clock: Arc<dyn Clock>,
    acquired_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
}

impl Claim {
    pub(crate) fn new(
        task: TaskDetails,
        tx: Transaction<'static, Postgres>,
        clock: Arc<dyn Clock>,
        acquired_at: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task,
            tx: Some(tx),
            clock,
            acquired_at,
            deadline,
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id
    }

    pub fn task(&self) -> &TaskDetails {
        &self.task
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// When the claim stops being resolvable by update, done or nack.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| self.clock.now() >= deadline)
    }

    /// Whether a resolve operation has already ended the transaction.
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.task.namespace = namespace.into();
    }

    pub fn set_priority(&mut self, priority: i16) {
        self.task.priority = priority;
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.task.payload = payload;
    }

    /// `None` makes the task visible again immediately after update.
    pub fn set_not_before(&mut self, not_before: Option<DateTime<Utc>>) {
        self.task.not_before = not_before.unwrap_or_else(unix_epoch);
    }

    /// Abandon the claim. Local edits are discarded and the task becomes
    /// visible again with its stored fields untouched.
    ///
    /// Succeeds after the claim timeout too: once the server has ended the
    /// claim's session, the lock is already gone.
    pub async fn release(&mut self) -> Result<()> {
        let tx = self.take_tx()?;
        match tx.rollback().await {
            Ok(()) => {}
            Err(e) if store::is_claim_session_timeout(&e) => {
                tracing::debug!(task_id = %self.task.id, "Claim session already ended by timeout");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(task_id = %self.task.id, "Released claim");
        Ok(())
    }

    /// Write back namespace, priority, payload and `not_before`, refresh
    /// `updated_at` and return the task to the queue.
    ///
    /// A namespace validation failure leaves the claim open.
    pub async fn update(&mut self) -> Result<()> {
        self.ensure_open()?;
        validate_namespace(&self.task.namespace)?;

        let tx = self.take_tx()?;
        let now = self.clock.now();
        let tx = reject_expired(tx, self.task.id, self.deadline, now).await?;

        let payload = normalize_payload(std::mem::take(&mut self.task.payload));
        let statement = stmt::update(stmt::UpdatedRow {
            id: self.task.id,
            namespace: self.task.namespace.clone(),
            priority: self.task.priority,
            payload: payload.clone(),
            not_before: self.task.not_before,
            now,
        });
        self.task.payload = payload;

        commit_with(tx, &statement, self.task.id, self.deadline.unwrap_or(now)).await?;
        self.task.updated_at = now;

        tracing::debug!(
            task_id = %self.task.id,
            priority = self.task.priority,
            "Updated claimed task"
        );
        Ok(())
    }

    /// Delete the task; it is gone for good.
    pub async fn done(&mut self) -> Result<()> {
        let tx = self.take_tx()?;
        let now = self.clock.now();
        let tx = reject_expired(tx, self.task.id, self.deadline, now).await?;

        let expires = self.deadline.unwrap_or(now);
        commit_with(tx, &stmt::done(self.task.id), self.task.id, expires).await?;

        tracing::debug!(task_id = %self.task.id, "Completed claimed task");
        Ok(())
    }

    /// Count a failed delivery and return the task to the queue. Local edits
    /// are not written.
    pub async fn nack(&mut self) -> Result<()> {
        let tx = self.take_tx()?;
        let now = self.clock.now();
        let tx = reject_expired(tx, self.task.id, self.deadline, now).await?;

        let expires = self.deadline.unwrap_or(now);
        commit_with(tx, &stmt::nack(self.task.id, now), self.task.id, expires).await?;
        self.task.attempts += 1;
        self.task.updated_at = now;

        tracing::debug!(
            task_id = %self.task.id,
            attempts = self.task.attempts,
            "Returned claimed task"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.tx.is_some() {
            Ok(())
        } else {
            Err(Error::ClaimClosed)
        }
    }

    /// The transaction leaves the claim before any statement is sent, so a
    /// cancelled resolve drops (and rolls back) it instead of leaving it
    /// half-used inside the claim.
    fn take_tx(&mut self) -> Result<Transaction<'static, Postgres>> {
        self.tx.take().ok_or(Error::ClaimClosed)
    }
}

/// Roll back and fail if the claim's deadline has passed.
async fn reject_expired(
    tx: Transaction<'static, Postgres>,
    id: Uuid,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Transaction<'static, Postgres>> {
    match deadline {
        Some(deadline) if now >= deadline => {
            if let Err(e) = tx.rollback().await {
                tracing::debug!(task_id = %id, error = %e, "Rollback of expired claim failed");
            }
            Err(Error::ClaimExpired { id, deadline })
        }
        _ => Ok(tx),
    }
}

/// Run `statement` and commit. A session ended by the claim timeout
/// surfaces as [`Error::ClaimExpired`].
async fn commit_with(
    mut tx: Transaction<'static, Postgres>,
    statement: &Statement,
    id: Uuid,
    deadline: DateTime<Utc>,
) -> Result<()> {
    if let Err(e) = statement.query().execute(&mut *tx).await {
        if let Err(rollback_err) = tx.rollback().await {
            tracing::debug!(task_id = %id, error = %rollback_err, "Rollback after failed resolve failed");
        }
        return Err(store::translate_resolve(e, id, deadline));
    }
    tx.commit()
        .await
        .map_err(|e| store::translate_resolve(e, id, deadline))
}

impl Deref for Claim {
    type Target = TaskDetails;

    fn deref(&self) -> &TaskDetails {
        &self.task
    }
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim")
            .field("task", &self.task)
            .field("acquired_at", &self.acquired_at)
            .field("deadline", &self.deadline)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx rolls the transaction back when it is dropped
            tracing::warn!(
                task_id = %self.task.id,
                "Claim dropped without being resolved, rolling back"
            );
        }
    }
}
