use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use pgpq::{Claim, ListOption, Queue, Task};
use serde_json::{json, Value};

use crate::{Command, PushArgs, Resolution, ResolveArgs};

pub async fn run(queue: &Queue, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Push(args) => {
            let task = build_task(&args, Utc::now())?;
            let details = queue.push(task).await?;
            Ok(serde_json::to_value(details)?)
        }
        Command::Get { id } => Ok(serde_json::to_value(queue.get(id).await?)?),
        Command::List { limit, offset } => {
            let mut opts = vec![ListOption::Offset(offset)];
            if let Some(limit) = limit {
                opts.push(ListOption::Limit(limit));
            }
            Ok(serde_json::to_value(queue.list(&opts).await?)?)
        }
        Command::Len => Ok(json!({ "len": queue.len(&[]).await? })),
        Command::Oldest => match queue.min_created_at(&[]).await {
            Ok(created_at) => Ok(json!({ "min_created_at": created_at })),
            Err(pgpq::Error::NoTask) => Ok(json!({ "min_created_at": null })),
            Err(e) => Err(e.into()),
        },
        Command::Claim { id, resolve } => {
            let claim = queue.claim(id).await?;
            resolve_claim(claim, &resolve).await
        }
        Command::Shift { resolve } => match queue.shift(&[]).await {
            Ok(claim) => resolve_claim(claim, &resolve).await,
            Err(e) if e.is_empty() => Ok(Value::Null),
            Err(e) => Err(e.into()),
        },
        Command::Truncate { yes } => {
            if !yes {
                bail!("refusing to truncate without --yes");
            }
            Ok(json!({ "deleted": queue.truncate(&[]).await? }))
        }
        Command::SchemaVersion => Ok(json!({ "schema_version": queue.schema_version().await? })),
    }
}

fn build_task(args: &PushArgs, now: DateTime<Utc>) -> anyhow::Result<Task> {
    let payload: Value = serde_json::from_str(&args.payload).context("--payload is not JSON")?;

    let mut task = Task::new(payload).with_priority(args.priority);
    if let Some(id) = args.id {
        task = task.with_id(id);
    }
    if let Some(delay) = args.delay {
        task = task.with_not_before(delayed(now, delay).context("--delay")?);
    }
    Ok(task)
}

/// Apply the `--set-*` edits. Edits are only meaningful for update.
fn apply_edits(
    claim: &mut Claim,
    args: &ResolveArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let has_edits = args.set_priority.is_some()
        || args.set_payload.is_some()
        || args.set_namespace.is_some()
        || args.set_delay.is_some();
    if has_edits && args.resolve != Resolution::Update {
        bail!("--set-* flags require --resolve update");
    }

    if let Some(priority) = args.set_priority {
        claim.set_priority(priority);
    }
    if let Some(payload) = &args.set_payload {
        claim.set_payload(serde_json::from_str(payload).context("--set-payload is not JSON")?);
    }
    if let Some(namespace) = &args.set_namespace {
        claim.set_namespace(namespace.clone());
    }
    if let Some(delay) = args.set_delay {
        claim.set_not_before(Some(delayed(now, delay).context("--set-delay")?));
    }
    Ok(())
}

fn delayed(now: DateTime<Utc>, secs: i64) -> anyhow::Result<DateTime<Utc>> {
    match Duration::try_seconds(secs).and_then(|delay| now.checked_add_signed(delay)) {
        Some(at) => Ok(at),
        None => bail!("delay of {secs} seconds is out of range"),
    }
}

async fn resolve_claim(mut claim: Claim, args: &ResolveArgs) -> anyhow::Result<Value> {
    if let Err(e) = apply_edits(&mut claim, args, Utc::now()) {
        claim.release().await?;
        return Err(e);
    }

    match args.resolve {
        Resolution::Release => claim.release().await?,
        Resolution::Update => claim.update().await?,
        Resolution::Done => claim.done().await?,
        Resolution::Nack => claim.nack().await?,
    }
    tracing::info!(task_id = %claim.id, resolution = ?args.resolve, "Resolved claim");

    Ok(serde_json::to_value(claim.task())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn push_args(payload: &str) -> PushArgs {
        PushArgs {
            payload: payload.to_string(),
            priority: 4,
            id: None,
            delay: None,
        }
    }

    #[test]
    fn builds_task_from_flags() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut args = push_args(r#"{"foo":1}"#);
        args.delay = Some(90);

        let task = build_task(&args, now).unwrap();
        assert_eq!(task.priority, 4);
        assert_eq!(task.payload, json!({"foo": 1}));
        assert_eq!(task.not_before, Some(now + Duration::seconds(90)));
        assert_eq!(task.id, None);
    }

    #[test]
    fn rejects_invalid_payload() {
        let err = build_task(&push_args("{not json"), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("--payload"));
    }

    #[test]
    fn rejects_out_of_range_delay() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for delay in [i64::MAX, i64::MIN, 400_000 * 365 * 86_400] {
            let mut args = push_args("{}");
            args.delay = Some(delay);
            let err = build_task(&args, now).unwrap_err();
            assert!(format!("{err:#}").contains("out of range"), "{err:#}");
        }

        let mut args = push_args("{}");
        args.delay = Some(-60);
        let task = build_task(&args, now).unwrap();
        assert_eq!(task.not_before, Some(now - Duration::seconds(60)));
    }
}
