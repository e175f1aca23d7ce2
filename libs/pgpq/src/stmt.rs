//! Statement builder
//!
//! Renders the parameterized statements issued against `pgpq_tasks`. Every
//! statement is a SQL string plus an ordered argument list; placeholders are
//! numbered as arguments are pushed.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub(crate) const TASKS_TABLE: &str = "pgpq_tasks";
pub(crate) const META_TABLE: &str = "pgpq_meta_info";

const COLUMNS: &str =
    "id, namespace, priority, payload, not_before, created_at, updated_at, attempts";

/// Selection order: most urgent first, then longest waiting.
const PICK_ORDER: &str = "priority DESC, updated_at ASC";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Id(Uuid),
    Text(String),
    SmallInt(i16),
    BigInt(i64),
    Json(Value),
    Time(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub args: Vec<Arg>,
}

/// Binds a statement's arguments, in order, onto an sqlx query.
macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                Arg::Id(v) => query.bind(*v),
                Arg::Text(v) => query.bind(v.as_str()),
                Arg::SmallInt(v) => query.bind(*v),
                Arg::BigInt(v) => query.bind(*v),
                Arg::Json(v) => query.bind(v),
                Arg::Time(v) => query.bind(*v),
            };
        }
        query
    }};
}

impl Statement {
    pub(crate) fn query(
        &self,
    ) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
        bind_args!(sqlx::query(&self.sql), &self.args)
    }

    pub(crate) fn query_as<O>(
        &self,
    ) -> sqlx::query::QueryAs<'_, sqlx::Postgres, O, sqlx::postgres::PgArguments>
    where
        O: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
    {
        bind_args!(sqlx::query_as::<_, O>(&self.sql), &self.args)
    }

    pub(crate) fn query_scalar<O>(
        &self,
    ) -> sqlx::query::QueryScalar<'_, sqlx::Postgres, O, sqlx::postgres::PgArguments>
    where
        (O,): for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
    {
        bind_args!(sqlx::query_scalar::<_, O>(&self.sql), &self.args)
    }
}

#[derive(Debug, Default)]
struct Params {
    args: Vec<Arg>,
}

impl Params {
    fn push(&mut self, arg: Arg) -> String {
        self.args.push(arg);
        format!("${}", self.args.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Id(Uuid),
    Namespace(String),
    /// `not_before <= now`
    VisibleAt(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Columns,
    Count,
    MinCreatedAt,
}

/// Builder for reads against the task relation.
#[derive(Debug, Clone)]
struct Select {
    projection: Projection,
    filters: Vec<Filter>,
    ordered: bool,
    limit: Option<i64>,
    offset: Option<i64>,
    lock: bool,
}

impl Select {
    fn new(projection: Projection) -> Self {
        Self {
            projection,
            filters: Vec::new(),
            ordered: false,
            limit: None,
            offset: None,
            lock: false,
        }
    }

    fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    fn first(mut self) -> Self {
        self.limit = Some(1);
        self
    }

    /// Row-lock the selected row without waiting on rows locked by others.
    fn skip_locked(mut self) -> Self {
        self.lock = true;
        self
    }

    fn build(self) -> Statement {
        let mut params = Params::default();
        let projection = match self.projection {
            Projection::Columns => COLUMNS,
            Projection::Count => "COUNT(*)",
            Projection::MinCreatedAt => "MIN(created_at)",
        };
        let mut sql = format!("SELECT {} FROM {}", projection, TASKS_TABLE);

        push_where(&mut sql, &mut params, self.filters);

        if self.ordered {
            sql.push_str(" ORDER BY ");
            sql.push_str(PICK_ORDER);
        }
        match (self.limit, self.offset) {
            (Some(1), None) => sql.push_str(" LIMIT 1"),
            (Some(limit), offset) => {
                let limit = params.push(Arg::BigInt(limit));
                sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    let offset = params.push(Arg::BigInt(offset));
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
            (None, _) => {}
        }
        if self.lock {
            sql.push_str(" FOR UPDATE SKIP LOCKED");
        }

        Statement {
            sql,
            args: params.args,
        }
    }
}

fn push_where(sql: &mut String, params: &mut Params, filters: Vec<Filter>) {
    let clauses: Vec<String> = filters
        .into_iter()
        .map(|filter| match filter {
            Filter::Id(id) => format!("id = {}", params.push(Arg::Id(id))),
            Filter::Namespace(ns) => format!("namespace = {}", params.push(Arg::Text(ns))),
            Filter::VisibleAt(now) => format!("not_before <= {}", params.push(Arg::Time(now))),
        })
        .collect();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

/// Values written by push.
#[derive(Debug, Clone)]
pub(crate) struct NewRow {
    pub id: Uuid,
    pub namespace: String,
    pub priority: i16,
    pub payload: Value,
    pub not_before: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

pub(crate) fn insert(row: NewRow) -> Statement {
    let mut params = Params::default();
    let values = [
        params.push(Arg::Id(row.id)),
        params.push(Arg::Text(row.namespace)),
        params.push(Arg::SmallInt(row.priority)),
        params.push(Arg::Json(row.payload)),
        params.push(Arg::Time(row.not_before)),
        params.push(Arg::Time(row.now)),
        params.push(Arg::Time(row.now)),
    ];
    Statement {
        sql: format!(
            "INSERT INTO {} (id, namespace, priority, payload, not_before, created_at, updated_at) \
             VALUES ({}) RETURNING {}",
            TASKS_TABLE,
            values.join(", "),
            COLUMNS
        ),
        args: params.args,
    }
}

/// Point lookup, never locks.
pub(crate) fn get(id: Uuid) -> Statement {
    Select::new(Projection::Columns)
        .filter(Filter::Id(id))
        .build()
}

/// Best visible task in a namespace, skipping rows claimed by others.
pub(crate) fn shift(namespace: &str, now: DateTime<Utc>) -> Statement {
    Select::new(Projection::Columns)
        .filter(Filter::Namespace(namespace.to_string()))
        .filter(Filter::VisibleAt(now))
        .ordered()
        .first()
        .skip_locked()
        .build()
}

/// A single task by id, skipped if claimed by others.
pub(crate) fn claim(id: Uuid) -> Statement {
    Select::new(Projection::Columns)
        .filter(Filter::Id(id))
        .first()
        .skip_locked()
        .build()
}

/// All tasks in a namespace, delayed ones included.
pub(crate) fn list(namespace: &str, limit: i64, offset: i64) -> Statement {
    Select::new(Projection::Columns)
        .filter(Filter::Namespace(namespace.to_string()))
        .ordered()
        .page(limit, offset)
        .build()
}

pub(crate) fn len(namespace: &str, now: DateTime<Utc>) -> Statement {
    Select::new(Projection::Count)
        .filter(Filter::Namespace(namespace.to_string()))
        .filter(Filter::VisibleAt(now))
        .build()
}

pub(crate) fn min_created_at(namespace: &str, now: DateTime<Utc>) -> Statement {
    Select::new(Projection::MinCreatedAt)
        .filter(Filter::Namespace(namespace.to_string()))
        .filter(Filter::VisibleAt(now))
        .build()
}

pub(crate) fn truncate(namespace: &str) -> Statement {
    let mut params = Params::default();
    let mut sql = format!("DELETE FROM {}", TASKS_TABLE);
    push_where(
        &mut sql,
        &mut params,
        vec![Filter::Namespace(namespace.to_string())],
    );
    Statement {
        sql,
        args: params.args,
    }
}

/// Values written back by a claim update.
#[derive(Debug, Clone)]
pub(crate) struct UpdatedRow {
    pub id: Uuid,
    pub namespace: String,
    pub priority: i16,
    pub payload: Value,
    pub not_before: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

pub(crate) fn update(row: UpdatedRow) -> Statement {
    let mut params = Params::default();
    let sql = format!(
        "UPDATE {} SET namespace = {}, priority = {}, payload = {}, not_before = {}, updated_at = {} \
         WHERE id = {}",
        TASKS_TABLE,
        params.push(Arg::Text(row.namespace)),
        params.push(Arg::SmallInt(row.priority)),
        params.push(Arg::Json(row.payload)),
        params.push(Arg::Time(row.not_before)),
        params.push(Arg::Time(row.now)),
        params.push(Arg::Id(row.id)),
    );
    Statement {
        sql,
        args: params.args,
    }
}

pub(crate) fn nack(id: Uuid, now: DateTime<Utc>) -> Statement {
    let mut params = Params::default();
    let sql = format!(
        "UPDATE {} SET attempts = attempts + 1, updated_at = {} WHERE id = {}",
        TASKS_TABLE,
        params.push(Arg::Time(now)),
        params.push(Arg::Id(id)),
    );
    Statement {
        sql,
        args: params.args,
    }
}

pub(crate) fn done(id: Uuid) -> Statement {
    let mut params = Params::default();
    let mut sql = format!("DELETE FROM {}", TASKS_TABLE);
    push_where(&mut sql, &mut params, vec![Filter::Id(id)]);
    Statement {
        sql,
        args: params.args,
    }
}

/// Bounds how long the current transaction may sit idle before the server
/// terminates its session. Scoped to the transaction.
pub(crate) fn idle_in_transaction_timeout(millis: i64) -> Statement {
    Statement {
        sql: "SELECT set_config('idle_in_transaction_session_timeout', $1, true)".to_string(),
        args: vec![Arg::Text(millis.to_string())],
    }
}

pub(crate) fn schema_version() -> Statement {
    Statement {
        sql: format!("SELECT value FROM {} WHERE name = $1", META_TABLE),
        args: vec![Arg::Text("schema_version".to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn shift_filters_orders_and_skips_locked() {
        let stmt = shift("baz", now());
        assert_eq!(
            stmt.sql,
            "SELECT id, namespace, priority, payload, not_before, created_at, updated_at, attempts \
             FROM pgpq_tasks WHERE namespace = $1 AND not_before <= $2 \
             ORDER BY priority DESC, updated_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED"
        );
        assert_eq!(
            stmt.args,
            vec![Arg::Text("baz".to_string()), Arg::Time(now())]
        );
    }

    #[test]
    fn claim_is_restricted_to_one_id() {
        let id = Uuid::new_v4();
        let stmt = claim(id);
        assert!(stmt.sql.ends_with("WHERE id = $1 LIMIT 1 FOR UPDATE SKIP LOCKED"));
        assert_eq!(stmt.args, vec![Arg::Id(id)]);
    }

    #[test]
    fn get_never_locks() {
        let stmt = get(Uuid::nil());
        assert!(!stmt.sql.contains("FOR UPDATE"));
        assert!(stmt.sql.ends_with("FROM pgpq_tasks WHERE id = $1"));
    }

    #[test]
    fn list_includes_delayed_tasks_and_pages() {
        let stmt = list("", 100, 20);
        assert!(!stmt.sql.contains("not_before <="));
        assert!(stmt
            .sql
            .ends_with("WHERE namespace = $1 ORDER BY priority DESC, updated_at ASC LIMIT $2 OFFSET $3"));
        assert_eq!(
            stmt.args,
            vec![Arg::Text(String::new()), Arg::BigInt(100), Arg::BigInt(20)]
        );
    }

    #[test]
    fn aggregates_count_only_visible_tasks() {
        let stmt = len("baz", now());
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM pgpq_tasks WHERE namespace = $1 AND not_before <= $2"
        );

        let stmt = min_created_at("baz", now());
        assert_eq!(
            stmt.sql,
            "SELECT MIN(created_at) FROM pgpq_tasks WHERE namespace = $1 AND not_before <= $2"
        );
        assert_eq!(stmt.args.len(), 2);
    }

    #[test]
    fn insert_returns_the_stored_row() {
        let id = Uuid::new_v4();
        let stmt = insert(NewRow {
            id,
            namespace: "baz".to_string(),
            priority: 3,
            payload: json!({"foo": 1}),
            not_before: now(),
            now: now(),
        });
        assert_eq!(
            stmt.sql,
            "INSERT INTO pgpq_tasks (id, namespace, priority, payload, not_before, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, namespace, priority, payload, not_before, created_at, updated_at, attempts"
        );
        assert_eq!(stmt.args[0], Arg::Id(id));
        assert_eq!(stmt.args[3], Arg::Json(json!({"foo": 1})));
    }

    #[test]
    fn update_writes_editable_fields_and_refreshes_updated_at() {
        let id = Uuid::new_v4();
        let stmt = update(UpdatedRow {
            id,
            namespace: String::new(),
            priority: 9,
            payload: json!({"baz": 3}),
            not_before: now(),
            now: now(),
        });
        assert_eq!(
            stmt.sql,
            "UPDATE pgpq_tasks SET namespace = $1, priority = $2, payload = $3, not_before = $4, \
             updated_at = $5 WHERE id = $6"
        );
        assert_eq!(stmt.args[1], Arg::SmallInt(9));
        assert_eq!(stmt.args[5], Arg::Id(id));
    }

    #[test]
    fn nack_increments_attempts() {
        let id = Uuid::new_v4();
        let stmt = nack(id, now());
        assert_eq!(
            stmt.sql,
            "UPDATE pgpq_tasks SET attempts = attempts + 1, updated_at = $1 WHERE id = $2"
        );
        assert_eq!(stmt.args, vec![Arg::Time(now()), Arg::Id(id)]);
    }

    #[test]
    fn deletes_are_scoped() {
        assert_eq!(done(Uuid::nil()).sql, "DELETE FROM pgpq_tasks WHERE id = $1");
        assert_eq!(truncate("baz").sql, "DELETE FROM pgpq_tasks WHERE namespace = $1");
    }

    #[test]
    fn idle_timeout_is_parameterized() {
        let stmt = idle_in_transaction_timeout(30_000);
        assert_eq!(stmt.args, vec![Arg::Text("30000".to_string())]);
        assert!(stmt.sql.contains("true"));
    }
}
