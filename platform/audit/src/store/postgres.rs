//! PostgreSQL implementation of the AuditStore trait
//!
//! Rows live in the `audit_records` table (see `db/migrations`). The table's
//! `sequence_number` is a BIGSERIAL, so ordering comes from the database and
//! survives restarts. A trigger rejects UPDATE statements.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use event_bus::ActorType;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{AuditStore, RepositoryResult};
use crate::error::RepositoryError;
use crate::query::{AuditFilter, AuditSort, DateRange, SortField, SortOrder};
use crate::record::{ActorRef, AuditRecord, PendingRecord, ResourceRef, RetentionClass, StateChange};
use crate::stats::{ActorCount, CategoryCount, DailyCount, EventTypeCount};

const SELECT_COLUMNS: &str = "SELECT id, sequence_number, event_type, category, occurred_at, \
     stored_at, correlation_id, causation_id, actor_type, actor_id, resource_type, resource_id, \
     action, reason, description, source_service, payload, metadata, state_change, \
     retention_class, contains_pii, checksum FROM audit_records";

/// Raw row shape of `audit_records`
#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    sequence_number: i64,
    event_type: String,
    category: String,
    occurred_at: DateTime<Utc>,
    stored_at: DateTime<Utc>,
    correlation_id: String,
    causation_id: Option<String>,
    actor_type: String,
    actor_id: String,
    resource_type: String,
    resource_id: String,
    action: String,
    reason: Option<String>,
    description: Option<String>,
    source_service: String,
    payload: Json<Value>,
    metadata: Json<Map<String, Value>>,
    state_change: Option<Json<StateChange>>,
    retention_class: String,
    contains_pii: bool,
    checksum: String,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = RepositoryError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let actor_type: ActorType = row.actor_type.parse().map_err(RepositoryError::decode)?;
        let retention_class: RetentionClass =
            row.retention_class.parse().map_err(RepositoryError::decode)?;

        Ok(AuditRecord {
            id: row.id,
            sequence_number: row.sequence_number,
            event_type: row.event_type,
            category: row.category,
            timestamp: row.occurred_at,
            stored_at: row.stored_at,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            actor: ActorRef::new(actor_type, row.actor_id),
            resource: ResourceRef::new(row.resource_type, row.resource_id),
            action: row.action,
            reason: row.reason,
            description: row.description,
            source_service: row.source_service,
            payload: row.payload.0,
            metadata: row.metadata.0,
            state_change: row.state_change.map(|j| j.0),
            retention_class,
            contains_pii: row.contains_pii,
            checksum: row.checksum,
        })
    }
}

/// AuditStore on a shared connection pool
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_any(qb: &mut QueryBuilder<'_, Postgres>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    qb.push(" AND ")
        .push(column)
        .push(" = ANY(")
        .push_bind(values.to_vec())
        .push(")");
}

/// Append a WHERE clause equivalent to [`AuditFilter::matches`]
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    qb.push(" WHERE TRUE");

    push_any(qb, "event_type", &filter.event_types);
    if let Some(prefix) = &filter.category {
        qb.push(" AND category LIKE ")
            .push_bind(format!("{}%", escape_like(prefix)));
    }
    let actor_types: Vec<String> = filter
        .actor_types
        .iter()
        .map(|t| t.as_str().to_string())
        .collect();
    push_any(qb, "actor_type", &actor_types);
    push_any(qb, "actor_id", &filter.actor_ids);
    push_any(qb, "resource_type", &filter.resource_types);
    push_any(qb, "resource_id", &filter.resource_ids);
    if let Some(correlation_id) = &filter.correlation_id {
        qb.push(" AND correlation_id = ").push_bind(correlation_id.clone());
    }
    if let Some(causation_id) = &filter.causation_id {
        qb.push(" AND causation_id = ").push_bind(causation_id.clone());
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND occurred_at <= ").push_bind(to);
    }
    push_any(qb, "source_service", &filter.source_services);
    if let Some(needle) = &filter.search {
        let pattern = format!("%{}%", escape_like(needle));
        qb.push(" AND (description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR reason ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR EXISTS (SELECT 1 FROM jsonb_path_query(metadata, 'strict $.**') AS leaf(value)")
            .push(" WHERE jsonb_typeof(leaf.value) IN ('string', 'number', 'boolean')")
            .push(" AND leaf.value #>> '{}' ILIKE ")
            .push_bind(pattern)
            .push("))");
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, sort: AuditSort) {
    let direction = match sort.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    qb.push(" ORDER BY ");
    match sort.field {
        SortField::Timestamp => {
            qb.push("occurred_at ").push(direction).push(", ");
        }
        SortField::EventType => {
            qb.push("event_type COLLATE \"C\" ").push(direction).push(", ");
        }
        SortField::SequenceNumber => {}
    }
    qb.push("sequence_number ").push(direction);
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, rows: Vec<PendingRecord>) -> RepositoryResult<Vec<AuditRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(rows.len());

        for row in rows {
            let (sequence_number, stored_at): (i64, DateTime<Utc>) = sqlx::query_as(
                r#"
                INSERT INTO audit_records (
                    id, event_type, category, occurred_at, correlation_id, causation_id,
                    actor_type, actor_id, resource_type, resource_id, action, reason,
                    description, source_service, payload, metadata, state_change,
                    retention_class, contains_pii, checksum
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
                RETURNING sequence_number, stored_at
                "#,
            )
            .bind(row.id)
            .bind(&row.event_type)
            .bind(&row.category)
            .bind(row.timestamp)
            .bind(&row.correlation_id)
            .bind(&row.causation_id)
            .bind(row.actor.actor_type.as_str())
            .bind(&row.actor.id)
            .bind(&row.resource.resource_type)
            .bind(&row.resource.id)
            .bind(&row.action)
            .bind(&row.reason)
            .bind(&row.description)
            .bind(&row.source_service)
            .bind(Json(&row.payload))
            .bind(Json(&row.metadata))
            .bind(row.state_change.as_ref().map(Json))
            .bind(row.retention_class.as_str())
            .bind(row.contains_pii)
            .bind(&row.checksum)
            .fetch_one(&mut *tx)
            .await?;

            stored.push(row.into_record(sequence_number, stored_at));
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_by_id(&self, id: Uuid) -> RepositoryResult<Option<AuditRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        qb.push(" WHERE id = ").push_bind(id);

        let row = qb.build_query_as::<AuditRow>().fetch_optional(&self.pool).await?;
        row.map(AuditRecord::try_from).transpose()
    }

    async fn fetch_page(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filter(&mut qb, filter);
        push_order(&mut qb, sort);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build_query_as::<AuditRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn count(&self, filter: &AuditFilter) -> RepositoryResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_records");
        push_filter(&mut qb, filter);

        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn count_by_category(&self, range: DateRange) -> RepositoryResult<Vec<CategoryCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*) AS count
            FROM audit_records
            WHERE occurred_at BETWEEN $1 AND $2
            GROUP BY category
            ORDER BY count DESC, category COLLATE "C" ASC
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect())
    }

    async fn daily_counts(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<DailyCount>> {
        let rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT (occurred_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
            FROM audit_records
            WHERE occurred_at BETWEEN $1 AND $2
            GROUP BY day
            ORDER BY day DESC
            LIMIT $3
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut days: Vec<DailyCount> = rows
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();
        days.reverse();
        Ok(days)
    }

    async fn top_event_types(
        &self,
        range: DateRange,
        limit: usize,
    ) -> RepositoryResult<Vec<EventTypeCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM audit_records
            WHERE occurred_at BETWEEN $1 AND $2
            GROUP BY event_type
            ORDER BY count DESC, event_type COLLATE "C" ASC
            LIMIT $3
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(event_type, count)| EventTypeCount { event_type, count })
            .collect())
    }

    async fn top_actors(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<ActorCount>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT actor_id, actor_type, COUNT(*) AS count
            FROM audit_records
            WHERE occurred_at BETWEEN $1 AND $2
            GROUP BY actor_id, actor_type
            ORDER BY count DESC, actor_id COLLATE "C" ASC, actor_type ASC
            LIMIT $3
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(actor_id, actor_type, count)| {
                Ok(ActorCount {
                    actor_id,
                    actor_type: actor_type.parse().map_err(RepositoryError::decode)?,
                    count,
                })
            })
            .collect()
    }
}
