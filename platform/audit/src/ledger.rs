//! Append-only audit ledger
//!
//! The ledger owns the write path: it normalizes and validates inputs, seals
//! each record with its checksum, and hands the batch to an [`AuditStore`]
//! that persists it atomically. There is no update or delete operation.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{LedgerResult, ValidationError};
use crate::query::{AuditFilter, AuditSort, DateRange, Pagination, PaginationInfo, QueryMeta, QueryResult};
use crate::record::{AuditInput, AuditRecord, PendingRecord};
use crate::stats::{AuditStatistics, DAILY_BUCKETS, TOP_N};
use crate::store::AuditStore;
use crate::validation::{validate_batch, validate_input};

pub struct AuditLedger<S> {
    store: S,
    config: LedgerConfig,
}

fn meta_since(executed_at: DateTime<Utc>, started: Instant) -> QueryMeta {
    QueryMeta {
        executed_at,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

impl<S: AuditStore> AuditLedger<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store_backend(&self) -> &S {
        &self.store
    }

    /// First page at the configured default size
    pub fn default_pagination(&self) -> Pagination {
        Pagination::new(1, self.config.default_page_size)
    }

    /// Validate, seal and persist one record
    pub async fn store(&self, input: AuditInput) -> LedgerResult<AuditRecord> {
        validate_input(&input)?;

        let pending = PendingRecord::from_input(input, Utc::now());
        let mut stored = self.store.append(vec![pending]).await?;
        let record = stored.pop().ok_or_else(|| {
            crate::error::RepositoryError::decode("store returned no row for a single append")
        })?;

        debug!(
            record_id = %record.id,
            sequence_number = record.sequence_number,
            event_type = %record.event_type,
            "Audit record stored"
        );
        Ok(record)
    }

    /// Validate every input, then persist all of them in one atomic unit
    ///
    /// A single invalid element rejects the whole batch and nothing is
    /// written. Violations carry the index of the offending element.
    pub async fn store_batch(&self, inputs: Vec<AuditInput>) -> LedgerResult<Vec<AuditRecord>> {
        if inputs.is_empty() {
            return Err(ValidationError::single("records", "batch cannot be empty").into());
        }
        if inputs.len() > self.config.max_batch_size {
            return Err(ValidationError::single(
                "records",
                format!(
                    "batch of {} exceeds the maximum of {}",
                    inputs.len(),
                    self.config.max_batch_size
                ),
            )
            .into());
        }

        if let Err(err) = validate_batch(&inputs) {
            warn!(
                batch_size = inputs.len(),
                violations = err.violations.len(),
                "Rejected audit batch"
            );
            return Err(err.into());
        }

        let now = Utc::now();
        let pending: Vec<PendingRecord> = inputs
            .into_iter()
            .map(|input| PendingRecord::from_input(input, now))
            .collect();
        let stored = self.store.append(pending).await?;

        info!(
            batch_size = stored.len(),
            first_sequence = stored.first().map(|r| r.sequence_number),
            last_sequence = stored.last().map(|r| r.sequence_number),
            "Audit batch stored"
        );
        Ok(stored)
    }

    pub async fn find_by_id(&self, id: Uuid) -> LedgerResult<Option<AuditRecord>> {
        Ok(self.store.fetch_by_id(id).await?)
    }

    /// Records of one business transaction, in causal (sequence) order
    pub async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
        pagination: Pagination,
    ) -> LedgerResult<QueryResult<AuditRecord>> {
        self.query(AuditFilter::correlation(correlation_id), pagination, AuditSort::causal())
            .await
    }

    /// History of one resource, most recent first
    pub async fn find_by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        pagination: Pagination,
    ) -> LedgerResult<QueryResult<AuditRecord>> {
        self.query(
            AuditFilter::resource(resource_type, resource_id),
            pagination,
            AuditSort::recency(),
        )
        .await
    }

    /// Everything one actor did, most recent first
    pub async fn find_by_actor(
        &self,
        actor_id: &str,
        pagination: Pagination,
    ) -> LedgerResult<QueryResult<AuditRecord>> {
        self.query(AuditFilter::actor(actor_id), pagination, AuditSort::recency())
            .await
    }

    /// Filtered, sorted, paginated search
    pub async fn query(
        &self,
        filter: AuditFilter,
        pagination: Pagination,
        sort: AuditSort,
    ) -> LedgerResult<QueryResult<AuditRecord>> {
        pagination.validate(self.config.max_page_size)?;
        filter.validate()?;

        let executed_at = Utc::now();
        let started = Instant::now();

        let total = self.store.count(&filter).await?;
        let data = if total > pagination.offset() {
            self.store
                .fetch_page(&filter, sort, pagination.limit(), pagination.offset())
                .await?
        } else {
            Vec::new()
        };

        let meta = meta_since(executed_at, started);
        debug!(
            total_items = total,
            returned = data.len(),
            duration_ms = meta.duration_ms,
            "Audit query executed"
        );

        Ok(QueryResult {
            data,
            pagination: PaginationInfo::new(pagination, u64::try_from(total).unwrap_or(0)),
            meta,
        })
    }

    /// Compliance report over `range` (default: the configured trailing window)
    ///
    /// The five aggregations run concurrently; if any of them fails the whole
    /// call fails.
    pub async fn get_statistics(&self, range: Option<DateRange>) -> LedgerResult<AuditStatistics> {
        let range = range.unwrap_or_else(|| DateRange::last_days(self.config.stats_window_days));
        let executed_at = Utc::now();
        let started = Instant::now();
        let window = AuditFilter::within(range);

        let (total_events, events_by_category, daily_series, top_event_types, top_actors) = tokio::try_join!(
            self.store.count(&window),
            self.store.count_by_category(range),
            self.store.daily_counts(range, DAILY_BUCKETS),
            self.store.top_event_types(range, TOP_N),
            self.store.top_actors(range, TOP_N),
        )?;

        Ok(AuditStatistics {
            date_range: range,
            total_events,
            events_by_category,
            daily_series,
            top_event_types,
            top_actors,
            meta: meta_since(executed_at, started),
        })
    }

    /// Recompute a record's checksum and compare it with the stored one
    pub fn verify(&self, record: &AuditRecord) -> bool {
        let intact = record.verify_checksum();
        if !intact {
            warn!(
                record_id = %record.id,
                sequence_number = record.sequence_number,
                "Audit record checksum mismatch"
            );
        }
        intact
    }
}
