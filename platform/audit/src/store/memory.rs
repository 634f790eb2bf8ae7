//! In-memory implementation of the AuditStore trait for testing and development

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{AuditStore, RepositoryResult};
use crate::error::{RepositoryError, RepositoryErrorKind};
use crate::query::{AuditFilter, AuditSort, DateRange};
use crate::record::{AuditRecord, PendingRecord};
use crate::stats::{ActorCount, CategoryCount, DailyCount, EventTypeCount};
use event_bus::ActorType;

#[derive(Default)]
struct Rows {
    records: Vec<AuditRecord>,
    last_sequence: i64,
}

/// AuditStore backed by a vector
///
/// Suitable for unit tests and local development. A single lock guards both
/// the rows and the sequence counter, so appends are atomic and sequence
/// numbers follow write order.
#[derive(Default)]
pub struct InMemoryAuditStore {
    rows: RwLock<Rows>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn in_range(range: DateRange) -> AuditFilter {
        AuditFilter::within(range)
    }

    fn matching(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.rows
            .read()
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }
}

/// Sort `(key, count)` pairs by count descending, then key ascending
fn rank<K: Ord>(counts: HashMap<K, i64>, limit: Option<usize>) -> Vec<(K, i64)> {
    let mut ranked: Vec<(K, i64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, rows: Vec<PendingRecord>) -> RepositoryResult<Vec<AuditRecord>> {
        let mut guard = self.rows.write();

        // Check everything before touching state so a rejected batch leaves no trace
        let mut seen: HashSet<Uuid> = guard.records.iter().map(|r| r.id).collect();
        for row in &rows {
            if !seen.insert(row.id) {
                return Err(RepositoryError::new(
                    RepositoryErrorKind::Constraint,
                    format!("duplicate audit record id {}", row.id),
                ));
            }
        }

        let stored_at = Utc::now();
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            guard.last_sequence += 1;
            let record = row.into_record(guard.last_sequence, stored_at);
            guard.records.push(record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    async fn fetch_by_id(&self, id: Uuid) -> RepositoryResult<Option<AuditRecord>> {
        Ok(self.rows.read().records.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_page(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        let mut records = self.matching(filter);
        records.sort_by(|a, b| sort.compare(a, b));

        Ok(records
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn count(&self, filter: &AuditFilter) -> RepositoryResult<i64> {
        let rows = self.rows.read();
        Ok(rows.records.iter().filter(|r| filter.matches(r)).count() as i64)
    }

    async fn count_by_category(&self, range: DateRange) -> RepositoryResult<Vec<CategoryCount>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for record in self.matching(&Self::in_range(range)) {
            *counts.entry(record.category).or_default() += 1;
        }
        Ok(rank(counts, None)
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect())
    }

    async fn daily_counts(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<DailyCount>> {
        let mut counts: HashMap<NaiveDate, i64> = HashMap::new();
        for record in self.matching(&Self::in_range(range)) {
            *counts.entry(record.timestamp.date_naive()).or_default() += 1;
        }

        let mut days: Vec<DailyCount> = counts
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));
        days.truncate(limit);
        days.reverse();
        Ok(days)
    }

    async fn top_event_types(
        &self,
        range: DateRange,
        limit: usize,
    ) -> RepositoryResult<Vec<EventTypeCount>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for record in self.matching(&Self::in_range(range)) {
            *counts.entry(record.event_type).or_default() += 1;
        }
        Ok(rank(counts, Some(limit))
            .into_iter()
            .map(|(event_type, count)| EventTypeCount { event_type, count })
            .collect())
    }

    async fn top_actors(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<ActorCount>> {
        let mut counts: HashMap<(String, ActorType), i64> = HashMap::new();
        for record in self.matching(&Self::in_range(range)) {
            *counts
                .entry((record.actor.id, record.actor.actor_type))
                .or_default() += 1;
        }

        Ok(rank(counts, Some(limit))
            .into_iter()
            .map(|((actor_id, actor_type), count)| ActorCount {
                actor_id,
                actor_type,
                count,
            })
            .collect())
    }
}
