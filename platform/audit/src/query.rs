//! Query filters, pagination and sorting for ledger reads

use chrono::{DateTime, Duration, Utc};
use event_bus::ActorType;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::AuditRecord;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Inclusive time window over the occurrence timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ValidationError> {
        if from > to {
            return Err(ValidationError::single(
                "dateRange",
                format!("start {from} is after end {to}"),
            ));
        }
        Ok(Self { from, to })
    }

    /// Window ending now and covering the previous `days` days
    pub fn last_days(days: u32) -> Self {
        let to = Utc::now();
        Self {
            from: to - Duration::days(i64::from(days)),
            to,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant <= self.to
    }
}

/// Filter predicates for [`crate::AuditLedger::query`]
///
/// Empty sets and `None` values match everything. All predicates combine
/// with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditFilter {
    pub event_types: Vec<String>,
    /// Prefix match on the category (first dot-segment of the event type)
    pub category: Option<String>,
    pub actor_types: Vec<ActorType>,
    pub actor_ids: Vec<String>,
    pub resource_types: Vec<String>,
    pub resource_ids: Vec<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub source_services: Vec<String>,
    /// Case-insensitive substring over description, reason and the scalar
    /// values inside metadata (keys and JSON punctuation are not searched)
    pub search: Option<String>,
}

impl AuditFilter {
    pub fn correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    pub fn resource(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_types: vec![resource_type.into()],
            resource_ids: vec![resource_id.into()],
            ..Self::default()
        }
    }

    pub fn actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_ids: vec![actor_id.into()],
            ..Self::default()
        }
    }

    pub fn within(range: DateRange) -> Self {
        Self {
            date_from: Some(range.from),
            date_to: Some(range.to),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            DateRange::new(from, to)?;
        }
        Ok(())
    }

    /// Evaluate every predicate against a record
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn in_set<T: PartialEq>(set: &[T], value: &T) -> bool {
            set.is_empty() || set.contains(value)
        }

        in_set(&self.event_types, &record.event_type)
            && self
                .category
                .as_deref()
                .map_or(true, |prefix| record.category.starts_with(prefix))
            && in_set(&self.actor_types, &record.actor.actor_type)
            && in_set(&self.actor_ids, &record.actor.id)
            && in_set(&self.resource_types, &record.resource.resource_type)
            && in_set(&self.resource_ids, &record.resource.id)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |c| *c == record.correlation_id)
            && self
                .causation_id
                .as_ref()
                .map_or(true, |c| record.causation_id.as_ref() == Some(c))
            && self.date_from.map_or(true, |from| record.timestamp >= from)
            && self.date_to.map_or(true, |to| record.timestamp <= to)
            && in_set(&self.source_services, &record.source_service)
            && self
                .search
                .as_deref()
                .map_or(true, |needle| text_matches(record, needle))
    }
}

fn text_matches(record: &AuditRecord, needle: &str) -> bool {
    let needle = needle.to_lowercase();

    [record.description.as_deref(), record.reason.as_deref()]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&needle))
        || record.metadata.values().any(|value| scalar_contains(value, &needle))
}

/// Walk a JSON value and test each string, number and boolean leaf
fn scalar_contains(value: &serde_json::Value, needle: &str) -> bool {
    use serde_json::Value;

    match value {
        Value::String(text) => text.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().to_lowercase().contains(needle),
        Value::Bool(b) => b.to_string().contains(needle),
        Value::Null => false,
        Value::Array(items) => items.iter().any(|item| scalar_contains(item, needle)),
        Value::Object(map) => map.values().any(|item| scalar_contains(item, needle)),
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn validate(&self, max_page_size: u32) -> Result<(), ValidationError> {
        if self.page < 1 {
            return Err(ValidationError::single("page", "must be at least 1"));
        }
        if self.page_size < 1 || self.page_size > max_page_size {
            return Err(ValidationError::single(
                "pageSize",
                format!("must be between 1 and {max_page_size}"),
            ));
        }
        Ok(())
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Timestamp,
    SequenceNumber,
    EventType,
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(SortField::Timestamp),
            "sequenceNumber" => Ok(SortField::SequenceNumber),
            "eventType" => Ok(SortField::EventType),
            other => Err(format!("unsupported sort field: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unsupported sort order: {other}")),
        }
    }
}

/// Sort key and direction; ties are broken by sequence number in the same
/// direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl AuditSort {
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    /// Causal order inside a correlation group
    pub fn causal() -> Self {
        Self::new(SortField::SequenceNumber, SortOrder::Asc)
    }

    /// Most recent first
    pub fn recency() -> Self {
        Self::new(SortField::Timestamp, SortOrder::Desc)
    }

    pub fn compare(&self, a: &AuditRecord, b: &AuditRecord) -> std::cmp::Ordering {
        let ordering = match self.field {
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::SequenceNumber => std::cmp::Ordering::Equal,
            SortField::EventType => a.event_type.cmp(&b.event_type),
        }
        .then(a.sequence_number.cmp(&b.sequence_number));

        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// Pagination block returned with every page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PaginationInfo {
    /// `total_pages = ceil(total_items / page_size)`
    pub fn new(pagination: Pagination, total_items: u64) -> Self {
        let page_size = u64::from(pagination.page_size.max(1));
        let total_pages = total_items.div_ceil(page_size);
        let page = u64::from(pagination.page);

        Self {
            page: pagination.page,
            page_size: pagination.page_size,
            total_items,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        }
    }
}

/// Query execution metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
    pub meta: QueryMeta,
}

impl<T> QueryResult<T> {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
