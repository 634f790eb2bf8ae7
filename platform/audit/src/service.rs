//! Ingest and query surface of the ledger
//!
//! Typed request/response shapes for the audit endpoints. Transport (routing,
//! authentication) lives outside this crate; a web layer only has to map
//! [`IngestError::status_code`] onto its response type.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FieldViolation, LedgerError, RepositoryError, ValidationError};
use crate::ledger::AuditLedger;
use crate::query::{AuditFilter, AuditSort, DateRange, Pagination, QueryResult, SortField, SortOrder};
use crate::record::{AuditInput, AuditRecord};
use crate::stats::AuditStatistics;
use crate::store::AuditStore;
use event_bus::ActorType;

/// Acknowledgement returned for every stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub id: Uuid,
    pub sequence_number: i64,
    pub stored_at: DateTime<Utc>,
}

impl From<&AuditRecord> for IngestReceipt {
    fn from(record: &AuditRecord) -> Self {
        Self {
            id: record.id,
            sequence_number: record.sequence_number,
            stored_at: record.stored_at,
        }
    }
}

/// Structured validation failure body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrorBody {
    pub error: &'static str,
    pub message: String,
    /// One entry per violated field; batch entries carry their index
    pub details: Vec<FieldViolation>,
}

impl From<ValidationError> for ValidationErrorBody {
    fn from(err: ValidationError) -> Self {
        Self {
            error: "validation_error",
            message: err.to_string(),
            details: err.violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("{}", .0.message)]
    Validation(ValidationErrorBody),

    #[error("batch cannot be empty")]
    EmptyBatch,

    #[error("batch of {size} records exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("audit record {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl IngestError {
    /// HTTP status a web layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::Validation(_) | IngestError::EmptyBatch => 400,
            IngestError::NotFound(_) => 404,
            IngestError::BatchTooLarge { .. } => 413,
            IngestError::Repository(e) if e.is_transient() => 503,
            IngestError::Repository(_) => 500,
        }
    }
}

impl From<LedgerError> for IngestError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(v) => IngestError::Validation(v.into()),
            LedgerError::Repository(r) => IngestError::Repository(r),
        }
    }
}

impl From<ValidationError> for IngestError {
    fn from(err: ValidationError) -> Self {
        IngestError::Validation(err.into())
    }
}

/// Raw search parameters, as received in a query string
///
/// Set-valued parameters are comma-separated; dates are RFC 3339.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    pub event_types: Option<String>,
    pub category: Option<String>,
    pub actor_types: Option<String>,
    pub actor_ids: Option<String>,
    pub resource_types: Option<String>,
    pub resource_ids: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub source_services: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn split_set(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn non_blank(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl QueryParams {
    /// Parse into filter, pagination and sort, reporting every bad parameter
    pub fn parse(&self, default_page_size: u32) -> Result<(AuditFilter, Pagination, AuditSort), ValidationError> {
        let mut violations = Vec::new();

        fn parse_value<T: FromStr>(
            field: &str,
            raw: Option<&str>,
            violations: &mut Vec<FieldViolation>,
        ) -> Option<T>
        where
            T::Err: std::fmt::Display,
        {
            let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(e) => {
                    violations.push(FieldViolation::new(field, format!("'{raw}': {e}")));
                    None
                }
            }
        }

        let actor_types: Vec<ActorType> = split_set(&self.actor_types)
            .iter()
            .filter_map(|t| parse_value("actorTypes", Some(t.as_str()), &mut violations))
            .collect();
        let date_from: Option<DateTime<Utc>> =
            parse_value("dateFrom", self.date_from.as_deref(), &mut violations);
        let date_to: Option<DateTime<Utc>> =
            parse_value("dateTo", self.date_to.as_deref(), &mut violations);
        let field: SortField =
            parse_value("sortBy", self.sort_by.as_deref(), &mut violations).unwrap_or_default();
        let order: SortOrder =
            parse_value("sortOrder", self.sort_order.as_deref(), &mut violations).unwrap_or_default();
        let page: u32 = parse_value("page", self.page.as_deref(), &mut violations).unwrap_or(1);
        let page_size: u32 = parse_value("pageSize", self.page_size.as_deref(), &mut violations)
            .unwrap_or(default_page_size);

        if !violations.is_empty() {
            return Err(ValidationError::new(violations));
        }

        let filter = AuditFilter {
            event_types: split_set(&self.event_types),
            category: non_blank(&self.category),
            actor_types,
            actor_ids: split_set(&self.actor_ids),
            resource_types: split_set(&self.resource_types),
            resource_ids: split_set(&self.resource_ids),
            correlation_id: non_blank(&self.correlation_id),
            causation_id: non_blank(&self.causation_id),
            date_from,
            date_to,
            source_services: split_set(&self.source_services),
            search: non_blank(&self.search),
        };

        Ok((filter, Pagination::new(page, page_size), AuditSort::new(field, order)))
    }
}

/// Request-level facade over an [`AuditLedger`]
pub struct AuditService<S> {
    ledger: Arc<AuditLedger<S>>,
}

impl<S> Clone for AuditService<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<S: AuditStore> AuditService<S> {
    pub fn new(ledger: Arc<AuditLedger<S>>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &AuditLedger<S> {
        &self.ledger
    }

    pub async fn ingest(&self, input: AuditInput) -> Result<IngestReceipt, IngestError> {
        let record = self.ledger.store(input).await?;
        Ok(IngestReceipt::from(&record))
    }

    pub async fn ingest_batch(&self, inputs: Vec<AuditInput>) -> Result<Vec<IngestReceipt>, IngestError> {
        let max = self.ledger.config().max_batch_size;
        if inputs.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        if inputs.len() > max {
            return Err(IngestError::BatchTooLarge {
                size: inputs.len(),
                max,
            });
        }

        let records = self.ledger.store_batch(inputs).await?;
        Ok(records.iter().map(IngestReceipt::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<AuditRecord, IngestError> {
        self.ledger
            .find_by_id(id)
            .await?
            .ok_or(IngestError::NotFound(id))
    }

    pub async fn by_correlation(
        &self,
        correlation_id: &str,
        pagination: Option<Pagination>,
    ) -> Result<QueryResult<AuditRecord>, IngestError> {
        let pagination = pagination.unwrap_or_else(|| self.ledger.default_pagination());
        Ok(self.ledger.find_by_correlation_id(correlation_id, pagination).await?)
    }

    pub async fn by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        pagination: Option<Pagination>,
    ) -> Result<QueryResult<AuditRecord>, IngestError> {
        let pagination = pagination.unwrap_or_else(|| self.ledger.default_pagination());
        Ok(self
            .ledger
            .find_by_resource(resource_type, resource_id, pagination)
            .await?)
    }

    pub async fn by_actor(
        &self,
        actor_id: &str,
        pagination: Option<Pagination>,
    ) -> Result<QueryResult<AuditRecord>, IngestError> {
        let pagination = pagination.unwrap_or_else(|| self.ledger.default_pagination());
        Ok(self.ledger.find_by_actor(actor_id, pagination).await?)
    }

    pub async fn search(&self, params: &QueryParams) -> Result<QueryResult<AuditRecord>, IngestError> {
        let (filter, pagination, sort) = params.parse(self.ledger.config().default_page_size)?;
        Ok(self.ledger.query(filter, pagination, sort).await?)
    }

    /// Statistics over `[from, to]`
    ///
    /// A missing `to` means now; a missing `from` means the configured window
    /// before `to`. With neither, the ledger default applies.
    pub async fn statistics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AuditStatistics, IngestError> {
        let range = match (from, to) {
            (None, None) => None,
            (from, to) => {
                let to = to.unwrap_or_else(Utc::now);
                let window = Duration::days(i64::from(self.ledger.config().stats_window_days));
                Some(DateRange::new(from.unwrap_or(to - window), to)?)
            }
        };
        Ok(self.ledger.get_statistics(range).await?)
    }
}
