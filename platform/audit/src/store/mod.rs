//! Row-mapping contract between the ledger and its backing store
//!
//! The ledger never talks to a database directly. It hands normalized
//! [`PendingRecord`]s to an [`AuditStore`] and reads [`AuditRecord`]s back.
//! The contract has no update or delete operation.
//!
//! ## Implementations
//!
//! - **PgAuditStore**: Production implementation on PostgreSQL (sqlx)
//! - **InMemoryAuditStore**: Test/dev implementation

mod memory;
mod postgres;

pub use memory::InMemoryAuditStore;
pub use postgres::PgAuditStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::query::{AuditFilter, AuditSort, DateRange};
use crate::record::{AuditRecord, PendingRecord};
use crate::stats::{ActorCount, CategoryCount, DailyCount, EventTypeCount};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist all rows in one atomic unit
    ///
    /// Either every row is written (each receiving a strictly increasing
    /// sequence number and a `stored_at` instant) or none is. Returned
    /// records are in input order.
    async fn append(&self, rows: Vec<PendingRecord>) -> RepositoryResult<Vec<AuditRecord>>;

    async fn fetch_by_id(&self, id: Uuid) -> RepositoryResult<Option<AuditRecord>>;

    async fn fetch_page(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<AuditRecord>>;

    async fn count(&self, filter: &AuditFilter) -> RepositoryResult<i64>;

    /// Descending by count, then category name
    async fn count_by_category(&self, range: DateRange) -> RepositoryResult<Vec<CategoryCount>>;

    /// Most recent `limit` UTC days with activity, ascending by date
    async fn daily_counts(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<DailyCount>>;

    /// Descending by count, then event type
    async fn top_event_types(
        &self,
        range: DateRange,
        limit: usize,
    ) -> RepositoryResult<Vec<EventTypeCount>>;

    /// Descending by count, then actor id
    async fn top_actors(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<ActorCount>>;
}
