//! # Audit Ledger
//!
//! Append-only record of who did what, to which resource, when and why.
//!
//! ## Guarantees
//!
//! - Records are never updated or deleted through this crate
//! - Every record carries a ledger-assigned, strictly increasing
//!   `sequenceNumber`
//! - Every record is sealed with a SHA-256 checksum over its canonical fields
//!   ([`AuditRecord::verify_checksum`] detects tampering)
//! - A batch is validated as a whole and persisted atomically
//!
//! ## Layout
//!
//! - [`AuditLedger`]: write path, lookups, filtered queries, statistics
//! - [`AuditStore`]: storage contract ([`PgAuditStore`], [`InMemoryAuditStore`])
//! - [`service::AuditService`]: typed ingest/query surface
//! - [`forwarder::AuditForwarder`]: records dispatcher events in the ledger
//!
//! ## Usage
//!
//! ```rust
//! use audit::{ActorRef, AuditInput, AuditLedger, InMemoryAuditStore, ResourceRef};
//! use event_bus::ActorType;
//!
//! # async fn example() -> Result<(), audit::LedgerError> {
//! let ledger = AuditLedger::new(InMemoryAuditStore::new());
//!
//! let record = ledger
//!     .store(
//!         AuditInput::new(
//!             "booking.cancelled",
//!             ActorRef::new(ActorType::Admin, "admin-7"),
//!             ResourceRef::new("booking", "bk_1"),
//!             "cancelled",
//!             "bookings",
//!         )
//!         .with_reason("duplicate booking"),
//!     )
//!     .await?;
//!
//! assert!(record.verify_checksum());
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod db;
mod error;
pub mod forwarder;
mod ledger;
pub mod query;
mod record;
pub mod service;
pub mod stats;
pub mod store;
pub mod validation;

pub use config::{ConfigError, DbConfig, LedgerConfig};
pub use error::{
    FieldViolation, LedgerError, LedgerResult, RepositoryError, RepositoryErrorKind,
    ValidationError,
};
pub use ledger::AuditLedger;
pub use query::{
    AuditFilter, AuditSort, DateRange, Pagination, PaginationInfo, QueryMeta, QueryResult,
    SortField, SortOrder,
};
pub use record::{
    ActorRef, AuditInput, AuditRecord, FieldDiff, PendingRecord, ResourceRef, RetentionClass,
    StateChange,
};
pub use stats::AuditStatistics;
pub use store::{AuditStore, InMemoryAuditStore, PgAuditStore, RepositoryResult};
