//! # Event Dispatcher
//!
//! Platform-level in-process publish/subscribe core. Modules communicate only
//! through typed, attributed [`EventEnvelope`]s; they never call each other
//! directly.
//!
//! ## Guarantees
//!
//! - Every envelope is attributable: empty `actorId`/`source`, or an `admin`
//!   actor without a `reason`, is rejected before any handler runs
//! - Handlers run in ascending priority, ties in registration order
//! - One broken handler never breaks the producer: failures, panics and
//!   timeouts are collected into a [`PublishResult`]
//! - After [`EventDispatcher::dispose`], every subscribe/publish fails with
//!   [`DispatchError::Disposed`]
//!
//! ## Implementations
//!
//! - **EventDispatcher**: single-process implementation in this crate
//! - Queue-backed delivery lives outside this crate behind [`EventPublisher`]
//!
//! ## Usage
//!
//! ```rust
//! use event_bus::{handler_fn, ActorType, BoxError, EventDispatcher, EventEnvelope,
//!     EventMetadata, PublishOptions, SubscribeOptions};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = EventDispatcher::new();
//!
//! // Observe everything
//! dispatcher.subscribe_all(
//!     handler_fn(|envelope: EventEnvelope| async move {
//!         tracing::info!(event_type = %envelope.event_type, "observed");
//!         Ok::<(), BoxError>(())
//!     }),
//!     SubscribeOptions::default(),
//! )?;
//!
//! // Admin actions must be justified
//! let metadata = EventMetadata::new("admin-7", ActorType::Admin, "support-console")
//!     .with_reason("refund approved after dispute review");
//! dispatcher
//!     .publish("booking.refunded", json!({"bookingId": "bk_1"}), metadata, PublishOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer_retry;
mod dispatcher;
mod envelope;
mod handler;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{
    EventDispatcher, HandlerFailure, PublishOptions, PublishResult, SubscribeOptions, Subscription,
    DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_PRIORITY, WILDCARD,
};
pub use envelope::{
    event_category, validate_event_type, validate_metadata, ActorType, EventEnvelope,
    EventMetadata, EventValidationError, MAX_EVENT_TYPE_LEN,
};
pub use handler::{handler_fn, BoxError, EventHandler, HandlerError, HandlerFn};

use async_trait::async_trait;
use std::fmt;

/// Errors that prevent an envelope from being delivered at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("event validation failed: {0}")]
    Validation(#[from] EventValidationError),

    #[error("event dispatcher has been disposed")]
    Disposed,
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Publish contract shared by every delivery implementation
///
/// Producers that only need to emit events should depend on this trait rather
/// than on a concrete dispatcher, so a queue-backed implementation can be
/// swapped in without touching them.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver a fully formed envelope
    ///
    /// # Returns
    /// * `Ok(PublishResult)` once delivery was attempted (handler failures
    ///   are reported inside the result)
    /// * `Err(DispatchError)` if the envelope was rejected or the publisher
    ///   is shut down
    async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
        options: PublishOptions,
    ) -> DispatchResult<PublishResult>;
}

impl fmt::Debug for dyn EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventPublisher")
    }
}
