//! Handler capability used by the dispatcher
//!
//! Handlers are async trait objects. Plain closures returning futures are
//! adapted through [`handler_fn`], so a handler that completes immediately and
//! one that awaits a downstream call are treated the same way by the dispatch
//! loop.

use crate::EventEnvelope;
use async_trait::async_trait;
use std::future::Future;

/// Error type handlers may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Receives envelopes delivered by the dispatcher
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), BoxError>;
}

/// Adapter turning a closure into an [`EventHandler`]
///
/// # Example
/// ```rust
/// use event_bus::{handler_fn, BoxError, EventEnvelope};
///
/// let handler = handler_fn(|envelope: EventEnvelope| async move {
///     tracing::info!(event_type = %envelope.event_type, "seen");
///     Ok::<(), BoxError>(())
/// });
/// # let _ = handler;
/// ```
pub struct HandlerFn<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), BoxError> {
        (self.f)(envelope.clone()).await
    }
}

/// Why a single handler invocation failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HandlerError::Timeout { .. })
    }
}
