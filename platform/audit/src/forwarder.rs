//! Dispatcher bridge: records every delivered envelope in the ledger
//!
//! [`AuditForwarder`] is an [`EventHandler`]; subscribe it as a wildcard
//! handler and every attributed event becomes an audit record whose `id` is
//! the envelope's `eventId`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LedgerError, RepositoryErrorKind};
use crate::ledger::AuditLedger;
use crate::record::{ActorRef, AuditInput, ResourceRef, RetentionClass, StateChange};
use crate::store::AuditStore;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{
    BoxError, DispatchResult, EventDispatcher, EventEnvelope, EventHandler, SubscribeOptions,
    Subscription,
};

/// Subscription id used by [`AuditForwarder::attach`]
pub const FORWARDER_HANDLER_ID: &str = "audit-ledger";

pub struct AuditForwarder<S> {
    ledger: Arc<AuditLedger<S>>,
    retry: RetryConfig,
}

impl<S: AuditStore + 'static> AuditForwarder<S> {
    pub fn new(ledger: Arc<AuditLedger<S>>) -> Self {
        Self {
            ledger,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribe to every event type on `dispatcher`
    ///
    /// Runs after all default-priority handlers and never stops delivery to
    /// handlers behind it.
    pub fn attach(self, dispatcher: &EventDispatcher) -> DispatchResult<Subscription> {
        dispatcher.subscribe_all(
            self,
            SubscribeOptions::default()
                .with_priority(i32::MAX)
                .with_handler_id(FORWARDER_HANDLER_ID),
        )
    }

    async fn already_recorded(&self, envelope: &EventEnvelope) -> bool {
        matches!(self.ledger.find_by_id(envelope.event_id).await, Ok(Some(_)))
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn payload_id(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map an envelope onto a ledger submission
///
/// - resource: payload `resourceType`/`resourceId`, else the event category
///   and payload `id` (else the event id)
/// - action: last dot-segment of the event type
/// - `description`, `stateChange`, `containsPii`, `retentionClass`: taken
///   from the payload when present and well-formed
pub fn envelope_to_input(envelope: &EventEnvelope) -> AuditInput {
    let payload = &envelope.payload;

    let resource_type = payload_str(payload, "resourceType")
        .map(str::to_string)
        .unwrap_or_else(|| envelope.category().to_string());
    let resource_id = payload_id(payload, "resourceId")
        .or_else(|| payload_id(payload, "id"))
        .unwrap_or_else(|| envelope.event_id.to_string());
    let action = envelope
        .event_type
        .rsplit('.')
        .next()
        .unwrap_or(&envelope.event_type);

    let mut input = AuditInput::new(
        envelope.event_type.clone(),
        ActorRef::new(envelope.metadata.actor_type, envelope.metadata.actor_id.clone()),
        ResourceRef::new(resource_type, resource_id),
        action,
        envelope.metadata.source.clone(),
    )
    .with_id(envelope.event_id)
    .with_timestamp(envelope.timestamp)
    .with_correlation_id(envelope.correlation_id.clone())
    .with_payload(payload.clone());

    if let Some(causation_id) = &envelope.causation_id {
        input = input.with_causation_id(causation_id.clone());
    }
    if let Some(reason) = &envelope.metadata.reason {
        input = input.with_reason(reason.clone());
    }
    if let Some(description) = payload_str(payload, "description") {
        input = input.with_description(description);
    }
    if let Some(change) = payload
        .get("stateChange")
        .and_then(|v| serde_json::from_value::<StateChange>(v.clone()).ok())
    {
        input = input.with_state_change(change);
    }
    if let Some(pii) = payload.get("containsPii").and_then(Value::as_bool) {
        input = input.with_pii(pii);
    }
    if let Some(class) = payload_str(payload, "retentionClass").and_then(|s| s.parse::<RetentionClass>().ok()) {
        input = input.with_retention(class);
    }
    input
}

#[async_trait]
impl<S: AuditStore + 'static> EventHandler for AuditForwarder<S> {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), BoxError> {
        let input = envelope_to_input(envelope);
        let ledger = &self.ledger;

        let result = retry_with_backoff(
            || {
                let input = input.clone();
                async move { ledger.store(input).await }
            },
            &self.retry,
            "audit_forward",
            LedgerError::is_transient,
        )
        .await;

        let err = match result {
            Ok(record) => {
                debug!(
                    event_id = %envelope.event_id,
                    sequence_number = record.sequence_number,
                    "Envelope recorded in audit ledger"
                );
                return Ok(());
            }
            Err(err) => err,
        };

        // Redelivery of an envelope that is already in the ledger
        let duplicate = matches!(&err, LedgerError::Repository(e) if e.kind == RepositoryErrorKind::Constraint);
        if duplicate && self.already_recorded(envelope).await {
            debug!(event_id = %envelope.event_id, "Envelope already recorded");
            return Ok(());
        }

        warn!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            error = %err,
            "Failed to record envelope in audit ledger"
        );
        Err(err.into())
    }
}
