//! # Event Envelope
//!
//! Platform-wide event envelope for all inter-module communication.
//!
//! ## Envelope Fields
//!
//! - `eventId`: Unique identifier, generated at publish time
//! - `eventType`: Dotted tag identifying the payload schema (e.g. `trip.created`)
//! - `timestamp`: ISO 8601 instant when the envelope was created
//! - `correlationId`: Links all envelopes of one business transaction
//! - `causationId`: Links this envelope to the envelope that caused it
//! - `payload`: Event-specific data (generic type parameter)
//! - `metadata`: Actor attribution (who did it, from where, and why)
//!
//! ## Compliance Rule
//!
//! Every envelope is attributable: `actorId` and `source` are never empty, and
//! an `admin` actor must always state a `reason`. [`validate_metadata`] enforces
//! this before any handler runs. [`validate_event_type`] holds the event type
//! to the dotted-tag shape the audit ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest accepted event type, in characters
pub const MAX_EVENT_TYPE_LEN: usize = 128;

/// Kind of actor responsible for an event.
///
/// Only [`ActorType::Admin`] carries an extra rule: a justification (`reason`)
/// is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Agent,
    Admin,
    System,
    Service,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Agent => "agent",
            ActorType::Admin => "admin",
            ActorType::System => "system",
            ActorType::Service => "service",
        }
    }

    /// Whether actions by this actor must carry a reason.
    pub fn requires_reason(&self) -> bool {
        matches!(self, ActorType::Admin)
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "agent" => Ok(ActorType::Agent),
            "admin" => Ok(ActorType::Admin),
            "system" => Ok(ActorType::System),
            "service" => Ok(ActorType::Service),
            other => Err(format!("unknown actor type: {other}")),
        }
    }
}

/// Actor attribution attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub actor_id: String,
    pub actor_type: ActorType,
    /// Name of the emitting module (e.g. "bookings", "identity")
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventMetadata {
    pub fn new(actor_id: impl Into<String>, actor_type: ActorType, source: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_type,
            source: source.into(),
            reason: None,
        }
    }

    /// Set the justification for the action
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Compliance violations detected before delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventValidationError {
    #[error("eventType cannot be empty")]
    EmptyEventType,

    #[error("eventType must be at most {max} characters")]
    EventTypeTooLong { max: usize },

    #[error("eventType must be a dotted tag like 'trip.created', got '{0}'")]
    MalformedEventType(String),

    #[error("metadata.actorId cannot be empty")]
    EmptyActorId,

    #[error("metadata.source cannot be empty")]
    EmptySource,

    #[error("metadata.reason is required when actorType is {0}")]
    MissingReason(ActorType),
}

/// Validate an event type tag.
///
/// One or more dot-separated segments, each made of ASCII letters, digits,
/// `_` or `-`, at most [`MAX_EVENT_TYPE_LEN`] characters overall.
pub fn validate_event_type(event_type: &str) -> Result<(), EventValidationError> {
    if event_type.trim().is_empty() {
        return Err(EventValidationError::EmptyEventType);
    }
    if event_type.chars().count() > MAX_EVENT_TYPE_LEN {
        return Err(EventValidationError::EventTypeTooLong {
            max: MAX_EVENT_TYPE_LEN,
        });
    }

    let well_formed = event_type.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if !well_formed {
        return Err(EventValidationError::MalformedEventType(event_type.to_string()));
    }
    Ok(())
}

/// Validate actor attribution.
///
/// # Validation Rules
///
/// - `actor_id`: Must be non-empty (whitespace-only counts as empty)
/// - `source`: Must be non-empty
/// - `reason`: Must be present and non-empty for admin actors
pub fn validate_metadata(metadata: &EventMetadata) -> Result<(), EventValidationError> {
    if metadata.actor_id.trim().is_empty() {
        return Err(EventValidationError::EmptyActorId);
    }

    if metadata.source.trim().is_empty() {
        return Err(EventValidationError::EmptySource);
    }

    if metadata.actor_type.requires_reason() {
        let has_reason = metadata
            .reason
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false);
        if !has_reason {
            return Err(EventValidationError::MissingReason(metadata.actor_type));
        }
    }

    Ok(())
}

/// Standard event envelope
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type. The dispatcher itself works with
///   opaque JSON payloads (the default).
///
/// # Examples
///
/// ```rust
/// use event_bus::{ActorType, EventEnvelope, EventMetadata};
/// use serde_json::json;
///
/// let envelope = EventEnvelope::new(
///     "trip.created",
///     json!({"tripId": "trip_123"}),
///     EventMetadata::new("user-42", ActorType::User, "itineraries"),
/// )
/// .with_causation_id(Some("evt-previous".to_string()));
///
/// assert_eq!(envelope.category(), "trip");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T = serde_json::Value> {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub payload: T,
    pub metadata: EventMetadata,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a generated event id, the current instant,
    /// and a fresh correlation id.
    pub fn new(event_type: impl Into<String>, payload: T, metadata: EventMetadata) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload,
            metadata,
        }
    }

    /// Join an existing correlation group. `None` keeps the generated id.
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        if let Some(id) = correlation_id {
            self.correlation_id = id;
        }
        self
    }

    /// Set the causation ID
    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }

    /// First dot-segment of the event type (`trip.created` -> `trip`)
    pub fn category(&self) -> &str {
        event_category(&self.event_type)
    }

    /// Check the envelope's event type and actor attribution
    pub fn validate(&self) -> Result<(), EventValidationError> {
        validate_event_type(&self.event_type)?;
        validate_metadata(&self.metadata)
    }
}

/// First dot-segment of a dotted event type.
pub fn event_category(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_metadata() -> EventMetadata {
        EventMetadata::new("user-1", ActorType::User, "bookings")
    }

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new("booking.confirmed", json!({"id": 1}), user_metadata());

        assert_eq!(envelope.event_type, "booking.confirmed");
        assert!(!envelope.correlation_id.is_empty());
        assert!(envelope.causation_id.is_none());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_correlation_defaults_to_fresh_id() {
        let a = EventEnvelope::new("x.a", json!({}), user_metadata());
        let b = EventEnvelope::new("x.a", json!({}), user_metadata()).with_correlation_id(None);

        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(Uuid::parse_str(&b.correlation_id).is_ok());
    }

    #[test]
    fn test_envelope_with_builder() {
        let envelope = EventEnvelope::new("dispute.opened", json!({}), user_metadata())
            .with_correlation_id(Some("corr-456".to_string()))
            .with_causation_id(Some("cause-789".to_string()));

        assert_eq!(envelope.correlation_id, "corr-456");
        assert_eq!(envelope.causation_id.as_deref(), Some("cause-789"));
    }

    #[test]
    fn test_category() {
        assert_eq!(event_category("trip.created"), "trip");
        assert_eq!(event_category("trip.leg.updated"), "trip");
        assert_eq!(event_category("heartbeat"), "heartbeat");
    }

    #[test]
    fn test_admin_requires_reason() {
        let metadata = EventMetadata::new("admin-1", ActorType::Admin, "support");
        assert_eq!(
            validate_metadata(&metadata),
            Err(EventValidationError::MissingReason(ActorType::Admin))
        );

        let blank = metadata.clone().with_reason("   ");
        assert!(validate_metadata(&blank).is_err());

        let justified = metadata.with_reason("customer escalation #881");
        assert!(validate_metadata(&justified).is_ok());
    }

    #[test]
    fn test_empty_actor_and_source_rejected() {
        let no_actor = EventMetadata::new("", ActorType::System, "scheduler");
        assert_eq!(validate_metadata(&no_actor), Err(EventValidationError::EmptyActorId));

        let no_source = EventMetadata::new("svc-1", ActorType::Service, " ");
        assert_eq!(validate_metadata(&no_source), Err(EventValidationError::EmptySource));
    }

    #[test]
    fn test_event_type_must_be_dotted_tag() {
        for good in ["heartbeat", "trip.created", "trip.leg_2.re-routed"] {
            assert_eq!(validate_event_type(good), Ok(()), "{good} should be accepted");
        }
        assert_eq!(validate_event_type("  "), Err(EventValidationError::EmptyEventType));
        for bad in ["Trip Created", "trip.", ".created", "trip..created", "trip/created"] {
            assert_eq!(
                validate_event_type(bad),
                Err(EventValidationError::MalformedEventType(bad.to_string()))
            );
        }

        let long = format!("trip.{}", "a".repeat(MAX_EVENT_TYPE_LEN));
        assert_eq!(
            validate_event_type(&long),
            Err(EventValidationError::EventTypeTooLong { max: MAX_EVENT_TYPE_LEN })
        );

        let envelope = EventEnvelope::new("Trip Created", json!({}), user_metadata());
        assert!(matches!(
            envelope.validate(),
            Err(EventValidationError::MalformedEventType(_))
        ));
    }

    #[test]
    fn test_only_admin_needs_reason() {
        for actor_type in [ActorType::User, ActorType::Agent, ActorType::System, ActorType::Service] {
            let metadata = EventMetadata::new("a-1", actor_type, "src");
            assert!(validate_metadata(&metadata).is_ok(), "{actor_type} should not need a reason");
        }
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let envelope = EventEnvelope::new(
            "trip.created",
            json!({"tripId": "t1"}),
            EventMetadata::new("admin-1", ActorType::Admin, "ops").with_reason("fix"),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(value.get("eventId").is_some());
        assert!(value.get("eventType").is_some());
        assert!(value.get("correlationId").is_some());
        assert!(value.get("causationId").is_none());
        assert_eq!(value["metadata"]["actorType"], "admin");
        assert_eq!(value["metadata"]["actorId"], "admin-1");
    }

    #[test]
    fn test_actor_type_round_trip_from_str() {
        assert_eq!("service".parse::<ActorType>(), Ok(ActorType::Service));
        assert!("robot".parse::<ActorType>().is_err());
    }
}
