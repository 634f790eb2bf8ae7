//! Validation of audit inputs against the record shape
//!
//! All rules are checked and every violation is reported, so a batch caller
//! gets the full list of problems per element in one round trip.

use crate::error::{FieldViolation, ValidationError};
use crate::record::AuditInput;
use event_bus::{validate_event_type, EventValidationError};

pub use event_bus::MAX_EVENT_TYPE_LEN;
pub const MAX_IDENTIFIER_LEN: usize = 255;
pub const MAX_ACTION_LEN: usize = 64;
pub const MAX_TEXT_LEN: usize = 2000;

/// Validate one input
///
/// # Validation Rules
///
/// - `eventType`: non-empty dotted tag, at most 128 chars, segments of
///   letters, digits, `_` or `-`
/// - `actor.id`, `resource.type`, `resource.id`, `sourceService`: non-empty,
///   at most 255 chars
/// - `action`: non-empty, at most 64 chars
/// - `correlationId`, `causationId`: if present, non-blank
/// - `reason`: mandatory for admin actors; `reason` and `description` at most
///   2000 chars
pub fn validate_input(input: &AuditInput) -> Result<(), ValidationError> {
    let violations = collect_violations(input, None);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations))
    }
}

/// Validate every element of a batch, tagging violations with their index
pub fn validate_batch(inputs: &[AuditInput]) -> Result<(), ValidationError> {
    let violations: Vec<FieldViolation> = inputs
        .iter()
        .enumerate()
        .flat_map(|(idx, input)| collect_violations(input, Some(idx)))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations))
    }
}

fn collect_violations(input: &AuditInput, index: Option<usize>) -> Vec<FieldViolation> {
    let mut out = Vec::new();
    let mut push = |field: &str, message: String| {
        out.push(FieldViolation::new(field, message).at(index));
    };

    if let Err(message) = check_event_type(&input.event_type) {
        push("eventType", message);
    }

    for (field, value) in [
        ("actor.id", input.actor.id.as_str()),
        ("resource.type", input.resource.resource_type.as_str()),
        ("resource.id", input.resource.id.as_str()),
        ("sourceService", input.source_service.as_str()),
    ] {
        if let Err(message) = check_required(value, MAX_IDENTIFIER_LEN) {
            push(field, message);
        }
    }

    if let Err(message) = check_required(&input.action, MAX_ACTION_LEN) {
        push("action", message);
    }

    for (field, value) in [
        ("correlationId", input.correlation_id.as_deref()),
        ("causationId", input.causation_id.as_deref()),
    ] {
        if let Some(value) = value {
            if let Err(message) = check_required(value, MAX_IDENTIFIER_LEN) {
                push(field, message);
            }
        }
    }

    let reason = input.reason.as_deref().map(str::trim).unwrap_or("");
    if input.actor.actor_type.requires_reason() && reason.is_empty() {
        push(
            "reason",
            format!("is required when actor type is {}", input.actor.actor_type),
        );
    }
    for (field, value) in [
        ("reason", input.reason.as_deref()),
        ("description", input.description.as_deref()),
    ] {
        if let Some(value) = value {
            if value.chars().count() > MAX_TEXT_LEN {
                push(field, format!("must be at most {MAX_TEXT_LEN} characters"));
            }
        }
    }

    out
}

fn check_required(value: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("cannot be empty".to_string());
    }
    if value.chars().count() > max_len {
        return Err(format!("must be at most {max_len} characters"));
    }
    Ok(())
}

fn check_event_type(event_type: &str) -> Result<(), String> {
    validate_event_type(event_type).map_err(|err| match err {
        EventValidationError::EmptyEventType => "cannot be empty".to_string(),
        EventValidationError::EventTypeTooLong { max } => {
            format!("must be at most {max} characters")
        }
        EventValidationError::MalformedEventType(tag) => {
            format!("must be a dotted tag like 'trip.created', got '{tag}'")
        }
        other => other.to_string(),
    })
}
