//! Audit record model
//!
//! [`AuditInput`] is what producers submit. The ledger normalizes it into a
//! [`PendingRecord`] (ids, timestamps, category and checksum filled in), and
//! the store turns that into an immutable [`AuditRecord`] by assigning the
//! sequence number and persistence instant.

use chrono::{DateTime, SubsecRound, Utc};
use event_bus::ActorType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who performed the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub id: String,
}

impl ActorRef {
    pub fn new(actor_type: ActorType, id: impl Into<String>) -> Self {
        Self {
            actor_type,
            id: id.into(),
        }
    }
}

/// What the action was performed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

/// How long a record must be kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionClass {
    #[default]
    Standard,
    Extended,
    Permanent,
}

impl RetentionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionClass::Standard => "standard",
            RetentionClass::Extended => "extended",
            RetentionClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(RetentionClass::Standard),
            "extended" => Ok(RetentionClass::Extended),
            "permanent" => Ok(RetentionClass::Permanent),
            other => Err(format!("unknown retention class: {other}")),
        }
    }
}

/// Resource state before and after the action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
}

/// One top-level field that differs between `before` and `after`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl StateChange {
    pub fn new(before: Option<Value>, after: Option<Value>) -> Self {
        Self { before, after }
    }

    /// Field-level diff of the two states, sorted by field name
    ///
    /// Non-object states are compared as a single field named `$`.
    pub fn changed_fields(&self) -> Vec<FieldDiff> {
        let empty = Map::new();
        let (before, after) = match (&self.before, &self.after) {
            (Some(Value::Object(b)), Some(Value::Object(a))) => (b, a),
            (Some(Value::Object(b)), None) => (b, &empty),
            (None, Some(Value::Object(a))) => (&empty, a),
            (None, None) => return Vec::new(),
            (b, a) => {
                if b == a {
                    return Vec::new();
                }
                return vec![FieldDiff {
                    field: "$".to_string(),
                    before: b.clone(),
                    after: a.clone(),
                }];
            }
        };

        let mut fields: Vec<&String> = before.keys().chain(after.keys()).collect();
        fields.sort();
        fields.dedup();

        fields
            .into_iter()
            .filter_map(|field| {
                let old = before.get(field);
                let new = after.get(field);
                (old != new).then(|| FieldDiff {
                    field: field.clone(),
                    before: old.cloned(),
                    after: new.cloned(),
                })
            })
            .collect()
    }
}

/// Submission accepted by `store` / `store_batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditInput {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    pub event_type: String,
    /// Occurrence instant; defaults to now
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Defaults to a fresh id (a one-record transaction)
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    pub actor: ActorRef,
    pub resource: ResourceRef,
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub source_service: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub state_change: Option<StateChange>,
    #[serde(default)]
    pub retention_class: RetentionClass,
    #[serde(default)]
    pub contains_pii: bool,
}

impl AuditInput {
    pub fn new(
        event_type: impl Into<String>,
        actor: ActorRef,
        resource: ResourceRef,
        action: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            timestamp: None,
            correlation_id: None,
            causation_id: None,
            actor,
            resource,
            action: action.into(),
            reason: None,
            description: None,
            source_service: source_service.into(),
            payload: Value::Null,
            metadata: Map::new(),
            state_change: None,
            retention_class: RetentionClass::default(),
            contains_pii: false,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_state_change(mut self, state_change: StateChange) -> Self {
        self.state_change = Some(state_change);
        self
    }

    pub fn with_retention(mut self, retention_class: RetentionClass) -> Self {
        self.retention_class = retention_class;
        self
    }

    pub fn with_pii(mut self, contains_pii: bool) -> Self {
        self.contains_pii = contains_pii;
        self
    }
}

/// Normalized record waiting for the store to assign its sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub id: Uuid,
    pub event_type: String,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub actor: ActorRef,
    pub resource: ResourceRef,
    pub action: String,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub source_service: String,
    pub payload: Value,
    pub metadata: Map<String, Value>,
    pub state_change: Option<StateChange>,
    pub retention_class: RetentionClass,
    pub contains_pii: bool,
    pub checksum: String,
}

impl PendingRecord {
    /// Fill defaults, derive the category, and seal the canonical fields
    ///
    /// The timestamp is truncated to microseconds, the precision the
    /// relational store keeps, so a record read back reproduces its checksum.
    pub fn from_input(input: AuditInput, now: DateTime<Utc>) -> Self {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        let timestamp = input.timestamp.unwrap_or(now).trunc_subsecs(6);
        let correlation_id = input
            .correlation_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let category = event_bus::event_category(&input.event_type).to_string();

        let mut pending = Self {
            id,
            event_type: input.event_type,
            category,
            timestamp,
            correlation_id,
            causation_id: input.causation_id,
            actor: input.actor,
            resource: input.resource,
            action: input.action,
            reason: input.reason,
            description: input.description,
            source_service: input.source_service,
            payload: input.payload,
            metadata: input.metadata,
            state_change: input.state_change,
            retention_class: input.retention_class,
            contains_pii: input.contains_pii,
            checksum: String::new(),
        };
        pending.checksum = crate::checksum::compute(&pending.canonical());
        pending
    }

    pub fn canonical(&self) -> crate::checksum::CanonicalFields<'_> {
        crate::checksum::CanonicalFields {
            id: self.id,
            correlation_id: &self.correlation_id,
            event_type: &self.event_type,
            timestamp: self.timestamp,
            actor: &self.actor,
            resource: &self.resource,
            action: &self.action,
            reason: self.reason.as_deref(),
        }
    }

    /// Attach the store-assigned ordering fields
    pub fn into_record(self, sequence_number: i64, stored_at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: self.id,
            sequence_number,
            event_type: self.event_type,
            category: self.category,
            timestamp: self.timestamp,
            stored_at,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            actor: self.actor,
            resource: self.resource,
            action: self.action,
            reason: self.reason,
            description: self.description,
            source_service: self.source_service,
            payload: self.payload,
            metadata: self.metadata,
            state_change: self.state_change,
            retention_class: self.retention_class,
            contains_pii: self.contains_pii,
            checksum: self.checksum,
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub sequence_number: i64,
    pub event_type: String,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub actor: ActorRef,
    pub resource: ResourceRef,
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_service: String,
    pub payload: Value,
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_change: Option<StateChange>,
    pub retention_class: RetentionClass,
    pub contains_pii: bool,
    pub checksum: String,
}

impl AuditRecord {
    pub fn canonical(&self) -> crate::checksum::CanonicalFields<'_> {
        crate::checksum::CanonicalFields {
            id: self.id,
            correlation_id: &self.correlation_id,
            event_type: &self.event_type,
            timestamp: self.timestamp,
            actor: &self.actor,
            resource: &self.resource,
            action: &self.action,
            reason: self.reason.as_deref(),
        }
    }

    /// Recompute the checksum from the canonical fields and compare
    pub fn verify_checksum(&self) -> bool {
        crate::checksum::verify(&self.canonical(), &self.checksum)
    }
}
