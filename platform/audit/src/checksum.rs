//! Record checksum
//!
//! SHA-256 over an order-stable concatenation of the canonical fields:
//!
//! `id|correlationId|eventType|timestamp|actor|resource|action|reason`
//!
//! - `timestamp` is RFC 3339 with microseconds and a `Z` suffix
//! - `actor` and `resource` are their compact JSON serializations
//! - `\` and `|` inside a component are escaped with a backslash
//! - an absent `reason` is written as `\0`, which no escaped value can equal,
//!   so `None` and `Some("")` hash differently
//!
//! The digest detects field tampering after the fact. It is not a signature:
//! anyone able to rewrite a row can also rewrite its checksum.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::record::{ActorRef, ResourceRef};

const SEPARATOR: char = '|';
const ABSENT: &str = "\\0";

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        if c == SEPARATOR || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Borrowed view of the fields covered by the checksum
#[derive(Debug, Clone, Copy)]
pub struct CanonicalFields<'a> {
    pub id: Uuid,
    pub correlation_id: &'a str,
    pub event_type: &'a str,
    pub timestamp: DateTime<Utc>,
    pub actor: &'a ActorRef,
    pub resource: &'a ResourceRef,
    pub action: &'a str,
    pub reason: Option<&'a str>,
}

impl CanonicalFields<'_> {
    /// The exact string that gets hashed
    pub fn canonical_string(&self) -> String {
        // Struct field order is fixed, so serialization is stable
        let actor = serde_json::to_string(self.actor).unwrap_or_default();
        let resource = serde_json::to_string(self.resource).unwrap_or_default();
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let id = self.id.to_string();

        let mut out = String::with_capacity(256);
        for (i, component) in [
            id.as_str(),
            self.correlation_id,
            self.event_type,
            timestamp.as_str(),
            actor.as_str(),
            resource.as_str(),
            self.action,
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push(SEPARATOR);
            }
            push_escaped(&mut out, component);
        }

        out.push(SEPARATOR);
        match self.reason {
            Some(reason) => push_escaped(&mut out, reason),
            None => out.push_str(ABSENT),
        }
        out
    }
}

/// Hex-encoded SHA-256 of the canonical string (64 characters)
pub fn compute(fields: &CanonicalFields<'_>) -> String {
    let digest = Sha256::digest(fields.canonical_string().as_bytes());
    hex::encode(digest)
}

/// Recompute and compare against a stored checksum
pub fn verify(fields: &CanonicalFields<'_>, expected: &str) -> bool {
    compute(fields).eq_ignore_ascii_case(expected)
}
