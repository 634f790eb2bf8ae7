//! Aggregated ledger statistics

use chrono::NaiveDate;
use event_bus::ActorType;
use serde::{Deserialize, Serialize};

use crate::query::{DateRange, QueryMeta};

/// Default statistics window in days
pub const DEFAULT_STATS_WINDOW_DAYS: u32 = 30;
/// Number of daily buckets returned
pub const DAILY_BUCKETS: usize = 30;
/// Length of the top-N lists
pub const TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorCount {
    pub actor_id: String,
    pub actor_type: ActorType,
    pub count: i64,
}

/// Compliance report over a date window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub date_range: DateRange,
    pub total_events: i64,
    /// Descending by count
    pub events_by_category: Vec<CategoryCount>,
    /// Most recent buckets with activity, ascending by date
    pub daily_series: Vec<DailyCount>,
    pub top_event_types: Vec<EventTypeCount>,
    pub top_actors: Vec<ActorCount>,
    pub meta: QueryMeta,
}
