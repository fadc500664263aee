//! Websocket message envelope and event names

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// Event types
pub const EVENT_SCHEDULER_STATUS: &str = "scheduler.status";
pub const EVENT_JOB_CREATED: &str = "job.created";
pub const EVENT_JOB_UPDATED: &str = "job.updated";
pub const EVENT_JOB_COMPLETED: &str = "job.completed";
pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";

/// Standard envelope for every message on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event: String,

    pub data: serde_json::Value,

    /// ISO-8601 UTC emission time
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// Build a standardized envelope stamped with the current time
pub fn create_message(
    event: &str,
    data: serde_json::Value,
    account_id: Option<String>,
) -> Envelope {
    Envelope {
        event: event.to_string(),
        data,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        account_id,
    }
}
