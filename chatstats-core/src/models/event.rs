//! Analytics event row (events table)
//!
//! ```sql
//! CREATE TABLE bots.events (
//!     app LowCardinality(String),
//!     bot_id Int64,
//!     event_type LowCardinality(String),
//!     event_subtype LowCardinality(String),
//!     from_bot Bool,
//!     data Array(String),
//!     data_low_cardinality Array(LowCardinality(String)),
//!     data_int Array(Int64),
//!     data_flags Array(Bool),
//!     chat_id Int64,
//!     user_id Int64,
//!     chat_type LowCardinality(String),
//!     session_id Int16,
//!     content_id LowCardinality(String),
//!     language LowCardinality(String),
//!     user_created_at Nullable(DateTime64(3, 'UTC')),
//!     referer String,
//!     session_referer String,
//!     content_referer String,
//!     ab_mask Array(LowCardinality(String)),
//!     timestamp DateTime64(3, 'UTC')
//! ) ENGINE = MergeTree
//! ORDER BY (bot_id, timestamp);
//! ```

use clickhouse::Row;
use serde::Serialize;

/// One classified platform update, append-only. Array fields are
/// positionally meaningful per `event_subtype`; consumers parse by index.
#[derive(Debug, Clone, Row, Serialize)]
pub struct EventRow {
    pub app: String,
    pub bot_id: i64,
    pub event_type: String,
    pub event_subtype: String,
    pub from_bot: bool,
    pub data: Vec<String>,
    pub data_low_cardinality: Vec<String>,
    pub data_int: Vec<i64>,
    pub data_flags: Vec<bool>,
    pub chat_id: i64,
    pub user_id: i64,
    pub chat_type: String,
    pub session_id: i16,
    pub content_id: String,
    pub language: String,
    /// Milliseconds since epoch; `None` when the user is not yet known.
    pub user_created_at: Option<i64>,
    pub referer: String,
    pub session_referer: String,
    pub content_referer: String,
    pub ab_mask: Vec<String>,
    /// Milliseconds since epoch, UTC.
    pub timestamp: i64,
}

impl EventRow {
    /// Empty "raw" event skeleton for one bot; the dispatcher fills in the
    /// classified fields.
    pub fn raw(app: &str, bot_id: i64, timestamp_ms: i64) -> Self {
        Self {
            app: app.to_string(),
            bot_id,
            event_type: "raw".to_string(),
            event_subtype: String::new(),
            from_bot: false,
            data: Vec::new(),
            data_low_cardinality: Vec::new(),
            data_int: Vec::new(),
            data_flags: Vec::new(),
            chat_id: 0,
            user_id: 0,
            chat_type: String::new(),
            session_id: 0,
            content_id: String::new(),
            language: String::new(),
            user_created_at: None,
            referer: String::new(),
            session_referer: String::new(),
            content_referer: String::new(),
            ab_mask: Vec::new(),
            timestamp: timestamp_ms,
        }
    }
}
