use serde::{Deserialize, Serialize};

/// A funding-period boundary crossed on one status key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingEvent {
    pub status_key: String,
    /// Timestamp of the snapshot that revealed the boundary (ms)
    pub status_ts: i64,
    pub previous_period_end_ts: i64,
    pub next_period_end_ts: i64,
    pub mark_price: f64,
    pub funding_rate: f64,
}
