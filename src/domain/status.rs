use serde::{Deserialize, Serialize};

use super::{raw_f64, raw_i64};

/// Index of each used field in the exchange's raw derivative status array
const RAW_EVENT_TS: usize = 0;
const RAW_NEXT_FUNDING_TS: usize = 7;
const RAW_CURRENT_FUNDING: usize = 11;
const RAW_MARK_PRICE: usize = 14;

/// One derivative status tick for a status key
///
/// Decodes from either the named JSON object form or the exchange's raw
/// positional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SnapshotRepr")]
pub struct StatusSnapshot {
    /// Timestamp of the tick itself (ms)
    pub event_ts: i64,
    /// End of the current funding period (ms); repeats until the period rolls
    pub period_end_ts: i64,
    /// Signed funding rate as a fraction
    pub funding_rate: f64,
    pub mark_price: f64,
}

impl StatusSnapshot {
    pub fn new(event_ts: i64, period_end_ts: i64, funding_rate: f64, mark_price: f64) -> Self {
        Self {
            event_ts,
            period_end_ts,
            funding_rate,
            mark_price,
        }
    }

    /// Decode the raw positional array sent on the status channel
    pub fn from_raw(raw: &[serde_json::Value]) -> Result<Self, String> {
        Ok(Self {
            event_ts: raw_i64(raw, RAW_EVENT_TS, "event timestamp")?,
            period_end_ts: raw_i64(raw, RAW_NEXT_FUNDING_TS, "next funding timestamp")?,
            funding_rate: raw_f64(raw, RAW_CURRENT_FUNDING, "current funding")?,
            mark_price: raw_f64(raw, RAW_MARK_PRICE, "mark price")?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedSnapshot {
    #[serde(alias = "event_ts")]
    event_ts: i64,
    #[serde(alias = "period_end_ts")]
    period_end_ts: i64,
    #[serde(alias = "funding_rate")]
    funding_rate: f64,
    #[serde(alias = "mark_price")]
    mark_price: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    Named(NamedSnapshot),
    Raw(Vec<serde_json::Value>),
}

impl TryFrom<SnapshotRepr> for StatusSnapshot {
    type Error = String;

    fn try_from(repr: SnapshotRepr) -> Result<Self, Self::Error> {
        match repr {
            SnapshotRepr::Named(s) => Ok(Self {
                event_ts: s.event_ts,
                period_end_ts: s.period_end_ts,
                funding_rate: s.funding_rate,
                mark_price: s.mark_price,
            }),
            SnapshotRepr::Raw(raw) => Self::from_raw(&raw),
        }
    }
}
