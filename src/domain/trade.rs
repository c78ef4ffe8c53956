use serde::{Deserialize, Serialize};

use super::{raw_f64, raw_i64};

/// An executed trade on the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "TradeRepr")]
pub struct TradeFill {
    pub id: i64,
    pub symbol: String,
    /// Execution time (ms)
    pub mts: i64,
    pub order_id: i64,
    /// Positive when buying, negative when selling
    pub exec_amount: f64,
    pub exec_price: f64,
    pub order_type: Option<String>,
    pub order_price: Option<f64>,
    pub maker: bool,
    /// Fee charged, usually negative
    pub fee: f64,
    pub fee_currency: Option<String>,
    pub client_order_id: Option<i64>,
}

impl TradeFill {
    /// Decode the exchange's positional trade array:
    /// `[ID, SYMBOL, MTS, ORDER_ID, EXEC_AMOUNT, EXEC_PRICE, ORDER_TYPE,
    /// ORDER_PRICE, MAKER, FEE, FEE_CURRENCY, CID]`
    pub fn from_raw(raw: &[serde_json::Value]) -> Result<Self, String> {
        let symbol = raw
            .get(1)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| "raw trade has no symbol at index 1".to_string())?;

        Ok(Self {
            id: raw_i64(raw, 0, "id")?,
            symbol: symbol.to_string(),
            mts: raw_i64(raw, 2, "mts")?,
            order_id: raw_i64(raw, 3, "order id")?,
            exec_amount: raw_f64(raw, 4, "exec amount")?,
            exec_price: raw_f64(raw, 5, "exec price")?,
            order_type: raw.get(6).and_then(|v| v.as_str()).map(str::to_string),
            order_price: raw.get(7).and_then(serde_json::Value::as_f64),
            maker: raw.get(8).and_then(serde_json::Value::as_i64) == Some(1),
            fee: raw.get(9).and_then(serde_json::Value::as_f64).unwrap_or(0.0),
            fee_currency: raw.get(10).and_then(|v| v.as_str()).map(str::to_string),
            client_order_id: raw.get(11).and_then(serde_json::Value::as_i64),
        })
    }

    pub fn is_buy(&self) -> bool {
        self.exec_amount > 0.0
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedTrade {
    id: i64,
    symbol: String,
    mts: i64,
    #[serde(default)]
    order_id: i64,
    exec_amount: f64,
    exec_price: f64,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    order_price: Option<f64>,
    #[serde(default)]
    maker: bool,
    #[serde(default)]
    fee: f64,
    #[serde(default)]
    fee_currency: Option<String>,
    #[serde(default)]
    client_order_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TradeRepr {
    Named(NamedTrade),
    Raw(Vec<serde_json::Value>),
}

impl TryFrom<TradeRepr> for TradeFill {
    type Error = String;

    fn try_from(repr: TradeRepr) -> Result<Self, Self::Error> {
        match repr {
            TradeRepr::Named(t) => Ok(Self {
                id: t.id,
                symbol: t.symbol,
                mts: t.mts,
                order_id: t.order_id,
                exec_amount: t.exec_amount,
                exec_price: t.exec_price,
                order_type: t.order_type,
                order_price: t.order_price,
                maker: t.maker,
                fee: t.fee,
                fee_currency: t.fee_currency,
                client_order_id: t.client_order_id,
            }),
            TradeRepr::Raw(raw) => Self::from_raw(&raw),
        }
    }
}
