use rust_decimal::Decimal;
use tracing::info;

use super::{EntryKind, LedgerEntry};
use crate::domain::{ms_to_utc, FundingEvent, TradeFill};
use crate::error::{Result, TallyError};

/// Funding amounts are kept to this many decimal places
const AMOUNT_DP: u32 = 8;

fn to_decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::try_from(value)
        .map_err(|e| TallyError::Ledger(format!("{} {} is not representable: {}", field, value, e)))
}

/// Running position and page for a ledger
///
/// Small and `Copy` so sinks can compute the next state, persist the row,
/// and only then commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerBook {
    position_size: Decimal,
    page: u32,
    rows: u64,
}

impl LedgerBook {
    pub fn position_size(&self) -> Decimal {
        self.position_size
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Rebuild the book from previously written rows, in write order
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut book = Self::default();
        for entry in entries {
            book.rows += 1;
            book.page = entry.page;
            if entry.kind != EntryKind::Funding {
                book.position_size += entry.size;
                if book.position_size.is_zero() {
                    book.page += 1;
                }
            }
        }
        book
    }

    /// Book a trade fill
    pub fn record_trade(&mut self, fill: &TradeFill) -> Result<LedgerEntry> {
        let amount = to_decimal(fill.exec_amount, "exec amount")?;
        let price = to_decimal(fill.exec_price, "exec price")?;
        let fee = to_decimal(fill.fee, "fee")?;

        let notional = amount * price;
        if notional.is_zero() {
            return Err(TallyError::Ledger(format!(
                "trade {} has zero notional ({} @ {})",
                fill.id, fill.exec_amount, fill.exec_price
            )));
        }
        let timestamp = ms_to_utc(fill.mts).ok_or_else(|| {
            TallyError::Ledger(format!("trade {} has invalid timestamp {}", fill.id, fill.mts))
        })?;

        let kind = if fill.is_buy() {
            EntryKind::Buy
        } else {
            EntryKind::Sell
        };
        let size = -amount;
        let entry = LedgerEntry {
            trade_id: Some(fill.id),
            timestamp,
            kind,
            size,
            exec_price: price,
            funding_amount: Decimal::ZERO,
            fee_rate: (fee / notional).abs(),
            page: self.page,
        };

        self.rows += 1;
        self.position_size += size;
        if self.position_size.is_zero() {
            self.page += 1;
            info!(
                "Position closed by trade {}, continuing on page {}",
                fill.id, self.page
            );
        }
        Ok(entry)
    }

    /// Book a funding payment; skipped while flat or when the rate is zero
    pub fn record_funding(&mut self, event: &FundingEvent) -> Result<Option<LedgerEntry>> {
        if self.position_size.is_zero() || event.funding_rate == 0.0 {
            return Ok(None);
        }

        let mark = to_decimal(event.mark_price, "mark price")?;
        let rate = to_decimal(event.funding_rate, "funding rate")?;
        let timestamp = ms_to_utc(event.status_ts).ok_or_else(|| {
            TallyError::Ledger(format!("funding event has invalid timestamp {}", event.status_ts))
        })?;

        let amount = (self.position_size * mark * rate).round_dp(AMOUNT_DP);
        self.rows += 1;
        Ok(Some(LedgerEntry {
            trade_id: None,
            timestamp,
            kind: EntryKind::Funding,
            size: Decimal::ZERO,
            exec_price: Decimal::ZERO,
            funding_amount: amount,
            fee_rate: Decimal::ZERO,
            page: self.page,
        }))
    }
}
