use std::collections::HashMap;
use tracing::debug;

use super::TradePhase;
use crate::domain::TradeFill;

/// Pairs execution notices with their final updates.
///
/// The exchange announces a trade twice: once on execution and again with
/// the final fee. Only an update for a trade whose execution was seen
/// releases a fill, so every trade is booked once with its final fee.
#[derive(Debug, Default)]
pub struct TradeAssembler {
    executed: HashMap<i64, TradeFill>,
}

impl TradeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one trade message; returns the fill ready to be booked, if any
    pub fn accept(&mut self, phase: Option<TradePhase>, fill: TradeFill) -> Option<TradeFill> {
        match phase {
            None => Some(fill),
            Some(TradePhase::Executed) => {
                debug!("trade {} executed, waiting for update", fill.id);
                self.executed.insert(fill.id, fill);
                None
            }
            Some(TradePhase::Updated) => match self.executed.remove(&fill.id) {
                Some(_) => Some(fill),
                None => {
                    debug!("ignoring update for unknown or already booked trade {}", fill.id);
                    None
                }
            },
        }
    }

    /// Executions still waiting for their update
    pub fn pending(&self) -> usize {
        self.executed.len()
    }
}
