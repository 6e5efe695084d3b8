use tracing::info;

use crate::domain::entities::position::{Position, SessionStats};

/// Periodic status and end-of-session reporting. Constructed once at startup
/// and injected into the tasks that report - no global reporting state.
pub struct StatusReporter {
    mode: &'static str,
}

impl StatusReporter {
    pub fn new(paper_trading: bool) -> Self {
        StatusReporter {
            mode: if paper_trading { "paper" } else { "live" },
        }
    }

    pub fn mode(&self) -> &str {
        self.mode
    }

    pub fn startup(&self, underlying: &str, timeframe_seconds: u32) {
        info!("==============================================");
        info!(
            "Scalping engine starting | {} | {}s candles | {} mode",
            underlying, timeframe_seconds, self.mode
        );
        info!("==============================================");
    }

    pub fn heartbeat(&self, candles_completed: usize, stats: &SessionStats, position: Option<&Position>) {
        match position {
            Some(p) => info!(
                "Status: candles {} | trades {} | P&L {:+.2} | orders {} | open {} (mark {:?})",
                candles_completed,
                stats.total_trades,
                stats.total_pnl,
                stats.orders_placed,
                p.symbol,
                p.mark_price
            ),
            None => info!(
                "Status: candles {} | trades {} | P&L {:+.2} | orders {} | flat",
                candles_completed, stats.total_trades, stats.total_pnl, stats.orders_placed
            ),
        }
    }

    pub fn final_summary(&self, stats: &SessionStats) {
        info!("========== session {} summary ==========", stats.date);
        info!("  total trades:  {}", stats.total_trades);
        info!("  winners:       {}", stats.winning_trades);
        info!("  losers:        {}", stats.losing_trades);
        info!("  win rate:      {:.1}%", stats.win_rate());
        info!("  total P&L:     {:+.2}", stats.total_pnl);
        info!("  orders placed: {}", stats.orders_placed);
        info!("========================================");
    }
}
