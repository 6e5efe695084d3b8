use chrono::{NaiveDate, NaiveDateTime};

use crate::domain::entities::instrument::{InstrumentId, OptionSide};
use crate::domain::value_objects::quantity::Quantity;

/// Why an open position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target,
    Shutdown,
    DailyLossLimit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::Target => write!(f, "target"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::DailyLossLimit => write!(f, "daily_loss_limit"),
        }
    }
}

/// The single open long-option position. Created on entry fill, mutated in
/// place on every tick while open, destroyed on exit fill.
#[derive(Debug, Clone)]
pub struct Position {
    pub instrument: InstrumentId,
    pub symbol: String,
    pub side: OptionSide,
    pub strike: u32,
    pub quantity: Quantity,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub order_id: String,
    pub stop_loss: f64,
    pub target: f64,
    pub mark_price: Option<f64>,
    pub pnl: f64,
}

impl Position {
    /// Refresh the mark price and return the running P&L.
    pub fn update_mark(&mut self, price: f64) -> f64 {
        self.mark_price = Some(price);
        self.pnl = (price - self.entry_price) * self.quantity.value() as f64;
        self.pnl
    }

    pub fn stop_hit(&self, price: f64) -> bool {
        price <= self.stop_loss
    }

    pub fn target_hit(&self, price: f64) -> bool {
        price >= self.target
    }
}

/// In-memory statistics for one trading session. Reset at the day boundary.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub date: NaiveDate,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: f64,
    pub orders_placed: u32,
}

impl SessionStats {
    pub fn new(date: NaiveDate) -> Self {
        SessionStats {
            date,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: 0.0,
            orders_placed: 0,
        }
    }

    /// Fold a closed trade into the session totals.
    pub fn record_close(&mut self, pnl: f64) {
        self.total_trades += 1;
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn position(entry: f64, stop: f64, target: f64) -> Position {
        Position {
            instrument: InstrumentId::new("OPT123"),
            symbol: "BANKNIFTY 51200 CE".to_string(),
            side: OptionSide::Call,
            strike: 51_200,
            quantity: Quantity::new(30).unwrap(),
            entry_price: entry,
            entry_time: NaiveDate::from_ymd_opt(2024, 7, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            order_id: "1".to_string(),
            stop_loss: stop,
            target,
            mark_price: None,
            pnl: 0.0,
        }
    }

    #[test]
    fn test_update_mark_tracks_pnl() {
        let mut pos = position(150.0, 130.0, 190.0);
        assert_eq!(pos.update_mark(160.0), 300.0);
        assert_eq!(pos.mark_price, Some(160.0));
        assert_eq!(pos.update_mark(140.0), -300.0);
    }

    #[test]
    fn test_exit_levels() {
        let pos = position(150.0, 130.0, 190.0);
        assert!(pos.stop_hit(129.0));
        assert!(pos.stop_hit(130.0));
        assert!(!pos.stop_hit(131.0));
        assert!(pos.target_hit(190.0));
        assert!(!pos.target_hit(189.0));
    }

    #[test]
    fn test_session_stats_fold() {
        let mut stats = SessionStats::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        stats.record_close(300.0);
        stats.record_close(-150.0);
        stats.record_close(-150.0);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 2);
        assert_eq!(stats.total_pnl, 0.0);
        assert!((stats.win_rate() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_win_rate_empty_session() {
        let stats = SessionStats::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(stats.win_rate(), 0.0);
    }
}
