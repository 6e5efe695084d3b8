use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};

/// Trading-hour window with a post-open grace period. All checks take the
/// evaluation time as an argument so gates stay deterministic under test.
#[derive(Debug, Clone)]
pub struct TradingSession {
    open: NaiveTime,
    close: NaiveTime,
    grace: Duration,
}

impl TradingSession {
    pub fn new(open: NaiveTime, close: NaiveTime, grace_minutes: i64) -> Self {
        TradingSession {
            open,
            close,
            grace: Duration::minutes(grace_minutes),
        }
    }

    fn is_trading_day(at: NaiveDateTime) -> bool {
        // Monday = 1 .. Friday = 5
        at.date().weekday().number_from_monday() <= 5
    }

    /// Inside the trading window on a weekday.
    pub fn is_open(&self, at: NaiveDateTime) -> bool {
        if !Self::is_trading_day(at) {
            return false;
        }
        let t = at.time();
        t >= self.open && t <= self.close
    }

    /// Within the volatile stretch right after the open, during which no
    /// signals are taken.
    pub fn in_opening_grace(&self, at: NaiveDateTime) -> bool {
        if !self.is_open(at) {
            return false;
        }
        at.time() < self.open + self.grace
    }

    /// Past the close (or not a trading day at all) - used by the heartbeat
    /// to trigger shutdown.
    pub fn has_closed(&self, at: NaiveDateTime) -> bool {
        !Self::is_trading_day(at) || at.time() > self.close
    }
}
