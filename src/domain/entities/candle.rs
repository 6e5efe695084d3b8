use chrono::NaiveDateTime;

use crate::domain::entities::tick::Tick;

/// OHLCV bar for one timeframe bucket. Mutable only while owned by its
/// aggregator; immutable once the period closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub period_start: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// Seed a fresh candle from the first tick of its period. All four OHLC
    /// fields start at the tick price, so `low <= open,close <= high` holds
    /// from the first update on.
    pub fn open_from_tick(tick: &Tick, period_start: NaiveDateTime) -> Self {
        Candle {
            period_start,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            volume: tick.volume.unwrap_or(1),
        }
    }

    /// Fold another tick of the same period into this candle.
    pub fn apply_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.close = tick.ltp;
        self.volume += tick.volume.unwrap_or(1);
    }

    /// (high + low + close) / 3, the VWAP input.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::instrument::InstrumentId;
    use chrono::NaiveDate;

    fn tick(price: f64) -> Tick {
        let ts = NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Tick::new(InstrumentId::new("25"), price, ts)
    }

    #[test]
    fn test_open_from_tick_seeds_all_fields() {
        let t = tick(100.0);
        let candle = Candle::open_from_tick(&t, t.timestamp);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 100.0);
        assert_eq!(candle.low, 100.0);
        assert_eq!(candle.close, 100.0);
        assert_eq!(candle.volume, 1);
    }

    #[test]
    fn test_apply_tick_maintains_ohlc_invariant() {
        let first = tick(100.0);
        let mut candle = Candle::open_from_tick(&first, first.timestamp);
        candle.apply_tick(&tick(105.0));
        candle.apply_tick(&tick(97.0));
        candle.apply_tick(&tick(101.0));

        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 105.0);
        assert_eq!(candle.low, 97.0);
        assert_eq!(candle.close, 101.0);
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
    }

    #[test]
    fn test_volume_accumulates_with_default_of_one() {
        let first = tick(100.0).with_volume(10);
        let mut candle = Candle::open_from_tick(&first, first.timestamp);
        candle.apply_tick(&tick(101.0).with_volume(5));
        candle.apply_tick(&tick(102.0)); // no volume on tick -> counts as 1
        assert_eq!(candle.volume, 16);
    }

    #[test]
    fn test_typical_price() {
        let first = tick(100.0);
        let mut candle = Candle::open_from_tick(&first, first.timestamp);
        candle.apply_tick(&tick(110.0));
        candle.apply_tick(&tick(90.0));
        // high=110, low=90, close=90
        assert!((candle.typical_price() - (110.0 + 90.0 + 90.0) / 3.0).abs() < 1e-9);
    }
}
