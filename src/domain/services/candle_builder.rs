use std::collections::{HashMap, VecDeque};

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use tracing::debug;

use crate::domain::entities::candle::Candle;
use crate::domain::entities::tick::Tick;

/// Aggregates a tick stream into fixed-duration OHLCV candles for one
/// timeframe and keeps a bounded history of completed candles.
pub struct CandleBuilder {
    timeframe_secs: u32,
    max_history: usize,
    warmup_candles: usize,
    current: Option<Candle>,
    ticks_in_candle: u32,
    candles: VecDeque<Candle>,
}

impl CandleBuilder {
    pub fn new(timeframe_secs: u32, max_history: usize, warmup_candles: usize) -> Self {
        CandleBuilder {
            timeframe_secs,
            max_history,
            warmup_candles,
            current: None,
            ticks_in_candle: 0,
            candles: VecDeque::with_capacity(max_history),
        }
    }

    /// Floor a timestamp to the start of its timeframe bucket. Buckets are
    /// aligned to time-of-day, so every period start is a multiple of the
    /// timeframe within the day regardless of tick arrival jitter.
    fn bucket_start(&self, timestamp: NaiveDateTime) -> NaiveDateTime {
        let seconds = timestamp.time().num_seconds_from_midnight();
        let aligned = (seconds / self.timeframe_secs) * self.timeframe_secs;
        let time =
            NaiveTime::from_num_seconds_from_midnight_opt(aligned, 0).unwrap_or(NaiveTime::MIN);
        timestamp.date().and_time(time)
    }

    /// Fold one tick into the stream. Returns the completed candle when the
    /// tick opens a new period.
    ///
    /// Ticks whose bucket is earlier than the open candle (out-of-order
    /// arrivals) are folded into the current candle instead of reopening a
    /// closed bucket. Completed candles stay immutable.
    pub fn process_tick(&mut self, tick: &Tick) -> Option<Candle> {
        let bucket = self.bucket_start(tick.timestamp);

        match self.current.take() {
            None => {
                self.current = Some(Candle::open_from_tick(tick, bucket));
                self.ticks_in_candle = 1;
                None
            }
            Some(open) if bucket > open.period_start => {
                debug!(
                    "Candle completed {} O:{:.2} H:{:.2} L:{:.2} C:{:.2} V:{} ({} ticks)",
                    open.period_start.format("%H:%M:%S"),
                    open.open,
                    open.high,
                    open.low,
                    open.close,
                    open.volume,
                    self.ticks_in_candle
                );
                self.push_completed(open.clone());
                self.current = Some(Candle::open_from_tick(tick, bucket));
                self.ticks_in_candle = 1;
                Some(open)
            }
            Some(mut open) => {
                open.apply_tick(tick);
                self.current = Some(open);
                self.ticks_in_candle += 1;
                None
            }
        }
    }

    fn push_completed(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.max_history {
            self.candles.pop_front();
        }
    }

    /// Copy of the completed-candle history, oldest first. The history is
    /// owned exclusively by this builder; readers get a snapshot.
    pub fn history(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    pub fn has_enough_data(&self) -> bool {
        self.candles.len() >= self.warmup_candles
    }

    pub fn latest_close(&self) -> Option<f64> {
        self.candles.back().map(|c| c.close)
    }

    pub fn current_candle(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
        self.current = None;
        self.ticks_in_candle = 0;
    }
}

/// N independent builders fed the same tick stream, one per timeframe.
pub struct MultiTimeframeCandleBuilder {
    builders: HashMap<u32, CandleBuilder>,
}

impl MultiTimeframeCandleBuilder {
    pub fn new(timeframes: &[u32], max_history: usize, warmup_candles: usize) -> Self {
        let builders = timeframes
            .iter()
            .map(|&tf| (tf, CandleBuilder::new(tf, max_history, warmup_candles)))
            .collect();
        MultiTimeframeCandleBuilder { builders }
    }

    /// Returns the completed candle per timeframe, if any.
    pub fn process_tick(&mut self, tick: &Tick) -> Vec<(u32, Candle)> {
        let mut completed = Vec::new();
        for (&tf, builder) in self.builders.iter_mut() {
            if let Some(candle) = builder.process_tick(tick) {
                completed.push((tf, candle));
            }
        }
        completed
    }

    pub fn builder(&self, timeframe_secs: u32) -> Option<&CandleBuilder> {
        self.builders.get(&timeframe_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::instrument::InstrumentId;
    use chrono::{NaiveDate, Timelike};

    fn tick_at(h: u32, m: u32, s: u32, price: f64) -> Tick {
        let ts = NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap();
        Tick::new(InstrumentId::new("25"), price, ts)
    }

    #[test]
    fn test_first_tick_opens_candle() {
        let mut builder = CandleBuilder::new(60, 100, 15);
        assert!(builder.process_tick(&tick_at(9, 15, 12, 100.0)).is_none());
        let current = builder.current_candle().unwrap();
        assert_eq!(current.open, 100.0);
        // Aligned down to the minute boundary despite the 12s offset
        assert_eq!(current.period_start.time().second(), 0);
        assert_eq!(current.period_start.time().minute(), 15);
    }

    #[test]
    fn test_same_bucket_updates_in_place() {
        let mut builder = CandleBuilder::new(60, 100, 15);
        builder.process_tick(&tick_at(9, 15, 5, 100.0));
        builder.process_tick(&tick_at(9, 15, 20, 104.0));
        assert!(builder.process_tick(&tick_at(9, 15, 50, 98.0)).is_none());

        let current = builder.current_candle().unwrap();
        assert!(current.low <= 98.0 && current.high >= 104.0);
        assert_eq!(current.close, 98.0);
        assert_eq!(builder.candle_count(), 0);
    }

    #[test]
    fn test_new_bucket_completes_previous_candle() {
        let mut builder = CandleBuilder::new(60, 100, 15);
        builder.process_tick(&tick_at(9, 15, 5, 100.0));
        builder.process_tick(&tick_at(9, 15, 40, 103.0));

        let completed = builder.process_tick(&tick_at(9, 16, 2, 105.0)).unwrap();
        assert_eq!(completed.close, 103.0);
        assert_eq!(builder.candle_count(), 1);
        assert_eq!(builder.latest_close(), Some(103.0));
        assert_eq!(builder.current_candle().unwrap().open, 105.0);
    }

    #[test]
    fn test_period_start_divisible_by_timeframe() {
        let mut builder = CandleBuilder::new(300, 100, 15);
        builder.process_tick(&tick_at(9, 17, 33, 100.0));
        builder.process_tick(&tick_at(9, 22, 1, 101.0));
        builder.process_tick(&tick_at(9, 27, 9, 102.0));

        for candle in builder.history() {
            let secs = candle.period_start.time().num_seconds_from_midnight();
            assert_eq!(secs % 300, 0);
        }
    }

    #[test]
    fn test_out_of_order_tick_folds_into_current_candle() {
        let mut builder = CandleBuilder::new(60, 100, 15);
        builder.process_tick(&tick_at(9, 15, 5, 100.0));
        builder.process_tick(&tick_at(9, 16, 2, 105.0));

        // Late tick from the already-closed 9:15 bucket: no retroactive
        // correction, it lands in the open 9:16 candle.
        assert!(builder.process_tick(&tick_at(9, 15, 59, 90.0)).is_none());
        assert_eq!(builder.candle_count(), 1);
        assert_eq!(builder.history()[0].low, 100.0);
        assert_eq!(builder.current_candle().unwrap().low, 90.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut builder = CandleBuilder::new(60, 3, 15);
        for minute in 0..10 {
            builder.process_tick(&tick_at(9, 15 + minute, 0, 100.0 + minute as f64));
        }
        assert_eq!(builder.candle_count(), 3);
        // Oldest candles were evicted
        assert_eq!(builder.history()[0].close, 106.0);
    }

    #[test]
    fn test_warmup_gate() {
        let mut builder = CandleBuilder::new(60, 100, 3);
        builder.process_tick(&tick_at(9, 15, 0, 100.0));
        builder.process_tick(&tick_at(9, 16, 0, 101.0));
        builder.process_tick(&tick_at(9, 17, 0, 102.0));
        assert!(!builder.has_enough_data());
        builder.process_tick(&tick_at(9, 18, 0, 103.0));
        assert!(builder.has_enough_data());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut builder = CandleBuilder::new(60, 100, 3);
        builder.process_tick(&tick_at(9, 15, 0, 100.0));
        builder.process_tick(&tick_at(9, 16, 0, 101.0));
        builder.clear();
        assert_eq!(builder.candle_count(), 0);
        assert!(builder.current_candle().is_none());
    }

    #[test]
    fn test_multi_timeframe_independent_buckets() {
        let mut multi = MultiTimeframeCandleBuilder::new(&[60, 300], 100, 15);
        multi.process_tick(&tick_at(9, 15, 0, 100.0));
        multi.process_tick(&tick_at(9, 16, 0, 101.0));

        // The 1-minute builder rolled over, the 5-minute one did not.
        assert_eq!(multi.builder(60).unwrap().candle_count(), 1);
        assert_eq!(multi.builder(300).unwrap().candle_count(), 0);

        let completed = multi.process_tick(&tick_at(9, 20, 0, 102.0));
        let timeframes: Vec<u32> = completed.iter().map(|(tf, _)| *tf).collect();
        assert!(timeframes.contains(&60));
        assert!(timeframes.contains(&300));
    }
}
