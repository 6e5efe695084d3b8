use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::domain::entities::candle::Candle;
use crate::domain::entities::instrument::{atm_strike, OptionSide};
use crate::domain::services::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::domain::services::trading_session::TradingSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    LongEntry,
    ShortEntry,
    Exit,
    Hold,
}

impl Signal {
    /// Index scalping buys options on both sides: longs buy a call, shorts
    /// buy a put.
    pub fn option_side(&self) -> Option<OptionSide> {
        match self {
            Signal::LongEntry => Some(OptionSide::Call),
            Signal::ShortEntry => Some(OptionSide::Put),
            Signal::Exit | Signal::Hold => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::LongEntry => write!(f, "LONG_ENTRY"),
            Signal::ShortEntry => write!(f, "SHORT_ENTRY"),
            Signal::Exit => write!(f, "EXIT"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// A non-hold signal with everything execution needs at emission time.
#[derive(Debug, Clone, Copy)]
pub struct SignalEvent {
    pub signal: Signal,
    pub spot_price: f64,
    pub atm_strike: u32,
    pub atr: Option<f64>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct SignalStats {
    pub generated: u32,
    pub long_signals: u32,
    pub short_signals: u32,
    pub last_signal: Signal,
    pub last_signal_time: Option<NaiveDateTime>,
}

/// Decision engine: EMA trend + VWAP position + RSI momentum over completed
/// candles, behind a suppression gate. Exits are not decided here - the
/// execution manager owns them, tick by tick.
pub struct AlphaEngine {
    indicators: IndicatorEngine,
    session: TradingSession,
    rsi_overbought: f64,
    rsi_oversold: f64,
    strike_interval: u32,
    position_open: bool,
    last_signal: Signal,
    last_signal_time: Option<NaiveDateTime>,
    signals_generated: u32,
    long_signals: u32,
    short_signals: u32,
}

impl AlphaEngine {
    pub fn new(
        indicators: IndicatorEngine,
        session: TradingSession,
        rsi_overbought: f64,
        rsi_oversold: f64,
        strike_interval: u32,
    ) -> Self {
        AlphaEngine {
            indicators,
            session,
            rsi_overbought,
            rsi_oversold,
            strike_interval,
            position_open: false,
            last_signal: Signal::Hold,
            last_signal_time: None,
            signals_generated: 0,
            long_signals: 0,
            short_signals: 0,
        }
    }

    /// Supplied by the execution manager; the engine does not own position
    /// state, it only suppresses on it.
    pub fn set_position_open(&mut self, open: bool) {
        self.position_open = open;
    }

    pub fn warmup_candles(&self) -> usize {
        self.indicators.warmup_candles()
    }

    /// Evaluate a completed candle against the full retained history.
    /// Returns an event only for entry signals; every suppression path and
    /// the neutral decision yield `None`.
    pub fn on_candle_complete(&mut self, history: &[Candle]) -> Option<SignalEvent> {
        let last = history.last()?;
        let now = last.period_start;

        // Suppression gates, in order. Cheapest checks first.
        if self.position_open {
            debug!("Position open, skipping signal evaluation");
            return None;
        }
        if !self.session.is_open(now) {
            debug!("Outside trading hours, skipping signal evaluation");
            return None;
        }
        if self.session.in_opening_grace(now) {
            debug!("Within post-open grace window, skipping signal evaluation");
            return None;
        }
        if history.len() < self.indicators.warmup_candles() {
            debug!(
                "Waiting for warm-up: {}/{} candles",
                history.len(),
                self.indicators.warmup_candles()
            );
            return None;
        }

        let snapshot = self.indicators.evaluate(history)?;
        let signal = self.decide(&snapshot);
        if signal == Signal::Hold {
            return None;
        }

        let strike = atm_strike(snapshot.close, self.strike_interval);
        self.last_signal = signal;
        self.last_signal_time = Some(now);
        self.signals_generated += 1;
        match signal {
            Signal::LongEntry => self.long_signals += 1,
            Signal::ShortEntry => self.short_signals += 1,
            _ => {}
        }

        info!(
            "Signal {} | spot {:.2} | ATM strike {} | EMA {:.2} | RSI {:.2} | VWAP {:.2}",
            signal, snapshot.close, strike, snapshot.ema, snapshot.rsi, snapshot.vwap
        );

        Some(SignalEvent {
            signal,
            spot_price: snapshot.close,
            atm_strike: strike,
            atr: snapshot.atr,
            timestamp: now,
        })
    }

    /// The pure decision rule.
    fn decide(&self, s: &IndicatorSnapshot) -> Signal {
        let long = s.close > s.ema && s.close > s.vwap && s.rsi > self.rsi_overbought;
        let short = s.close < s.ema && s.close < s.vwap && s.rsi < self.rsi_oversold;

        if long {
            Signal::LongEntry
        } else if short {
            Signal::ShortEntry
        } else {
            Signal::Hold
        }
    }

    pub fn stats(&self) -> SignalStats {
        SignalStats {
            generated: self.signals_generated,
            long_signals: self.long_signals,
            short_signals: self.short_signals,
            last_signal: self.last_signal,
            last_signal_time: self.last_signal_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn session() -> TradingSession {
        TradingSession::new(
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            5,
        )
    }

    fn engine() -> AlphaEngine {
        AlphaEngine::new(IndicatorEngine::new(9, 14, 14), session(), 60.0, 40.0, 100)
    }

    fn candles_with_closes(closes: &[f64], start_hour: u32, start_min: u32) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let minutes = (start_min as usize + i) as u32;
                let ts = NaiveDate::from_ymd_opt(2024, 7, 1)
                    .unwrap()
                    .and_hms_opt(start_hour + minutes / 60, minutes % 60, 0)
                    .unwrap();
                Candle {
                    period_start: ts,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 100,
                }
            })
            .collect()
    }

    fn rising_closes() -> Vec<f64> {
        (0..15).map(|i| 100.0 + i as f64).collect()
    }

    fn falling_closes() -> Vec<f64> {
        (0..15).map(|i| 114.0 - i as f64).collect()
    }

    #[test]
    fn test_rising_market_emits_long_entry() {
        let mut engine = engine();
        let history = candles_with_closes(&rising_closes(), 10, 0);
        let event = engine.on_candle_complete(&history).unwrap();

        assert_eq!(event.signal, Signal::LongEntry);
        assert_eq!(event.spot_price, 114.0);
        assert_eq!(event.atm_strike, 100);
        assert_eq!(event.signal.option_side(), Some(OptionSide::Call));
        assert_eq!(engine.stats().long_signals, 1);
    }

    #[test]
    fn test_falling_market_emits_short_entry() {
        let mut engine = engine();
        let history = candles_with_closes(&falling_closes(), 10, 0);
        let event = engine.on_candle_complete(&history).unwrap();

        assert_eq!(event.signal, Signal::ShortEntry);
        assert_eq!(event.signal.option_side(), Some(OptionSide::Put));
    }

    #[test]
    fn test_suppressed_while_position_open() {
        let mut engine = engine();
        engine.set_position_open(true);
        let history = candles_with_closes(&rising_closes(), 10, 0);
        assert!(engine.on_candle_complete(&history).is_none());

        engine.set_position_open(false);
        assert!(engine.on_candle_complete(&history).is_some());
    }

    #[test]
    fn test_suppressed_outside_trading_hours() {
        let mut engine = engine();
        let history = candles_with_closes(&rising_closes(), 16, 0);
        assert!(engine.on_candle_complete(&history).is_none());
    }

    #[test]
    fn test_suppressed_in_opening_grace() {
        let mut engine = engine();
        // Last candle lands at 9:17, inside the 5-minute grace window
        let history = candles_with_closes(&rising_closes(), 9, 3);
        assert!(engine.on_candle_complete(&history).is_none());
    }

    #[test]
    fn test_suppressed_below_warmup() {
        let mut engine = engine();
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let history = candles_with_closes(&closes, 10, 0);
        assert!(engine.on_candle_complete(&history).is_none());
        assert_eq!(engine.stats().generated, 0);
    }

    #[test]
    fn test_neutral_market_holds() {
        let mut engine = engine();
        // Oscillating closes keep RSI mid-range
        let closes: Vec<f64> = (0..15)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let history = candles_with_closes(&closes, 10, 0);
        assert!(engine.on_candle_complete(&history).is_none());
        assert_eq!(engine.stats().last_signal, Signal::Hold);
    }
}
