use chrono::NaiveDateTime;

use crate::domain::entities::candle::Candle;

/// Latest indicator values derived from the retained candle history.
/// Fixed-shape on purpose: an absent snapshot (None) is the only way to
/// express "not warmed up yet" or "value not finite".
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ema: f64,
    pub rsi: f64,
    pub vwap: f64,
    pub atr: Option<f64>,
    pub timestamp: NaiveDateTime,
}

/// An indicator computed over a candle slice. Implementations are pure
/// functions of the input; nothing is cached between calls, so every
/// completed candle triggers a fresh recomputation from history. That is
/// intentional: incremental updates drift, full recomputation cannot.
pub trait Indicator {
    fn latest(&self, candles: &[Candle]) -> Option<f64>;
}

pub struct Ema {
    pub period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Ema { period }
    }

    /// Full EMA series. The first value is the SMA of the first `period`
    /// closes, then `ema = close * k + ema * (1 - k)` with `k = 2/(period+1)`.
    pub fn series(&self, candles: &[Candle]) -> Vec<f64> {
        if self.period == 0 || candles.len() < self.period {
            return vec![];
        }
        let k = 2.0 / (self.period as f64 + 1.0);

        let seed: f64 = candles[..self.period].iter().map(|c| c.close).sum::<f64>()
            / self.period as f64;
        let mut ema = seed;
        let mut values = Vec::with_capacity(candles.len() - self.period + 1);
        values.push(ema);

        for candle in candles.iter().skip(self.period) {
            ema = candle.close * k + ema * (1.0 - k);
            values.push(ema);
        }

        values
    }
}

impl Indicator for Ema {
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        self.series(candles).last().copied()
    }
}

pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Rsi { period }
    }
}

impl Indicator for Rsi {
    /// Wilder RSI: simple mean of the first `period` gains/losses, then
    /// `avg = (avg * (period - 1) + new) / period`. 100 when the average
    /// loss is zero.
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return None;
        }

        let mut gains = Vec::with_capacity(candles.len() - 1);
        let mut losses = Vec::with_capacity(candles.len() - 1);
        for pair in candles.windows(2) {
            let change = pair[1].close - pair[0].close;
            if change > 0.0 {
                gains.push(change);
                losses.push(0.0);
            } else {
                gains.push(0.0);
                losses.push(change.abs());
            }
        }

        let mut avg_gain: f64 = gains[..self.period].iter().sum::<f64>() / self.period as f64;
        let mut avg_loss: f64 = losses[..self.period].iter().sum::<f64>() / self.period as f64;

        for i in self.period..gains.len() {
            avg_gain = (avg_gain * (self.period as f64 - 1.0) + gains[i]) / self.period as f64;
            avg_loss = (avg_loss * (self.period as f64 - 1.0) + losses[i]) / self.period as f64;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

pub struct Vwap;

impl Indicator for Vwap {
    /// Session-cumulative VWAP over the entire retained history:
    /// `sum(typical_price * volume) / sum(volume)`.
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        if candles.is_empty() {
            return None;
        }
        let mut cum_volume = 0.0;
        let mut cum_tp_volume = 0.0;
        for candle in candles {
            let volume = candle.volume as f64;
            cum_volume += volume;
            cum_tp_volume += candle.typical_price() * volume;
        }
        if cum_volume <= f64::EPSILON {
            return candles.last().map(|c| c.typical_price());
        }
        Some(cum_tp_volume / cum_volume)
    }
}

pub struct Atr {
    pub period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Atr { period }
    }
}

impl Indicator for Atr {
    /// Average true range with a simple-mean seed and Wilder smoothing.
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return None;
        }

        let mut true_ranges = Vec::with_capacity(candles.len());
        true_ranges.push(candles[0].high - candles[0].low);
        for pair in candles.windows(2) {
            let prev_close = pair[0].close;
            let (high, low) = (pair[1].high, pair[1].low);
            let tr = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            true_ranges.push(tr);
        }

        let mut atr: f64 =
            true_ranges[1..=self.period].iter().sum::<f64>() / self.period as f64;
        for &tr in &true_ranges[self.period + 1..] {
            atr = (atr * (self.period as f64 - 1.0) + tr) / self.period as f64;
        }
        Some(atr)
    }
}

/// Computes the full snapshot for signal evaluation. Nothing is returned
/// below the warm-up threshold (RSI period + 1) or when any core value is
/// not finite. ATR is auxiliary and may lag behind its own warm-up without
/// blocking the snapshot.
pub struct IndicatorEngine {
    ema: Ema,
    rsi: Rsi,
    vwap: Vwap,
    atr: Atr,
    warmup: usize,
}

impl IndicatorEngine {
    pub fn new(ema_period: usize, rsi_period: usize, atr_period: usize) -> Self {
        IndicatorEngine {
            ema: Ema::new(ema_period),
            rsi: Rsi::new(rsi_period),
            vwap: Vwap,
            atr: Atr::new(atr_period),
            warmup: rsi_period + 1,
        }
    }

    pub fn warmup_candles(&self) -> usize {
        self.warmup
    }

    pub fn evaluate(&self, candles: &[Candle]) -> Option<IndicatorSnapshot> {
        if candles.len() < self.warmup {
            return None;
        }

        let last = candles.last()?;
        let ema = self.ema.latest(candles)?;
        let rsi = self.rsi.latest(candles)?;
        let vwap = self.vwap.latest(candles)?;

        if !ema.is_finite() || !rsi.is_finite() || !vwap.is_finite() {
            return None;
        }

        Some(IndicatorSnapshot {
            close: last.close,
            ema,
            rsi,
            vwap,
            atr: self.atr.latest(candles).filter(|v| v.is_finite()),
            timestamp: last.period_start,
        })
    }
}
