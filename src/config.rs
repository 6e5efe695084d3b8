use std::time::Duration;

use chrono::NaiveTime;

use crate::domain::services::order_manager::RiskConfig;
use crate::domain::services::trading_session::TradingSession;
use crate::domain::value_objects::quantity::Quantity;

/// Engine configuration: strategy parameters, risk limits, and pipeline
/// sizing. Constants by default, selectively overridable from environment
/// variables.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub paper_trading: bool,
    pub underlying: String,
    /// Security id of the index the tick feed is subscribed to.
    pub index_security_id: String,

    // Candles and indicators
    pub timeframe_seconds: u32,
    pub max_candle_history: usize,
    pub warmup_candles: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub atr_period: usize,
    pub atr_stop_multiplier: Option<f64>,

    // Position sizing and risk
    pub lot_size: u32,
    pub num_lots: u32,
    pub stop_loss_points: f64,
    pub target_points: f64,
    pub slippage_buffer: f64,
    pub min_tick: f64,
    pub max_daily_loss: f64,
    pub max_positions: u32,

    // Throttles
    pub orders_per_second: u32,
    pub stop_update_min_points: f64,
    pub stop_update_min_interval_secs: u64,

    // Trading hours
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub open_grace_minutes: i64,
    pub strike_interval: u32,

    // Pipeline
    pub tick_queue_capacity: usize,
    pub candle_queue_capacity: usize,
    pub signal_queue_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub order_retry_attempts: u32,
    pub order_retry_delay_ms: u64,

    // Collaborator endpoints
    pub feed_url: String,
    pub broker_base_url: String,
}

impl TradingConfig {
    pub fn default() -> TradingConfig {
        TradingConfig {
            paper_trading: true,
            underlying: "BANKNIFTY".to_string(),
            index_security_id: "25".to_string(),

            timeframe_seconds: 60,
            max_candle_history: 100,
            warmup_candles: 15,
            ema_period: 9,
            rsi_period: 14,
            rsi_overbought: 60.0,
            rsi_oversold: 40.0,
            atr_period: 14,
            atr_stop_multiplier: None,

            lot_size: 15,
            num_lots: 2,
            stop_loss_points: 20.0,
            target_points: 40.0,
            slippage_buffer: 5.0,
            min_tick: 0.05,
            max_daily_loss: 5000.0,
            max_positions: 1,

            orders_per_second: 25,
            stop_update_min_points: 5.0,
            stop_update_min_interval_secs: 2,

            market_open: NaiveTime::from_hms_opt(9, 15, 0).expect("valid open time"),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).expect("valid close time"),
            open_grace_minutes: 5,
            strike_interval: 100,

            tick_queue_capacity: 1000,
            candle_queue_capacity: 100,
            signal_queue_capacity: 10,
            heartbeat_interval_secs: 60,
            order_retry_attempts: 2,
            order_retry_delay_ms: 500,

            feed_url: "wss://feed.example.com/marketdata".to_string(),
            broker_base_url: "https://api.example.com/v2".to_string(),
        }
    }

    /// Load configuration from environment variables, falling back to the
    /// defaults. Invalid values are rejected with a warning rather than
    /// silently accepted.
    pub fn from_env() -> TradingConfig {
        let mut config = TradingConfig::default();

        if let Ok(paper) = std::env::var("PAPER_TRADING") {
            config.paper_trading = paper.to_lowercase() == "true" || paper == "1";
        }

        if let Ok(timeframe) = std::env::var("CANDLE_TIMEFRAME_SECONDS") {
            match timeframe.parse::<u32>() {
                Ok(value) if (5..=3600).contains(&value) => {
                    config.timeframe_seconds = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid CANDLE_TIMEFRAME_SECONDS value: {} (must be 5..=3600), using default: {}",
                        value,
                        config.timeframe_seconds
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse CANDLE_TIMEFRAME_SECONDS '{}': {}, using default: {}",
                        timeframe,
                        e,
                        config.timeframe_seconds
                    );
                }
            }
        }

        if let Ok(lots) = std::env::var("NUM_LOTS") {
            if let Ok(value) = lots.parse::<u32>() {
                if value > 0 && value <= 50 {
                    config.num_lots = value;
                }
            }
        }

        if let Ok(stop) = std::env::var("STOP_LOSS_POINTS") {
            if let Ok(value) = stop.parse::<f64>() {
                if value > 0.0 {
                    config.stop_loss_points = value;
                }
            }
        }

        if let Ok(target) = std::env::var("TARGET_POINTS") {
            if let Ok(value) = target.parse::<f64>() {
                if value > 0.0 {
                    config.target_points = value;
                }
            }
        }

        if let Ok(buffer) = std::env::var("SLIPPAGE_BUFFER") {
            if let Ok(value) = buffer.parse::<f64>() {
                if value >= 0.0 {
                    config.slippage_buffer = value;
                }
            }
        }

        if let Ok(max_loss) = std::env::var("MAX_DAILY_LOSS") {
            if let Ok(value) = max_loss.parse::<f64>() {
                if value > 0.0 {
                    config.max_daily_loss = value;
                }
            }
        }

        if let Ok(max_positions) = std::env::var("MAX_POSITIONS") {
            if let Ok(value) = max_positions.parse::<u32>() {
                if value >= 1 {
                    config.max_positions = value;
                }
            }
        }

        if let Ok(rate) = std::env::var("MAX_ORDERS_PER_SECOND") {
            if let Ok(value) = rate.parse::<u32>() {
                if (1..=100).contains(&value) {
                    config.orders_per_second = value;
                }
            }
        }

        if let Ok(multiplier) = std::env::var("ATR_STOP_MULTIPLIER") {
            match multiplier.parse::<f64>() {
                Ok(value) if value > 0.0 => config.atr_stop_multiplier = Some(value),
                _ => tracing::warn!(
                    "Invalid ATR_STOP_MULTIPLIER '{}', ATR stop sizing stays disabled",
                    multiplier
                ),
            }
        }

        if let Ok(url) = std::env::var("FEED_URL") {
            config.feed_url = url;
        }

        if let Ok(url) = std::env::var("BROKER_BASE_URL") {
            config.broker_base_url = url;
        }

        config
    }

    pub fn quantity(&self) -> u32 {
        self.lot_size * self.num_lots
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeframe_seconds == 0 {
            return Err("timeframe_seconds must be positive".to_string());
        }
        if self.lot_size == 0 || self.num_lots == 0 {
            return Err("lot_size and num_lots must be positive".to_string());
        }
        if self.stop_loss_points <= 0.0 || self.target_points <= 0.0 {
            return Err("stop_loss_points and target_points must be positive".to_string());
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err("rsi_oversold must be below rsi_overbought".to_string());
        }
        if self.warmup_candles < self.rsi_period + 1 {
            return Err(format!(
                "warmup_candles must be at least rsi_period + 1 ({})",
                self.rsi_period + 1
            ));
        }
        if self.max_candle_history < self.warmup_candles {
            return Err("max_candle_history must cover the warm-up window".to_string());
        }
        if self.market_open >= self.market_close {
            return Err("market_open must be before market_close".to_string());
        }
        if self.max_positions == 0 {
            return Err("max_positions must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn risk_config(&self) -> Result<RiskConfig, String> {
        Ok(RiskConfig {
            underlying: self.underlying.clone(),
            quantity: Quantity::new(self.quantity())?,
            stop_loss_points: self.stop_loss_points,
            target_points: self.target_points,
            atr_stop_multiplier: self.atr_stop_multiplier,
            slippage_buffer: self.slippage_buffer,
            min_tick: self.min_tick,
            max_daily_loss: self.max_daily_loss,
            max_positions: self.max_positions,
            orders_per_second: self.orders_per_second,
            stop_update_min_points: self.stop_update_min_points,
            stop_update_min_interval: Duration::from_secs(self.stop_update_min_interval_secs),
            order_retry_attempts: self.order_retry_attempts,
            order_retry_delay: Duration::from_millis(self.order_retry_delay_ms),
        })
    }

    pub fn trading_session(&self) -> TradingSession {
        TradingSession::new(self.market_open, self.market_close, self.open_grace_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TradingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantity(), 30);
        assert!(config.paper_trading);
    }

    #[test]
    fn test_risk_config_conversion() {
        let config = TradingConfig::default();
        let risk = config.risk_config().unwrap();
        assert_eq!(risk.quantity.value(), 30);
        assert_eq!(risk.stop_loss_points, 20.0);
        assert_eq!(
            risk.stop_update_min_interval,
            Duration::from_secs(config.stop_update_min_interval_secs)
        );
    }

    #[test]
    fn test_validate_rejects_inverted_rsi_thresholds() {
        let mut config = TradingConfig::default();
        config.rsi_oversold = 70.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_warmup() {
        let mut config = TradingConfig::default();
        config.warmup_candles = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_history() {
        let mut config = TradingConfig::default();
        config.max_candle_history = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("CANDLE_TIMEFRAME_SECONDS", "120");
        std::env::set_var("MAX_DAILY_LOSS", "2500");
        std::env::set_var("PAPER_TRADING", "false");

        let config = TradingConfig::from_env();
        assert_eq!(config.timeframe_seconds, 120);
        assert_eq!(config.max_daily_loss, 2500.0);
        assert!(!config.paper_trading);

        // Out-of-range values fall back to the default.
        std::env::set_var("CANDLE_TIMEFRAME_SECONDS", "4");
        let config = TradingConfig::from_env();
        assert_eq!(config.timeframe_seconds, 60);

        std::env::remove_var("CANDLE_TIMEFRAME_SECONDS");
        std::env::remove_var("MAX_DAILY_LOSS");
        std::env::remove_var("PAPER_TRADING");
    }
}
