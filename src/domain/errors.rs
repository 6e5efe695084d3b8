use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::entities::instrument::OptionSide;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Feed connection failed: {0}")]
    FeedConnection(String),

    #[error("Malformed feed message: {0}")]
    FeedProtocol(String),

    #[error("No quote available for instrument {instrument}")]
    QuoteUnavailable { instrument: String },

    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order rejected by broker: {0}")]
    OrderRejected(String),

    #[error("No tradable contract for strike {strike} {side}")]
    InstrumentNotFound { strike: u32, side: OptionSide },

    #[error("Daily loss limit reached: P&L {pnl:.2} <= -{limit:.2}")]
    DailyLossLimitReached { pnl: f64, limit: f64 },

    #[error("Position limit reached: {limit} open")]
    PositionLimitReached { limit: u32 },

    #[error("A position is already open")]
    PositionAlreadyOpen,

    #[error("Insufficient candles: need {required}, have {current}")]
    InsufficientCandles { required: usize, current: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl EngineError {
    /// Transient errors are retried with backoff at their point of origin;
    /// everything else is a terminal outcome for the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::FeedConnection(_)
                | EngineError::QuoteUnavailable { .. }
                | EngineError::OrderSubmission(_)
        )
    }

    /// Policy rejections suppress the operation without crashing the
    /// pipeline and must never be retried.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::DailyLossLimitReached { .. }
                | EngineError::PositionLimitReached { .. }
                | EngineError::PositionAlreadyOpen
        )
    }
}

impl<T> From<mpsc::error::SendError<T>> for EngineError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        EngineError::ChannelClosed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::FeedConnection("reset".into()).is_transient());
        assert!(EngineError::OrderSubmission("timeout".into()).is_transient());
        assert!(!EngineError::OrderRejected("margin".into()).is_transient());
        assert!(!EngineError::PositionAlreadyOpen.is_transient());
    }

    #[test]
    fn test_policy_classification() {
        assert!(EngineError::DailyLossLimitReached {
            pnl: -5200.0,
            limit: 5000.0
        }
        .is_policy_rejection());
        assert!(EngineError::PositionLimitReached { limit: 1 }.is_policy_rejection());
        assert!(!EngineError::OrderSubmission("timeout".into()).is_policy_rejection());
    }
}
