pub mod alpha_engine;
pub mod candle_builder;
pub mod indicators;
pub mod order_manager;
pub mod throttle;
pub mod trading_session;
