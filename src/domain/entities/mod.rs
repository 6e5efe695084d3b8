pub mod candle;
pub mod instrument;
pub mod order;
pub mod position;
pub mod tick;
