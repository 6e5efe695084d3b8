use crate::domain::entities::instrument::InstrumentId;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Day,
    ImmediateOrCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub validity: Validity,
}

impl OrderRequest {
    pub fn limit(
        instrument: InstrumentId,
        side: OrderSide,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        OrderRequest {
            instrument,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            validity: Validity::Day,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if matches!(self.order_type, OrderType::Limit) && self.price.is_none() {
            return Err("Limit orders must have a price".to_string());
        }
        Ok(())
    }
}

/// Fill or rejection as reported by the broker.
#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u32,
    pub average_price: Option<f64>,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::PartiallyFilled)
    }

    /// Execution price to account against: average fill price when reported,
    /// otherwise the submitted limit price.
    pub fn fill_price_or(&self, fallback: f64) -> f64 {
        self.average_price.unwrap_or(fallback)
    }
}
