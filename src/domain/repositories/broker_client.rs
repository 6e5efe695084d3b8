//! Broker Client Trait
//!
//! Common interface for the order/quote collaborator. The execution manager
//! operates against this abstraction, so live HTTP brokers and the paper
//! broker are interchangeable and tests can mock fills.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::entities::instrument::{InstrumentId, OptionContract, OptionSide};
use crate::domain::entities::order::{OrderRequest, OrderResponse};
use crate::domain::errors::EngineResult;
use crate::domain::value_objects::price::Price;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Name of this broker backend, for logs.
    fn name(&self) -> &str;

    /// Map (underlying, strike, option side, expiry) to a tradable contract.
    async fn resolve_option(
        &self,
        underlying: &str,
        strike: u32,
        side: OptionSide,
        expiry: NaiveDate,
    ) -> EngineResult<OptionContract>;

    /// Current reference price for an instrument, used to price marketable
    /// limit orders.
    async fn quote_ltp(&self, instrument: &InstrumentId) -> EngineResult<Price>;

    /// Submit an order and return the fill/rejection.
    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderResponse>;
}
