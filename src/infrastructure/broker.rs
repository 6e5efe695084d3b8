//! Broker collaborators: a paper broker with instant simulated fills and a
//! REST client for the live order/quote API. Credential acquisition is out of
//! scope; the REST client only carries the already-issued token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::entities::instrument::{InstrumentId, OptionContract, OptionSide};
use crate::domain::entities::order::{OrderRequest, OrderResponse, OrderSide, OrderStatus, OrderType, Validity};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::value_objects::price::Price;

/// Simulated broker: every order fills immediately at its limit price.
pub struct PaperBroker {
    reference_price: Mutex<f64>,
    order_seq: AtomicU64,
}

impl PaperBroker {
    pub fn new(initial_premium: f64) -> Self {
        info!("Paper trading mode - orders will be simulated");
        PaperBroker {
            reference_price: Mutex::new(initial_premium),
            order_seq: AtomicU64::new(0),
        }
    }

    /// Move the simulated option premium, e.g. from the tick stream.
    pub fn set_reference_price(&self, price: f64) {
        if let Ok(mut reference) = self.reference_price.lock() {
            *reference = price;
        }
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn resolve_option(
        &self,
        underlying: &str,
        strike: u32,
        side: OptionSide,
        expiry: NaiveDate,
    ) -> EngineResult<OptionContract> {
        let id = format!("PAPER_{}_{}_{}_{}", underlying, strike, side, expiry);
        debug!("Resolved paper contract {}", id);
        Ok(OptionContract {
            id: InstrumentId::new(id),
            underlying: underlying.to_string(),
            strike,
            side,
            expiry,
        })
    }

    async fn quote_ltp(&self, _instrument: &InstrumentId) -> EngineResult<Price> {
        let ltp = self
            .reference_price
            .lock()
            .map(|p| *p)
            .map_err(|_| EngineError::QuoteUnavailable {
                instrument: "paper".to_string(),
            })?;
        Price::new(ltp).map_err(EngineError::InvalidInput)
    }

    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderResponse> {
        request.validate().map_err(EngineError::InvalidInput)?;
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("PAPER_{}", seq);
        info!(
            "[paper] {} {} {} filled @ {:?}",
            request.side, request.quantity, request.instrument, request.price
        );
        Ok(OrderResponse {
            order_id,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity.value(),
            average_price: request.price.map(|p| p.value()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RestBrokerConfig {
    pub base_url: String,
    pub client_id: String,
    pub access_token: String,
}

/// JSON client for the live broker API.
pub struct RestBroker {
    client: Client,
    config: RestBrokerConfig,
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    security_id: &'a str,
    transaction_type: &'a str,
    quantity: u32,
    order_type: &'a str,
    price: Option<f64>,
    validity: &'a str,
    product_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderAck {
    order_id: String,
    order_status: String,
    #[serde(default)]
    filled_quantity: u32,
    #[serde(default)]
    average_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LtpResponse {
    ltp: f64,
}

#[derive(Debug, Deserialize)]
struct OptionChainEntry {
    security_id: String,
    strike_price: f64,
    option_type: String,
}

impl RestBroker {
    pub fn new(config: RestBrokerConfig) -> Self {
        RestBroker {
            client: Client::new(),
            config,
        }
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "PENDING" => OrderStatus::Pending,
            "OPEN" | "TRANSIT" => OrderStatus::Open,
            "TRADED" | "FILLED" => OrderStatus::Filled,
            "PART_TRADED" => OrderStatus::PartiallyFilled,
            "CANCELLED" => OrderStatus::Cancelled,
            _ => OrderStatus::Rejected,
        }
    }

    fn side_str(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[async_trait]
impl BrokerClient for RestBroker {
    fn name(&self) -> &str {
        "rest"
    }

    async fn resolve_option(
        &self,
        underlying: &str,
        strike: u32,
        side: OptionSide,
        expiry: NaiveDate,
    ) -> EngineResult<OptionContract> {
        let url = format!("{}/optionchain", self.config.base_url);
        let body = serde_json::json!({
            "underlying": underlying,
            "expiry": expiry.format("%Y-%m-%d").to_string(),
        });

        let chain: Vec<OptionChainEntry> = self
            .client
            .post(&url)
            .header("access-token", &self.config.access_token)
            .header("client-id", &self.config.client_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::OrderSubmission(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::OrderSubmission(e.to_string()))?
            .json()
            .await
            .map_err(|e| EngineError::OrderSubmission(e.to_string()))?;

        let wanted_type = side.to_string();
        chain
            .into_iter()
            .find(|entry| {
                entry.strike_price as u32 == strike && entry.option_type == wanted_type
            })
            .map(|entry| OptionContract {
                id: InstrumentId::new(entry.security_id),
                underlying: underlying.to_string(),
                strike,
                side,
                expiry,
            })
            .ok_or(EngineError::InstrumentNotFound { strike, side })
    }

    async fn quote_ltp(&self, instrument: &InstrumentId) -> EngineResult<Price> {
        let url = format!(
            "{}/marketfeed/ltp/{}",
            self.config.base_url,
            instrument.as_str()
        );

        let quote: LtpResponse = self
            .client
            .get(&url)
            .header("access-token", &self.config.access_token)
            .header("client-id", &self.config.client_id)
            .send()
            .await
            .map_err(|_| EngineError::QuoteUnavailable {
                instrument: instrument.to_string(),
            })?
            .error_for_status()
            .map_err(|_| EngineError::QuoteUnavailable {
                instrument: instrument.to_string(),
            })?
            .json()
            .await
            .map_err(|_| EngineError::QuoteUnavailable {
                instrument: instrument.to_string(),
            })?;

        Price::new(quote.ltp).map_err(EngineError::InvalidInput)
    }

    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderResponse> {
        request.validate().map_err(EngineError::InvalidInput)?;

        let url = format!("{}/orders", self.config.base_url);
        let body = PlaceOrderBody {
            security_id: request.instrument.as_str(),
            transaction_type: Self::side_str(request.side),
            quantity: request.quantity.value(),
            order_type: match request.order_type {
                OrderType::Market => "MARKET",
                OrderType::Limit => "LIMIT",
            },
            price: request.price.map(|p| p.value()),
            validity: match request.validity {
                Validity::Day => "DAY",
                Validity::ImmediateOrCancel => "IOC",
            },
            product_type: "INTRADAY",
        };

        let response = self
            .client
            .post(&url)
            .header("access-token", &self.config.access_token)
            .header("client-id", &self.config.client_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::OrderSubmission(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::OrderRejected(format!("{}: {}", status, text)));
        }

        let ack: OrderAck = response
            .json()
            .await
            .map_err(|e| EngineError::OrderSubmission(e.to_string()))?;

        Ok(OrderResponse {
            order_id: ack.order_id,
            status: Self::map_status(&ack.order_status),
            filled_quantity: ack.filled_quantity,
            average_price: ack.average_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::quantity::Quantity;

    #[tokio::test]
    async fn test_paper_broker_fills_at_limit_price() {
        let broker = PaperBroker::new(150.0);
        let request = OrderRequest::limit(
            InstrumentId::new("PAPER_X"),
            OrderSide::Buy,
            Price::new(155.0).unwrap(),
            Quantity::new(30).unwrap(),
        );

        let response = broker.place_order(&request).await.unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.filled_quantity, 30);
        assert_eq!(response.average_price, Some(155.0));
    }

    #[tokio::test]
    async fn test_paper_broker_order_ids_are_unique() {
        let broker = PaperBroker::new(150.0);
        let request = OrderRequest::limit(
            InstrumentId::new("PAPER_X"),
            OrderSide::Buy,
            Price::new(155.0).unwrap(),
            Quantity::new(30).unwrap(),
        );
        let a = broker.place_order(&request).await.unwrap();
        let b = broker.place_order(&request).await.unwrap();
        assert_ne!(a.order_id, b.order_id);
    }

    #[tokio::test]
    async fn test_paper_broker_quote_follows_reference_price() {
        let broker = PaperBroker::new(150.0);
        assert_eq!(
            broker.quote_ltp(&InstrumentId::new("X")).await.unwrap().value(),
            150.0
        );
        broker.set_reference_price(161.5);
        assert_eq!(
            broker.quote_ltp(&InstrumentId::new("X")).await.unwrap().value(),
            161.5
        );
    }

    #[tokio::test]
    async fn test_paper_broker_resolves_deterministic_ids() {
        let broker = PaperBroker::new(150.0);
        let expiry = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let a = broker
            .resolve_option("BANKNIFTY", 51_200, OptionSide::Call, expiry)
            .await
            .unwrap();
        let b = broker
            .resolve_option("BANKNIFTY", 51_200, OptionSide::Call, expiry)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.strike, 51_200);
    }

    #[test]
    fn test_rest_status_mapping() {
        assert_eq!(RestBroker::map_status("TRADED"), OrderStatus::Filled);
        assert_eq!(RestBroker::map_status("PART_TRADED"), OrderStatus::PartiallyFilled);
        assert_eq!(RestBroker::map_status("TRANSIT"), OrderStatus::Open);
        assert_eq!(RestBroker::map_status("CANCELLED"), OrderStatus::Cancelled);
        assert_eq!(RestBroker::map_status("whatever"), OrderStatus::Rejected);
    }
}
