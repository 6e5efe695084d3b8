//! OrderManager - turns signals into risk-managed positions. Owns the single
//! allowed open position, the session statistics, and the order throttle.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::entities::instrument::{
    next_weekly_expiry, InstrumentId, OptionContract, OptionSide,
};
use crate::domain::entities::order::{OrderRequest, OrderResponse, OrderSide};
use crate::domain::entities::position::{ExitReason, Position, SessionStats};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::alpha_engine::SignalEvent;
use crate::domain::services::throttle::{OrderThrottle, StopUpdateGate};
use crate::domain::value_objects::{price::Price, quantity::Quantity};
use crate::task_runner::retry_with_backoff;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub underlying: String,
    pub quantity: Quantity,
    pub stop_loss_points: f64,
    pub target_points: f64,
    /// When set, stop/target distances scale with the ATR at signal time
    /// instead of the fixed point distances (floored at the fixed values).
    pub atr_stop_multiplier: Option<f64>,
    pub slippage_buffer: f64,
    pub min_tick: f64,
    pub max_daily_loss: f64,
    pub max_positions: u32,
    pub orders_per_second: u32,
    pub stop_update_min_points: f64,
    pub stop_update_min_interval: Duration,
    pub order_retry_attempts: u32,
    pub order_retry_delay: Duration,
}

/// Everything mutated on the trading path, guarded by one lock so tick-driven
/// exits and signal-driven entries cannot interleave. The lock is held across
/// order placement: an in-flight order always completes before a competing
/// entry or exit proceeds.
struct ExecutionState {
    position: Option<Position>,
    stats: SessionStats,
    stop_gate: StopUpdateGate,
}

pub struct OrderManager {
    config: RiskConfig,
    broker: Arc<dyn BrokerClient>,
    throttle: OrderThrottle,
    state: Mutex<ExecutionState>,
    instrument_cache: Mutex<LruCache<(u32, OptionSide), OptionContract>>,
}

impl OrderManager {
    pub fn new(config: RiskConfig, broker: Arc<dyn BrokerClient>, session_date: NaiveDate) -> Self {
        let throttle = OrderThrottle::new(config.orders_per_second);
        let stop_gate = StopUpdateGate::new(
            config.stop_update_min_points,
            config.stop_update_min_interval,
        );
        let cache_size = NonZeroUsize::new(64).expect("cache size is non-zero");

        OrderManager {
            config,
            broker,
            throttle,
            state: Mutex::new(ExecutionState {
                position: None,
                stats: SessionStats::new(session_date),
                stop_gate,
            }),
            instrument_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Map a strike/side pair to a tradable contract for the next weekly
    /// expiry. Lookup failures are reported, not retried.
    pub async fn resolve_instrument(
        &self,
        strike: u32,
        side: OptionSide,
        at: NaiveDateTime,
    ) -> EngineResult<OptionContract> {
        {
            let mut cache = self.instrument_cache.lock().await;
            if let Some(contract) = cache.get(&(strike, side)) {
                return Ok(contract.clone());
            }
        }

        let expiry = next_weekly_expiry(at);
        let contract = self
            .broker
            .resolve_option(&self.config.underlying, strike, side, expiry)
            .await?;

        self.instrument_cache
            .lock()
            .await
            .put((strike, side), contract.clone());
        Ok(contract)
    }

    /// Place a marketable limit order. Suspends on the throttle when the
    /// submission budget is exhausted; policy rejections come back as typed
    /// errors before anything reaches the broker.
    pub async fn place_order(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        quantity: Quantity,
        price: Option<Price>,
    ) -> EngineResult<OrderResponse> {
        let mut state = self.state.lock().await;
        self.place_order_locked(&mut state, instrument, side, quantity, price)
            .await
            .map(|(response, _)| response)
    }

    /// Core submission path. Returns the response together with the limit
    /// price actually sent, for fill-price accounting.
    async fn place_order_locked(
        &self,
        state: &mut ExecutionState,
        instrument: &InstrumentId,
        side: OrderSide,
        quantity: Quantity,
        price: Option<Price>,
    ) -> EngineResult<(OrderResponse, Price)> {
        self.throttle.acquire().await;

        if state.stats.total_pnl <= -self.config.max_daily_loss {
            return Err(EngineError::DailyLossLimitReached {
                pnl: state.stats.total_pnl,
                limit: self.config.max_daily_loss,
            });
        }

        let open_positions = state.position.is_some() as u32;
        if side == OrderSide::Buy && open_positions >= self.config.max_positions {
            return Err(EngineError::PositionLimitReached {
                limit: self.config.max_positions,
            });
        }

        let limit_price = match price {
            Some(p) => p,
            None => {
                let ltp = self.broker.quote_ltp(instrument).await?;
                let priced = match side {
                    OrderSide::Buy => ltp.add_points(self.config.slippage_buffer),
                    OrderSide::Sell => {
                        ltp.sub_points_floored(self.config.slippage_buffer, self.config.min_tick)
                    }
                };
                priced.map_err(EngineError::InvalidInput)?
            }
        };

        let request = OrderRequest::limit(instrument.clone(), side, limit_price, quantity);
        request.validate().map_err(EngineError::InvalidInput)?;

        info!(
            "Placing order: {} {} @ {} ({})",
            side, quantity, limit_price, instrument
        );

        let response = retry_with_backoff(
            "place_order",
            self.config.order_retry_attempts,
            self.config.order_retry_delay,
            || self.broker.place_order(&request),
        )
        .await?;

        state.stats.orders_placed += 1;
        Ok((response, limit_price))
    }

    /// Execute an entry signal: resolve the ATM contract, buy it, install the
    /// position with its stop and target. Returns `None` for every suppressed
    /// or failed path; reasons are logged at the point of failure.
    pub async fn execute_signal(&self, event: &SignalEvent) -> Option<Position> {
        let side = match event.signal.option_side() {
            Some(side) => side,
            None => {
                warn!("Signal {} is not an entry, ignoring", event.signal);
                return None;
            }
        };

        let mut state = self.state.lock().await;
        if state.position.is_some() {
            warn!("Position already open, ignoring {} signal", event.signal);
            return None;
        }

        let contract = match self
            .resolve_instrument(event.atm_strike, side, event.timestamp)
            .await
        {
            Ok(contract) => contract,
            Err(e) => {
                error!(
                    "Could not resolve contract for strike {} {}: {}",
                    event.atm_strike, side, e
                );
                return None;
            }
        };

        let (response, limit_price) = match self
            .place_order_locked(
                &mut state,
                &contract.id,
                OrderSide::Buy,
                self.config.quantity,
                None,
            )
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_policy_rejection() => {
                warn!("Entry suppressed: {}", e);
                return None;
            }
            Err(e) => {
                error!("Entry order failed: {}", e);
                return None;
            }
        };

        if !response.is_filled() {
            error!("Entry order {} not filled ({:?})", response.order_id, response.status);
            return None;
        }

        let entry_price = response.fill_price_or(limit_price.value());
        let (stop_distance, target_distance) = self.exit_distances(event.atr);
        let stop_loss = (entry_price - stop_distance).max(self.config.min_tick);
        let target = entry_price + target_distance;

        let position = Position {
            instrument: contract.id.clone(),
            symbol: format!("{} {} {}", self.config.underlying, contract.strike, side),
            side,
            strike: contract.strike,
            quantity: self.config.quantity,
            entry_price,
            entry_time: event.timestamp,
            order_id: response.order_id,
            stop_loss,
            target,
            mark_price: None,
            pnl: 0.0,
        };

        info!(
            "Position opened: {} @ {:.2} | SL {:.2} | target {:.2}",
            position.symbol, entry_price, stop_loss, target
        );

        // Fresh gate per position so the first trail update is never blocked
        // by the previous trade.
        state.stop_gate = StopUpdateGate::new(
            self.config.stop_update_min_points,
            self.config.stop_update_min_interval,
        );
        state.position = Some(position.clone());
        Some(position)
    }

    /// Stop/target distances for a new position. With ATR sizing enabled the
    /// distances scale with volatility but never drop below the fixed ones.
    fn exit_distances(&self, atr: Option<f64>) -> (f64, f64) {
        if let (Some(multiplier), Some(atr)) = (self.config.atr_stop_multiplier, atr) {
            let stop = (atr * multiplier).max(self.config.stop_loss_points);
            let reward_ratio = self.config.target_points / self.config.stop_loss_points;
            return (stop, stop * reward_ratio);
        }
        (self.config.stop_loss_points, self.config.target_points)
    }

    /// Evaluate stop/target against the latest traded price. The stop check
    /// takes precedence when both would trigger. Returns whether the position
    /// was exited.
    pub async fn check_exit_conditions(&self, current_price: f64) -> bool {
        let mut state = self.state.lock().await;

        let reason = match state.position.as_mut() {
            Some(position) => {
                position.update_mark(current_price);
                if position.stop_hit(current_price) {
                    warn!("Stop loss hit at {:.2}", current_price);
                    ExitReason::StopLoss
                } else if position.target_hit(current_price) {
                    info!("Target hit at {:.2}", current_price);
                    ExitReason::Target
                } else {
                    return false;
                }
            }
            None => return false,
        };

        self.exit_position_locked(&mut state, current_price, reason)
            .await;
        true
    }

    /// Trail the stop behind a favourable move. Never loosens risk: the stop
    /// only moves up, and only when the update gate passes.
    pub async fn update_trailing_stop(&self, current_price: f64) {
        let mut state = self.state.lock().await;
        let ExecutionState {
            position, stop_gate, ..
        } = &mut *state;

        let Some(position) = position.as_mut() else {
            return;
        };

        let new_stop = current_price - self.config.stop_loss_points;
        if new_stop <= position.stop_loss {
            return;
        }
        if !stop_gate.permits(new_stop) {
            return;
        }

        let old_stop = position.stop_loss;
        position.stop_loss = new_stop;
        stop_gate.mark_applied(new_stop);
        debug!("Trailing stop {:.2} -> {:.2}", old_stop, new_stop);
    }

    /// Forced exit at the latest quote, used on shutdown and on daily-loss
    /// breach.
    pub async fn close_all_positions(&self, reason: ExitReason) {
        let mut state = self.state.lock().await;
        let instrument = match &state.position {
            Some(position) => position.instrument.clone(),
            None => return,
        };

        match self.broker.quote_ltp(&instrument).await {
            Ok(ltp) => {
                self.exit_position_locked(&mut state, ltp.value(), reason)
                    .await;
            }
            Err(e) => {
                error!("Could not fetch quote for forced exit ({}): {}", reason, e);
            }
        }
    }

    /// Exit the open position at `exit_price`, fold the realized P&L into the
    /// session stats and clear the slot. The slot is cleared even when the
    /// exit order fails to submit - the engine must not keep acting on a
    /// position it already decided to abandon.
    async fn exit_position_locked(
        &self,
        state: &mut ExecutionState,
        exit_price: f64,
        reason: ExitReason,
    ) {
        let Some(position) = state.position.take() else {
            return;
        };

        let sell_price = Price::new((exit_price - self.config.slippage_buffer).max(self.config.min_tick));
        match sell_price {
            Ok(price) => {
                if let Err(e) = self
                    .place_order_locked(
                        state,
                        &position.instrument,
                        OrderSide::Sell,
                        position.quantity,
                        Some(price),
                    )
                    .await
                {
                    error!("Exit order failed ({}): {}", reason, e);
                }
            }
            Err(e) => error!("Exit price invalid ({}): {}", reason, e),
        }

        let pnl = (exit_price - position.entry_price) * position.quantity.value() as f64;
        state.stats.record_close(pnl);

        info!(
            "Position closed ({}): entry {:.2} | exit {:.2} | P&L {:+.2}",
            reason, position.entry_price, exit_price, pnl
        );
    }

    pub async fn has_open_position(&self) -> bool {
        self.state.lock().await.position.is_some()
    }

    pub async fn current_position(&self) -> Option<Position> {
        self.state.lock().await.position.clone()
    }

    pub async fn session_stats(&self) -> SessionStats {
        self.state.lock().await.stats.clone()
    }

    /// True once the cumulative session P&L breaches the daily ceiling.
    pub async fn daily_loss_breached(&self) -> bool {
        self.state.lock().await.stats.total_pnl <= -self.config.max_daily_loss
    }

    /// Reset session statistics when the trading day rolls over.
    pub async fn roll_session(&self, date: NaiveDate) {
        let mut state = self.state.lock().await;
        if state.stats.date != date {
            info!("New session {}: statistics reset", date);
            state.stats = SessionStats::new(date);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// In-memory broker with instant fills, shared by the service tests and
    /// the domain-level risk tests.
    pub struct MockBroker {
        pub ltp: std::sync::Mutex<f64>,
        pub orders_placed: AtomicU32,
        pub fail_submissions: AtomicBool,
        pub fill_delay: Duration,
    }

    impl MockBroker {
        pub fn with_ltp(ltp: f64) -> Self {
            MockBroker {
                ltp: std::sync::Mutex::new(ltp),
                orders_placed: AtomicU32::new(0),
                fail_submissions: AtomicBool::new(false),
                fill_delay: Duration::ZERO,
            }
        }

        pub fn order_count(&self) -> u32 {
            self.orders_placed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrokerClient for MockBroker {
        fn name(&self) -> &str {
            "MockBroker"
        }

        async fn resolve_option(
            &self,
            underlying: &str,
            strike: u32,
            side: OptionSide,
            expiry: NaiveDate,
        ) -> EngineResult<OptionContract> {
            Ok(OptionContract {
                id: InstrumentId::new(format!("{}_{}_{}", underlying, strike, side)),
                underlying: underlying.to_string(),
                strike,
                side,
                expiry,
            })
        }

        async fn quote_ltp(&self, _instrument: &InstrumentId) -> EngineResult<Price> {
            let ltp = *self.ltp.lock().expect("ltp lock");
            Price::new(ltp).map_err(EngineError::InvalidInput)
        }

        async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderResponse> {
            if !self.fill_delay.is_zero() {
                tokio::time::sleep(self.fill_delay).await;
            }
            if self.fail_submissions.load(Ordering::SeqCst) {
                return Err(EngineError::OrderSubmission("simulated outage".into()));
            }
            let n = self.orders_placed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OrderResponse {
                order_id: format!("MOCK_{}", n),
                status: crate::domain::entities::order::OrderStatus::Filled,
                filled_quantity: request.quantity.value(),
                average_price: request.price.map(|p| p.value()),
            })
        }
    }

    pub fn risk_config() -> RiskConfig {
        RiskConfig {
            underlying: "BANKNIFTY".to_string(),
            quantity: Quantity::new(30).expect("test quantity"),
            stop_loss_points: 20.0,
            target_points: 40.0,
            atr_stop_multiplier: None,
            slippage_buffer: 5.0,
            min_tick: 0.05,
            max_daily_loss: 5000.0,
            max_positions: 1,
            orders_per_second: 25,
            stop_update_min_points: 5.0,
            stop_update_min_interval: Duration::ZERO,
            order_retry_attempts: 2,
            order_retry_delay: Duration::from_millis(1),
        }
    }

    pub fn entry_event(spot: f64, strike: u32) -> SignalEvent {
        use crate::domain::services::alpha_engine::Signal;
        SignalEvent {
            signal: Signal::LongEntry,
            spot_price: spot,
            atm_strike: strike,
            atr: None,
            timestamp: NaiveDate::from_ymd_opt(2024, 7, 1)
                .expect("valid date")
                .and_hms_opt(10, 0, 0)
                .expect("valid time"),
        }
    }

    pub fn session_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).expect("valid date")
    }
}
