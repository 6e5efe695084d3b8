//! Pipeline orchestrator. Wires the aggregator, signal engine, and execution
//! manager into a producer/consumer graph over bounded queues, supervises the
//! stage tasks, and drives heartbeat reporting and graceful shutdown.
//!
//! Queue policy: the tick queue backpressures the feed (blocking send), while
//! the candle and signal queues drop the newest item with a warning when full
//! - liveness over completeness for candle/signal delivery.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::TradingConfig;
use crate::domain::entities::candle::Candle;
use crate::domain::entities::position::ExitReason;
use crate::domain::entities::tick::Tick;
use crate::domain::errors::EngineResult;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::alpha_engine::{AlphaEngine, SignalEvent};
use crate::domain::services::candle_builder::CandleBuilder;
use crate::domain::services::indicators::IndicatorEngine;
use crate::domain::services::order_manager::OrderManager;
use crate::domain::services::trading_session::TradingSession;
use crate::application::reporter::StatusReporter;
use crate::infrastructure::feed::MarketFeed;

/// How long a stage blocks on its queue before rechecking the running flag.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Grace given to each stage task to wind down during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Engine {
    config: TradingConfig,
    session: TradingSession,
    order_manager: Arc<OrderManager>,
    reporter: Arc<StatusReporter>,
    running: Arc<AtomicBool>,
    candles_completed: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at construction so a shutdown requested before `run`
    /// starts is not lost.
    shutdown_rx: tokio::sync::Mutex<Option<broadcast::Receiver<()>>>,
}

impl Engine {
    pub fn new(
        config: TradingConfig,
        broker: Arc<dyn BrokerClient>,
        reporter: Arc<StatusReporter>,
    ) -> Result<Self, String> {
        config.validate()?;
        let risk = config.risk_config()?;
        let session = config.trading_session();
        let order_manager = Arc::new(OrderManager::new(
            risk,
            broker,
            Local::now().date_naive(),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Engine {
            config,
            session,
            order_manager,
            reporter,
            running: Arc::new(AtomicBool::new(false)),
            candles_completed: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx: tokio::sync::Mutex::new(Some(shutdown_rx)),
        })
    }

    pub fn order_manager(&self) -> Arc<OrderManager> {
        self.order_manager.clone()
    }

    /// The bounded tick queue the feed writes into.
    pub fn tick_channel(&self) -> (mpsc::Sender<Tick>, mpsc::Receiver<Tick>) {
        mpsc::channel(self.config.tick_queue_capacity)
    }

    /// Request an orderly shutdown from any task or signal handler.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the pipeline until shutdown is requested, then wind it down:
    /// stop signal intake, force-close any open position, stop the feed,
    /// await the stage tasks, and emit the final session statistics.
    pub async fn run(
        &self,
        mut feed: Box<dyn MarketFeed>,
        tick_rx: mpsc::Receiver<Tick>,
    ) -> EngineResult<()> {
        self.running.store(true, Ordering::SeqCst);
        self.reporter
            .startup(&self.config.underlying, self.config.timeframe_seconds);

        let (candle_tx, candle_rx) = mpsc::channel(self.config.candle_queue_capacity);
        let (signal_tx, signal_rx) = mpsc::channel(self.config.signal_queue_capacity);

        let feed_stop = feed.stop_handle();
        let feed_task: JoinHandle<()> = tokio::spawn(async move {
            if let Err(e) = feed.start().await {
                error!("Feed task ended with error: {}", e);
            }
        });

        let mut tasks = vec![
            self.spawn_tick_processor(tick_rx, candle_tx),
            self.spawn_signal_processor(candle_rx, signal_tx),
            self.spawn_order_executor(signal_rx),
            self.spawn_heartbeat(),
        ];
        tasks.push(feed_task);

        // Block until someone requests shutdown (heartbeat on market close,
        // the signal handler in main, or a caller).
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .await
            .take()
            .unwrap_or_else(|| self.shutdown_tx.subscribe());
        let _ = shutdown_rx.recv().await;

        info!("Initiating shutdown");
        self.running.store(false, Ordering::SeqCst);

        if self.order_manager.has_open_position().await {
            info!("Closing open position before exit");
            self.order_manager
                .close_all_positions(ExitReason::Shutdown)
                .await;
        }

        feed_stop.stop();

        for task in tasks {
            if timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Stage task did not stop within grace period");
            }
        }

        self.reporter
            .final_summary(&self.order_manager.session_stats().await);
        Ok(())
    }

    /// Stage 1: drain the tick queue, build candles, and run the tick-driven
    /// exit checks against the open position.
    fn spawn_tick_processor(
        &self,
        mut tick_rx: mpsc::Receiver<Tick>,
        candle_tx: mpsc::Sender<Vec<Candle>>,
    ) -> JoinHandle<()> {
        let running = self.running.clone();
        let candles_completed = self.candles_completed.clone();
        let order_manager = self.order_manager.clone();
        let mut builder = CandleBuilder::new(
            self.config.timeframe_seconds,
            self.config.max_candle_history,
            self.config.warmup_candles,
        );

        tokio::spawn(async move {
            info!("Tick processor started");
            while running.load(Ordering::SeqCst) {
                let tick = match timeout(POLL_TIMEOUT, tick_rx.recv()).await {
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(tick)) => tick,
                };

                if builder.process_tick(&tick).is_some() {
                    candles_completed.fetch_add(1, Ordering::SeqCst);
                    // Completed candles travel as a history snapshot so the
                    // indicator engine never touches the builder's buffer.
                    match candle_tx.try_send(builder.history()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Candle queue full, dropping candle");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }

                // Exit-condition side channel. The index tick stands in for
                // the option premium here; a dedicated option feed would
                // replace this.
                if order_manager.has_open_position().await {
                    let exited = order_manager.check_exit_conditions(tick.ltp).await;
                    if !exited {
                        order_manager.update_trailing_stop(tick.ltp).await;
                    }
                }
            }
            info!("Tick processor stopped");
        })
    }

    /// Stage 2: evaluate each completed candle against the signal engine.
    fn spawn_signal_processor(
        &self,
        mut candle_rx: mpsc::Receiver<Vec<Candle>>,
        signal_tx: mpsc::Sender<SignalEvent>,
    ) -> JoinHandle<()> {
        let running = self.running.clone();
        let order_manager = self.order_manager.clone();
        let mut alpha = AlphaEngine::new(
            IndicatorEngine::new(
                self.config.ema_period,
                self.config.rsi_period,
                self.config.atr_period,
            ),
            self.session.clone(),
            self.config.rsi_overbought,
            self.config.rsi_oversold,
            self.config.strike_interval,
        );

        tokio::spawn(async move {
            info!("Signal processor started");
            while running.load(Ordering::SeqCst) {
                let history = match timeout(POLL_TIMEOUT, candle_rx.recv()).await {
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(history)) => history,
                };

                alpha.set_position_open(order_manager.has_open_position().await);
                if let Some(event) = alpha.on_candle_complete(&history) {
                    match signal_tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Signal queue full, dropping signal");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
            info!("Signal processor stopped");
        })
    }

    /// Stage 3: turn signals into orders.
    fn spawn_order_executor(&self, mut signal_rx: mpsc::Receiver<SignalEvent>) -> JoinHandle<()> {
        let running = self.running.clone();
        let order_manager = self.order_manager.clone();

        tokio::spawn(async move {
            info!("Order executor started");
            while running.load(Ordering::SeqCst) {
                let event = match timeout(POLL_TIMEOUT, signal_rx.recv()).await {
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(event)) => event,
                };

                if let Some(position) = order_manager.execute_signal(&event).await {
                    info!("Position opened from signal: {}", position.symbol);
                }
            }
            info!("Order executor stopped");
        })
    }

    /// Heartbeat: periodic status reporting, session rollover, daily-loss
    /// enforcement, and market-close detection.
    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let running = self.running.clone();
        let order_manager = self.order_manager.clone();
        let reporter = self.reporter.clone();
        let session = self.session.clone();
        let candles_completed = self.candles_completed.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!("Heartbeat started");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let now = Local::now().naive_local();
                order_manager.roll_session(now.date()).await;

                let stats = order_manager.session_stats().await;
                let position = order_manager.current_position().await;
                reporter.heartbeat(
                    candles_completed.load(Ordering::SeqCst),
                    &stats,
                    position.as_ref(),
                );

                if order_manager.daily_loss_breached().await
                    && order_manager.has_open_position().await
                {
                    warn!("Daily loss ceiling breached, force-closing position");
                    order_manager
                        .close_all_positions(ExitReason::DailyLossLimit)
                        .await;
                }

                if session.has_closed(now) {
                    info!("Trading hours ended, requesting shutdown");
                    let _ = shutdown_tx.send(());
                    break;
                }
            }
            info!("Heartbeat stopped");
        })
    }
}
