//! Market feed collaborators. The engine consumes a push interface: a feed
//! writes `Tick`s into the bounded tick queue and the pipeline takes it from
//! there. `WebSocketFeed` talks to the live market-data stream with capped
//! exponential-backoff reconnects; `SimulatedFeed` drives paper trading and
//! tests with a random walk.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::entities::instrument::InstrumentId;
use crate::domain::entities::tick::Tick;
use crate::domain::errors::{EngineError, EngineResult};
use crate::task_runner::Backoff;

/// Cloneable stop switch for a running feed. Works even when requested
/// before `start` gets scheduled.
#[derive(Clone)]
pub struct FeedStopHandle(Arc<AtomicBool>);

impl FeedStopHandle {
    pub fn new() -> Self {
        FeedStopHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for FeedStopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability interface for a tick source. The orchestrator is agnostic to
/// which variant is wired in.
#[async_trait]
pub trait MarketFeed: Send {
    async fn connect(&mut self) -> EngineResult<()>;
    async fn subscribe(&mut self, instrument: InstrumentId) -> EngineResult<()>;
    /// Run until stopped, pushing ticks into the queue. The send into the
    /// tick queue is blocking on purpose: a full queue backpressures the
    /// feed instead of dropping ticks.
    async fn start(&mut self) -> EngineResult<()>;
    fn stop(&self);
    fn stop_handle(&self) -> FeedStopHandle;
}

/// Wire shape of one tick message on the market-data stream.
#[derive(Debug, Deserialize)]
struct FeedMessage {
    security_id: String,
    ltp: f64,
    #[serde(default)]
    volume: Option<u64>,
    #[serde(default)]
    oi: Option<u64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketFeed {
    url: Url,
    tick_tx: mpsc::Sender<Tick>,
    subscriptions: HashSet<InstrumentId>,
    stream: Option<WsStream>,
    stop: FeedStopHandle,
}

impl WebSocketFeed {
    pub fn new(url: &str, tick_tx: mpsc::Sender<Tick>) -> EngineResult<Self> {
        let url = Url::parse(url).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        Ok(WebSocketFeed {
            url,
            tick_tx,
            subscriptions: HashSet::new(),
            stream: None,
            stop: FeedStopHandle::new(),
        })
    }

    async fn dial(&mut self) -> EngineResult<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| EngineError::FeedConnection(e.to_string()))?;
        self.stream = Some(stream);
        self.send_subscriptions().await
    }

    async fn send_subscriptions(&mut self) -> EngineResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        for instrument in &self.subscriptions {
            let request = serde_json::json!({
                "action": "subscribe",
                "security_id": instrument.as_str(),
            });
            stream
                .send(Message::Text(request.to_string()))
                .await
                .map_err(|e| EngineError::FeedConnection(e.to_string()))?;
        }
        Ok(())
    }

    fn parse_tick(text: &str) -> EngineResult<Tick> {
        let message: FeedMessage =
            serde_json::from_str(text).map_err(|e| EngineError::FeedProtocol(e.to_string()))?;
        let mut tick = Tick::new(
            InstrumentId::new(message.security_id),
            message.ltp,
            Local::now().naive_local(),
        );
        tick.volume = message.volume;
        tick.open_interest = message.oi;
        tick.bid = message.bid;
        tick.ask = message.ask;
        Ok(tick)
    }

    /// One connected session: read frames until the peer drops or a stop is
    /// requested. Ok(()) means a clean stop, Err means reconnect.
    async fn pump(&mut self) -> EngineResult<()> {
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(EngineError::FeedConnection("not connected".into()));
            };

            // Bounded wait so the stop flag is rechecked periodically.
            let frame = match timeout(Duration::from_secs(1), stream.next()).await {
                Err(_) => continue,
                Ok(None) => return Err(EngineError::FeedConnection("stream closed".into())),
                Ok(Some(Err(e))) => return Err(EngineError::FeedConnection(e.to_string())),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => match Self::parse_tick(&text) {
                    Ok(tick) => {
                        if self.tick_tx.send(tick).await.is_err() {
                            info!("Tick queue closed, stopping feed");
                            return Ok(());
                        }
                    }
                    Err(e) => debug!("Skipping unparseable feed message: {}", e),
                },
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                Message::Close(_) => {
                    return Err(EngineError::FeedConnection("server closed stream".into()))
                }
                Message::Frame(_) => {}
            }
        }
    }
}

#[async_trait]
impl MarketFeed for WebSocketFeed {
    async fn connect(&mut self) -> EngineResult<()> {
        self.dial().await?;
        info!("Feed connected to {}", self.url);
        Ok(())
    }

    async fn subscribe(&mut self, instrument: InstrumentId) -> EngineResult<()> {
        if !self.subscriptions.insert(instrument.clone()) {
            return Err(EngineError::InvalidInput(format!(
                "Already subscribed to {}",
                instrument
            )));
        }
        if self.stream.is_some() {
            self.send_subscriptions().await?;
        }
        info!("Subscribed to {}", instrument);
        Ok(())
    }

    async fn start(&mut self) -> EngineResult<()> {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        while !self.stop.is_stopped() {
            if self.stream.is_none() {
                if let Err(e) = self.dial().await {
                    let delay = backoff.next_delay();
                    error!("Feed connection failed: {}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                info!("Feed reconnected");
                backoff.reset();
            }

            match self.pump().await {
                Ok(()) => break,
                Err(e) => {
                    self.stream = None;
                    let delay = backoff.next_delay();
                    warn!("Feed dropped: {}, reconnecting in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!("Feed stopped");
        Ok(())
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn stop_handle(&self) -> FeedStopHandle {
        self.stop.clone()
    }
}

/// Random-walk tick generator for paper trading and tests.
pub struct SimulatedFeed {
    instrument: InstrumentId,
    tick_tx: mpsc::Sender<Tick>,
    tick_interval: Duration,
    price: f64,
    max_step: f64,
    stop: FeedStopHandle,
}

impl SimulatedFeed {
    pub fn new(
        instrument: InstrumentId,
        tick_tx: mpsc::Sender<Tick>,
        tick_interval: Duration,
        start_price: f64,
        max_step: f64,
    ) -> Self {
        SimulatedFeed {
            instrument,
            tick_tx,
            tick_interval,
            price: start_price,
            max_step,
            stop: FeedStopHandle::new(),
        }
    }
}

#[async_trait]
impl MarketFeed for SimulatedFeed {
    async fn connect(&mut self) -> EngineResult<()> {
        info!("Simulated feed ready (start price {:.2})", self.price);
        Ok(())
    }

    async fn subscribe(&mut self, instrument: InstrumentId) -> EngineResult<()> {
        self.instrument = instrument;
        Ok(())
    }

    async fn start(&mut self) -> EngineResult<()> {
        let mut rng = StdRng::from_entropy();

        while !self.stop.is_stopped() {
            self.price = (self.price + rng.gen_range(-self.max_step..=self.max_step))
                .max(self.max_step);
            let tick = Tick::new(
                self.instrument.clone(),
                self.price,
                Local::now().naive_local(),
            )
            .with_volume(rng.gen_range(1..100));

            if self.tick_tx.send(tick).await.is_err() {
                info!("Tick queue closed, stopping simulated feed");
                break;
            }
            tokio::time::sleep(self.tick_interval).await;
        }

        info!("Simulated feed stopped");
        Ok(())
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn stop_handle(&self) -> FeedStopHandle {
        self.stop.clone()
    }
}
