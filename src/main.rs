use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nifty_scalper::application::engine::Engine;
use nifty_scalper::application::reporter::StatusReporter;
use nifty_scalper::config::TradingConfig;
use nifty_scalper::domain::entities::instrument::InstrumentId;
use nifty_scalper::domain::repositories::broker_client::BrokerClient;
use nifty_scalper::infrastructure::broker::{PaperBroker, RestBroker, RestBrokerConfig};
use nifty_scalper::infrastructure::feed::{MarketFeed, SimulatedFeed, WebSocketFeed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nifty_scalper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TradingConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let reporter = Arc::new(StatusReporter::new(config.paper_trading));

    let broker: Arc<dyn BrokerClient> = if config.paper_trading {
        Arc::new(PaperBroker::new(150.0))
    } else {
        let client_id = std::env::var("BROKER_CLIENT_ID")
            .map_err(|_| "BROKER_CLIENT_ID must be set for live trading")?;
        let access_token = std::env::var("BROKER_ACCESS_TOKEN")
            .map_err(|_| "BROKER_ACCESS_TOKEN must be set for live trading")?;
        Arc::new(RestBroker::new(RestBrokerConfig {
            base_url: config.broker_base_url.clone(),
            client_id,
            access_token,
        }))
    };

    let engine = Arc::new(Engine::new(config.clone(), broker, reporter)?);
    let (tick_tx, tick_rx) = engine.tick_channel();

    let index = InstrumentId::new(config.index_security_id.clone());
    let mut feed: Box<dyn MarketFeed> = if config.paper_trading {
        Box::new(SimulatedFeed::new(
            index.clone(),
            tick_tx,
            Duration::from_millis(250),
            51_000.0,
            12.0,
        ))
    } else {
        Box::new(WebSocketFeed::new(&config.feed_url, tick_tx)?)
    };

    feed.connect().await?;
    feed.subscribe(index).await?;

    // OS signals request an orderly shutdown; the engine handles the rest.
    let engine_signals = engine.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        engine_signals.request_shutdown();
    });

    engine.run(feed, tick_rx).await?;
    info!("Shutdown complete");
    Ok(())
}
