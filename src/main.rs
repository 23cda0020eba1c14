use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use comfy_signals::candles::{FibonacciBook, Markets};
use comfy_signals::config::SessionOverlay;
use comfy_signals::klines::{BinanceFutures, EXCHANGE_ID};
use comfy_signals::logger::setup_logging;
use comfy_signals::market_data::MarketData;
use comfy_signals::pipeline::PipelineOrchestrator;
use comfy_signals::storage_utils::AsyncStorageManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Step 1: Configuration and logging
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let config = Arc::new(storage.load_config().await?);
    setup_logging(&config.settings.log_level, config.settings.log_mode);

    // Step 2: Resolve markets
    let binance = config.exchanges.get(EXCHANGE_ID);
    let client = Arc::new(BinanceFutures::new(binance.map_or(500, |exchange| exchange.candle_limit))?);
    let mut markets = Markets::new();
    if binance.is_some_and(|exchange| exchange.enabled) {
        let listed = client
            .fetch_markets(&config.settings.quote_asset, &config.settings.market_pairs)
            .await?;
        info!(exchange = EXCHANGE_ID, markets = listed.len(), "markets resolved");
        markets.insert(EXCHANGE_ID.to_owned(), listed);
    }

    // Step 3: Poll until interrupted
    let source: Arc<dyn MarketData> = client;
    let mut pipeline = PipelineOrchestrator::new(Arc::clone(&config), source)?;
    let overlay = SessionOverlay::new();
    let fibonacci = FibonacciBook::new();
    let mut ticker = tokio::time::interval(overlay.update_interval(&config));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = pipeline.run_cycle(&markets, &overlay, &fibonacci).await;
                for message in report.all_messages() {
                    println!("{message}");
                }
                if !report.render_failures.is_empty() {
                    error!(count = report.render_failures.len(), "alert template failed to render, fix notifiers.template");
                }
            }
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}
