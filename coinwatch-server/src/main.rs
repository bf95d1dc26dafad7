use coinwatch_stream::{Engine, EngineConfig, MemoryGateway, PersistenceGateway, SupabaseGateway};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting coinwatch streaming engine");

    let api_key = match std::env::var("COINWATCH_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            error!("COINWATCH_API_KEY must be set");
            std::process::exit(1);
        }
    };

    let mut config = EngineConfig::new(api_key);
    if let Ok(url) = std::env::var("COINWATCH_WS_URL") {
        config = config.with_ws_url(url);
    }
    if let Ok(url) = std::env::var("COINWATCH_REST_URL") {
        config = config.with_rest_url(url);
    }
    if let Some(max_pairs) = std::env::var("COINWATCH_MAX_PAIRS")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config = config.with_max_pairs(max_pairs);
    }

    let gateway: Arc<dyn PersistenceGateway> = match (
        std::env::var("SUPABASE_URL"),
        std::env::var("SUPABASE_ANON_KEY"),
    ) {
        (Ok(url), Ok(key)) => match SupabaseGateway::new(&url, key) {
            Ok(gateway) => {
                info!(%url, "persisting to Supabase");
                Arc::new(gateway)
            }
            Err(error) => {
                error!(%error, "invalid Supabase configuration");
                std::process::exit(1);
            }
        },
        _ => {
            warn!("SUPABASE_URL/SUPABASE_ANON_KEY not set, alerts stay in memory only");
            Arc::new(MemoryGateway::new())
        }
    };

    let handle = match Engine::start(config, gateway).await {
        Ok(handle) => handle,
        Err(error) => {
            error!(%error, "bootstrap failed");
            std::process::exit(1);
        }
    };

    // Periodic coverage report until Ctrl-C.
    let mut report = tokio::time::interval(Duration::from_secs(60));
    report.tick().await;
    loop {
        tokio::select! {
            _ = report.tick() => {
                let analytics = handle.analytics();
                info!(
                    status = %analytics.connection_status,
                    active = analytics.active_pairs,
                    monitored = analytics.monitored_pairs,
                    coverage_pct = format!("{:.1}", analytics.coverage.percentage),
                    "engine status"
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    error!(%error, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("shutting down");
    handle.shutdown().await;
    info!("stopped");
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
