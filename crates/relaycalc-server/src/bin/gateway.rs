use clap::Parser;
use relaycalc_server::server::{
    config::{GatewayArgs, GatewayConfig},
    exchange_log::{ExchangeLog, Tier},
    listener::{serve, shutdown_signal},
    service::gateway::GatewayService,
    telemetry::init_telemetry,
};
use tokio::{net::TcpListener, time::timeout};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = GatewayArgs::parse();
    let config = GatewayConfig::try_from(args)?;

    let providers = init_telemetry("relaycalc-gateway")?;

    let log = ExchangeLog::open(&config.log_file, Tier::Gateway).await?;
    let listener = TcpListener::bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    log.started(local_addr);

    if cfg!(debug_assertions) {
        tracing::info!("Starting gateway on {local_addr} with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting gateway on {local_addr}, relaying to {}",
            config.upstream_addr
        );
    }

    let listener_config = config.listener.clone();
    let service = GatewayService::new(config, log.clone());
    serve(listener, service, &listener_config, shutdown_signal()).await;

    if timeout(listener_config.shutdown_timeout, log.flush()).await.is_err() {
        tracing::warn!("Timed out flushing the exchange log");
    }
    providers.shutdown();
    tracing::info!("Gateway shut down successfully");
    Ok(())
}
