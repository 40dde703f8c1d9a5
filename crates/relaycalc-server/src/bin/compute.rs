use clap::Parser;
use relaycalc_server::server::{
    config::{ComputeArgs, ComputeConfig},
    exchange_log::{ExchangeLog, Tier},
    listener::{serve, shutdown_signal},
    service::compute::ComputeService,
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
    let args = ComputeArgs::parse();
    let config = ComputeConfig::try_from(args)?;

    let providers = init_telemetry("relaycalc-compute")?;

    let log = ExchangeLog::open(&config.log_file, Tier::Compute).await?;
    let service = ComputeService::new(&config, log.clone())?;
    let listener = TcpListener::bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    log.started(local_addr);

    if cfg!(debug_assertions) {
        tracing::info!("Starting compute node on {local_addr} with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting compute node on {local_addr} with {} workers",
            config.num_workers
        );
    }

    serve(listener, service.clone(), &config.listener, shutdown_signal()).await;

    service.shutdown().await;
    if timeout(config.listener.shutdown_timeout, log.flush()).await.is_err() {
        tracing::warn!("Timed out flushing the exchange log");
    }
    providers.shutdown();
    tracing::info!("Compute node shut down successfully");
    Ok(())
}
