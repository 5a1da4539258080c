use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use web_print::api::print_routes;
use web_print::config::Config;
use web_print::devices::{CupsDiscovery, DeviceDiscovery};
use web_print::jobs::{JobRegistry, PrintScheduler, spawn_scheduler};
use web_print::printing::{LpExecutor, PrintExecutor};
use web_print::service::PrintService;
use web_print::storage::{FileStore, LocalFileStore};

/// Stderr logging, plus a daily rolling file when a log directory is configured.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "web-print.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("🖨️  Web Print v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/api/print", config.server.addr());
    eprintln!("   Uploads: {}", config.storage.upload_dir.display());
    eprintln!(
        "   Scheduler: first tick after {:?}, then every {:?}\n",
        config.scheduler.initial_delay, config.scheduler.tick_interval
    );

    let registry = JobRegistry::with_retention(config.scheduler.retention);
    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::from_config(&config.storage));
    let printer: Arc<dyn PrintExecutor> =
        Arc::new(LpExecutor::new().with_timeout(config.printer.submit_timeout));
    let devices: Arc<dyn DeviceDiscovery> = Arc::new(CupsDiscovery::new());

    let scheduler = Arc::new(PrintScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&files),
        printer,
    ));
    let scheduler_handle = spawn_scheduler(
        Arc::clone(&scheduler),
        config.scheduler.initial_delay,
        config.scheduler.tick_interval,
    );

    let service = PrintService::new(registry, scheduler, files);
    let app = print_routes(service, devices, config.storage.max_file_size);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Print API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    scheduler_handle.abort();
    Ok(())
}
