use std::{sync::Arc, time::Duration};

use anyhow::Context;
use backon::BlockingRetryable;
use backon::ConstantBuilder;
use config::Settings;
use db::{DB, DormStore};
use dispatch::Dispatcher;
use serial::SerialLink;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::sync::mpsc;

mod config;
mod db;
mod dispatch;
mod dorm;
mod http;
mod reading;
mod serial;

const LINE_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let dotenv = config::load_dotenv();
    let (settings, rejected) = Settings::from_env();

    TermLogger::init(
        settings.log_level,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    match dotenv {
        Ok(Some(path)) => log::info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => log::warn!("Failed to load .env: {e}"),
    }
    for entry in rejected {
        log::warn!("Ignoring invalid {entry}, using default");
    }

    if let Err(e) = run(settings).await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    let db = DB::open(&settings.database_path).context("Database connection error")?;
    db.init().context("Failed to initialize database")?;
    let store: Arc<dyn DormStore> = Arc::new(db);
    log::info!("Opened database {}", settings.database_path.display());

    let addr = settings.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let app = http::build_router(store.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("HTTP server error: {e}");
        }
    });
    log::info!("Server listening on port {}", settings.port);

    let retry_builder = ConstantBuilder::default()
        .with_delay(Duration::from_millis(500))
        .with_max_times(10);

    let link = (|| SerialLink::open(&settings.serial_port_path, settings.baud_rate))
        .retry(retry_builder)
        .notify(|e, dur| {
            log::error!("{e:#}");
            log::info!("Retrying in {:?}", dur);
        })
        .call()
        .with_context(|| {
            format!(
                "Failed to open serial port {}",
                settings.serial_port_path.display()
            )
        })?;
    log::info!(
        "Reading {} at {} baud",
        settings.serial_port_path.display(),
        settings.baud_rate
    );

    let (tx, mut rx) = mpsc::channel::<String>(LINE_QUEUE_CAPACITY);
    std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            if let Err(e) = link.forward_lines(tx) {
                log::error!("Serial link stopped: {e:#}");
            }
        })
        .context("Failed to spawn serial reader thread")?;

    let dispatcher = Dispatcher::new(store);
    let dorm_id = settings.dorm_id.clone();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            dispatcher.handle_line(&line, &dorm_id);
        }
        log::warn!("Serial line stream ended");
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C signal")?;

    Ok(())
}
