use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::prelude::*;

use ragstore::{AppConfig, Engine};

#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::from_env();

    // Console + daily-rotated file logging.
    let log_dir = config
        .db_path
        .parent()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragstore.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ragstore=info".into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_writer)
        .compact();

    tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();

    // Log panics before aborting.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        error!(target: "ragstore::panic", location = %location, "PANIC: thread panicked");
        default_panic(panic_info);
    }));

    if config.is_server && config.local_api_key.is_none() {
        error!("LOCAL_API_KEY is required in server mode");
        return ExitCode::from(1);
    }

    info!(
        db_path = %config.db_path.display(),
        use_memory_db = config.use_memory_db,
        crawl4ai_url = %config.crawl4ai_url,
        server = format!("{}:{}", config.server_host, config.server_port),
        is_server = config.is_server,
        "ragstore starting"
    );

    let engine = match Engine::new(config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Fatal startup error: {e}");
            return ExitCode::from(1);
        }
    };

    info!("Engine ready");

    shutdown_signal().await;
    info!("Shutdown signal received");

    engine.shutdown().await;
    info!("ragstore shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, initiating shutdown"); }
        _ = terminate => { info!("Received terminate signal, initiating shutdown"); }
    }
}
