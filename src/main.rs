use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use silkcast::session::SessionRegistry;
use silkcast::state::AppState;
use silkcast::stream::params::Codec;
use silkcast::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Default codec applied when a request names none
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum DefaultCodec {
    #[default]
    Mjpeg,
    H264,
}

/// SilkCast command line arguments
#[derive(Parser, Debug)]
#[command(name = "silkcast")]
#[command(version, about = "On-demand camera streaming server", long_about = None)]
struct CliArgs {
    /// Bind address
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    addr: IpAddr,

    /// Bind port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8080)]
    port: u16,

    /// Idle seconds before a device is released
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    idle_timeout: u64,

    /// Default codec when a request does not specify one
    #[arg(long, value_name = "CODEC", default_value = "mjpeg")]
    codec: DefaultCodec,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level);

    tracing::info!("Starting SilkCast v{}", env!("CARGO_PKG_VERSION"));

    let registry = SessionRegistry::new(Duration::from_secs(args.idle_timeout));
    let reaper = registry.spawn_reaper();

    let default_codec = match args.codec {
        DefaultCodec::Mjpeg => Codec::Mjpeg,
        DefaultCodec::H264 => Codec::H264,
    };
    let state = AppState::new(registry.clone(), default_codec);
    let app = web::create_router(state);

    let addr = SocketAddr::new(args.addr, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        "SilkCast listening on {} (idle-timeout={}s)",
        addr,
        args.idle_timeout
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The reaper holds only a weak registry handle; cancel it rather
    // than waiting out its sweep interval.
    reaper.abort();
    let _ = reaper.await;
    drop(registry);
    tracing::info!("SilkCast stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install ctrl-c handler: {}", e);
    } else {
        tracing::info!("Shutdown requested");
    }
}

fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Error => "silkcast=error,tower_http=error",
        LogLevel::Warn => "silkcast=warn,tower_http=warn",
        LogLevel::Info => "silkcast=info,tower_http=info",
        LogLevel::Debug => "silkcast=debug,tower_http=debug",
        LogLevel::Trace => "silkcast=trace,tower_http=debug",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
