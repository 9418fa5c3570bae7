use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use geotrace_core::{PositionWalker, SqliteSink, StreamBroadcaster};
use geotrace_server::{Config, TraceServer, logging};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let config = Config::parse();

    logging::init(config.verbose);
    config.validate()?;

    let origin = config.origin_or_default();
    info!(
        latitude = origin.latitude,
        longitude = origin.longitude,
        "trace origin"
    );

    let sink = Arc::new(
        SqliteSink::open(&config.database)
            .wrap_err_with(|| format!("failed to open {}", config.database.display()))?,
    );
    info!(database = %config.database.display(), "persisting samples");

    let broadcaster = StreamBroadcaster::spawn(
        PositionWalker::new(origin),
        sink.clone(),
        config.broadcast_settings(),
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .wrap_err_with(|| format!("failed to bind {}:{}", config.host, config.port))?;

    let server = TraceServer::start(listener, broadcaster, sink, config.chart_limit)
        .wrap_err("failed to start server")?;

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for ctrl-c")?;
    info!("shutting down");

    server.stop().await.wrap_err("server exited with an error")?;

    Ok(())
}
