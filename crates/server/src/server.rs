use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use geotrace_core::{SampleSink, StreamBroadcaster};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::routes::{self, AppState};

/// The HTTP front of a running broadcaster.
///
/// Stopping the server also stops the broadcaster, which ends every open
/// event stream so the graceful shutdown can complete.
pub struct TraceServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl TraceServer {
    pub fn start(
        listener: TcpListener,
        broadcaster: StreamBroadcaster,
        store: Arc<dyn SampleSink>,
        chart_limit: usize,
    ) -> io::Result<Self> {
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let app = routes::create_router(AppState {
            hub: broadcaster.hub(),
            store,
            chart_limit,
        });

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                    broadcaster.shutdown().await;
                })
                .await
        });

        info!(%addr, "server running");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(mut self) -> io::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            task.await.map_err(io::Error::other)??;
        }

        info!(addr = %self.addr, "server stopped");
        Ok(())
    }
}

impl Drop for TraceServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
