//! TCP accept loop

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};

use crate::connection::ConnectionHandler;
use crate::context::ServerContext;

/// Accepts vehicle connections and runs one handler task per connection
pub struct Listener {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Listener {
    /// Bind to the configured host and port
    pub async fn bind(ctx: Arc<ServerContext>) -> io::Result<Self> {
        let addr = ctx.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        Ok(Self::new(listener, ctx))
    }

    pub fn new(listener: TcpListener, ctx: Arc<ServerContext>) -> Self {
        Self { listener, ctx }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "FOTA server listening");
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => self.spawn(socket, peer),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    fn spawn(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let conn_id = uuid::Uuid::new_v4();
        let span = info_span!("connection", %peer, %conn_id);
        let handler = ConnectionHandler::new(Arc::clone(&self.ctx), socket, peer);

        tokio::spawn(
            async move {
                info!("Connection accepted");
                let state = handler.run().await;
                info!(?state, "Connection finished");
            }
            .instrument(span),
        );
    }
}
