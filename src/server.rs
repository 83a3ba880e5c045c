use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::handle_client;
use crate::error::ChatError;
use crate::registry::Registry;

/// The listening side of the chat service.
///
/// Owns the registry that every connection task shares. Each accepted
/// socket gets its own tokio task, so the accept loop never waits on a
/// client.
pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind the configured address. This is the only fatal failure.
    pub async fn bind(config: ServerConfig) -> Result<Self, ChatError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!(addr = %listener.local_addr()?, "chat server listening");

        Ok(Self {
            listener,
            broadcaster: Broadcaster::new(Arc::new(Registry::new())),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// A handle for announcing to, or evicting, this server's clients.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Accept connections forever. Accept errors are logged and skipped;
    /// nothing a single client does can end this loop.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            debug!(%peer, "accepted connection");

            let broadcaster = self.broadcaster.clone();
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, broadcaster, config).await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}
