//! Upload HTTP server lifecycle.
//!
//! Binds a TCP listener, serves the upload router, and stops gracefully on
//! [`UploadServer::shutdown`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use slicedrop_protocol::constants::DEFAULT_HREF_PREFIX;
use slicedrop_store::FilesystemStore;

use crate::ServerError;
use crate::routes::{RouterOptions, create_router};
use crate::service::UploadService;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Root of the chunk and file directories.
    pub storage_root: PathBuf,
    pub href_prefix: String,
    pub max_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            storage_root: PathBuf::from("storage"),
            href_prefix: DEFAULT_HREF_PREFIX.to_string(),
            max_chunk_bytes: RouterOptions::default().max_chunk_bytes,
        }
    }
}

/// The upload HTTP server.
pub struct UploadServer {
    config: ServerConfig,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server. In-flight requests are finished.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        // Held through bind so concurrent runs see the address.
        let mut running = self.local_addr.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let store = FilesystemStore::new(&self.config.storage_root).await?;
        let options = RouterOptions {
            href_prefix: self.config.href_prefix.clone(),
            files_dir: Some(store.files_dir()),
            max_chunk_bytes: self.config.max_chunk_bytes,
        };
        let service = UploadService::new(Arc::new(store), &self.config.href_prefix);
        let app = create_router(Arc::new(service), &options);

        let listener = TcpListener::bind(SocketAddr::new(self.config.bind, self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        *running = Some(local_addr);
        drop(running);
        tracing::info!(
            storage = %self.config.storage_root.display(),
            "upload server listening on {local_addr}"
        );

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await;

        *self.local_addr.lock().await = None;
        tracing::info!("server shut down");
        result.map_err(ServerError::from)
    }
}
