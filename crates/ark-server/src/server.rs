use tokio::net::TcpListener;

use ark_batch::BatchCoordinator;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;

/// Ark ingest control server.
pub struct ArkServer {
    config: ServerConfig,
    coordinator: BatchCoordinator,
}

impl ArkServer {
    /// Build a server around a coordinator created from `config.ingest`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let coordinator = BatchCoordinator::from_config(config.ingest.clone())?;
        Ok(Self::with_coordinator(config, coordinator))
    }

    pub fn with_coordinator(config: ServerConfig, coordinator: BatchCoordinator) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.coordinator.clone())
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "ark server listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_construction() {
        let server = ArkServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.config().bind_addr, "127.0.0.1:7461".parse().unwrap());
        assert!(server.coordinator().list_batches().is_empty());
    }

    #[test]
    fn invalid_ingest_config_fails_construction() {
        let mut config = ServerConfig::default();
        config.ingest.workers = 0;
        assert!(ArkServer::new(config).is_err());
    }
}
