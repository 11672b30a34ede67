//! REST API Server

use crate::domain::ports::VolumeDriverRef;
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

/// REST server over one volume driver
pub struct ApiServer {
    config: ApiServerConfig,
    driver: VolumeDriverRef,
    metrics: DriverMetrics,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, driver: VolumeDriverRef, metrics: DriverMetrics) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            metrics,
            shutdown_tx,
        }
    }

    /// Serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let app = RestRouter::new(self.driver.clone(), self.metrics.clone()).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!(addr = %addr, backend = %self.driver.backend_name(), "REST API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::memory::SimulatedConfig;
    use crate::san::{fixtures, SanDriver};
    use prometheus::Registry;
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        assert_eq!(ApiServerConfig::default().rest_addr.port(), 8090);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let controller = fixtures::controller(SimulatedConfig::default());
        let driver = SanDriver::initialize(fixtures::config(), controller, None)
            .await
            .unwrap();
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            Arc::new(driver),
            DriverMetrics::new(&Registry::new()).unwrap(),
        ));

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        // The server subscribes when it starts; keep signalling until it stops
        for _ in 0..250 {
            server.shutdown();
            if running.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let result = running.await.unwrap();
        assert!(result.is_ok());
    }
}
