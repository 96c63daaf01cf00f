//! Worker side of the render farm.
//!
//! - [`TileRenderer`]: turns a tile into pixels (the path tracer plugs in here)
//! - [`TileExecutor`]: runs a renderer on the blocking pool
//! - [`WorkerNode`]: serves the worker gRPC API and registers with the controller
//!
//! # Startup Flow
//!
//! 1. Bind the listen address and start serving `Ping`/`PrepareRender`/`NewJob`
//! 2. Connect to the controller
//! 3. Call `RegisterWorker`; the controller pings back before accepting us
//! 4. Any failure in 2 or 3 is fatal for the process

pub mod executor;
pub mod renderer;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server};

use crate::config::WorkerConfig;
use crate::error::{FarmError, Result};
use crate::grpc::worker_service::WorkerService;
use crate::grpc::MAX_MESSAGE_BYTES;
use crate::proto::controller_client::ControllerClient;
use crate::proto::worker_server::WorkerServer;
use crate::proto::WorkerInfo;
use crate::registry::derive_worker_id;

pub use executor::TileExecutor;
pub use renderer::{SceneContext, TestPatternRenderer, TileRenderer};

/// A worker process: gRPC server plus controller registration.
pub struct WorkerNode {
    config: WorkerConfig,
    renderer: Arc<dyn TileRenderer>,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig, renderer: Arc<dyn TileRenderer>) -> Self {
        Self { config, renderer }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener and register with the controller.
    ///
    /// Returns once the server stops, or early with an error if registration
    /// fails.
    pub async fn run_with_listener(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let port = listener.local_addr()?.port();
        let worker_id = derive_worker_id(&self.config.advertise_host, port);

        let channel = self.connect_controller().await?;
        let service = WorkerService::new(
            worker_id.clone(),
            TileExecutor::new(self.renderer.clone()),
            ControllerClient::new(channel.clone()).max_decoding_message_size(MAX_MESSAGE_BYTES),
        );

        tracing::info!(worker_id = %worker_id, port, capacity = self.config.capacity, "Starting worker");

        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(WorkerServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    server_shutdown.cancelled().await;
                })
                .await
        });

        let mut controller =
            ControllerClient::new(channel).max_decoding_message_size(MAX_MESSAGE_BYTES);
        let registration = controller
            .register_worker(WorkerInfo {
                id: worker_id.clone(),
                host: self.config.advertise_host.clone(),
                port: port as u32,
                max_jobs: self.config.capacity,
            })
            .await;

        if let Err(status) = registration {
            tracing::error!(worker_id = %worker_id, error = %status, "Registration failed");
            shutdown.cancel();
            server.abort();
            return Err(status.into());
        }
        tracing::info!(worker_id = %worker_id, "Registered with controller, ready to work");

        server
            .await
            .map_err(|e| FarmError::Internal(format!("worker server task failed: {}", e)))??;
        Ok(())
    }

    async fn connect_controller(&self) -> Result<Channel> {
        tracing::info!(addr = %self.config.controller_addr, "Connecting to controller");
        let endpoint = Endpoint::from_shared(self.config.controller_addr.clone())
            .map_err(|e| FarmError::InvalidArgument(format!("invalid controller address: {}", e)))?
            .connect_timeout(self.config.connect_timeout());
        Ok(endpoint.connect().await?)
    }
}
