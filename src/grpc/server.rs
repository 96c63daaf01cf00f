use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::controller_service::ControllerService;
use crate::grpc::MAX_MESSAGE_BYTES;
use crate::proto::controller_server::ControllerServer;
use crate::scheduler::Scheduler;

pub struct GrpcServer {
    addr: SocketAddr,
    scheduler: Arc<Scheduler>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, scheduler: Arc<Scheduler>) -> Self {
        Self { addr, scheduler }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.run_with_listener(listener, shutdown).await?;
        Ok(())
    }

    /// Serve on an already-bound listener (ephemeral ports in tests).
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        let service = ControllerService::new(self.scheduler);
        let local_addr = listener.local_addr().ok();

        tracing::info!(addr = ?local_addr.unwrap_or(self.addr), "Starting controller gRPC server");

        let service = ControllerServer::new(service).max_decoding_message_size(MAX_MESSAGE_BYTES);

        Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await;
                tracing::info!("gRPC server shutting down");
            })
            .await
    }
}
