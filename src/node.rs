use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::grpc::GrpcServer;
use crate::registry::{MembershipEvent, WorkerRegistry};
use crate::scheduler::Scheduler;
use crate::storage::OutputStore;

/// Controller process: owns the registry and scheduler and wires them to
/// the network.
pub struct ControllerNode {
    pub config: ControllerConfig,
    pub registry: Arc<WorkerRegistry>,
    pub scheduler: Arc<Scheduler>,
}

impl ControllerNode {
    pub fn new(config: ControllerConfig) -> Self {
        let registry = Arc::new(WorkerRegistry::new(&config));
        let store = OutputStore::new(config.output_dir.clone());
        let scheduler = Arc::new(Scheduler::new(registry.clone(), store));
        Self {
            config,
            registry,
            scheduler,
        }
    }

    /// Run the controller until `shutdown` fires.
    ///
    /// 1. Spawns the membership watcher (fails a render whose last worker left)
    /// 2. Optionally spawns the dashboard
    /// 3. Runs the gRPC server (blocking)
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let watcher_scheduler = self.scheduler.clone();
        let watcher_shutdown = shutdown.clone();
        tokio::spawn(async move {
            Self::membership_loop(watcher_scheduler, watcher_shutdown).await;
        });

        if let Some(dashboard_addr) = self.config.dashboard_addr {
            let state = DashboardState {
                scheduler: self.scheduler.clone(),
            };
            let dashboard_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(dashboard_addr, state, dashboard_shutdown).await;
            });
        }

        tracing::info!(
            output_dir = %self.config.output_dir.display(),
            probe_interval_ms = self.config.probe_interval_ms,
            "Controller started"
        );

        GrpcServer::new(self.config.listen_addr, self.scheduler.clone())
            .run_with_listener(listener, shutdown)
            .await?;
        Ok(())
    }

    /// React to workers leaving: once nobody is left, an unfinished render
    /// can never complete.
    async fn membership_loop(scheduler: Arc<Scheduler>, shutdown: CancellationToken) {
        let mut events = scheduler.registry().subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(MembershipEvent::Left(_)) | Err(RecvError::Lagged(_)) => {
                        scheduler.fail_if_stranded().await;
                    }
                    Ok(MembershipEvent::Joined(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}
