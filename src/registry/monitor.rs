use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tonic::transport::Channel;

use crate::proto;
use crate::proto::worker_client::WorkerClient;
use crate::registry::{WorkerLink, WorkerRegistry};

/// Watches one worker's link and evicts the worker when it drops.
///
/// The monitor lives exactly as long as the worker's membership: it is
/// spawned on registration and returns after eviction.
pub struct ConnectionMonitor {
    registry: Arc<WorkerRegistry>,
    worker_id: String,
    link: WorkerLink,
}

impl ConnectionMonitor {
    pub fn new(registry: Arc<WorkerRegistry>, worker_id: String, link: WorkerLink) -> Self {
        Self {
            registry,
            worker_id,
            link,
        }
    }

    pub async fn run(self) {
        self.link.disconnected().await;
        tracing::info!(worker_id = %self.worker_id, "Worker disconnected");

        if !self.registry.evict(&self.worker_id, &self.link).await {
            tracing::debug!(
                worker_id = %self.worker_id,
                "Link already superseded, nothing to evict"
            );
        }
    }
}

/// Periodically ping a worker over its own channel, feeding failures into
/// the link state machine. Stops once the link is down.
pub async fn probe_link(
    worker_id: String,
    mut client: WorkerClient<Channel>,
    link: WorkerLink,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the handshake has just proven the link.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = link.disconnected() => break,
            _ = ticker.tick() => {
                if let Err(status) = client.ping(proto::Empty {}).await {
                    tracing::debug!(worker_id = %worker_id, error = %status, "Link probe failed");
                    link.observe(&status);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LinkState;
    use tonic::transport::Endpoint;

    #[tokio::test]
    async fn probe_marks_unreachable_worker_disconnected() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let link = WorkerLink::new();
        link.mark_ready();

        let probe = tokio::spawn(probe_link(
            "w1".to_string(),
            WorkerClient::new(channel),
            link.clone(),
            Duration::from_millis(20),
        ));

        tokio::time::timeout(Duration::from_secs(5), probe)
            .await
            .expect("probe should stop once the link is down")
            .unwrap();
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn probe_stops_when_link_is_closed_elsewhere() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let link = WorkerLink::new();
        link.mark_ready();
        link.mark_disconnected();

        let probe = probe_link(
            "w1".to_string(),
            WorkerClient::new(channel),
            link,
            Duration::from_secs(60),
        );
        tokio::time::timeout(Duration::from_secs(1), probe)
            .await
            .expect("probe should exit immediately");
    }
}
