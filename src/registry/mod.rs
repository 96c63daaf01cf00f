//! Worker membership for the controller.
//!
//! - [`WorkerRegistry`]: concurrent map of registered workers plus the live count
//! - [`WorkerLink`]: per-connection `Connecting -> Ready -> Disconnected` state machine
//! - [`ConnectionMonitor`]: one task per worker that evicts it once its link drops
//!
//! # Membership Flow
//!
//! 1. A worker calls `RegisterWorker` with its callback host, port and capacity
//! 2. The registry connects back and pings it; any failure aborts registration
//! 3. On success the record is stored, the live count bumped, and a monitor
//!    (plus an optional link prober) is spawned
//! 4. When the link goes `Disconnected` the monitor removes the record and
//!    decrements the live count exactly once

pub mod link;
pub mod monitor;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::error::{FarmError, Result};
use crate::proto;
use crate::proto::worker_client::WorkerClient;

pub use link::{LinkState, WorkerLink};
pub use monitor::ConnectionMonitor;

/// Worker IDs are this many hex characters long.
const WORKER_ID_LEN: usize = 8;

/// Derive a stable worker ID from the address a worker advertises.
pub fn derive_worker_id(host: &str, port: u16) -> String {
    let name = format!("{}:{}", host, port);
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes());
    uuid.simple().to_string()[..WORKER_ID_LEN].to_string()
}

/// Identity and declared capacity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerDescriptor {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub capacity: u32,
}

impl WorkerDescriptor {
    /// Validate a registration request, deriving the ID when none was declared.
    pub fn from_proto(info: proto::WorkerInfo) -> Result<Self> {
        let host = info.host.trim().to_string();
        if host.is_empty() {
            return Err(FarmError::InvalidArgument(
                "worker host cannot be empty".to_string(),
            ));
        }
        let port = u16::try_from(info.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                FarmError::InvalidArgument(format!("invalid worker port {}", info.port))
            })?;
        if info.max_jobs == 0 {
            return Err(FarmError::InvalidArgument(
                "worker capacity must be at least 1".to_string(),
            ));
        }
        let id = match info.id.trim() {
            "" => derive_worker_id(&host, port),
            declared => declared.to_string(),
        };
        Ok(Self {
            id,
            host,
            port,
            capacity: info.max_jobs,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_proto(&self) -> proto::WorkerInfo {
        proto::WorkerInfo {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port as u32,
            max_jobs: self.capacity,
        }
    }
}

/// A registered worker: descriptor, live client and connection state.
///
/// The registry owns these. Callers get a cloned handle per operation and
/// look the worker up again next time.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub descriptor: WorkerDescriptor,
    pub client: WorkerClient<Channel>,
    pub link: WorkerLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(String),
    Left(String),
}

/// Live set of reachable workers, keyed by worker ID.
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerRecord>,
    /// Guarded separately from the map so counting never blocks lookups.
    live: Mutex<usize>,
    events: broadcast::Sender<MembershipEvent>,
    handshake_timeout: Duration,
    rpc_timeout: Duration,
    probe_interval: Option<Duration>,
}

impl WorkerRegistry {
    pub fn new(config: &ControllerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            workers: DashMap::new(),
            live: Mutex::new(0),
            events,
            handshake_timeout: config.handshake_timeout(),
            rpc_timeout: config.rpc_timeout(),
            probe_interval: config.probe_interval(),
        }
    }

    /// Connect back to a worker, ping it, and add it to the registry.
    ///
    /// Nothing is stored unless both the connection and the ping succeed.
    pub async fn register(self: &Arc<Self>, info: proto::WorkerInfo) -> Result<WorkerDescriptor> {
        let descriptor = WorkerDescriptor::from_proto(info)?;
        let addr = descriptor.address();
        tracing::info!(worker_id = %descriptor.id, addr = %addr, "Worker connecting");

        let client = self.handshake(&addr).await?;
        let link = WorkerLink::new();
        link.mark_ready();

        let record = WorkerRecord {
            descriptor: descriptor.clone(),
            client: client.clone(),
            link: link.clone(),
        };

        match self.workers.insert(descriptor.id.clone(), record) {
            Some(previous) => {
                // The old monitor sees a foreign serial and exits without
                // touching the count.
                previous.link.mark_disconnected();
                tracing::info!(worker_id = %descriptor.id, "Worker re-registered, replaced previous connection");
            }
            None => {
                let live = {
                    let mut live = self.live.lock().await;
                    *live += 1;
                    *live
                };
                tracing::info!(worker_id = %descriptor.id, live_workers = live, "Workers online");
            }
        }

        let _ = self
            .events
            .send(MembershipEvent::Joined(descriptor.id.clone()));
        self.spawn_watchers(descriptor.id.clone(), client, link);

        Ok(descriptor)
    }

    async fn handshake(&self, addr: &str) -> Result<WorkerClient<Channel>> {
        let mut endpoint = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| FarmError::InvalidArgument(format!("invalid worker address: {}", e)))?
            .connect_timeout(self.handshake_timeout)
            .timeout(self.rpc_timeout);
        if let Some(interval) = self.probe_interval {
            endpoint = endpoint
                .http2_keep_alive_interval(interval)
                .keep_alive_timeout(self.handshake_timeout);
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|source| FarmError::WorkerUnreachable {
                addr: addr.to_string(),
                source,
            })?;
        let mut client = WorkerClient::new(channel);

        // A handshake ping proves the worker is reachable at the address it claims
        match tokio::time::timeout(self.handshake_timeout, client.ping(proto::Empty {})).await {
            Ok(Ok(_)) => Ok(client),
            Ok(Err(status)) => {
                tracing::warn!(addr, error = %status, "Unable to ping worker, handshake failed");
                Err(FarmError::Handshake {
                    addr: addr.to_string(),
                    reason: status.message().to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(addr, "Handshake ping timed out");
                Err(FarmError::Handshake {
                    addr: addr.to_string(),
                    reason: "ping timed out".to_string(),
                })
            }
        }
    }

    fn spawn_watchers(self: &Arc<Self>, worker_id: String, client: WorkerClient<Channel>, link: WorkerLink) {
        if let Some(interval) = self.probe_interval {
            let probe_link = link.clone();
            let probe_id = worker_id.clone();
            tokio::spawn(async move {
                monitor::probe_link(probe_id, client, probe_link, interval).await;
            });
        }

        let monitor = ConnectionMonitor::new(self.clone(), worker_id, link);
        tokio::spawn(async move {
            monitor.run().await;
        });
    }

    /// Remove a worker if `link` is still the connection it is registered with.
    ///
    /// Returns true if a record was removed.
    pub async fn evict(&self, worker_id: &str, link: &WorkerLink) -> bool {
        let removed = self
            .workers
            .remove_if(worker_id, |_, record| record.link.serial() == link.serial());
        if removed.is_none() {
            return false;
        }

        let live = {
            let mut live = self.live.lock().await;
            *live = live.saturating_sub(1);
            *live
        };
        tracing::info!(worker_id, live_workers = live, "Worker evicted");
        let _ = self.events.send(MembershipEvent::Left(worker_id.to_string()));
        true
    }

    /// Force a worker's link down, as if its connection dropped.
    pub fn disconnect(&self, worker_id: &str) -> bool {
        match self.workers.get(worker_id) {
            Some(record) => record.link.mark_disconnected(),
            None => false,
        }
    }

    /// Look up a worker for a single operation.
    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.get(worker_id).map(|r| r.value().clone())
    }

    /// Snapshot of every registered worker, in no particular order.
    pub fn records(&self) -> Vec<WorkerRecord> {
        self.workers.iter().map(|r| r.value().clone()).collect()
    }

    /// Registered workers sorted by ID, then address.
    pub fn list(&self) -> Vec<WorkerDescriptor> {
        let mut workers: Vec<WorkerDescriptor> = self
            .workers
            .iter()
            .map(|r| r.value().descriptor.clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.address().cmp(&b.address())));
        workers
    }

    pub async fn live_count(&self) -> usize {
        *self.live.lock().await
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, host: &str, port: u32, max_jobs: u32) -> proto::WorkerInfo {
        proto::WorkerInfo {
            id: id.to_string(),
            host: host.to_string(),
            port,
            max_jobs,
        }
    }

    #[test]
    fn derived_ids_are_short_and_stable() {
        let a = derive_worker_id("render-1", 4400);
        assert_eq!(a.len(), WORKER_ID_LEN);
        assert_eq!(a, derive_worker_id("render-1", 4400));
        assert_ne!(a, derive_worker_id("render-1", 4401));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn descriptor_derives_missing_id() {
        let d = WorkerDescriptor::from_proto(info("", "render-1", 4400, 4)).unwrap();
        assert_eq!(d.id, derive_worker_id("render-1", 4400));
        assert_eq!(d.address(), "render-1:4400");
        assert_eq!(d.capacity, 4);
    }

    #[test]
    fn descriptor_keeps_declared_id() {
        let d = WorkerDescriptor::from_proto(info("abc", "h", 1, 1)).unwrap();
        assert_eq!(d.id, "abc");
        assert_eq!(d.to_proto().id, "abc");
    }

    #[test]
    fn descriptor_rejects_bad_input() {
        assert!(WorkerDescriptor::from_proto(info("", " ", 4400, 1)).is_err());
        assert!(WorkerDescriptor::from_proto(info("", "h", 0, 1)).is_err());
        assert!(WorkerDescriptor::from_proto(info("", "h", 70_000, 1)).is_err());
        assert!(WorkerDescriptor::from_proto(info("", "h", 4400, 0)).is_err());
    }

    #[tokio::test]
    async fn unreachable_worker_is_not_registered() {
        let config = ControllerConfig {
            handshake_timeout_ms: 500,
            ..ControllerConfig::default()
        };
        let registry = Arc::new(WorkerRegistry::new(&config));

        // Port 1 is never listening in the test environment
        let result = registry.register(info("", "127.0.0.1", 1, 2)).await;

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.live_count().await, 0);
    }

    #[tokio::test]
    async fn evict_unknown_worker_is_noop() {
        let registry = WorkerRegistry::new(&ControllerConfig::default());
        assert!(!registry.evict("nobody", &WorkerLink::new()).await);
        assert!(!registry.disconnect("nobody"));
        assert_eq!(registry.live_count().await, 0);
    }
}
