use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::derive_worker_id;

/// Controller process configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub listen_addr: SocketAddr,
    /// Directory finished renders are written to.
    pub output_dir: PathBuf,
    /// Upper bound on connect + ping when a worker registers.
    pub handshake_timeout_ms: u64,
    /// Per-call deadline for RPCs the controller makes to workers.
    pub rpc_timeout_ms: u64,
    /// How often each worker link is probed. Zero disables probing, leaving
    /// eviction to failures observed on dispatch.
    pub probe_interval_ms: u64,
    pub dashboard_addr: Option<SocketAddr>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:5000"
                .parse()
                .expect("default listen address is valid"),
            output_dir: PathBuf::from("renders"),
            handshake_timeout_ms: 5_000,
            rpc_timeout_ms: 10_000,
            probe_interval_ms: 1_000,
            dashboard_addr: None,
        }
    }
}

impl ControllerConfig {
    pub fn new(listen_addr: SocketAddr, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_probe_interval_ms(mut self, interval_ms: u64) -> Self {
        self.probe_interval_ms = interval_ms;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    /// Hostname the controller should use to call back into this worker.
    pub advertise_host: String,
    /// Controller endpoint, e.g. `http://localhost:5000`.
    pub controller_addr: String,
    /// Maximum tiles this worker accepts concurrently.
    pub capacity: u32,
    pub connect_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:4400"
                .parse()
                .expect("default listen address is valid"),
            advertise_host: "localhost".to_string(),
            controller_addr: "http://localhost:5000".to_string(),
            capacity: default_capacity(),
            connect_timeout_ms: 20_000,
        }
    }
}

impl WorkerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Stable worker identity derived from the advertised endpoint.
    pub fn worker_id(&self) -> String {
        derive_worker_id(&self.advertise_host, self.listen_addr.port())
    }
}

/// One tile slot per available core.
pub fn default_capacity() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Render parameters used by the CLI when flags are omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderDefaults {
    pub width: u32,
    pub aspect_ratio: f64,
    pub samples_per_pixel: u32,
    pub max_depth: u32,
    pub slice_count: u32,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            aspect_ratio: 16.0 / 9.0,
            samples_per_pixel: 20,
            max_depth: 5,
            slice_count: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_config_default() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:5000");
        assert_eq!(cfg.output_dir, PathBuf::from("renders"));
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.probe_interval(), Some(Duration::from_secs(1)));
        assert!(cfg.dashboard_addr.is_none());
    }

    #[test]
    fn zero_probe_interval_disables_probing() {
        let cfg = ControllerConfig::default().with_probe_interval_ms(0);
        assert!(cfg.probe_interval().is_none());
    }

    #[test]
    fn controller_config_new() {
        let addr: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let cfg = ControllerConfig::new(addr, "/tmp/out");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.rpc_timeout_ms, 10_000);
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.listen_addr.port(), 4400);
        assert_eq!(cfg.controller_addr, "http://localhost:5000");
        assert!(cfg.capacity >= 1);
    }

    #[test]
    fn worker_id_is_stable_per_endpoint() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert_eq!(a.worker_id(), b.worker_id());
        assert_eq!(a.worker_id().len(), 8);

        let other = WorkerConfig {
            listen_addr: "0.0.0.0:4401".parse().unwrap(),
            ..WorkerConfig::default()
        };
        assert_ne!(a.worker_id(), other.worker_id());
    }

    #[test]
    fn render_defaults() {
        let d = RenderDefaults::default();
        assert_eq!(d.width, 1920);
        assert_eq!(d.slice_count, 32);
        assert!((d.aspect_ratio - 16.0 / 9.0).abs() < f64::EPSILON);
    }
}
