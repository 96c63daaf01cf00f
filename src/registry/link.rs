use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tonic::{Code, Status};

static NEXT_LINK_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Connectivity of the controller's client connection to one worker.
///
/// `Connecting -> Ready -> Disconnected`; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Connecting,
    Ready,
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Ready => write!(f, "ready"),
            LinkState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Shared handle to a worker connection's state machine.
///
/// Every clone observes the same state. Each link gets a process-unique
/// serial so a stale monitor can tell its link apart from the one that
/// replaced it after a re-registration.
#[derive(Debug, Clone)]
pub struct WorkerLink {
    serial: u64,
    state: Arc<watch::Sender<LinkState>>,
}

impl Default for WorkerLink {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkState::Connecting);
        Self {
            serial: NEXT_LINK_SERIAL.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(tx),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Handshake succeeded. No-op once disconnected.
    pub fn mark_ready(&self) -> bool {
        self.transition(LinkState::Ready)
    }

    /// Transport is gone. Returns true on the first call only.
    pub fn mark_disconnected(&self) -> bool {
        self.transition(LinkState::Disconnected)
    }

    fn transition(&self, next: LinkState) -> bool {
        self.state.send_if_modified(|current| {
            let allowed = matches!(
                (*current, next),
                (LinkState::Connecting, LinkState::Ready)
                    | (LinkState::Connecting, LinkState::Disconnected)
                    | (LinkState::Ready, LinkState::Disconnected)
            );
            if allowed {
                *current = next;
            }
            allowed
        })
    }

    /// Feed the outcome of an RPC made over this link into the state machine.
    pub fn observe(&self, status: &Status) {
        if is_transport_failure(status) && self.mark_disconnected() {
            tracing::debug!(serial = self.serial, error = %status, "Worker link lost");
        }
    }

    /// Resolves once the link reaches `Disconnected`.
    pub async fn disconnected(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s == LinkState::Disconnected).await;
    }
}

/// True for errors that mean the worker can no longer be reached at all,
/// as opposed to the worker answering with an application error.
pub fn is_transport_failure(status: &Status) -> bool {
    status.code() == Code::Unavailable
}
