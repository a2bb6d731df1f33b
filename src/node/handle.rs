use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    common::{PlayerError, PlayerResult, types::NodeId},
    protocol::messages::{ControlMessage, ResourceUsage},
};

/// The pool's view of one live node.
pub struct NodeHandle {
    id: NodeId,
    control_tx: flume::Sender<ControlMessage>,
    usage: Mutex<ResourceUsage>,
    last_heartbeat: Mutex<Instant>,
    spawned_at: Instant,
    shutdown: CancellationToken,
    bindings: AtomicUsize,
}

/// Point-in-time description of a node for statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub usage: ResourceUsage,
    pub heartbeat_age_ms: u64,
    pub uptime_ms: u64,
    pub bindings: usize,
}

impl NodeHandle {
    pub fn new(
        id: NodeId,
        control_tx: flume::Sender<ControlMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            control_tx,
            usage: Mutex::new(ResourceUsage::default()),
            last_heartbeat: Mutex::new(now),
            spawned_at: now,
            shutdown,
            bindings: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn send(&self, msg: ControlMessage) -> PlayerResult<()> {
        self.control_tx
            .send(msg)
            .map_err(|_| PlayerError::NodeNotFound(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.control_tx.is_disconnected() || self.shutdown.is_cancelled()
    }

    pub fn usage(&self) -> ResourceUsage {
        *self.usage.lock()
    }

    pub fn record_usage(&self, usage: ResourceUsage) {
        *self.usage.lock() = usage;
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn heartbeat_age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_heartbeat())
    }

    pub fn bind(&self) -> usize {
        self.bindings.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release(&self) -> usize {
        let prev = self
            .bindings
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn bindings(&self) -> usize {
        self.bindings.load(Ordering::Acquire)
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Asks the node to stop. Threads cannot be killed; the node notices the
    /// cancelled token or the closed control channel on its next poll.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            usage: self.usage(),
            heartbeat_age_ms: self.heartbeat_age().as_millis() as u64,
            uptime_ms: self.spawned_at.elapsed().as_millis() as u64,
            bindings: self.bindings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_fails_once_node_side_is_gone() {
        let (tx, rx) = flume::unbounded();
        let handle = NodeHandle::new(NodeId(1), tx, CancellationToken::new());
        assert!(handle.send(ControlMessage::HeartBeat).is_ok());
        drop(rx);
        assert!(matches!(
            handle.send(ControlMessage::HeartBeat),
            Err(PlayerError::NodeNotFound(NodeId(1)))
        ));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_binding_count_never_underflows() {
        let (tx, _rx) = flume::unbounded();
        let handle = NodeHandle::new(NodeId(1), tx, CancellationToken::new());
        assert_eq!(handle.bind(), 1);
        assert_eq!(handle.release(), 0);
        assert_eq!(handle.release(), 0);
        assert_eq!(handle.bindings(), 0);
    }
}
