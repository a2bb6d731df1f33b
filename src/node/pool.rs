use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::{
    sync::{broadcast, oneshot},
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, NodeId, TenantId},
    },
    configs::PoolConfig,
    node::{
        handle::{NodeHandle, NodeSnapshot},
        spawner::{NodeExit, NodeSpawner, SpawnedNode},
    },
    protocol::messages::{ControlMessage, NodeEvent, ResourceUsage, SessionEvent},
};

/// Why a node left the live set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ExitReason {
    /// The node's loop returned on its own.
    Clean,
    Crashed(String),
    HeartbeatTimeout,
    Terminated,
}

/// Typed view of everything nodes report, plus pool lifecycle.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    ResourceSample {
        node: NodeId,
        usage: ResourceUsage,
    },
    HeartbeatAck {
        node: NodeId,
    },
    Session {
        node: NodeId,
        event: SessionEvent,
    },
    Connected {
        node: NodeId,
        tenant: TenantId,
        channel: ChannelId,
    },
    Error {
        node: Option<NodeId>,
        message: String,
    },
    Exit {
        node: NodeId,
        reason: ExitReason,
    },
}

impl PoolEvent {
    /// Events a session cannot afford to miss.
    fn is_routed(&self) -> bool {
        !matches!(
            self,
            PoolEvent::ResourceSample { .. } | PoolEvent::HeartbeatAck { .. }
        )
    }
}

const EVENT_CAPACITY: usize = 1_024;

/// Bounded set of nodes with heartbeat supervision and least-busy selection.
pub struct NodePool {
    max_nodes: usize,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    spawn_timeout: Duration,
    spawner: Arc<dyn NodeSpawner>,
    nodes: DashMap<NodeId, Arc<NodeHandle>>,
    next_id: AtomicU64,
    spawn_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<PoolEvent>,
    routed: parking_lot::Mutex<Option<flume::Sender<PoolEvent>>>,
    heartbeat: parking_lot::Mutex<Option<CancellationToken>>,
}

impl NodePool {
    pub fn new(config: &PoolConfig, spawner: Arc<dyn NodeSpawner>) -> PlayerResult<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            max_nodes: config.max_nodes.resolve(),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            spawn_timeout: Duration::from_millis(config.spawn_timeout_ms),
            spawner,
            nodes: DashMap::new(),
            next_id: AtomicU64::new(1),
            spawn_lock: tokio::sync::Mutex::new(()),
            events,
            routed: parking_lot::Mutex::new(None),
            heartbeat: parking_lot::Mutex::new(None),
        }))
    }

    /// Lossy feed for observers. Slow receivers see `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Unbounded feed of session, connection, error and exit events for the
    /// one consumer that routes them to sessions. Replaces any earlier feed.
    pub fn route(&self) -> flume::Receiver<PoolEvent> {
        let (tx, rx) = flume::unbounded();
        *self.routed.lock() = Some(tx);
        rx
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn emit(&self, event: PoolEvent) {
        if event.is_routed() {
            if let Some(tx) = self.routed.lock().as_ref() {
                let _ = tx.send(event.clone());
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn get(&self, id: NodeId) -> PlayerResult<Arc<NodeHandle>> {
        self.nodes
            .get(&id)
            .map(|n| n.value().clone())
            .ok_or(PlayerError::NodeNotFound(id))
    }

    /// Spawns a node if there is capacity, otherwise returns the least busy
    /// live one.
    pub async fn spawn(self: &Arc<Self>) -> PlayerResult<NodeId> {
        let _guard = self.spawn_lock.lock().await;

        if self.nodes.len() >= self.max_nodes {
            return self
                .least_busy()
                .ok_or_else(|| PlayerError::SpawnFailed("node pool is at capacity".into()));
        }

        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let SpawnedNode {
            control_tx,
            events_rx,
            shutdown,
            exit,
        } = self.spawner.spawn(id).inspect_err(|e| {
            self.emit(PoolEvent::Error {
                node: None,
                message: e.to_string(),
            })
        })?;

        let ready = tokio::time::timeout(self.spawn_timeout, async {
            loop {
                match events_rx.recv_async().await {
                    Ok(NodeEvent::Ready) => return true,
                    Ok(other) => debug!("{} sent {} before ready, ignoring", id, other.op()),
                    Err(_) => return false,
                }
            }
        })
        .await;

        match ready {
            Ok(true) => {}
            Ok(false) => {
                shutdown.cancel();
                error!("{} exited before becoming ready", id);
                return Err(PlayerError::SpawnFailed(format!(
                    "{} exited before becoming ready",
                    id
                )));
            }
            Err(_) => {
                shutdown.cancel();
                warn!(
                    "{} did not become ready within {}ms",
                    id,
                    self.spawn_timeout.as_millis()
                );
                return Err(PlayerError::SpawnTimeout {
                    timeout_ms: self.spawn_timeout.as_millis() as u64,
                });
            }
        }

        let handle = Arc::new(NodeHandle::new(id, control_tx, shutdown));
        self.nodes.insert(id, handle.clone());
        tokio::spawn(pump(Arc::downgrade(self), handle, events_rx, exit));
        self.ensure_heartbeat();

        info!("Spawned {} ({}/{})", id, self.nodes.len(), self.max_nodes);
        Ok(id)
    }

    /// Lowest `heap_used`, then the oldest heartbeat, then the lowest id.
    pub fn least_busy(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .map(|n| (n.usage().heap_used, n.last_heartbeat(), n.id()))
            .min()
            .map(|(_, _, id)| id)
    }

    pub fn send(&self, id: NodeId, msg: ControlMessage) -> PlayerResult<()> {
        debug!("{} -> {}", msg.op(), id);
        self.get(id)?.send(msg)
    }

    /// Best-effort delivery to every live node. Returns how many accepted it.
    pub fn broadcast(&self, make: impl Fn() -> ControlMessage) -> usize {
        let handles: Vec<_> = self.nodes.iter().map(|n| n.value().clone()).collect();
        handles.iter().filter(|h| h.send(make()).is_ok()).count()
    }

    /// Tears down one node, or every node and the heartbeat loop.
    pub fn terminate(&self, id: Option<NodeId>) {
        match id {
            Some(id) => {
                self.remove(id, ExitReason::Terminated);
            }
            None => {
                if let Some(token) = self.heartbeat.lock().take() {
                    token.cancel();
                }
                let ids: Vec<NodeId> = self.nodes.iter().map(|n| *n.key()).collect();
                for id in ids {
                    self.remove(id, ExitReason::Terminated);
                }
            }
        }
    }

    pub fn bind(&self, id: NodeId) -> PlayerResult<()> {
        let bindings = self.get(id)?.bind();
        debug!("{} now hosts {} session(s)", id, bindings);
        Ok(())
    }

    /// Drops a tenant from a node. The node stays alive for its other tenants.
    pub fn release(&self, id: NodeId, tenant: &TenantId) {
        if let Ok(handle) = self.get(id) {
            let _ = handle.send(ControlMessage::Destroy {
                tenant: tenant.clone(),
            });
            handle.release();
        }
    }

    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|n| n.snapshot()).collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    fn remove(&self, id: NodeId, reason: ExitReason) -> bool {
        let Some((_, handle)) = self.nodes.remove(&id) else {
            return false;
        };
        handle.shutdown();

        match &reason {
            ExitReason::Clean | ExitReason::Terminated => info!("{} left the pool: {:?}", id, reason),
            ExitReason::HeartbeatTimeout => warn!(
                "{} missed heartbeats for {}ms, evicting",
                id,
                handle.heartbeat_age().as_millis()
            ),
            ExitReason::Crashed(msg) => error!("{} crashed: {}", id, msg),
        }

        self.emit(PoolEvent::Exit { node: id, reason });
        true
    }

    fn ensure_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock();
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());

        let pool = Arc::downgrade(self);
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match pool.upgrade() {
                    Some(pool) => pool.check_heartbeats(),
                    None => break,
                }
            }
            debug!("Heartbeat loop stopped");
        });
    }

    fn check_heartbeats(&self) {
        let handles: Vec<_> = self.nodes.iter().map(|n| n.value().clone()).collect();

        for handle in handles {
            if handle.heartbeat_age() > self.heartbeat_timeout {
                self.remove(handle.id(), ExitReason::HeartbeatTimeout);
                continue;
            }
            if let Err(e) = handle.send(ControlMessage::HeartBeat) {
                self.emit(PoolEvent::Error {
                    node: Some(handle.id()),
                    message: e.to_string(),
                });
            }
        }
    }

    fn on_event(&self, handle: &NodeHandle, event: NodeEvent) {
        let node = handle.id();
        match event {
            NodeEvent::Ready => debug!("{} repeated Ready, ignoring", node),
            NodeEvent::Stats(usage) => {
                handle.record_usage(usage);
                self.emit(PoolEvent::ResourceSample { node, usage });
            }
            NodeEvent::HeartBeatAck => {
                if !self.nodes.contains_key(&node) {
                    warn!("Heartbeat ack from unknown {}, terminating it", node);
                    handle.shutdown();
                    return;
                }
                handle.touch();
                self.emit(PoolEvent::HeartbeatAck { node });
            }
            NodeEvent::Payload(event) => self.emit(PoolEvent::Session { node, event }),
            NodeEvent::Connected { tenant, channel } => self.emit(PoolEvent::Connected {
                node,
                tenant,
                channel,
            }),
        }
    }
}

/// Forwards one node's events into the pool until the node goes away.
async fn pump(
    pool: Weak<NodePool>,
    handle: Arc<NodeHandle>,
    events: flume::Receiver<NodeEvent>,
    mut exit: oneshot::Receiver<NodeExit>,
) {
    let shutdown = handle.shutdown_token().clone();

    let reason = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            event = events.recv_async() => match event {
                Ok(event) => match pool.upgrade() {
                    Some(pool) => pool.on_event(&handle, event),
                    None => return,
                },
                Err(_) => break match (&mut exit).await {
                    Ok(NodeExit::Clean) => ExitReason::Clean,
                    Ok(NodeExit::Crashed(msg)) => ExitReason::Crashed(msg),
                    Err(_) => ExitReason::Crashed("node vanished without reporting".into()),
                },
            },
            exited = &mut exit => break match exited {
                Ok(NodeExit::Clean) => ExitReason::Clean,
                Ok(NodeExit::Crashed(msg)) => ExitReason::Crashed(msg),
                Err(_) => ExitReason::Crashed("node vanished without reporting".into()),
            },
        }
    };

    // Deliver whatever the node said before it went away.
    if let Some(pool) = pool.upgrade() {
        for event in events.drain() {
            pool.on_event(&handle, event);
        }
        pool.remove(handle.id(), reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::MaxNodes,
        node::testing::ScriptedSpawner,
        protocol::{messages::SessionEventKind, opcodes::ControlOp},
    };

    fn config(max_nodes: usize) -> PoolConfig {
        PoolConfig {
            max_nodes: MaxNodes::Fixed(max_nodes),
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 2_500,
            spawn_timeout_ms: 500,
            ..PoolConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_caps_live_set_and_reuses_nodes() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(3), Arc::new(spawner.clone())).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(pool.spawn().await.unwrap());
        }
        let extra = pool.spawn().await.unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(spawner.spawned(), 3);
        assert!(ids.contains(&extra));
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_busy_prefers_low_heap_then_oldest_heartbeat() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(3), Arc::new(spawner.clone())).unwrap();
        let a = pool.spawn().await.unwrap();
        let b = pool.spawn().await.unwrap();
        let c = pool.spawn().await.unwrap();

        spawner.set_heap(a, 900);
        spawner.set_heap(b, 100);
        spawner.set_heap(c, 100);

        // One heartbeat round delivers the samples.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(pool.least_busy(), Some(b));
        assert_eq!(pool.spawn().await.unwrap(), b);

        spawner.set_heap(b, 500);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(pool.least_busy(), Some(c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_timeout_leaves_capacity_unchanged() {
        let spawner = ScriptedSpawner::new();
        spawner.withhold_ready(true);
        let pool = NodePool::new(&config(1), Arc::new(spawner.clone())).unwrap();

        let err = pool.spawn().await.unwrap_err();
        assert!(matches!(err, PlayerError::SpawnTimeout { timeout_ms: 500 }));
        assert!(pool.is_empty());

        spawner.withhold_ready(false);
        let id = pool.spawn().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_is_evicted() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(2), Arc::new(spawner.clone())).unwrap();
        let mut events = pool.subscribe();
        let quiet = pool.spawn().await.unwrap();
        let healthy = pool.spawn().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        // Last ack at t=1000ms.
        spawner.silence(quiet);

        // Evicted by timeout (2.5s) + interval (1s) after that ack.
        tokio::time::sleep(Duration::from_millis(3_400)).await;

        assert!(!pool.contains(quiet));
        assert!(pool.contains(healthy));
        assert!(matches!(
            pool.send(quiet, ControlMessage::HeartBeat),
            Err(PlayerError::NodeNotFound(id)) if id == quiet
        ));

        let mut saw_exit = false;
        while let Ok(event) = events.try_recv() {
            if let PoolEvent::Exit { node, reason } = event {
                assert_eq!(node, quiet);
                assert_eq!(reason, ExitReason::HeartbeatTimeout);
                saw_exit = true;
            }
        }
        assert!(saw_exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_removes_node_immediately() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(1), Arc::new(spawner.clone())).unwrap();
        let mut events = pool.subscribe();
        let id = pool.spawn().await.unwrap();

        spawner.crash(id);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(pool.is_empty());
        let mut reasons = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PoolEvent::Exit { reason, .. } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![ExitReason::Crashed("scripted crash".into())]);

        // Capacity is free again.
        let next = pool.spawn().await.unwrap();
        assert_ne!(next, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_release_and_terminate() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(2), Arc::new(spawner.clone())).unwrap();
        let a = pool.spawn().await.unwrap();
        let b = pool.spawn().await.unwrap();

        let reached = pool.broadcast(|| ControlMessage::SetDsp {
            tenant: "g".into(),
            enabled: true,
        });
        assert_eq!(reached, 2);

        pool.bind(a).unwrap();
        pool.release(a, &"g".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.contains(a));
        assert_eq!(spawner.count(ControlOp::Destroy), 1);

        pool.terminate(Some(b));
        pool.terminate(Some(b));
        assert!(!pool.contains(b));

        pool.terminate(None);
        pool.terminate(None);
        assert!(pool.is_empty());
        assert!(matches!(pool.bind(a), Err(PlayerError::NodeNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_routed_feed_survives_observer_lag() {
        let spawner = ScriptedSpawner::new();
        let pool = NodePool::new(&config(1), Arc::new(spawner.clone())).unwrap();
        let mut observer = pool.subscribe();
        let routed = pool.route();
        let id = pool.spawn().await.unwrap();

        let total = EVENT_CAPACITY + 100;
        for _ in 0..total {
            spawner.inject(
                id,
                NodeEvent::Payload(SessionEvent {
                    tenant: "g".into(),
                    kind: SessionEventKind::Disconnected,
                }),
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            observer.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let delivered = routed
            .drain()
            .filter(|e| matches!(e, PoolEvent::Session { node, .. } if *node == id))
            .count();
        assert_eq!(delivered, total);
    }
}
