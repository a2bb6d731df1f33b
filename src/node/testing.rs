//! Scripted nodes for tests: they answer the control protocol instantly,
//! record every op they receive and can be told to misbehave.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    common::{
        PlayerResult,
        types::{NodeId, TenantId},
    },
    node::spawner::{ExitGuard, NodeExit, NodeSpawner, SpawnedNode},
    protocol::{
        messages::{
            ControlMessage, NodeEvent, ResourceUsage, SessionEvent, SessionEventKind,
            TrackEndReason,
        },
        opcodes::ControlOp,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub node: NodeId,
    pub op: ControlOp,
    pub tenant: Option<TenantId>,
}

#[derive(Default)]
struct Script {
    log: Mutex<Vec<Recorded>>,
    withhold_ready: AtomicBool,
    silent: Mutex<HashSet<NodeId>>,
    heap: Mutex<HashMap<NodeId, u64>>,
    injectors: Mutex<HashMap<NodeId, flume::Sender<NodeEvent>>>,
    crashes: Mutex<HashMap<NodeId, CancellationToken>>,
    spawned: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    script: Arc<Script>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn withhold_ready(&self, on: bool) {
        self.script.withhold_ready.store(on, Ordering::SeqCst);
    }

    /// The node stops answering heartbeats.
    pub fn silence(&self, node: NodeId) {
        self.script.silent.lock().insert(node);
    }

    pub fn set_heap(&self, node: NodeId, heap_used: u64) {
        self.script.heap.lock().insert(node, heap_used);
    }

    pub fn crash(&self, node: NodeId) {
        if let Some(token) = self.script.crashes.lock().get(&node) {
            token.cancel();
        }
    }

    /// Sends an event as if `node` had produced it.
    pub fn inject(&self, node: NodeId, event: NodeEvent) {
        if let Some(tx) = self.script.injectors.lock().get(&node) {
            let _ = tx.send(event);
        }
    }

    pub fn spawned(&self) -> usize {
        self.script.spawned.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<Recorded> {
        self.script.log.lock().clone()
    }

    pub fn count(&self, op: ControlOp) -> usize {
        self.script.log.lock().iter().filter(|r| r.op == op).count()
    }

    pub fn count_for(&self, op: ControlOp, tenant: &str) -> usize {
        self.script
            .log
            .lock()
            .iter()
            .filter(|r| r.op == op && r.tenant.as_deref() == Some(tenant))
            .count()
    }
}

impl NodeSpawner for ScriptedSpawner {
    fn spawn(&self, id: NodeId) -> PlayerResult<SpawnedNode> {
        let (control_tx, control_rx) = flume::unbounded();
        let (event_tx, events_rx) = flume::unbounded();
        let (exit_tx, exit) = tokio::sync::oneshot::channel();
        let shutdown = CancellationToken::new();
        let crash = CancellationToken::new();

        self.script.spawned.fetch_add(1, Ordering::SeqCst);
        self.script.injectors.lock().insert(id, event_tx.clone());
        self.script.crashes.lock().insert(id, crash.clone());

        let script = self.script.clone();
        let node_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let guard = ExitGuard::new(exit_tx);
            let exit = scripted_node(id, script, control_rx, event_tx, node_shutdown, crash).await;
            guard.finish(exit);
        });

        Ok(SpawnedNode {
            control_tx,
            events_rx,
            shutdown,
            exit,
        })
    }
}

async fn scripted_node(
    id: NodeId,
    script: Arc<Script>,
    control_rx: flume::Receiver<ControlMessage>,
    events: flume::Sender<NodeEvent>,
    shutdown: CancellationToken,
    crash: CancellationToken,
) -> NodeExit {
    if !script.withhold_ready.load(Ordering::SeqCst) {
        let _ = events.send(NodeEvent::Ready);
    }

    let mut current: HashMap<TenantId, String> = HashMap::new();
    let payload = |tenant: &TenantId, kind: SessionEventKind| {
        let _ = events.send(NodeEvent::Payload(SessionEvent {
            tenant: tenant.clone(),
            kind,
        }));
    };
    let end = |tenant: &TenantId, track_id: String, reason: TrackEndReason| {
        payload(
            tenant,
            SessionEventKind::TrackEnd {
                track_id,
                reason,
                elapsed_ms: 0,
            },
        );
    };

    loop {
        let msg = tokio::select! {
            biased;
            _ = crash.cancelled() => return NodeExit::Crashed("scripted crash".into()),
            _ = shutdown.cancelled() => return NodeExit::Clean,
            msg = control_rx.recv_async() => match msg {
                Ok(msg) => msg,
                Err(_) => return NodeExit::Clean,
            },
        };

        script.log.lock().push(Recorded {
            node: id,
            op: msg.op(),
            tenant: msg.tenant().cloned(),
        });

        match msg {
            ControlMessage::HeartBeat => {
                if script.silent.lock().contains(&id) {
                    continue;
                }
                let heap_used = script.heap.lock().get(&id).copied().unwrap_or(0);
                let _ = events.send(NodeEvent::Stats(ResourceUsage {
                    heap_used,
                    ..Default::default()
                }));
                let _ = events.send(NodeEvent::HeartBeatAck);
            }
            ControlMessage::JoinChannel { tenant, channel, .. } => {
                let _ = events.send(NodeEvent::Connected { tenant, channel });
            }
            ControlMessage::Play(req) => {
                if let Some(previous) = current.insert(req.tenant.clone(), req.track_id.clone()) {
                    end(&req.tenant, previous, TrackEndReason::Replaced);
                }
                payload(
                    &req.tenant,
                    SessionEventKind::TrackStart {
                        track_id: req.track_id,
                    },
                );
            }
            ControlMessage::SkipTrack { tenant } => {
                if let Some(track_id) = current.remove(&tenant) {
                    end(&tenant, track_id, TrackEndReason::Skipped);
                }
            }
            ControlMessage::Stop { tenant } => {
                if let Some(track_id) = current.remove(&tenant) {
                    end(&tenant, track_id, TrackEndReason::Stopped);
                }
            }
            ControlMessage::Destroy { tenant } => {
                if let Some(track_id) = current.remove(&tenant) {
                    end(&tenant, track_id, TrackEndReason::Destroyed);
                }
            }
            ControlMessage::SetVolume { .. }
            | ControlMessage::SetPaused { .. }
            | ControlMessage::SetBitrate { .. }
            | ControlMessage::Seek { .. }
            | ControlMessage::SetFilters { .. }
            | ControlMessage::SetEqualizer { .. }
            | ControlMessage::SetBiquad { .. }
            | ControlMessage::SetDsp { .. } => {}
        }
    }
}
