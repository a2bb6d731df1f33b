use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    common::{PlayerError, PlayerResult, types::NodeId},
    configs::NodeRuntimeKind,
    node::{
        runtime::{NodeContext, run_node},
        sink::SinkFactory,
    },
    protocol::messages::{ControlMessage, NodeEvent},
};

/// How a node's event loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExit {
    Clean,
    Crashed(String),
}

/// The pool's side of a freshly spawned node.
pub struct SpawnedNode {
    pub control_tx: flume::Sender<ControlMessage>,
    pub events_rx: flume::Receiver<NodeEvent>,
    pub shutdown: CancellationToken,
    pub exit: oneshot::Receiver<NodeExit>,
}

/// Creates isolated execution units for the pool.
pub trait NodeSpawner: Send + Sync + 'static {
    fn spawn(&self, id: NodeId) -> PlayerResult<SpawnedNode>;
}

/// Reports `Crashed` unless the node finished normally. Dropped during a
/// panic unwind, so a panicking node still reports its exit.
pub(crate) struct ExitGuard {
    tx: Option<oneshot::Sender<NodeExit>>,
}

impl ExitGuard {
    pub(crate) fn new(tx: oneshot::Sender<NodeExit>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn finish(mut self, exit: NodeExit) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(exit);
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let reason = if std::thread::panicking() {
                "node panicked"
            } else {
                "node was dropped"
            };
            let _ = tx.send(NodeExit::Crashed(reason.to_string()));
        }
    }
}

/// Both ends of a node's channels.
pub(crate) fn wire(id: NodeId, sinks: Arc<dyn SinkFactory>) -> (NodeContext, SpawnedNode, ExitGuard) {
    let (control_tx, control_rx) = flume::unbounded();
    let (event_tx, events_rx) = flume::unbounded();
    let (exit_tx, exit) = oneshot::channel();
    let shutdown = CancellationToken::new();

    (
        NodeContext {
            id,
            control_rx,
            event_tx,
            shutdown: shutdown.clone(),
            sinks,
        },
        SpawnedNode {
            control_tx,
            events_rx,
            shutdown,
            exit,
        },
        ExitGuard::new(exit_tx),
    )
}

/// Runs each node as a task on the caller's runtime.
pub struct TaskNodeSpawner {
    sinks: Arc<dyn SinkFactory>,
}

impl TaskNodeSpawner {
    pub fn new(sinks: Arc<dyn SinkFactory>) -> Self {
        Self { sinks }
    }
}

impl NodeSpawner for TaskNodeSpawner {
    fn spawn(&self, id: NodeId) -> PlayerResult<SpawnedNode> {
        let (ctx, node, guard) = wire(id, self.sinks.clone());
        tokio::spawn(async move {
            run_node(ctx).await;
            guard.finish(NodeExit::Clean);
        });
        Ok(node)
    }
}

/// Runs each node on a dedicated OS thread with its own single-threaded
/// runtime.
pub struct ThreadNodeSpawner {
    sinks: Arc<dyn SinkFactory>,
}

impl ThreadNodeSpawner {
    pub fn new(sinks: Arc<dyn SinkFactory>) -> Self {
        Self { sinks }
    }
}

impl NodeSpawner for ThreadNodeSpawner {
    fn spawn(&self, id: NodeId) -> PlayerResult<SpawnedNode> {
        let (ctx, node, guard) = wire(id, self.sinks.clone());

        std::thread::Builder::new()
            .name(format!("rustaplay-{}", id))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("{} failed to build its runtime: {}", id, e);
                        guard.finish(NodeExit::Crashed(e.to_string()));
                        return;
                    }
                };
                runtime.block_on(run_node(ctx));
                guard.finish(NodeExit::Clean);
            })
            .map_err(|e| PlayerError::SpawnFailed(e.to_string()))?;

        Ok(node)
    }
}

/// Spawner matching the configured runtime kind.
pub fn spawner_for(kind: NodeRuntimeKind, sinks: Arc<dyn SinkFactory>) -> Arc<dyn NodeSpawner> {
    match kind {
        NodeRuntimeKind::Thread => Arc::new(ThreadNodeSpawner::new(sinks)),
        NodeRuntimeKind::Task => Arc::new(TaskNodeSpawner::new(sinks)),
    }
}
