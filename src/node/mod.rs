pub mod constants;
pub mod handle;
pub mod pool;
pub mod runtime;
pub mod sink;
pub mod spawner;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::{NodeHandle, NodeSnapshot};
pub use pool::{ExitReason, NodePool, PoolEvent};
pub use sink::{AudioSink, NullSink, NullSinkFactory, SinkFactory};
pub use spawner::{NodeExit, NodeSpawner, SpawnedNode, TaskNodeSpawner, ThreadNodeSpawner, spawner_for};
