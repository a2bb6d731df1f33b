pub mod common;
pub mod configs;
pub mod monitoring;
pub mod node;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod sources;
pub mod transport;
