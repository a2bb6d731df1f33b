pub mod context;
pub mod control;
pub mod events;
pub mod manager;
pub mod queue_ops;
pub mod registry;
pub mod session;
pub mod state;
pub mod timing;

pub use context::PlayerContext;
pub use control::{PlayOptions, PlayOutcome};
pub use events::{EventEmitter, PlayerEvent, SkipReason};
pub use manager::Player;
pub use registry::SessionRegistry;
pub use session::Session;
pub use state::{Bitrate, FilterState, PlaybackState, PlaybackStatus};
pub use timing::{ProgressBarOptions, Timestamp};
