pub mod history;
pub mod track_queue;

pub use history::History;
pub use track_queue::{TrackQueue, TrackRef};
