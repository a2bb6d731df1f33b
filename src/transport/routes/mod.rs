pub mod sessions;
pub mod status;

pub use sessions::{get_session, get_sessions};
pub use status::{get_info, get_nodes, get_stats, get_version};
