pub mod base;
pub mod logging;
pub mod player;
pub mod pool;
pub mod server;

pub use base::*;
pub use logging::*;
pub use player::*;
pub use pool::*;
pub use server::*;
