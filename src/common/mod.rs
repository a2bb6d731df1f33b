pub mod errors;
pub mod logger;
pub mod time_code;
pub mod types;

pub use errors::*;
pub use logger::*;
pub use time_code::*;
pub use types::*;
