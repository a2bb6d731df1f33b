pub mod codec;
pub mod messages;
pub mod opcodes;
pub mod tracks;

pub use codec::*;
pub use messages::*;
pub use opcodes::*;
pub use tracks::*;
