//! Scanner protocol: packet model, link framing and SCI-bus replies.

pub mod link;
pub mod packet;
pub mod sci;

pub use link::{FrameDecoder, encode};
pub use packet::{Bus, Command, Packet};
