// RTMP protocol: handshake, chunk framing, message encoding

mod chunk;
mod constants;
mod handshake;
mod message;

pub use chunk::*;
pub use constants::*;
pub use handshake::*;
pub use message::*;
