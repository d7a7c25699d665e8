//! Framed stream transport: packet codec, non-blocking sockets and listeners.

pub mod listener;
pub mod packet;
pub mod socket;

pub use listener::{connect, spawn_connect, ListenAddr, ListenSocket};
pub use packet::{FrameDecoder, Packet};
pub use socket::{CloseReason, SendOutcome, Socket, SocketStream};
