//! Framed socket transport.
//!
//! Every Vigil process talks to its peers with the same framing: a 4-byte
//! little-endian length prefix followed by a UTF-8 payload, one request per
//! connection, over a Unix socket (local daemons) or TCP (cluster members).
//!
//! # Architecture
//!
//! - **Framing**: shared header encode/decode used by both sides
//! - **Channel**: client side, opens a connection per request
//! - **Server**: accepts connections and hands each request to a handler
//! - **Queue**: one-way datagrams to daemons that never answer

pub mod channel;
pub mod framing;
pub mod queue;
pub mod server;

pub use channel::{Endpoint, FramedChannel};
pub use queue::QueueSocket;
pub use server::{FrameHandler, FramedServer, FramedServerHandle};
