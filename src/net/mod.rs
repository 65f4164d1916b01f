//! Wire plumbing: framing, the peer transport, and the client listener.

pub mod codec;
pub mod listener;
pub mod transport;
