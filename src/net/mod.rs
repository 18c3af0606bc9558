//! Wire-level plumbing: framing, protocol vocabulary, one-shot calls.

pub mod client;
pub mod message;
pub mod wire;
