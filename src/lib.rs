//! quorumd: a quorum-based peer coordination service.
//!
//! A cluster of identical peers elects and monitors a single master over a
//! small framed TCP protocol. As long as a strict majority of the
//! configured membership is reachable the peers converge on one master;
//! once that majority is lost, every peer takes itself offline rather than
//! risk a split brain.

pub mod config;
pub mod error;
pub mod net;
pub mod peer;
pub mod shell;
pub mod shutdown;

pub use config::Config;
pub use error::Error;
pub use peer::Peer;
