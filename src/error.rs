use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener is not bound; the peer was already started or failed to restart")]
    NotBound,

    #[error("Could not derive port from user id: {0}")]
    PortDerivation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// The outbound caller's only error. Dial failures, short reads and framing
/// faults all collapse into this so callers treat reachability as a single
/// yes/no fact.
#[derive(Error, Debug)]
#[error("Peer {ip} is unreachable")]
pub struct Unreachable {
    pub ip: String,
}
