//! Protocol vocabulary.
//!
//! Requests are routed by prefix, exactly as peers put them on the wire.
//! The reply literals are part of the protocol and must match byte for
//! byte, including the historical spelling of [`REPLY_UNKNOWN`].

/// Ask a peer which master it currently follows.
pub const ASK_MASTER: &str = "Your master?";
/// Prefix of a vote message; the remainder is the voter's IP.
pub const VOTE_PREFIX: &str = "vote = ";
/// Prefix of a liveness ping; the remainder is the pinger's IP.
pub const PING_PREFIX: &str = "ip = ";

/// Reply when a peer reports no master.
pub const REPLY_NO_MASTER: &str = "None";
pub const REPLY_MASTER_CONFIRMED: &str = "The master has been confirmed";
pub const REPLY_MASTER_DECLINED: &str = "The master has been declined";
pub const REPLY_PING_RECEIVED: &str = "Ping received";
/// Catch-all reply; the misspelling is wire-compatible legacy.
pub const REPLY_UNKNOWN: &str = "recieved something";

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AskMaster,
    Vote { voter: String },
    Ping { source: String },
    Other(String),
}

impl Request {
    /// Classify a raw payload. Never fails; anything unrecognised is
    /// [`Request::Other`] and gets the catch-all reply.
    pub fn parse(payload: &str) -> Self {
        if payload == ASK_MASTER {
            Request::AskMaster
        } else if let Some(voter) = payload.strip_prefix(VOTE_PREFIX) {
            Request::Vote {
                voter: voter.to_string(),
            }
        } else if let Some(source) = payload.strip_prefix(PING_PREFIX) {
            Request::Ping {
                source: source.to_string(),
            }
        } else {
            Request::Other(payload.to_string())
        }
    }

    /// Render the request for the wire.
    pub fn encode(&self) -> String {
        match self {
            Request::AskMaster => ASK_MASTER.to_string(),
            Request::Vote { voter } => format!("{VOTE_PREFIX}{voter}"),
            Request::Ping { source } => format!("{PING_PREFIX}{source}"),
            Request::Other(payload) => payload.clone(),
        }
    }
}
