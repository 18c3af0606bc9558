//! Inbound connection handling.
//!
//! One connection carries exactly one framed request and one framed reply.
//! Framing faults drop the connection without a reply.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::debug;

use super::{election, PeerShared};
use crate::net::message::{Request, REPLY_NO_MASTER, REPLY_PING_RECEIVED, REPLY_UNKNOWN};
use crate::net::wire;

pub(crate) async fn handle_connection(
    shared: Arc<PeerShared>,
    mut stream: TcpStream,
    addr: SocketAddr,
) {
    let payload = match wire::read_frame(&mut stream).await {
        Ok(payload) => payload,
        Err(e) => {
            debug!("dropping connection from {addr}: {e}");
            return;
        }
    };

    let reply = match Request::parse(&payload) {
        Request::AskMaster => {
            // The asker is part of the network; remember that it finished
            // its probe of us.
            shared.requests.lock().await.insert(addr.ip().to_string());
            shared
                .master
                .read()
                .await
                .clone()
                .unwrap_or_else(|| REPLY_NO_MASTER.to_string())
        }
        Request::Ping { source } => {
            // No master-role check here: a non-master should not receive
            // pings, and if one does the stored bit is harmless.
            shared.ping_targets.lock().await.insert(source, 1);
            REPLY_PING_RECEIVED.to_string()
        }
        Request::Vote { voter } => election::handle_vote(&shared, voter).await.to_string(),
        Request::Other(other) => {
            debug!("unknown message from {addr}: {other:?}");
            REPLY_UNKNOWN.to_string()
        }
    };

    if let Err(e) = wire::write_frame(&mut stream, &reply).await {
        debug!("failed to reply to {addr}: {e}");
    }
}
