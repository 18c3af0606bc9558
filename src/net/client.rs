//! One-shot outbound caller.
//!
//! A peer that needs to talk to another dials it, sends a single framed
//! request, reads the single framed reply and closes. The socket is bound
//! to the calling peer's own address so the receiver can attribute the
//! connection (loopback clusters would otherwise all appear to call from
//! the destination address). There is no retry here; retry policy belongs
//! to the calling state machine.

use std::net::SocketAddr;

use tokio::net::TcpSocket;
use tracing::debug;

use crate::error::Unreachable;
use crate::net::wire::{self, WireError};

/// Dial `target_ip:port` from `source_ip`, exchange one request for one
/// reply.
///
/// Every failure mode (bad address, connect refused, reset mid-dialogue,
/// framing fault) collapses into [`Unreachable`]; the engine treats
/// reachability as a single fact about the peer.
pub async fn call(
    source_ip: &str,
    target_ip: &str,
    port: u16,
    message: &str,
) -> Result<String, Unreachable> {
    match dialogue(source_ip, target_ip, port, message).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            debug!("call to {target_ip} failed: {e}");
            Err(Unreachable {
                ip: target_ip.to_string(),
            })
        }
    }
}

async fn dialogue(
    source_ip: &str,
    target_ip: &str,
    port: u16,
    message: &str,
) -> Result<String, WireError> {
    let source: SocketAddr = parse_addr(source_ip, 0)?;
    let target: SocketAddr = parse_addr(target_ip, port)?;

    let socket = TcpSocket::new_v4()?;
    socket.bind(source)?;
    let mut stream = socket.connect(target).await?;

    wire::write_frame(&mut stream, message).await?;
    wire::read_frame(&mut stream).await
}

fn parse_addr(ip: &str, port: u16) -> Result<SocketAddr, WireError> {
    let ip: std::net::Ipv4Addr = ip.parse().map_err(|_| {
        WireError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid address: {ip}"),
        ))
    })?;
    Ok(SocketAddr::from((ip, port)))
}
