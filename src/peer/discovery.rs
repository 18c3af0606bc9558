//! Network discovery: find the reachable subset of the configured
//! membership and decide whether to join an existing master or hold an
//! election.
//!
//! The driver loop owns every transition back into discovery: a lost
//! master, a declined or unreachable candidate and a below-quorum round all
//! land here again. Each round starts with a dwell so that co-starting
//! peers are reachable before anyone probes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use super::election::{self, ElectOutcome};
use super::liveness::{self, PingExit};
use super::{quorum, PeerShared};
use crate::net::client;
use crate::net::message::{self, Request};

/// One discovery round's verdict.
pub(crate) enum Round {
    /// An active master exists and is reachable; join it.
    Follow(String),
    /// No active master; the network agreed to elect.
    Elect,
    /// Not enough of the membership answered, or the reported master is
    /// unreachable; burn a retry.
    Retry,
    /// Shutdown was signalled mid-round.
    Halt,
}

/// Drive the peer's steady-state: discover, then follow or elect, and come
/// back here whenever the master is lost. Runs until shutdown.
pub(crate) async fn run(shared: Arc<PeerShared>) {
    loop {
        if !shared.is_online() || shared.shutdown.is_triggered() {
            break;
        }
        if shared
            .shutdown
            .sleep_unless_triggered(shared.timing.discovery_dwell())
            .await
        {
            break;
        }

        match round(&shared).await {
            Round::Follow(master) => {
                *shared.master.write().await = Some(master.clone());
                debug!("joining {master} as master of the network, keeping ping connection");
                if follow(&shared, &master).await {
                    break;
                }
            }
            Round::Elect => match election::calc_master(&shared).await {
                ElectOutcome::Follow(master) => {
                    *shared.master.write().await = Some(master.clone());
                    debug!("the new master of the network is {master}, keeping ping connection");
                    if follow(&shared, &master).await {
                        break;
                    }
                }
                ElectOutcome::Restart => {
                    shared.requests.lock().await.clear();
                }
                // As the winning candidate the vote handlers own the rest of
                // the peer's lifetime; as a loser we are already offline.
                ElectOutcome::CandidateIsSelf | ElectOutcome::Shutdown => break,
            },
            Round::Retry => {
                if !shared.retry_discovery().await {
                    break;
                }
            }
            Round::Halt => break,
        }
    }
}

/// Ping the master until the connection dies. Returns true when the exit
/// was a shutdown (the driver stops), false when the master was lost (the
/// driver wipes transient state and rediscovers).
async fn follow(shared: &Arc<PeerShared>, master: &str) -> bool {
    match liveness::ping_loop(shared, master).await {
        PingExit::Shutdown => {
            debug!("stopped ping connection due to server shutdown");
            true
        }
        PingExit::MasterLost => {
            debug!("lost connection to the master server, starting discovery again");
            shared.network_attempts.store(0, Ordering::SeqCst);
            *shared.master.write().await = None;
            shared.requests.lock().await.clear();
            false
        }
    }
}

/// One probe fan-out over the configured membership.
pub(crate) async fn round(shared: &Arc<PeerShared>) -> Round {
    let list = shared.server_list.read().await.clone();
    *shared.network.write().await = list.clone();
    {
        let mut masters = shared.network_masters.lock().await;
        masters.clear();
        masters.insert(shared.ip.clone(), shared.master.read().await.clone());
    }

    let mut probes = JoinSet::new();
    for peer in list.iter().filter(|peer| **peer != shared.ip) {
        probes.spawn(probe(shared.clone(), peer.clone()));
    }
    // Barrier: the round is not evaluated until every probe finished.
    while probes.join_next().await.is_some() {}
    if shared.shutdown.is_triggered() {
        return Round::Halt;
    }

    let network = shared.network.read().await.clone();
    if network.len() < quorum(list.len()) {
        debug!("insufficient servers in network, restarting discovery");
        return Round::Retry;
    }

    debug!("checking if there is an active master in the network");
    let reports = shared.network_masters.lock().await.clone();
    match active_master(&reports) {
        Some(master) if network.contains(&master) => Round::Follow(master),
        Some(master) => {
            debug!("active master {master} is not reachable, restarting discovery");
            Round::Retry
        }
        None => {
            // The other peers are presumably still probing. Hold the
            // election only once everyone has finished their probe of us,
            // so the participant set is stable.
            debug!("waiting for all servers to finish network config");
            let deadline = Instant::now() + shared.timing.vote_timeout();
            loop {
                let asked = shared.requests.lock().await.len();
                if asked >= network.len().saturating_sub(1) {
                    debug!("no valid master found in network, a new master will be calculated now");
                    return Round::Elect;
                }
                if Instant::now() >= deadline {
                    debug!("some servers did not respond in time, restarting discovery");
                    return Round::Retry;
                }
                if shared
                    .shutdown
                    .sleep_unless_triggered(shared.timing.request_poll())
                    .await
                {
                    return Round::Halt;
                }
            }
        }
    }
}

/// Ask one peer who its master is. Unreachable peers are pruned from the
/// reachable view; reachable ones contribute to the report map.
async fn probe(shared: Arc<PeerShared>, peer: String) {
    let ask = Request::AskMaster.encode();
    let token = shared.shutdown.token();
    let reply = tokio::select! {
        _ = token.cancelled_owned() => return,
        reply = client::call(&shared.ip, &peer, shared.port, &ask) => reply,
    };
    match reply {
        Ok(reported) => {
            debug!("{peer} server is available");
            let reported = if reported == message::REPLY_NO_MASTER {
                None
            } else {
                Some(reported)
            };
            shared.network_masters.lock().await.insert(peer, reported);
        }
        Err(_) => {
            debug!("{peer} server not found");
            shared.network.write().await.retain(|ip| *ip != peer);
        }
    }
}

/// Majority scan over the per-round master reports. A non-None master
/// reported by a strict majority of entries is the network's active
/// master; a majority reporting no master (or no majority at all) means
/// there is none.
pub(crate) fn active_master(reports: &HashMap<String, Option<String>>) -> Option<String> {
    let n = reports.len();
    let none_count = reports.values().filter(|report| report.is_none()).count();
    if none_count > n / 2 {
        return None;
    }
    for candidate in reports.values().flatten() {
        let count = reports
            .values()
            .flatten()
            .filter(|report| *report == candidate)
            .count();
        if count > n / 2 {
            debug!("{candidate} is valid master of network");
            return Some(candidate.clone());
        }
    }
    None
}
