//! Master election.
//!
//! The candidate is the textually greatest address in the reachable view,
//! so every participant arrives at the same one without talking. Votes
//! flow to the candidate, which confirms itself only with a strict
//! majority of the *configured* membership — quorum against the reachable
//! view alone would let two partitions crown two masters.
//!
//! Vote collection is a one-at-a-time activity: the first vote to arrive
//! installs itself as the collector, later votes wait on the collector's
//! verdict channel. The quorum denominator is snapshotted when the
//! collector is installed, so membership edits mid-election do not move
//! the goalposts.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{dedup_in_place, liveness, quorum, PeerShared};
use crate::net::client;
use crate::net::message::{self, Request};

/// Outcome of [`calc_master`], driving the discovery loop's next step.
pub(crate) enum ElectOutcome {
    /// This peer is the candidate and votes arrived in time; the inbound
    /// vote handlers own the rest of the transition.
    CandidateIsSelf,
    /// Another peer confirmed as master; enter the ping loop against it.
    Follow(String),
    /// The candidate declined or was unreachable; rediscover.
    Restart,
    /// The peer went offline (no votes, or shutdown signalled).
    Shutdown,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Verdict {
    Pending,
    Confirmed,
    Declined,
}

enum Role {
    Collector {
        tx: watch::Sender<Verdict>,
        denominator: usize,
    },
    Waiter(watch::Receiver<Verdict>),
}

/// The single-slot coordination object for vote collection. At most one
/// collector exists at a time; everyone else observes its verdict.
pub(crate) struct VoteCollector {
    slot: Mutex<Option<watch::Receiver<Verdict>>>,
}

impl VoteCollector {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Become the collector, or get a handle on the one already running.
    async fn join(&self, shared: &PeerShared) -> Role {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Some(rx) => Role::Waiter(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(Verdict::Pending);
                *slot = Some(rx);
                // Snapshot the quorum denominator for this election.
                let denominator = shared.server_list.read().await.len();
                Role::Collector { tx, denominator }
            }
        }
    }

    /// Publish the verdict and free the slot for a future election.
    async fn finish(&self, tx: watch::Sender<Verdict>, verdict: Verdict) {
        let mut slot = self.slot.lock().await;
        *slot = None;
        let _ = tx.send(verdict);
    }
}

/// Pick the candidate: the textual maximum of the reachable view. Dotted
/// quads compare as strings here ("127.0.0.9" beats "127.0.0.10"); the
/// ordering is protocol-visible, so it stays.
pub(crate) fn candidate(network: &[String]) -> Option<String> {
    network.iter().max().cloned()
}

/// Run this peer's side of the election.
///
/// As the candidate: cast the self-vote and sit out the full vote window;
/// if nobody else voted by then the network clearly disagrees and the peer
/// shuts down. As a voter: send the vote and follow the reply.
pub(crate) async fn calc_master(shared: &Arc<PeerShared>) -> ElectOutcome {
    let candidate = {
        let network = shared.network.read().await;
        candidate(&network)
    };
    let Some(candidate) = candidate else {
        return ElectOutcome::Restart;
    };

    if candidate == shared.ip {
        shared.votes.lock().await.push(shared.ip.clone());
        if shared
            .shutdown
            .sleep_unless_triggered(shared.timing.vote_timeout())
            .await
        {
            debug!("election cancelled by shutdown");
            return ElectOutcome::Shutdown;
        }
        if shared.votes.lock().await.len() < 2 {
            debug!("no peer voted for this candidate, shutting down");
            shared.do_shutdown().await;
            return ElectOutcome::Shutdown;
        }
        ElectOutcome::CandidateIsSelf
    } else {
        let vote = Request::Vote {
            voter: shared.ip.clone(),
        }
        .encode();
        let token = shared.shutdown.token();
        let reply = tokio::select! {
            _ = token.cancelled_owned() => return ElectOutcome::Shutdown,
            reply = client::call(&shared.ip, &candidate, shared.port, &vote) => reply,
        };
        match reply {
            Ok(reply) if reply == message::REPLY_MASTER_CONFIRMED => ElectOutcome::Follow(candidate),
            Ok(reply) if reply == message::REPLY_MASTER_DECLINED => {
                debug!("master candidate vote failed, finding new network now");
                ElectOutcome::Restart
            }
            Ok(other) => {
                warn!("unexpected reply to vote from {candidate}: {other:?}");
                ElectOutcome::Restart
            }
            Err(_) => {
                debug!("master candidate is not available anymore, restarting discovery");
                ElectOutcome::Restart
            }
        }
    }
}

/// Handle one inbound vote at the candidate. Returns the wire reply.
pub(crate) async fn handle_vote(shared: &Arc<PeerShared>, voter: String) -> &'static str {
    shared.votes.lock().await.push(voter);

    match shared.collector.join(shared).await {
        Role::Collector { tx, denominator } => collect(shared, tx, denominator).await,
        Role::Waiter(mut rx) => {
            // The collector terminates either with enough votes or by
            // timeout, so this wait is bounded.
            let verdict = match rx.wait_for(|verdict| *verdict != Verdict::Pending).await {
                Ok(verdict) => *verdict,
                Err(_) => Verdict::Declined,
            };
            match verdict {
                Verdict::Confirmed => message::REPLY_MASTER_CONFIRMED,
                _ => message::REPLY_MASTER_DECLINED,
            }
        }
    }
}

/// The collector body: wait until the whole reachable view voted (or the
/// window closes), deduplicate, and evaluate quorum against the
/// denominator snapshotted at install time.
async fn collect(
    shared: &Arc<PeerShared>,
    tx: watch::Sender<Verdict>,
    denominator: usize,
) -> &'static str {
    let deadline = Instant::now() + shared.timing.vote_timeout();
    loop {
        {
            let mut votes = shared.votes.lock().await;
            dedup_in_place(&mut votes);
            let everyone = shared.network.read().await.len();
            if votes.len() >= everyone {
                break;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        if shared
            .shutdown
            .sleep_unless_triggered(shared.timing.vote_poll())
            .await
        {
            break;
        }
    }

    let count = {
        let mut votes = shared.votes.lock().await;
        dedup_in_place(&mut votes);
        votes.len()
    };

    if count >= quorum(denominator) {
        debug!("master eval successful, confirming to the network");
        *shared.master.write().await = Some(shared.ip.clone());
        let network = shared.network.read().await.clone();
        {
            let mut targets = shared.ping_targets.lock().await;
            for peer in network {
                targets.insert(peer, 1);
            }
        }
        liveness::spawn_ping_check(shared.clone());
        shared.collector.finish(tx, Verdict::Confirmed).await;
        message::REPLY_MASTER_CONFIRMED
    } else {
        debug!("master eval failed, shutting down server");
        shared.do_shutdown().await;
        shared.collector.finish(tx, Verdict::Declined).await;
        message::REPLY_MASTER_DECLINED
    }
}
