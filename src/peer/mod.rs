//! The peer coordination engine.
//!
//! A peer is one process in a statically-configured cluster. While online it
//! is always in exactly one of three activities: discovering the reachable
//! network, following an elected master (pinging it), or being the master
//! (sweeping presence bits). A valid network must contain more servers than
//! half of the configured membership; anything smaller could split into two
//! networks with two masters, so peers below that threshold take themselves
//! offline instead.

pub(crate) mod discovery;
pub(crate) mod election;
pub(crate) mod handler;
pub(crate) mod liveness;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{Config, TimingConfig};
use crate::error::Error;
use crate::shutdown::ShutdownSignal;
use self::election::VoteCollector;

/// Servers required for a valid network over a membership of `n`:
/// strictly more than half.
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Drop repeated entries, keeping first occurrences in order.
pub(crate) fn dedup_in_place(entries: &mut Vec<String>) {
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.clone()));
}

/// State shared by the accept loop, connection handlers and the engine
/// tasks of one peer.
pub(crate) struct PeerShared {
    pub(crate) ip: String,
    pub(crate) port: u16,
    pub(crate) timing: TimingConfig,
    /// The membership the config ships with; `restart` resets to this.
    default_server_list: Vec<String>,

    pub(crate) online: AtomicBool,
    pub(crate) start_time: RwLock<DateTime<Utc>>,
    pub(crate) master: RwLock<Option<String>>,
    /// Configured membership; its size is the quorum denominator.
    pub(crate) server_list: RwLock<Vec<String>>,
    /// Reachable view, re-seeded from `server_list` each discovery round.
    pub(crate) network: RwLock<Vec<String>>,
    /// What each reachable peer reported as its master this round.
    pub(crate) network_masters: Mutex<HashMap<String, Option<String>>>,
    /// Raw inbound votes; deduplicated at read time.
    pub(crate) votes: Mutex<Vec<String>>,
    /// Peers that asked us for our master during the current round.
    pub(crate) requests: Mutex<HashSet<String>>,
    /// Master-only presence bits; the mutex serialises the inbound ping
    /// handlers against the window sweeper.
    pub(crate) ping_targets: Mutex<HashMap<String, u8>>,
    pub(crate) network_attempts: AtomicU32,

    pub(crate) shutdown: ShutdownSignal,
    pub(crate) collector: VoteCollector,
    listener: Mutex<Option<TcpListener>>,
}

impl PeerShared {
    fn new(ip: String, port: u16, server_list: Vec<String>, timing: TimingConfig) -> Self {
        Self {
            ip,
            port,
            timing,
            default_server_list: server_list.clone(),
            online: AtomicBool::new(false),
            start_time: RwLock::new(Utc::now()),
            master: RwLock::new(None),
            server_list: RwLock::new(server_list),
            network: RwLock::new(Vec::new()),
            network_masters: Mutex::new(HashMap::new()),
            votes: Mutex::new(Vec::new()),
            requests: Mutex::new(HashSet::new()),
            ping_targets: Mutex::new(HashMap::new()),
            network_attempts: AtomicU32::new(0),
            shutdown: ShutdownSignal::new(),
            collector: VoteCollector::new(),
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Take the whole peer offline: wake every blocked wait, drop the
    /// master view. Idempotent.
    pub(crate) async fn do_shutdown(&self) {
        self.shutdown.trigger();
        self.online.store(false, Ordering::SeqCst);
        *self.master.write().await = None;
        debug!("server shutdown signalled");
    }

    /// Bounded retry bookkeeping for discovery. Returns false when the
    /// attempt budget is spent and the peer has been taken offline.
    pub(crate) async fn retry_discovery(&self) -> bool {
        let attempts = self.network_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts >= self.timing.max_discovery_attempts {
            debug!("maximum number of discovery attempts exceeded, shutting down");
            self.do_shutdown().await;
            false
        } else {
            self.requests.lock().await.clear();
            true
        }
    }
}

/// Handle to one running peer. Cheap to clone; all clones drive the same
/// underlying state.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
}

impl Peer {
    /// Construct a peer: resolve the port, bind the listen socket, mark the
    /// peer online. The accept loop does not run until [`Peer::start`].
    pub async fn new(config: Config) -> Result<Self, Error> {
        let port = config.node.resolve_port()?;
        let shared = Arc::new(PeerShared::new(
            config.node.ip.clone(),
            port,
            config.node.server_list.clone(),
            config.timing.clone(),
        ));

        let addr = format!("{}:{}", shared.ip, shared.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;
        *shared.listener.lock().await = Some(listener);
        shared.online.store(true, Ordering::SeqCst);
        *shared.start_time.write().await = Utc::now();

        Ok(Self { shared })
    }

    /// Run the peer until shutdown: launch the discovery driver and accept
    /// inbound connections, handing each to its own handler task. The
    /// shutdown signal unblocks the accept wait immediately.
    pub async fn start(&self) -> Result<(), Error> {
        let shared = self.shared.clone();
        let listener = shared.listener.lock().await.take().ok_or(Error::NotBound)?;
        info!("server is listening on {}:{}", shared.ip, shared.port);

        let driver = tokio::spawn(discovery::run(shared.clone()));
        let token = shared.shutdown.token();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("accept loop interrupted by shutdown");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handler::handle_connection(shared.clone(), stream, addr));
                    }
                    Err(e) => {
                        debug!("server accept has been interrupted: {e}");
                        break;
                    }
                },
            }
        }

        drop(listener);
        // A fatal accept error must stop the engine tasks too.
        shared.do_shutdown().await;
        let _ = driver.await;
        info!("server is shutting down");
        Ok(())
    }

    /// Signal shutdown. Idempotent; every blocked wait in the engine
    /// observes the signal and exits.
    pub async fn shutdown(&self) {
        self.shared.do_shutdown().await;
    }

    /// Rebuild the volatile state (signal, listener, membership, all
    /// per-round maps) and run [`Peer::start`] again. A failure to rebind
    /// the socket leaves the peer offline.
    pub async fn restart(&self) -> Result<(), Error> {
        let shared = &self.shared;
        shared.shutdown.reset();
        *shared.start_time.write().await = Utc::now();
        *shared.master.write().await = None;
        *shared.server_list.write().await = shared.default_server_list.clone();
        shared.network.write().await.clear();
        shared.network_masters.lock().await.clear();
        shared.votes.lock().await.clear();
        shared.requests.lock().await.clear();
        shared.ping_targets.lock().await.clear();
        shared.network_attempts.store(0, Ordering::SeqCst);

        let addr = format!("{}:{}", shared.ip, shared.port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                *shared.listener.lock().await = Some(listener);
                shared.online.store(true, Ordering::SeqCst);
            }
            Err(source) => {
                shared.online.store(false, Ordering::SeqCst);
                return Err(Error::Bind { addr, source });
            }
        }
        self.start().await
    }

    pub fn ip(&self) -> &str {
        &self.shared.ip
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn is_online(&self) -> bool {
        self.shared.is_online()
    }

    pub async fn get_master(&self) -> Option<String> {
        self.shared.master.read().await.clone()
    }

    pub async fn get_network(&self) -> Vec<String> {
        self.shared.network.read().await.clone()
    }

    pub async fn get_server_list(&self) -> Vec<String> {
        self.shared.server_list.read().await.clone()
    }

    pub async fn get_server_start_time(&self) -> DateTime<Utc> {
        *self.shared.start_time.read().await
    }

    /// Grow the configured membership. Moves the quorum denominator; the
    /// console warns the operator that this may invalidate a live network.
    pub async fn add_server_to_list(&self, ip: String) {
        self.shared.server_list.write().await.push(ip);
    }

    pub async fn remove_server_from_list(&self, ip: &str) {
        self.shared
            .server_list
            .write()
            .await
            .retain(|entry| entry != ip);
    }
}

#[cfg(test)]
pub(crate) fn test_shared(ip: &str, server_list: &[&str], timing: TimingConfig) -> Arc<PeerShared> {
    let shared = PeerShared::new(
        ip.to_string(),
        0,
        server_list.iter().map(|s| s.to_string()).collect(),
        timing,
    );
    shared.online.store(true, Ordering::SeqCst);
    Arc::new(shared)
}
