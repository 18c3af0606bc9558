//! Liveness: the follower's ping loop and the master's presence sweep.
//!
//! Followers ping the master every interval; the master zeroes every
//! presence bit once per window and counts who set theirs back. A peer
//! that misses a full window is presumed down. The sweep is also where a
//! rejoining peer gets promoted back into the reachable view: its ping
//! writes a presence bit, and the next sweep adopts the key.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{quorum, PeerShared};
use crate::net::client;
use crate::net::message::Request;

/// Why the follower's ping loop ended.
pub(crate) enum PingExit {
    /// The shutdown signal fired; exit cleanly.
    Shutdown,
    /// A ping failed; the master is gone and discovery starts over.
    MasterLost,
}

/// Ping the master every interval until shutdown or failure.
pub(crate) async fn ping_loop(shared: &Arc<PeerShared>, master: &str) -> PingExit {
    loop {
        if shared
            .shutdown
            .sleep_unless_triggered(shared.timing.ping_interval())
            .await
        {
            return PingExit::Shutdown;
        }

        let ping = Request::Ping {
            source: shared.ip.clone(),
        }
        .encode();
        let token = shared.shutdown.token();
        let reply = tokio::select! {
            _ = token.cancelled_owned() => return PingExit::Shutdown,
            reply = client::call(&shared.ip, master, shared.port, &ping) => reply,
        };
        match reply {
            Ok(answer) => trace!("master answered ping: {answer}"),
            Err(_) => {
                debug!("lost connection to master server");
                return PingExit::MasterLost;
            }
        }
    }
}

/// Launch the master-side sweep. Runs until shutdown or quorum loss.
pub(crate) fn spawn_ping_check(shared: Arc<PeerShared>) {
    tokio::spawn(async move { ping_check(shared).await });
}

pub(crate) async fn ping_check(shared: Arc<PeerShared>) {
    while shared.is_online() {
        if shared
            .shutdown
            .sleep_unless_triggered(shared.timing.ping_window())
            .await
        {
            debug!("canceling ping check due to shutdown");
            break;
        }
        if !sweep(&shared).await {
            warn!("invalid network, shutting down");
            shared.do_shutdown().await;
            break;
        }
    }
}

/// One presence sweep. Returns false when the live count fell below
/// quorum of the configured membership.
///
/// Every key present in the map is promoted into the reachable view, even
/// one the configured list no longer contains; that is how the master
/// learns of rejoiners.
pub(crate) async fn sweep(shared: &Arc<PeerShared>) -> bool {
    let needed = quorum(shared.server_list.read().await.len());
    let mut targets = shared.ping_targets.lock().await;

    let live = targets.values().filter(|&&seen| seen == 1).count();
    if live < needed {
        return false;
    }

    {
        let mut network = shared.network.write().await;
        for (peer, seen) in targets.iter_mut() {
            if !network.contains(peer) {
                network.push(peer.clone());
            }
            *seen = 0;
        }
    }
    targets.insert(shared.ip.clone(), 1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::peer::test_shared;
    use std::collections::HashMap;
    use tokio::time::{timeout, Duration};

    fn fast_timing() -> TimingConfig {
        TimingConfig {
            discovery_dwell_ms: 50,
            vote_timeout_ms: 400,
            vote_poll_ms: 25,
            request_poll_ms: 25,
            ping_interval_ms: 50,
            ping_window_ms: 80,
            max_discovery_attempts: 3,
        }
    }

    async fn seed(shared: &Arc<PeerShared>, network: &[&str], targets: &[(&str, u8)]) {
        *shared.network.write().await = network.iter().map(|s| s.to_string()).collect();
        *shared.ping_targets.lock().await = targets
            .iter()
            .map(|(ip, seen)| (ip.to_string(), *seen))
            .collect();
    }

    #[tokio::test]
    async fn sweep_zeroes_bits_and_keeps_self_marked() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 1), ("127.0.0.7", 1)],
        )
        .await;

        assert!(sweep(&shared).await);

        let targets = shared.ping_targets.lock().await;
        let expected: HashMap<String, u8> = [
            ("127.0.0.9".to_string(), 1),
            ("127.0.0.8".to_string(), 0),
            ("127.0.0.7".to_string(), 0),
        ]
        .into();
        assert_eq!(*targets, expected);
    }

    #[tokio::test]
    async fn sweep_tolerates_one_missing_of_three() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 1), ("127.0.0.7", 0)],
        )
        .await;

        assert!(sweep(&shared).await);
    }

    #[tokio::test]
    async fn sweep_fails_below_quorum() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 0), ("127.0.0.7", 0)],
        )
        .await;

        assert!(!sweep(&shared).await);
    }

    #[tokio::test]
    async fn sweep_counts_against_the_configured_list() {
        // Five configured, so three must be live even if only three are
        // reachable right now.
        let shared = test_shared(
            "127.0.0.9",
            &[
                "127.0.0.5",
                "127.0.0.6",
                "127.0.0.7",
                "127.0.0.8",
                "127.0.0.9",
            ],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 1), ("127.0.0.7", 0)],
        )
        .await;

        assert!(!sweep(&shared).await);

        shared
            .ping_targets
            .lock()
            .await
            .insert("127.0.0.7".to_string(), 1);
        assert!(sweep(&shared).await);
    }

    #[tokio::test]
    async fn sweep_promotes_rejoiners_into_the_network() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8"],
            &[
                ("127.0.0.9", 1),
                ("127.0.0.8", 1),
                ("127.0.0.7", 1),
                ("127.0.0.6", 1),
            ],
        )
        .await;

        assert!(sweep(&shared).await);

        let network = shared.network.read().await.clone();
        assert!(network.contains(&"127.0.0.7".to_string()));
        // Even a key outside the configured list is adopted.
        assert!(network.contains(&"127.0.0.6".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_check_shuts_down_on_quorum_loss() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 0), ("127.0.0.7", 0)],
        )
        .await;

        timeout(Duration::from_secs(5), ping_check(shared.clone()))
            .await
            .expect("ping check should stop after losing quorum");
        assert!(!shared.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_check_exits_on_shutdown() {
        let shared = test_shared(
            "127.0.0.9",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );
        seed(
            &shared,
            &["127.0.0.9", "127.0.0.8", "127.0.0.7"],
            &[("127.0.0.9", 1), ("127.0.0.8", 1), ("127.0.0.7", 1)],
        )
        .await;

        let task = tokio::spawn(ping_check(shared.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shared.do_shutdown().await;

        timeout(Duration::from_secs(5), task)
            .await
            .expect("ping check should observe the shutdown signal")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_loop_reports_a_lost_master() {
        let shared = test_shared(
            "127.0.0.7",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );

        // Nobody listens on the master's address, so the first ping fails.
        let exit = timeout(Duration::from_secs(5), async {
            ping_loop(&shared, "127.0.0.1").await
        })
        .await
        .expect("ping loop should fail fast against a dead master");
        assert!(matches!(exit, PingExit::MasterLost));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_loop_exits_on_shutdown() {
        let shared = test_shared(
            "127.0.0.7",
            &["127.0.0.7", "127.0.0.8", "127.0.0.9"],
            fast_timing(),
        );

        let loop_shared = shared.clone();
        let task = tokio::spawn(async move { ping_loop(&loop_shared, "127.0.0.1").await });
        shared.do_shutdown().await;

        let exit = timeout(Duration::from_secs(5), task)
            .await
            .expect("ping loop should observe the shutdown signal")
            .unwrap();
        assert!(matches!(exit, PingExit::Shutdown));
    }
}
