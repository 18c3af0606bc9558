//! Full-cluster scenarios: three real peers on loopback addresses electing
//! a master, surviving a follower's exit, re-electing after the master
//! withdraws, and collapsing once the majority is gone.

use quorumd::config::{Config, NodeConfig, TimingConfig};
use quorumd::Peer;
use tokio::time::{sleep, Duration, Instant};

const PEER_7: &str = "127.0.0.7";
const PEER_8: &str = "127.0.0.8";
const PEER_9: &str = "127.0.0.9";

fn cluster_config(ip: &str, port: u16) -> Config {
    Config {
        node: NodeConfig {
            ip: ip.to_string(),
            server_list: vec![PEER_7.to_string(), PEER_8.to_string(), PEER_9.to_string()],
            port: Some(port),
        },
        timing: TimingConfig {
            discovery_dwell_ms: 400,
            vote_timeout_ms: 4_000,
            vote_poll_ms: 100,
            request_poll_ms: 100,
            ping_interval_ms: 200,
            ping_window_ms: 600,
            max_discovery_attempts: 3,
        },
        logging: Default::default(),
    }
}

async fn spawn_peer(ip: &str, port: u16) -> Peer {
    let peer = Peer::new(cluster_config(ip, port)).await.unwrap();
    let runner = peer.clone();
    tokio::spawn(async move {
        let _ = runner.start().await;
    });
    peer
}

async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn converged_on(peers: &[Peer], master: &str) -> bool {
    for peer in peers {
        if peer.get_master().await.as_deref() != Some(master) {
            return false;
        }
    }
    true
}

#[tokio::test(flavor = "multi_thread")]
async fn three_peers_elect_re_elect_and_collapse() {
    let port = 27710;
    let peer7 = spawn_peer(PEER_7, port).await;
    let peer8 = spawn_peer(PEER_8, port).await;
    let peer9 = spawn_peer(PEER_9, port).await;

    // The textually greatest address wins the first election.
    assert!(
        eventually(Duration::from_secs(30), || {
            let peers = [peer7.clone(), peer8.clone(), peer9.clone()];
            async move { converged_on(&peers, PEER_9).await }
        })
        .await,
        "cluster never converged on 127.0.0.9"
    );
    for peer in [&peer7, &peer8, &peer9] {
        assert_eq!(peer.get_network().await.len(), 3);
    }

    // The master withdraws. The two survivors still hold quorum (2 of 3)
    // and re-elect the next greatest address.
    peer9.shutdown().await;
    assert!(
        eventually(Duration::from_secs(30), || {
            let peers = [peer7.clone(), peer8.clone()];
            async move { converged_on(&peers, PEER_8).await }
        })
        .await,
        "survivors never re-elected 127.0.0.8"
    );
    assert!(peer7.is_online());
    assert!(peer8.is_online());
    assert!(!peer9.is_online());

    // The last follower withdraws too: the master alone is below quorum
    // and takes itself offline within its ping windows.
    peer7.shutdown().await;
    assert!(
        eventually(Duration::from_secs(15), || {
            let peer8 = peer8.clone();
            async move { !peer8.is_online() }
        })
        .await,
        "a master without quorum should shut itself down"
    );
    assert_eq!(peer8.get_master().await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_withdrawing_follower_does_not_disturb_the_network() {
    let port = 27730;
    let peer7 = spawn_peer(PEER_7, port).await;
    let peer8 = spawn_peer(PEER_8, port).await;
    let peer9 = spawn_peer(PEER_9, port).await;

    assert!(
        eventually(Duration::from_secs(30), || {
            let peers = [peer7.clone(), peer8.clone(), peer9.clone()];
            async move { converged_on(&peers, PEER_9).await }
        })
        .await,
        "cluster never converged on 127.0.0.9"
    );

    // One follower leaves; two of three configured peers stay live, which
    // still meets quorum, so the master keeps the network up.
    peer7.shutdown().await;
    sleep(Duration::from_millis(2_500)).await;

    assert!(peer9.is_online());
    assert_eq!(peer9.get_master().await.as_deref(), Some(PEER_9));
    assert!(peer8.is_online());
    assert_eq!(peer8.get_master().await.as_deref(), Some(PEER_9));

    peer8.shutdown().await;
    peer9.shutdown().await;
}
