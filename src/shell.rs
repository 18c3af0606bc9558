//! The operator console.
//!
//! A small REPL that owns the single peer handle of this process: it
//! constructs and starts a peer, mutates the configured membership and
//! answers status queries. There is deliberately no ambient state; when
//! the console exits, the peer goes with it.

use std::net::Ipv4Addr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use crate::config::Config;
use crate::peer::Peer;

const NO_IP_SPECIFIED: &str = "no ip specified, use help for manual";
const NON_VALID_IP: &str = "non valid ip";
const WARNING_INVALID_NETWORK: &str = "warning: this operation may cause an invalid network!";
const SERVER_HAS_NOT_STARTED: &str = "server has not been started yet";
const WRONG_COMMAND: &str = "wrong command usage, use help for manual";
const TERMINATING_SERVER: &str = "stopping server now";

pub struct Console {
    config: Config,
    peer: Option<Peer>,
}

impl Console {
    pub fn new(config: Config) -> Self {
        Self { config, peer: None }
    }

    /// Read commands from stdin until `quit` or ctrl-c. A running peer is
    /// shut down on the way out.
    pub async fn run(mut self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("> Type in any command. Type help for manual");

        loop {
            let line = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    if self.online_peer().is_some() {
                        println!("{TERMINATING_SERVER}");
                    }
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("failed to read command: {e}");
                        break;
                    }
                },
            };

            let command: Vec<&str> = line.split_whitespace().collect();
            let quit = self.dispatch(&command).await;
            if quit {
                break;
            }
        }

        if let Some(peer) = &self.peer {
            peer.shutdown().await;
        }
    }

    /// A handle to the peer, if one was started and is still online.
    fn online_peer(&self) -> Option<&Peer> {
        self.peer.as_ref().filter(|peer| peer.is_online())
    }

    /// Evaluate one command line. Returns true when the console should
    /// exit.
    async fn dispatch(&mut self, command: &[&str]) -> bool {
        match command.first().copied() {
            None => {}
            Some("help") => manual(),
            Some("quit") => {
                if self.online_peer().is_some() {
                    println!("{TERMINATING_SERVER}");
                }
                return true;
            }
            Some("start") => self.start(command).await,
            Some("status") => match self.online_peer() {
                Some(_) => println!("server online"),
                None => println!("server offline"),
            },
            Some("master") => match self.online_peer() {
                Some(peer) => match peer.get_master().await {
                    Some(master) => println!("{master}"),
                    None => println!("None"),
                },
                None => println!("{SERVER_HAS_NOT_STARTED}"),
            },
            Some("network") => match self.online_peer() {
                Some(peer) => println!("{:?}", peer.get_network().await),
                None => println!("{SERVER_HAS_NOT_STARTED}"),
            },
            Some("time") => match self.online_peer() {
                Some(peer) => println!("{}", peer.get_server_start_time().await),
                None => println!("{SERVER_HAS_NOT_STARTED}"),
            },
            Some("ip") => match self.online_peer() {
                Some(peer) => println!("server is running on {}", peer.ip()),
                None => println!("{SERVER_HAS_NOT_STARTED}"),
            },
            Some("serverlist") => self.server_list(command).await,
            Some("shutdown") => match self.online_peer() {
                Some(peer) => {
                    println!("{TERMINATING_SERVER}");
                    peer.shutdown().await;
                }
                None => println!("{SERVER_HAS_NOT_STARTED}"),
            },
            Some("restart") => self.restart().await,
            Some(_) => println!("{WRONG_COMMAND}"),
        }
        false
    }

    /// `start -ip <addr>`: construct a peer and run it in the background.
    /// Starting requires the address to be part of the configured
    /// membership; anything else could never reach quorum against it.
    async fn start(&mut self, command: &[&str]) {
        if self.online_peer().is_some() {
            println!("server has already been started");
            return;
        }

        let ip = match command {
            [_] => {
                println!("{NO_IP_SPECIFIED}");
                return;
            }
            [_, "-ip", ip] => *ip,
            _ => {
                println!("{WRONG_COMMAND}");
                return;
            }
        };
        if ip.parse::<Ipv4Addr>().is_err() {
            println!("{NON_VALID_IP}");
            return;
        }

        let mut config = self.config.clone();
        config.node.ip = ip.to_string();
        if !config.node.server_list.contains(&config.node.ip) {
            println!(
                "specified IP is not contained in the serverlist. \
                 Add it to the configured server_list and try again."
            );
            return;
        }

        match Peer::new(config).await {
            Ok(peer) => {
                println!("starting server");
                let runner = peer.clone();
                tokio::spawn(async move {
                    if let Err(e) = runner.start().await {
                        error!("server stopped with an error: {e}");
                    }
                });
                self.peer = Some(peer);
            }
            Err(e) => println!("could not start the server: {e}"),
        }
    }

    async fn restart(&mut self) {
        match &self.peer {
            Some(peer) if peer.is_online() => {
                println!("shut the server down before restarting");
            }
            Some(peer) => {
                println!("restarting server");
                let runner = peer.clone();
                tokio::spawn(async move {
                    if let Err(e) = runner.restart().await {
                        error!("server failed to restart: {e}");
                    }
                });
            }
            None => println!("{SERVER_HAS_NOT_STARTED}"),
        }
    }

    /// `serverlist -list | -append <ip> | -remove <ip>`.
    async fn server_list(&mut self, command: &[&str]) {
        let Some(peer) = self.online_peer() else {
            println!("{SERVER_HAS_NOT_STARTED}");
            return;
        };
        match command {
            [_, "-list"] => println!("{:?}", peer.get_server_list().await),
            [_, "-append", ip] => {
                if ip.parse::<Ipv4Addr>().is_ok() {
                    println!("adding server {ip} to list");
                    println!("{WARNING_INVALID_NETWORK}");
                    peer.add_server_to_list(ip.to_string()).await;
                } else {
                    println!("{NON_VALID_IP}");
                }
            }
            [_, "-remove", ip] => {
                if ip.parse::<Ipv4Addr>().is_ok() {
                    println!("removing server {ip} from list");
                    println!("{WARNING_INVALID_NETWORK}");
                    peer.remove_server_from_list(ip).await;
                } else {
                    println!("{NON_VALID_IP}");
                }
            }
            _ => println!("{WRONG_COMMAND}"),
        }
    }
}

fn manual() {
    println!(
        "This is the manual for the server console application. All commands, their usage\n\
         and their behaviour are listed below.\n\
         \n\
         use 'quit' or CTRL+C to terminate the application. A running server will be\n\
         terminated as soon as possible.\n\
         \n\
         use 'start -ip <server ip>' to start a server on the specified IP.\n\
         If the specified IP is invalid, or not contained in the configured server list,\n\
         the server will not start.\n\
         \n\
         use 'status' to see the current status of the server (online or offline)\n\
         \n\
         All commands listed below will only work if a server was started beforehand\n\
         \n\
         use 'shutdown' to shut down the server as soon as possible. The application is\n\
         still running after this command.\n\
         use 'restart' to start a stopped server again on the same address.\n\
         \n\
         use 'serverlist -list' to list all server IPs within the server's internal list\n\
         use 'serverlist -append <server ip>' to add a server IP to the internal list\n\
         use 'serverlist -remove <server ip>' to remove a server IP from the internal list\n\
         Note that removing or adding a server IP may result in a shutdown of all servers\n\
         within the network to prevent split brain problems!\n\
         \n\
         use 'master' to print the master server of the network. This will be None if\n\
         there is no master server yet\n\
         use 'network' to print all IPs that this server is currently connected to\n\
         use 'time' to print the time the server came online\n\
         use 'ip' to print the IP of the running server\n\
         \n\
         use 'help' to see this page again"
    );
}
