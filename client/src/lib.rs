//! # Mesh Client Library
//!
//! Client side of the platform mesh. The game loop feeds it the local pose and
//! reads back peer snapshots, the platform list and whether this client
//! currently holds world authority. Rendering and input live elsewhere.
//!
//! ## Architecture Overview
//!
//! ### World Subscription
//! A conflating subscription to the central world publisher. Only the newest
//! snapshot is ever surfaced, and each one replaces the platform list.
//!
//! ### Peer Mesh
//! Every client publishes its own state on an ephemeral endpoint and registers
//! it with the directory. Peers from the directory reply are subscribed once
//! per id; the directory is re-queried about twice a second.
//!
//! ### Authority Failover
//! When the central server has been silent for a second, the lowest live id
//! simulates the platforms and publishes them to its peers until the server is
//! heard from again.
//!
//! ## Module Organization
//!
//! - `config`: tunables and their defaults
//! - `peers`: remote peer table with hide and prune windows
//! - `authority`: election rule and takeover state machine
//! - `mesh`: directory client and peer subscriptions
//! - `network`: the running stack tying the above together
//! - `wander`: synthetic local pose driving the headless binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::NetworkClient;
//!
//! let mut net = match NetworkClient::start(ClientConfig::default()) {
//!     Ok(net) => net,
//!     Err(e) => {
//!         eprintln!("offline: {}", e);
//!         return;
//!     }
//! };
//!
//! net.publish_player(1, 100.0, 200.0, 0.0, 0.0, 1, 0).ok();
//! for peer in net.peers_snapshot() {
//!     println!("peer {} at ({}, {})", peer.id, peer.x, peer.y);
//! }
//! net.shutdown();
//! ```

pub mod authority;
pub mod config;
pub mod mesh;
pub mod network;
pub mod peers;
pub mod wander;
