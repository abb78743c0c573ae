//! # Mesh Server Library
//!
//! Central services of the platform mesh. The server does not own player
//! simulation; it hands out ids, tells clients where their peers publish, and
//! runs the reference world that clients fall back from when it goes quiet.
//!
//! ## Services
//!
//! ### Handshake (`handshake`)
//! Request/reply service assigning session-unique player ids from 1 upward.
//! It also answers the legacy pose exchange with a bounded pose snapshot.
//!
//! ### Directory (`directory`)
//! Registry of each client's advertised publish endpoint. Every registration
//! is answered with the other known peers. A janitor thread prunes clients
//! that stopped re-registering.
//!
//! ### World (`world`)
//! Fixed-timestep platform simulation with an independent, lower publish
//! rate. Subscribers only ever see the newest snapshot.
//!
//! ## Threading
//!
//! Each service runs a blocking loop on its own OS thread with short receive
//! timeouts, polling a shared running flag. [`network::Server::stop`] clears
//! the flag and joins every thread.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! let mut server = Server::start(ServerConfig::default());
//! // ... serve until shutdown is requested
//! server.stop();
//! ```

pub mod config;
pub mod directory;
pub mod handshake;
pub mod network;
pub mod world;
