//! Line-based TCP chat with a live roster of participants.
//!
//! Clients register a unique display name, then exchange tagged frames
//! (see [`protocol`]). The server keeps a [`registry::Registry`] of
//! connected names and fans every chat line and roster change out to all
//! of them through the [`broadcast::Broadcaster`].

pub mod broadcast;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod types;
pub mod ui;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::ChatError;
pub use server::Server;
pub use ui::ChatUi;
