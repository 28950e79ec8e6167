//! # darkmix-daemon
//!
//! Node runtime for the mixing pool and the payment election.
//!
//! ## Modules
//!
//! - [`config`] — `config.toml` loading and role selection
//! - [`relaynodes`] — The `relaynodes.conf` relay list
//! - [`events`] — Event bus for lifecycle notifications
//! - [`coordinator`] — Locked node state and message, block and tick dispatch
//! - [`ticker`] — Periodic schedule

pub mod config;
pub mod coordinator;
pub mod events;
pub mod relaynodes;
pub mod ticker;
