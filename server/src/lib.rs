//! # Snake Arena Server
//!
//! The authoritative server for a grid-based multiplayer snake game. Many
//! clients connect over a single TCP listener, negotiate membership in
//! short-lived named sessions, and then watch the server drive a tick-based
//! simulation of movement, apples, and collisions. Clients never compute
//! game state themselves — they submit direction changes and render
//! whatever the server broadcasts.
//!
//! ## Module map
//!
//! - [`config`] — CLI flags and the INI file they point at.
//! - [`codec`] — newline-delimited JSON envelope framing.
//! - [`player`] — a single snake's position history and direction.
//! - [`session`] — the per-game actor: lobby, tick loop, collision
//!   resolution, leaderboard.
//! - [`connection`] — the per-socket actor that dispatches inbound messages
//!   to a session and relays a session's broadcasts back out.
//! - [`app`] — the process-wide registry of live connections and sessions,
//!   and the TCP accept loop.
//!
//! ## Concurrency model
//!
//! One Tokio task per connection, one Tokio task per running session, no
//! locks around either's internal state — only the registry's two maps are
//! shared, and those sit behind a single mutex in [`app::AppHandle`]. See
//! each module for the command-mailbox pattern that makes this safe.

pub mod app;
pub mod codec;
pub mod config;
pub mod connection;
pub mod player;
pub mod session;
