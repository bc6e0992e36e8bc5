//! Real-time chat fanout server.
//!
//! Clients connect over WebSocket, JOIN with a display name and exchange
//! JSON envelopes through a central router. Each module owns one concern:
//!
//! - [`envelope`] defines the inbound and outbound message shapes and the
//!   validating decoder.
//! - [`registry`] tracks live connections, bound identities and join order,
//!   and delivers envelopes to one or many sessions.
//! - [`admin`] elects the admin and hands the role on when it leaves.
//! - [`bot`] holds the `@server` command table.
//! - [`router`] classifies each inbound message and orchestrates the above.
//! - [`transport`] and [`server`] expose the router over axum WebSockets.
//! - [`cli`] and [`config`] turn command-line flags into a [`config::ServerConfig`].
//!
//! The router is usable without any network: unit tests drive it through
//! in-memory channels, integration tests go through real sockets.

pub mod admin;
pub mod bot;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;
