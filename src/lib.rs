//! `socks4d`, a SOCKS4 / SOCKS4A CONNECT-only proxy server core.
//!
//! Parses a SOCKS4/4A request from each inbound client, dials the requested
//! target (literal IPv4 for SOCKS4, resolved hostname for SOCKS4A), and
//! relays bytes both ways until either side closes. No SOCKS5, no auth, no
//! BIND, no UDP.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod session;

pub use error::SocksError;
pub use server::{run_on_current_thread, serve_on, Config};
