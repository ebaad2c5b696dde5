//! Errors for the session path.
//!
//! Split across two crates on purpose: `SocksError` covers everything a
//! Session can fail with, `ResolveError` (in [`crate::resolver`]) covers DNS
//! failures specifically. Both get logged and end the Session; neither is
//! surfaced to the SOCKS client beyond the connection closing.

use std::io;

use crate::resolver::ResolveError;

#[derive(Debug, thiserror::Error)]
pub enum SocksError {
    #[error("malformed request: {0}")]
    Decode(&'static str),

    #[error("failed to resolve hostname: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to connect to target: {0}")]
    Connect(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
