//! Asynchronous hostname to IPv4 resolution for SOCKS4A.

use snafu::{ResultExt, Snafu};
use std::net::Ipv4Addr;

#[derive(Debug, Snafu)]
pub enum ResolveError {
    #[snafu(display("no A record found for {hostname}"))]
    NoAddress { hostname: String },

    #[snafu(display("lookup of {hostname} failed: {source}"))]
    Lookup {
        hostname: String,
        source: std::io::Error,
    },
}

/// Resolve `hostname` to its first IPv4 address.
///
/// `port` only satisfies [`tokio::net::lookup_host`]'s `ToSocketAddrs`
/// requirement; the caller already knows the real destination port.
pub async fn resolve(hostname: &str, port: u16) -> Result<Ipv4Addr, ResolveError> {
    let addrs = tokio::net::lookup_host((hostname, port))
        .await
        .context(LookupSnafu { hostname })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| {
            NoAddressSnafu {
                hostname: hostname.to_string(),
            }
            .build()
        })
}
