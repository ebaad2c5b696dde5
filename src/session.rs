//! Per-connection state machine: handshake, dial, relay, half-close teardown.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::timeout;

use crate::error::SocksError;
use crate::protocol::{self, Decoded, Request};
use crate::registry::{RegistryEntry, SessionId};
use crate::resolver;

/// Relies on the peer's socket buffers for backpressure, not a queue here.
const RELAY_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshake,
    Dialing,
    Connected,
    ActiveShutdown,
    PassiveShutdown,
    Closing,
}

/// Dropping this function's frame (the `_permit` plus the registry entry
/// inserted on handshake success) is what destroys the session.
pub async fn run(
    mut inbound: TcpStream,
    peer_addr: SocketAddr,
    registry: crate::registry::Registry,
    dial_timeout: Option<Duration>,
    _permit: OwnedSemaphorePermit,
) -> Result<(), SocksError> {
    let mut state = State::Handshake;
    trace!("{peer_addr}: new connection, state={state:?}");

    let (request, leftover) = match handshake(&mut inbound).await {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("{peer_addr}: handshake failed: {e}, closing");
            let _ = inbound.shutdown().await;
            return Err(e);
        }
    };

    // Sent as soon as the request parses, before the outbound dial is even
    // attempted: a dial failure must only close the connection, never
    // downgrade the reply already sent.
    inbound.write_all(&request.encode_reply()).await?;

    let id = SessionId::next();
    let _entry = RegistryEntry::insert(registry, id);
    state = State::Dialing;
    trace!("{peer_addr}: registered as {id:?}, state={state:?}");

    let outbound = match dial(&request, dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{peer_addr}: dial failed: {e}");
            return Err(e);
        }
    };

    state = State::Connected;
    trace!("{peer_addr}: state={state:?}");
    info!(
        "{peer_addr}: connected to {:?}:{}",
        request.host(),
        request.dst_port
    );

    if !leftover.is_empty() {
        trace!(
            "{peer_addr}: forwarding {} buffered byte(s) from handshake read",
            leftover.len()
        );
    }

    splice(inbound, outbound, &leftover, &mut state, peer_addr).await?;

    state = State::Closing;
    trace!("{peer_addr}: session closed, state={state:?}");
    Ok(())
}

async fn handshake(inbound: &mut TcpStream) -> Result<(Request, Vec<u8>), SocksError> {
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 512];

    loop {
        match protocol::decode(&buf) {
            Decoded::Ok(request, consumed) => {
                let leftover = buf.split_off(consumed);
                return Ok((request, leftover));
            }
            Decoded::Invalid(reason) => return Err(SocksError::Decode(reason)),
            Decoded::Incomplete => {
                let n = inbound.read(&mut chunk).await?;
                if n == 0 {
                    return Err(SocksError::Decode("client closed before sending a full request"));
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > protocol::MAX_HANDSHAKE_BYTES {
                    return Err(SocksError::Decode("handshake exceeds buffer cap"));
                }
            }
        }
    }
}

async fn dial(request: &Request, dial_timeout: Option<Duration>) -> Result<TcpStream, SocksError> {
    let ip = match &request.hostname {
        None => request.dst_ip,
        Some(hostname) => resolve(hostname, request.dst_port).await?,
    };

    let addr = SocketAddrV4::new(ip, request.dst_port);
    let connect = TcpStream::connect(addr);

    match dial_timeout {
        Some(d) => timeout(d, connect)
            .await
            .map_err(|_| SocksError::Connect(std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out")))?
            .map_err(SocksError::Connect),
        None => connect.await.map_err(SocksError::Connect),
    }
}

async fn resolve(hostname: &str, port: u16) -> Result<Ipv4Addr, SocksError> {
    resolver::resolve(hostname, port)
        .await
        .map_err(SocksError::Resolve)
}

/// Hand-written instead of `tokio::io::copy_bidirectional`, which treats
/// both directions' EOF identically. Here inbound EOF shuts outbound for
/// write (ActiveShutdown) and outbound EOF shuts inbound for write
/// (PassiveShutdown). Writes are always `write_all`-ed to completion before
/// the next read, so the shutdown always fires after the other side's
/// pending bytes have drained.
async fn splice(
    inbound: TcpStream,
    outbound: TcpStream,
    leftover: &[u8],
    state: &mut State,
    peer_addr: SocketAddr,
) -> Result<(), SocksError> {
    let (mut inbound_r, mut inbound_w) = inbound.into_split();
    let (mut outbound_r, mut outbound_w) = outbound.into_split();

    if !leftover.is_empty() {
        outbound_w.write_all(leftover).await?;
    }

    let mut inbound_open = true;
    let mut outbound_open = true;
    let mut buf_in = vec![0u8; RELAY_BUFFER_SIZE];
    let mut buf_out = vec![0u8; RELAY_BUFFER_SIZE];

    while inbound_open || outbound_open {
        tokio::select! {
            res = inbound_r.read(&mut buf_in), if inbound_open => {
                match res? {
                    0 => {
                        trace!("{peer_addr}: inbound EOF, shutting outbound for write");
                        outbound_w.shutdown().await?;
                        inbound_open = false;
                        *state = State::ActiveShutdown;
                    }
                    n => outbound_w.write_all(&buf_in[..n]).await?,
                }
            }
            res = outbound_r.read(&mut buf_out), if outbound_open => {
                match res? {
                    0 => {
                        trace!("{peer_addr}: outbound EOF, shutting inbound for write");
                        inbound_w.shutdown().await?;
                        outbound_open = false;
                        *state = State::PassiveShutdown;
                    }
                    n => inbound_w.write_all(&buf_out[..n]).await?,
                }
            }
        }
    }

    Ok(())
}
