//! Binds the listener and drives every accepted connection as a Session task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::LocalSet;

use crate::registry::Registry;
use crate::session;

/// Accepts beyond this cap simply wait for a permit instead of being
/// hard-rejected.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

pub struct Config {
    pub bind: SocketAddr,
    pub max_connections: usize,
    pub dial_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 1080)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            dial_timeout: None,
        }
    }
}

/// Must be called from inside a [`LocalSet`] (see [`run_on_current_thread`])
/// since Sessions are spawned with `spawn_local`.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind).await.map_err(|e| {
        error!("failed to bind {}: {e}", config.bind);
        e
    })?;
    info!("listening on {}", config.bind);
    serve_on(listener, &config).await
}

/// Split out from [`serve`] so tests can bind to an ephemeral port, read
/// back the assigned address, and only then start accepting.
pub async fn serve_on(listener: TcpListener, config: &Config) -> anyhow::Result<()> {
    let registry = Registry::new();
    let limiter = Arc::new(Semaphore::new(config.max_connections));

    loop {
        let permit = limiter
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("acceptor failed: {e}, stopping reactor loop");
                return Err(e.into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("{peer_addr}: failed to set TCP_NODELAY: {e}");
        }

        let registry = registry.clone();
        let dial_timeout = config.dial_timeout;

        tokio::task::spawn_local(async move {
            if let Err(e) = session::run(stream, peer_addr, registry, dial_timeout, permit).await
            {
                warn!("{peer_addr}: session ended with error: {e}");
            }
        });
    }
}

/// Single-threaded runtime plus a `LocalSet`, since every Session is a
/// `!Send` task sharing an `Rc`-based registry.
pub fn run_on_current_thread(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, serve(config))
}
