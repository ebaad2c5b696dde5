use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use log::error;

use socks4d::server::{self, Config};

/// A SOCKS4 / SOCKS4A CONNECT-only proxy server.
#[derive(Parser, Debug)]
#[command(name = "socks4d", version, about)]
struct Args {
    /// Address to bind the listener to.
    #[arg(long, env = "SOCKS4D_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "SOCKS4D_PORT", default_value_t = 1080)]
    port: u16,

    /// Maximum number of concurrent sessions.
    #[arg(long, env = "SOCKS4D_MAX_CONNECTIONS", default_value_t = server::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Outbound dial timeout in milliseconds. Unset means no timeout.
    #[arg(long, env = "SOCKS4D_DIAL_TIMEOUT_MS")]
    dial_timeout_ms: Option<u64>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG, if set, wins; -v only supplies a default.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", format!("socks4d={level}"));
    }
    pretty_env_logger::init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config {
        bind: SocketAddr::new(args.bind, args.port),
        max_connections: args.max_connections,
        dial_timeout: args.dial_timeout_ms.map(Duration::from_millis),
    };

    if let Err(e) = server::run_on_current_thread(config) {
        error!("fatal: {e}");
        std::process::exit(1);
    }
    Ok(())
}
