use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webserv::{load_config, Server, ServerOptions};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "webserv", version, about = "HTTP/1.1 server with virtual hosts and CGI")]
struct Args {
    /// Configuration file
    #[arg(default_value = "config.conf")]
    config: PathBuf,

    /// Seconds a script may run before the client gets a 504
    #[arg(long, default_value_t = 5)]
    cgi_timeout: u64,

    /// Seconds a client may stay idle
    #[arg(long, default_value_t = 30)]
    client_timeout: u64,

    /// Interpreter for cgi locations that do not name one
    #[arg(long, default_value = "/usr/bin/python3")]
    cgi_interpreter: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(servers = config.servers.len(), path = %args.config.display(), "configuration loaded");

    let options = ServerOptions {
        cgi_timeout: Duration::from_secs(args.cgi_timeout),
        client_timeout: Duration::from_secs(args.client_timeout),
        cgi_interpreter: args.cgi_interpreter,
        ..ServerOptions::default()
    };
    let mut server = Server::bind(config, options).context("starting server")?;

    ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::SeqCst)).context("installing signal handler")?;

    server.run(&SHUTDOWN)?;
    info!("bye");
    Ok(())
}
