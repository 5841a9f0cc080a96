use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal startup errors. Nothing raised after the loop starts ends up here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot create epoll instance: {0}")]
    Poller(#[source] io::Error),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("cannot register fd {fd} with epoll: {source}")]
    Register {
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("cannot resolve proxy target {key}: {reason}")]
    ProxyResolve { key: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
