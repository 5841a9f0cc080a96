//! Single-threaded HTTP/1.1 server with virtual servers, locations and CGI.
//!
//! One epoll reactor multiplexes listening sockets, client connections and
//! CGI output pipes. Each accepted connection serves exactly one request.

pub mod application;
pub mod config;
pub mod core;
pub mod error;
pub mod http;

pub use application::server::{Server, ServerOptions};
pub use config::{load_config, parse_config, Config};
pub use error::{ConfigError, ServerError};
