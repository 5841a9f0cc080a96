use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};

use tracing::{debug, warn};

use crate::config::{Config, LocationKind, VirtualServer};
use crate::error::ServerError;
use crate::http::{Response, StatusCode};

use super::error_page_handler::error_response;

/// Upstream addresses for every `proxy_pass` location, resolved once at
/// startup so no lookup ever blocks the event loop.
#[derive(Debug, Default, Clone)]
pub struct ProxyCache {
    addrs: HashMap<String, SocketAddr>,
}

impl ProxyCache {
    pub fn resolve(config: &Config) -> Result<Self, ServerError> {
        let mut addrs = HashMap::new();
        for srv in &config.servers {
            for loc in &srv.locations {
                let LocationKind::Proxy { target } = &loc.kind else {
                    continue;
                };
                let key = proxy_key(target, srv.port);
                if addrs.contains_key(&key) {
                    continue;
                }
                let addr = key
                    .to_socket_addrs()
                    .map_err(|e| ServerError::ProxyResolve { key: key.clone(), reason: e.to_string() })?
                    .next()
                    .ok_or_else(|| ServerError::ProxyResolve {
                        key: key.clone(),
                        reason: "no addresses".into(),
                    })?;
                debug!(%key, %addr, "resolved upstream");
                addrs.insert(key, addr);
            }
        }
        Ok(Self { addrs })
    }

    pub fn get(&self, key: &str) -> Option<SocketAddr> {
        self.addrs.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// `host:port` lookup key. A target without a port uses the port of the
/// server that declares it.
pub fn proxy_key(target: &str, default_port: u16) -> String {
    let target = target
        .trim_start_matches("http://")
        .trim_end_matches('/');
    match target.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => format!("{host}:{port}"),
        _ => format!("{target}:{default_port}"),
    }
}

/// Forwarding is not implemented; the upstream is only logged.
pub fn forward(upstream: SocketAddr, server: &VirtualServer) -> Response {
    warn!(%upstream, "proxying is not supported, answering 502");
    error_response(StatusCode::BadGateway, server)
}
