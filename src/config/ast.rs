use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::http::{Method, StatusCode};

pub const DEFAULT_CLIENT_MAX_BODY_SIZE: u64 = 1024 * 1024;

/// The routing table. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<VirtualServer>,
}

impl Config {
    /// Picks the virtual server for a request that arrived on `port`.
    ///
    /// The first server on that port whose `server_names` contain the Host
    /// hostname wins; otherwise the first server on the port is the default.
    pub fn find_server(&self, port: u16, host_header: Option<&str>) -> Option<(usize, &VirtualServer)> {
        let host = host_header.map(|h| split_host(h).0).unwrap_or("");

        let mut on_port = self
            .servers
            .iter()
            .enumerate()
            .filter(|(_, srv)| srv.port == port);

        let default = on_port.clone().next();
        on_port
            .find(|(_, srv)| srv.has_name(host))
            .or(default)
    }

    /// Strict Host match used before the body is buffered: both the hostname
    /// and the port (from the header, else the listening port) must agree.
    /// There is no default-server fallback here.
    pub fn match_host(&self, listen_port: u16, host_header: &str) -> Option<&VirtualServer> {
        let (name, port) = split_host(host_header);
        let port = port.unwrap_or(listen_port);
        self.servers
            .iter()
            .find(|srv| srv.port == port && srv.has_name(name))
    }

    /// Distinct addresses to bind. Virtual servers sharing an address share
    /// one listening socket.
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = Vec::new();
        for srv in &self.servers {
            let addr = srv.listen_addr();
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }
}

/// Splits `name[:port]`. A port that does not parse is ignored.
pub fn split_host(host: &str) -> (&str, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse::<u16>() {
            Ok(p) => (name, Some(p)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}

#[derive(Debug, Clone)]
pub struct VirtualServer {
    pub host: IpAddr,
    pub port: u16,
    pub server_names: Vec<String>,
    pub client_max_body_size: u64,
    pub error_pages: HashMap<u16, PathBuf>,
    pub root: PathBuf,
    pub locations: Vec<Location>,
}

impl VirtualServer {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.server_names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn error_page(&self, code: u16) -> Option<&PathBuf> {
        self.error_pages.get(&code)
    }

    /// Longest-prefix match over the location URIs.
    pub fn find_location(&self, path: &str) -> Option<&Location> {
        let mut best_match: Option<&Location> = None;
        for loc in &self.locations {
            if path.starts_with(&loc.uri) {
                if let Some(best) = best_match {
                    if loc.uri.len() > best.uri.len() {
                        best_match = Some(loc);
                    }
                } else {
                    best_match = Some(loc);
                }
            }
        }
        best_match
    }
}

#[derive(Debug, Clone)]
pub struct Location {
    pub uri: String,
    pub root: PathBuf,
    pub kind: LocationKind,
    pub methods: AllowedMethods,
    pub autoindex: bool,
    pub upload_folder: Option<PathBuf>,
    pub index: Vec<String>,
}

/// What a location does. Each variant carries the fields that only make
/// sense for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationKind {
    Redirect { status: StatusCode, target: String },
    /// `None` runs scripts with the server-wide default interpreter.
    Cgi { interpreter: Option<PathBuf> },
    /// `host[:port]`; a missing port means the server's own port.
    Proxy { target: String },
    Alias { target: PathBuf },
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedMethods {
    pub get: bool,
    pub head: bool,
    pub post: bool,
    pub delete: bool,
}

impl AllowedMethods {
    pub const NONE: AllowedMethods = AllowedMethods {
        get: false,
        head: false,
        post: false,
        delete: false,
    };

    pub fn allow(&mut self, method: Method) {
        match method {
            Method::Get => self.get = true,
            Method::Head => self.head = true,
            Method::Post => self.post = true,
            Method::Delete => self.delete = true,
        }
    }

    pub fn allows(&self, method: Method) -> bool {
        match method {
            Method::Get => self.get,
            Method::Head => self.head,
            Method::Post => self.post,
            Method::Delete => self.delete,
        }
    }
}

impl Default for AllowedMethods {
    /// Read-only unless a `methods` directive says otherwise.
    fn default() -> Self {
        AllowedMethods {
            get: true,
            head: true,
            post: false,
            delete: false,
        }
    }
}
