use std::fs;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use tracing::error;

use crate::application::handler::proxy::{proxy_key, ProxyCache};
use crate::config::{Config, Location, LocationKind, VirtualServer};
use crate::http::{parse_request, Method, Request, StatusCode};

/// What the response side has to do with a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Error(StatusCode),
    Redirect { status: StatusCode, target: String },
    /// Run `script_path`; `None` means the server-wide interpreter.
    Cgi { interpreter: Option<PathBuf> },
    Proxy { addr: SocketAddr },
    /// Serve `script_path` as a file.
    File,
    /// Generate a listing of the `script_path` directory.
    Listing,
    Upload { folder: PathBuf },
    /// Remove `script_path`.
    Delete,
}

/// A request matched against the routing table.
///
/// The server and location are borrowed from the routing table, which
/// outlives every connection.
#[derive(Debug)]
pub struct ResolvedRequest<'c> {
    pub request: Request,
    pub method: Option<Method>,
    pub server_index: usize,
    pub server: &'c VirtualServer,
    pub location: Option<&'c Location>,
    /// Absolute document root of the matched location.
    pub root: PathBuf,
    /// Filesystem target: the script, file or directory the URI maps to.
    pub script_path: PathBuf,
    pub dispatch: Dispatch,
}

impl<'c> ResolvedRequest<'c> {
    pub fn server(&self) -> &'c VirtualServer {
        self.server
    }

    pub fn location(&self) -> Option<&'c Location> {
        self.location
    }

    /// The status the request failed with, `None` if it can be served.
    pub fn error(&self) -> Option<StatusCode> {
        match self.dispatch {
            Dispatch::Error(status) => Some(status),
            _ => None,
        }
    }

    pub fn error_page(&self, code: u16) -> Option<&'c Path> {
        self.server.error_page(code).map(PathBuf::as_path)
    }

    pub fn is_head(&self) -> bool {
        self.method == Some(Method::Head)
    }

    fn fail(mut self, status: StatusCode) -> Self {
        self.dispatch = Dispatch::Error(status);
        self
    }
}

pub struct Resolver<'c> {
    config: &'c Config,
    proxies: &'c ProxyCache,
}

impl<'c> Resolver<'c> {
    pub fn new(config: &'c Config, proxies: &'c ProxyCache) -> Self {
        Self { config, proxies }
    }

    /// Turns one framed request that arrived on `port` into a dispatch
    /// decision. Failures are reported through [`Dispatch::Error`]; no
    /// handler runs for them.
    pub fn resolve(&self, port: u16, frame: &[u8]) -> ResolvedRequest<'c> {
        let request = parse_request(frame);
        let host = request.as_ref().ok().and_then(|r| r.host());
        let (server_index, server) = self
            .config
            .find_server(port, host)
            .unwrap_or((0, &self.config.servers[0]));

        let resolved = ResolvedRequest {
            request: Request::default(),
            method: None,
            server_index,
            server,
            location: None,
            root: server.root.clone(),
            script_path: PathBuf::new(),
            dispatch: Dispatch::Error(StatusCode::InternalServerError),
        };

        match request {
            Ok(request) => self.route(ResolvedRequest { request, ..resolved }),
            Err(e) => resolved.fail(e.status()),
        }
    }

    fn route(&self, mut r: ResolvedRequest<'c>) -> ResolvedRequest<'c> {
        if !r.request.version.starts_with("HTTP/") {
            return r.fail(StatusCode::BadRequest);
        }
        if r.request.version != "HTTP/1.1" && r.request.version != "HTTP/1.0" {
            return r.fail(StatusCode::HttpVersionNotSupported);
        }
        r.method = Method::parse(&r.request.method);
        let Some(method) = r.method else {
            return r.fail(StatusCode::NotImplemented);
        };
        if !r.request.uri.starts_with('/') {
            return r.fail(StatusCode::BadRequest);
        }

        let Some(location) = r.server.find_location(&r.request.uri) else {
            return r.fail(StatusCode::NotFound);
        };
        r.location = Some(location);
        if !location.methods.allows(method) {
            return r.fail(StatusCode::MethodNotAllowed);
        }
        if r.request.body.len() as u64 > r.server.client_max_body_size {
            return r.fail(StatusCode::PayloadTooLarge);
        }
        if has_parent_segment(&r.request.uri) {
            return r.fail(StatusCode::NotFound);
        }

        r.root = absolute(&location.root);
        let relative = r.request.uri.trim_start_matches('/').to_string();

        match &location.kind {
            LocationKind::Redirect { status, target } => {
                r.dispatch = Dispatch::Redirect { status: *status, target: target.clone() };
                r
            }
            LocationKind::Proxy { target } => {
                let key = proxy_key(target, r.server.port);
                match self.proxies.get(&key) {
                    Some(addr) => {
                        r.dispatch = Dispatch::Proxy { addr };
                        r
                    }
                    // Every proxy target is resolved before the first request.
                    None => {
                        error!(upstream = %key, "proxy target missing from the startup cache");
                        r.fail(StatusCode::BadGateway)
                    }
                }
            }
            LocationKind::Cgi { interpreter } => {
                r.script_path = r.root.join(relative);
                if !r.script_path.is_file() {
                    return r.fail(StatusCode::NotFound);
                }
                if fs::File::open(&r.script_path).is_err() {
                    return r.fail(StatusCode::InternalServerError);
                }
                r.dispatch = Dispatch::Cgi { interpreter: interpreter.clone() };
                r
            }
            LocationKind::Alias { target } => {
                r.root = absolute(target);
                let rest = r.request.uri[location.uri.len()..].trim_start_matches('/').to_string();
                r.script_path = r.root.join(rest);
                resolve_filesystem(r, method, location)
            }
            LocationKind::Standard => {
                r.script_path = r.root.join(relative);
                resolve_filesystem(r, method, location)
            }
        }
    }
}

fn resolve_filesystem<'c>(
    mut r: ResolvedRequest<'c>,
    method: Method,
    location: &Location,
) -> ResolvedRequest<'c> {
    match method {
        Method::Post => match &location.upload_folder {
            Some(folder) => {
                let folder = if folder.is_absolute() {
                    folder.clone()
                } else {
                    r.root.join(folder)
                };
                r.dispatch = Dispatch::Upload { folder };
                r
            }
            None => r.fail(StatusCode::Forbidden),
        },
        Method::Delete => {
            if r.script_path.is_file() {
                r.dispatch = Dispatch::Delete;
                r
            } else if r.script_path.exists() {
                r.fail(StatusCode::Forbidden)
            } else {
                r.fail(StatusCode::NotFound)
            }
        }
        Method::Get | Method::Head => {
            if r.script_path.is_dir() {
                let index = location
                    .index
                    .iter()
                    .map(|name| r.script_path.join(name))
                    .find(|candidate| candidate.is_file());
                if let Some(index) = index {
                    r.script_path = index;
                    r.dispatch = Dispatch::File;
                    r
                } else if location.autoindex {
                    r.dispatch = Dispatch::Listing;
                    r
                } else {
                    r.fail(StatusCode::NotFound)
                }
            } else if r.script_path.is_file() {
                r.dispatch = Dispatch::File;
                r
            } else {
                r.fail(StatusCode::NotFound)
            }
        }
    }
}

fn has_parent_segment(uri: &str) -> bool {
    Path::new(uri).components().any(|c| matches!(c, Component::ParentDir))
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
