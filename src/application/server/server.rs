use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::manager::ServerManager;
use super::resolver::{Dispatch, ResolvedRequest, Resolver};
use crate::application::handler::build_response;
use crate::application::handler::cgi::{self, CgiPhase, CgiSession};
use crate::application::handler::error_page_handler::error_response;
use crate::application::handler::proxy::ProxyCache;
use crate::config::Config;
use crate::core::event::{Event, EventLoop, FdKind, Interest};
use crate::core::net::connection::{ConnState, Connection};
use crate::core::net::fd::Fd;
use crate::core::net::socket;
use crate::error::{ConfigError, ServerError};
use crate::http::serializer::serialize_response;
use crate::http::StatusCode;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Wall-clock limit for one script run.
    pub cgi_timeout: Duration,
    /// Idle limit for a client that is sending or receiving.
    pub client_timeout: Duration,
    /// Interpreter for `cgi` locations that do not name one.
    pub cgi_interpreter: PathBuf,
    pub max_events: usize,
    /// Upper bound on one wait, which is also the timeout sweep period.
    pub wait_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cgi_timeout: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
            cgi_interpreter: PathBuf::from("/usr/bin/python3"),
            max_events: 64,
            wait_timeout: Duration::from_millis(500),
        }
    }
}

struct Listener {
    fd: Fd,
    port: u16,
}

pub struct Server {
    config: Arc<Config>,
    proxies: Arc<ProxyCache>,
    options: ServerOptions,
    events: EventLoop,
    listeners: HashMap<RawFd, Listener>,
    manager: ServerManager,
    current_fd: Option<RawFd>,
}

impl Server {
    /// Resolves upstreams, creates the poller and binds every distinct
    /// listen address. Any failure here is fatal.
    pub fn bind(config: Config, options: ServerOptions) -> Result<Self, ServerError> {
        if config.servers.is_empty() {
            return Err(ConfigError::Invalid("no server blocks".into()).into());
        }
        let proxies = ProxyCache::resolve(&config)?;
        let mut events = EventLoop::new().map_err(ServerError::Poller)?;

        let mut listeners = HashMap::new();
        for addr in config.listen_addrs() {
            let fd = socket::create_listening_socket(addr).map_err(|source| ServerError::Bind { addr, source })?;
            let raw = fd.as_raw_fd();
            events
                .register(raw, Interest::Read, FdKind::Listener)
                .map_err(|source| ServerError::Register { fd: raw, source })?;
            info!(%addr, "listening");
            listeners.insert(raw, Listener { fd, port: addr.port() });
        }

        Ok(Self {
            config: Arc::new(config),
            proxies: Arc::new(proxies),
            options,
            events,
            listeners,
            manager: ServerManager::new(),
            current_fd: None,
        })
    }

    /// Serves until `shutdown` is set. Checked at least once per wait period.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ServerError> {
        let timeout_ms = self.options.wait_timeout.as_millis().min(i32::MAX as u128) as i32;
        while !shutdown.load(Ordering::Relaxed) {
            let ready = match self.events.wait(self.options.max_events, timeout_ms) {
                Ok(ready) => ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "wait failed");
                    continue;
                }
            };

            for (kind, event) in ready {
                self.current_fd = Some(event.fd);
                match kind {
                    FdKind::Listener => self.accept_clients(event.fd),
                    FdKind::Client => self.on_client_event(event),
                    FdKind::CgiPipe => self.on_cgi_output(event.fd),
                }
            }
            self.current_fd = None;

            self.sweep_cgi();
            self.sweep_clients();
            self.manager.reap();
        }
        info!(connections = self.manager.conns.len(), "shutting down");
        Ok(())
    }

    pub fn cgi_sessions(&self) -> impl Iterator<Item = &CgiSession> {
        self.manager.sessions()
    }

    /// Descriptor whose event is being dispatched, if any.
    pub fn current_fd(&self) -> Option<RawFd> {
        self.current_fd
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn accept_clients(&mut self, listen_fd: RawFd) {
        let Some((listen_fd, port)) = self.listeners.get(&listen_fd).map(|l| (l.fd.as_raw_fd(), l.port)) else {
            return;
        };
        loop {
            match socket::accept_nonblocking(listen_fd) {
                Ok(Some(fd)) => {
                    let raw = fd.as_raw_fd();
                    if let Err(e) = self.events.register(raw, Interest::Read, FdKind::Client) {
                        warn!(fd = raw, error = %e, "cannot watch client");
                        continue;
                    }
                    debug!(fd = raw, port, "accepted");
                    self.manager.insert(Connection::new(fd, port));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn on_client_event(&mut self, event: Event) {
        let Some(state) = self.manager.get_mut(event.fd).map(|c| c.state) else {
            return;
        };
        if event.error || (event.hangup && !event.readable) {
            debug!(fd = event.fd, "client hung up");
            self.close_connection(event.fd);
            return;
        }
        match state {
            ConnState::Reading if event.readable => self.read_client(event.fd),
            ConnState::Writing if event.writable => self.write_client(event.fd),
            _ => {}
        }
    }

    fn read_client(&mut self, fd: RawFd) {
        let config = Arc::clone(&self.config);
        let Some(conn) = self.manager.get_mut(fd) else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        match socket::recv(fd, &mut buf) {
            Ok(0) => {
                debug!(fd, "client closed");
                self.close_connection(fd);
                return;
            }
            Ok(n) => {
                conn.pending.extend(&buf[..n]);
                conn.touch();
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => return,
            Err(e) => {
                debug!(fd, error = %e, "read failed");
                self.close_connection(fd);
                return;
            }
        }

        let port = conn.port;
        let early = match conn.pending.head() {
            Err(e) => Some(Err(e.status())),
            Ok(Some(head)) => head.content_length.and_then(|len| {
                // An unmatched Host is judged by the server routing will pick,
                // so no declared length is buffered past some server's limit.
                let host = head.host.as_deref();
                let srv = host
                    .and_then(|h| config.match_host(port, h))
                    .or_else(|| config.find_server(port, host).map(|(_, srv)| srv))?;
                (len as u64 > srv.client_max_body_size)
                    .then(|| Ok(error_response(StatusCode::PayloadTooLarge, srv)))
            }),
            Ok(None) => None,
        };
        match early {
            Some(Ok(resp)) => {
                info!(fd, status = 413, "body exceeds limit, rejected before buffering");
                self.respond(fd, serialize_response(&resp));
                return;
            }
            Some(Err(status)) => {
                self.respond_error(fd, port, status);
                return;
            }
            None => {}
        }

        let frame = match conn.pending.take_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                self.respond_error(fd, port, e.status());
                return;
            }
        };
        self.handle_request(fd, port, &frame);
    }

    fn handle_request(&mut self, fd: RawFd, port: u16, frame: &[u8]) {
        let config = Arc::clone(&self.config);
        let proxies = Arc::clone(&self.proxies);
        let resolved = Resolver::new(&config, &proxies).resolve(port, frame);

        info!(
            fd,
            method = %resolved.request.method,
            uri = %resolved.request.uri,
            status = resolved.error().map(|s| s.as_u16()),
            "request"
        );

        if let Dispatch::Cgi { interpreter } = &resolved.dispatch {
            let interpreter = interpreter.clone().unwrap_or_else(|| self.options.cgi_interpreter.clone());
            self.start_cgi(fd, &resolved, &interpreter);
        } else {
            let resp = build_response(&resolved);
            self.respond(fd, serialize_response(&resp));
        }
    }

    fn start_cgi(&mut self, fd: RawFd, resolved: &ResolvedRequest<'_>, interpreter: &Path) {
        let env = cgi::cgi_env(resolved);
        let process = match cgi::spawn(interpreter, &resolved.script_path, &env) {
            Ok(process) => process,
            Err(e) => {
                error!(fd, error = %e, "cannot start script");
                let resp = error_response(StatusCode::InternalServerError, resolved.server());
                self.respond(fd, serialize_response(&resp));
                return;
            }
        };

        let mut session = CgiSession::new(process, fd, resolved.server_index);
        // Blocking write, at most client_max_body_size bytes. The reactor
        // waits on it with no deadline.
        session.feed(&resolved.request.body);
        let pipe = session.output_fd();
        let pid = session.pid;

        if let Err(e) = self.events.register(pipe, Interest::Read, FdKind::CgiPipe) {
            error!(fd, pid, error = %e, "cannot watch script output");
            session.kill();
            self.manager.defer_reap(pid);
            let resp = error_response(StatusCode::InternalServerError, resolved.server());
            self.respond(fd, serialize_response(&resp));
            return;
        }
        if let Err(e) = self.events.detach(fd) {
            warn!(fd, error = %e, "cannot park client");
        }
        if let Some(conn) = self.manager.get_mut(fd) {
            conn.state = ConnState::Cgi;
        }
        if let Err(session) = self.manager.insert_session(session) {
            // Unreachable while the client is parked, but never leak a child.
            session.kill();
            let output = session.output;
            let _ = self.events.deregister(output);
            self.manager.defer_reap(pid);
            return;
        }
        info!(fd, pid, script = %resolved.script_path.display(), "script started");
    }

    fn on_cgi_output(&mut self, pipe_fd: RawFd) {
        let phase = match self.manager.session_mut(pipe_fd) {
            Some(session) => session.on_readable(),
            None => return,
        };
        if phase != CgiPhase::Running {
            self.finish_cgi(pipe_fd, phase);
        }
    }

    fn finish_cgi(&mut self, pipe_fd: RawFd, phase: CgiPhase) {
        let Some(mut session) = self.manager.remove_session(pipe_fd) else {
            return;
        };
        session.phase = phase;
        if phase == CgiPhase::Failed {
            session.kill();
        }
        let client = session.client_fd;
        info!(pid = session.pid, fd = client, bytes = session.buffer.len(), phase = ?phase, "script finished");

        if let Err(e) = self.events.deregister(session.output) {
            debug!(fd = pipe_fd, error = %e, "deregister pipe");
        }
        self.manager.defer_reap(session.pid);

        // Script output goes to the client verbatim, even after a failed read.
        self.respond(client, session.buffer);
    }

    fn sweep_cgi(&mut self) {
        for pipe_fd in self.manager.expired_sessions(self.options.cgi_timeout) {
            let Some(mut session) = self.manager.remove_session(pipe_fd) else {
                continue;
            };
            session.kill();
            session.phase = CgiPhase::TimedOut;
            warn!(pid = session.pid, fd = session.client_fd, "script timed out");

            if let Err(e) = self.events.deregister(session.output) {
                debug!(fd = pipe_fd, error = %e, "deregister pipe");
            }
            self.manager.defer_reap(session.pid);

            let config = Arc::clone(&self.config);
            let resp = error_response(StatusCode::GatewayTimeout, &config.servers[session.server]);
            self.respond(session.client_fd, serialize_response(&resp));
        }
    }

    fn sweep_clients(&mut self) {
        for (fd, state) in self.manager.sweep_timeouts(self.options.client_timeout) {
            match state {
                ConnState::Reading => {
                    info!(fd, "client timed out");
                    let port = self.manager.get_mut(fd).map(|c| c.port).unwrap_or(0);
                    self.respond_error(fd, port, StatusCode::RequestTimeout);
                }
                _ => {
                    info!(fd, "client stopped reading");
                    self.close_connection(fd);
                }
            }
        }
    }

    /// Error response from the port's default server, for failures found
    /// before any routing took place.
    fn respond_error(&mut self, fd: RawFd, port: u16, status: StatusCode) {
        let config = Arc::clone(&self.config);
        let server = config
            .find_server(port, None)
            .map(|(_, srv)| srv)
            .unwrap_or(&config.servers[0]);
        let resp = error_response(status, server);
        self.respond(fd, serialize_response(&resp));
    }

    fn respond(&mut self, fd: RawFd, bytes: Vec<u8>) {
        let Some(conn) = self.manager.get_mut(fd) else {
            return;
        };
        conn.queue_response(bytes);
        conn.touch();
        if let Err(e) = self.events.modify(fd, Interest::Write) {
            warn!(fd, error = %e, "cannot switch to writing");
            self.close_connection(fd);
        }
    }

    fn write_client(&mut self, fd: RawFd) {
        let Some(conn) = self.manager.get_mut(fd) else {
            return;
        };
        while !conn.is_flushed() {
            match socket::send(fd, conn.unsent()) {
                Ok(n) => {
                    conn.written += n;
                    conn.touch();
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => return,
                Err(e) => {
                    debug!(fd, error = %e, "write failed");
                    break;
                }
            }
        }
        debug!(fd, "response sent");
        self.close_connection(fd);
    }

    /// Tears a client down together with any script still running for it.
    fn close_connection(&mut self, fd: RawFd) {
        let Some(conn) = self.manager.remove(fd) else {
            return;
        };
        if let Some(pipe_fd) = self.manager.session_for_client(fd) {
            if let Some(session) = self.manager.remove_session(pipe_fd) {
                session.kill();
                info!(pid = session.pid, fd, "client gone, script killed");
                let pid = session.pid;
                if let Err(e) = self.events.deregister(session.output) {
                    debug!(fd = pipe_fd, error = %e, "deregister pipe");
                }
                self.manager.defer_reap(pid);
            }
        }
        if let Err(e) = self.events.deregister(conn.fd) {
            debug!(fd, error = %e, "deregister client");
        }
    }
}
