use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::application::handler::cgi::{try_reap, CgiSession};
use crate::core::net::connection::{ConnState, Connection};

/// Owns every client connection and CGI session.
///
/// Sessions are keyed by their output pipe so a readiness event finds its
/// session in one lookup; `by_client` gives the reverse edge used when a
/// client goes away first.
#[derive(Default)]
pub struct ServerManager {
    pub conns: HashMap<RawFd, Connection>,
    sessions: HashMap<RawFd, CgiSession>,
    by_client: HashMap<RawFd, RawFd>,
    zombies: Vec<libc::pid_t>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: Connection) {
        self.conns.insert(conn.raw_fd(), conn);
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.conns.get_mut(&fd)
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Connection> {
        self.conns.remove(&fd)
    }

    /// At most one session per client; a second one replaces nothing and
    /// is handed back.
    pub fn insert_session(&mut self, session: CgiSession) -> Result<(), CgiSession> {
        if self.by_client.contains_key(&session.client_fd) {
            return Err(session);
        }
        self.by_client.insert(session.client_fd, session.output_fd());
        self.sessions.insert(session.output_fd(), session);
        Ok(())
    }

    pub fn session_mut(&mut self, pipe_fd: RawFd) -> Option<&mut CgiSession> {
        self.sessions.get_mut(&pipe_fd)
    }

    pub fn remove_session(&mut self, pipe_fd: RawFd) -> Option<CgiSession> {
        let session = self.sessions.remove(&pipe_fd)?;
        self.by_client.remove(&session.client_fd);
        Some(session)
    }

    pub fn session_for_client(&self, client_fd: RawFd) -> Option<RawFd> {
        self.by_client.get(&client_fd).copied()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &CgiSession> {
        self.sessions.values()
    }

    pub fn expired_sessions(&self, limit: Duration) -> Vec<RawFd> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.is_expired(limit))
            .map(|(&fd, _)| fd)
            .collect()
    }

    /// Connections idle for longer than `limit`. Connections waiting on a
    /// script are covered by the CGI timeout instead.
    pub fn sweep_timeouts(&self, limit: Duration) -> Vec<(RawFd, ConnState)> {
        self.conns
            .iter()
            .filter(|(_, c)| c.state != ConnState::Cgi && c.is_timed_out(limit))
            .map(|(&fd, c)| (fd, c.state))
            .collect()
    }

    /// Tries to collect `pid` now and remembers it if it is still running.
    pub fn defer_reap(&mut self, pid: libc::pid_t) {
        if !try_reap(pid) {
            self.zombies.push(pid);
        }
    }

    pub fn reap(&mut self) {
        self.zombies.retain(|&pid| !try_reap(pid));
    }

    pub fn pending_reaps(&self) -> usize {
        self.zombies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::cgi::spawn;
    use crate::core::net::fd::Fd;
    use std::path::Path;
    use std::thread;
    use std::time::Instant;

    fn pipe_fd() -> (Fd, Fd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (Fd(fds[0]), Fd(fds[1]))
    }

    fn session(client_fd: RawFd) -> CgiSession {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, "exit 0\n").unwrap();
        let process = spawn(Path::new("/bin/sh"), &script, &[]).unwrap();
        CgiSession::new(process, client_fd, 0)
    }

    #[test]
    fn one_session_per_client() {
        let mut mgr = ServerManager::new();
        let first = session(42);
        let (pid_a, pipe_a) = (first.pid, first.output_fd());
        assert!(mgr.insert_session(first).is_ok());
        let second = session(42);
        let pid_b = second.pid;
        assert!(mgr.insert_session(second).is_err());

        assert_eq!(mgr.session_for_client(42), Some(pipe_a));
        let removed = mgr.remove_session(pipe_a).unwrap();
        assert_eq!(removed.pid, pid_a);
        assert_eq!(mgr.session_for_client(42), None);
        assert_eq!(mgr.sessions().count(), 0);

        for pid in [pid_a, pid_b] {
            mgr.defer_reap(pid);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while mgr.pending_reaps() > 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
            mgr.reap();
        }
    }

    #[test]
    fn sweep_skips_connections_waiting_on_cgi() {
        let mut mgr = ServerManager::new();
        let (a, _a_peer) = pipe_fd();
        let (b, _b_peer) = pipe_fd();
        let a_fd = a.0;
        let b_fd = b.0;
        mgr.insert(Connection::new(a, 8080));
        mgr.insert(Connection::new(b, 8080));
        mgr.get_mut(b_fd).unwrap().state = ConnState::Cgi;

        let idle = mgr.sweep_timeouts(Duration::ZERO);
        assert_eq!(idle, vec![(a_fd, ConnState::Reading)]);
        assert!(mgr.sweep_timeouts(Duration::from_secs(60)).is_empty());
        assert!(mgr.remove(a_fd).is_some());
        assert!(mgr.get_mut(a_fd).is_none());
    }
}
