use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use super::fd::Fd;
use crate::http::PendingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating request bytes.
    Reading,
    /// A CGI session owns the remaining work; the socket has no interest.
    Cgi,
    /// Flushing `write_buf`, then closing.
    Writing,
}

pub struct Connection {
    pub fd: Fd,
    /// Port of the listener that accepted this connection.
    pub port: u16,
    pub pending: PendingRequest,
    pub write_buf: Vec<u8>,
    pub written: usize,
    pub state: ConnState,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(fd: Fd, port: u16) -> Self {
        Self {
            fd,
            port,
            pending: PendingRequest::new(),
            write_buf: Vec::new(),
            written: 0,
            state: ConnState::Reading,
            last_activity: Instant::now(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_timed_out(&self, idle: Duration) -> bool {
        self.last_activity.elapsed() >= idle
    }

    /// Replaces whatever was pending with a full response. Unread request
    /// bytes are discarded since the connection closes after this response.
    pub fn queue_response(&mut self, bytes: Vec<u8>) {
        self.pending.clear();
        self.write_buf = bytes;
        self.written = 0;
        self.state = ConnState::Writing;
    }

    pub fn unsent(&self) -> &[u8] {
        &self.write_buf[self.written..]
    }

    pub fn is_flushed(&self) -> bool {
        self.written >= self.write_buf.len()
    }
}
