use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use super::{Event, FdKind, Interest, Poller};
use crate::core::net::fd::Fd;

/// Owns the epoll handle and remembers what every registered fd is.
pub struct EventLoop {
    poller: Poller,
    kinds: HashMap<RawFd, FdKind>,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            kinds: HashMap::new(),
        })
    }

    pub fn register(&mut self, fd: RawFd, interest: Interest, kind: FdKind) -> io::Result<()> {
        self.poller.add(fd, interest)?;
        self.kinds.insert(fd, kind);
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.poller.modify(fd, interest)
    }

    /// Stops read and write interest but keeps the fd registered (errors and
    /// hang-ups are still reported) and open.
    pub fn detach(&self, fd: RawFd) -> io::Result<()> {
        self.poller.modify(fd, Interest::None)
    }

    /// Removes the fd from epoll and closes it. The fd is closed even when
    /// the epoll removal fails.
    pub fn deregister(&mut self, fd: Fd) -> io::Result<()> {
        let raw = fd.as_raw_fd();
        self.kinds.remove(&raw);
        let res = self.poller.delete(raw);
        drop(fd);
        res
    }

    pub fn kind_of(&self, fd: RawFd) -> Option<FdKind> {
        self.kinds.get(&fd).copied()
    }

    /// Waits up to `timeout_ms` and tags every ready fd. Events for fds that
    /// were deregistered in the meantime are dropped.
    pub fn wait(&self, max_events: usize, timeout_ms: i32) -> io::Result<Vec<(FdKind, Event)>> {
        let events = self.poller.wait(max_events, timeout_ms)?;
        Ok(events
            .into_iter()
            .filter_map(|ev| self.kind_of(ev.fd).map(|kind| (kind, ev)))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
