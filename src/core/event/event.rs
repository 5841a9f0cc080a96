use std::os::fd::RawFd;

/// What a registered fd is, so the loop knows which handler owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdKind {
    Listener,
    Client,
    CgiPipe,
}

/// Readiness a registration asks for. `None` keeps the fd registered for
/// error and hang-up notifications only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}
