use libc::{
    close, epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::io;
use std::os::fd::RawFd;
use std::ptr;

use super::event::{Event, Interest};

/// Thin level-triggered epoll wrapper.
pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, interest)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe { epoll_ctl(self.epfd, EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn wait(&self, max_events: usize, timeout_ms: i32) -> io::Result<Vec<Event>> {
        let mut evlist: Vec<epoll_event> = vec![epoll_event { events: 0, u64: 0 }; max_events];

        let n = unsafe {
            epoll_wait(
                self.epfd,
                evlist.as_mut_ptr(),
                max_events as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut out = Vec::with_capacity(n as usize);
        for ev in evlist.into_iter().take(n as usize) {
            let flags = ev.events;
            out.push(Event {
                fd: ev.u64 as RawFd,
                readable: flags & EPOLLIN as u32 != 0,
                writable: flags & EPOLLOUT as u32 != 0,
                error: flags & EPOLLERR as u32 != 0,
                hangup: flags & EPOLLHUP as u32 != 0,
            });
        }
        Ok(out)
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Interest) -> io::Result<()> {
        let events = match interest {
            Interest::Read => EPOLLIN as u32,
            Interest::Write => EPOLLOUT as u32,
            // EPOLLHUP and EPOLLERR are always reported. A peer that only
            // shut down its write side is not a hang-up for a parked fd.
            Interest::None => 0,
        };
        let mut ev = epoll_event { events, u64: fd as u64 };
        let res = unsafe { epoll_ctl(self.epfd, op, fd, &mut ev) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { close(self.epfd) };
    }
}
