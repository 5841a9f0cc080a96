use libc::{
    accept4, bind, c_int, fcntl, listen, sa_family_t, setsockopt, sockaddr, sockaddr_in,
    sockaddr_in6, sockaddr_storage, socket, socklen_t, AF_INET, AF_INET6, F_GETFL, F_SETFL,
    MSG_NOSIGNAL, O_NONBLOCK, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET, SO_REUSEADDR,
};
use std::io;
use std::mem::{size_of, zeroed};
use std::net::SocketAddr;
use std::os::fd::RawFd;

use super::fd::Fd;

const BACKLOG: c_int = 128;

pub fn create_listening_socket(addr: SocketAddr) -> io::Result<Fd> {
    let (storage, len, domain) = to_sockaddr(&addr);
    let fd = unsafe { socket(domain, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = Fd(fd);

    let yes: c_int = 1;
    let res = unsafe {
        setsockopt(
            fd.0,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            size_of::<c_int>() as socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    let res = unsafe { bind(fd.0, &storage as *const sockaddr_storage as *const sockaddr, len) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { listen(fd.0, BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

/// Accepts one pending connection. The new socket is non-blocking and
/// close-on-exec so CGI children never inherit it. `Ok(None)` means the
/// backlog is empty.
pub fn accept_nonblocking(listen_fd: RawFd) -> io::Result<Option<Fd>> {
    let mut addr: sockaddr_storage = unsafe { zeroed() };
    let mut len = size_of::<sockaddr_storage>() as socklen_t;
    let fd = unsafe {
        accept4(
            listen_fd,
            &mut addr as *mut _ as *mut sockaddr,
            &mut len as *mut socklen_t,
            SOCK_NONBLOCK | SOCK_CLOEXEC,
        )
    };
    if fd < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(Fd(fd)))
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Sends without raising SIGPIPE when the peer is gone.
pub fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::send(fd, buf.as_ptr() as *const _, buf.len(), MSG_NOSIGNAL) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn to_sockaddr(addr: &SocketAddr) -> (sockaddr_storage, socklen_t, c_int) {
    let mut storage: sockaddr_storage = unsafe { zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let mut sa: sockaddr_in = unsafe { zeroed() };
            sa.sin_family = AF_INET as sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut sockaddr_in, sa);
            }
            (storage, size_of::<sockaddr_in>() as socklen_t, AF_INET)
        }
        SocketAddr::V6(v6) => {
            let mut sa: sockaddr_in6 = unsafe { zeroed() };
            sa.sin6_family = AF_INET6 as sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut sockaddr_in6, sa);
            }
            (storage, size_of::<sockaddr_in6>() as socklen_t, AF_INET6)
        }
    }
}
