use std::ffi::{CString, NulError};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::application::server::resolver::ResolvedRequest;
use crate::core::net::fd::Fd;
use crate::core::net::socket::set_nonblocking;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("cannot create pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("argument contains a NUL byte")]
    Nul(#[from] NulError),
}

/// A freshly forked child and the parent's ends of its pipes.
#[derive(Debug)]
pub struct CgiProcess {
    pub pid: libc::pid_t,
    /// Write end of the child's stdin. Blocking.
    pub input: Fd,
    /// Read end of the child's stdout and stderr. Non-blocking.
    pub output: Fd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiPhase {
    Spawning,
    Running,
    Completed,
    TimedOut,
    Failed,
}

/// One in-flight script execution bound to the client that asked for it.
#[derive(Debug)]
pub struct CgiSession {
    pub pid: libc::pid_t,
    pub output: Fd,
    pub input: Option<Fd>,
    pub client_fd: RawFd,
    /// Index of the virtual server that routed the request.
    pub server: usize,
    pub buffer: Vec<u8>,
    pub started: Instant,
    pub phase: CgiPhase,
}

impl CgiSession {
    pub fn new(process: CgiProcess, client_fd: RawFd, server: usize) -> Self {
        Self {
            pid: process.pid,
            output: process.output,
            input: Some(process.input),
            client_fd,
            server,
            buffer: Vec::new(),
            started: Instant::now(),
            phase: CgiPhase::Spawning,
        }
    }

    pub fn output_fd(&self) -> RawFd {
        self.output.as_raw_fd()
    }

    /// Hands the request body to the script and closes its stdin so it
    /// sees EOF. A script that exits without reading is not an error.
    ///
    /// The write blocks. Its size is bounded by `client_max_body_size`, its
    /// duration is not: a script that fills its output pipe before reading
    /// a body larger than the input pipe stalls the caller.
    pub fn feed(&mut self, body: &[u8]) {
        if let Some(input) = self.input.take() {
            if let Err(e) = write_all(input.as_raw_fd(), body) {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    debug!(pid = self.pid, "script closed stdin early");
                } else {
                    warn!(pid = self.pid, error = %e, "writing request body to script failed");
                }
            }
        }
        self.phase = CgiPhase::Running;
    }

    /// Reads whatever the pipe has. Returns the phase after the read.
    pub fn on_readable(&mut self) -> CgiPhase {
        let mut chunk = [0u8; READ_CHUNK];
        let n = unsafe {
            libc::read(
                self.output.as_raw_fd(),
                chunk.as_mut_ptr() as *mut libc::c_void,
                chunk.len(),
            )
        };
        if n > 0 {
            self.buffer.extend_from_slice(&chunk[..n as usize]);
        } else if n == 0 {
            self.phase = CgiPhase::Completed;
        } else {
            let err = io::Error::last_os_error();
            if !matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                warn!(pid = self.pid, error = %err, "reading script output failed");
                self.phase = CgiPhase::Failed;
            }
        }
        self.phase
    }

    pub fn is_expired(&self, limit: Duration) -> bool {
        self.started.elapsed() >= limit
    }

    pub fn kill(&self) {
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
        }
    }
}

/// Environment handed to every script. Nothing from the server's own
/// environment leaks through.
pub fn cgi_env(resolved: &ResolvedRequest<'_>) -> Vec<(String, String)> {
    let req = &resolved.request;
    let script = resolved.script_path.display().to_string();
    vec![
        ("REQUEST_METHOD".into(), req.method.clone()),
        ("QUERY_STRING".into(), req.query_string.clone()),
        ("CONTENT_TYPE".into(), req.content_type().to_string()),
        ("CONTENT_LENGTH".into(), req.body.len().to_string()),
        ("DOCUMENT_ROOT".into(), resolved.root.display().to_string()),
        ("SCRIPT_FILENAME".into(), script.clone()),
        ("SCRIPT_NAME".into(), script),
        ("REDIRECT_STATUS".into(), "200".into()),
    ]
}

/// Forks `interpreter script` with the given environment, stdin fed from
/// one pipe and stdout plus stderr captured by another.
///
/// Every descriptor the server owns is close-on-exec, so the child starts
/// with nothing but its three standard streams.
pub fn spawn(interpreter: &Path, script: &Path, env: &[(String, String)]) -> Result<CgiProcess, CgiError> {
    let program = path_cstr(interpreter)?;
    let argv_cstr = [program.clone(), path_cstr(script)?];
    let env_cstr = env
        .iter()
        .map(|(k, v)| CString::new(format!("{k}={v}")))
        .collect::<Result<Vec<_>, _>>()?;
    let workdir = script.parent().map(path_cstr).transpose()?;

    let mut argv: Vec<*const libc::c_char> = argv_cstr.iter().map(|s| s.as_ptr()).collect();
    argv.push(ptr::null());
    let mut envp: Vec<*const libc::c_char> = env_cstr.iter().map(|s| s.as_ptr()).collect();
    envp.push(ptr::null());

    let (stdin_read, stdin_write) = pipe()?;
    let (stdout_read, stdout_write) = pipe()?;
    set_nonblocking(stdout_read.as_raw_fd()).map_err(CgiError::Pipe)?;

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(CgiError::Fork(io::Error::last_os_error()));
    }

    if pid == 0 {
        // Child: only async-signal-safe calls from here on.
        unsafe {
            // The runtime ignores SIGPIPE and that disposition survives exec.
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            libc::dup2(stdin_read.0, libc::STDIN_FILENO);
            libc::dup2(stdout_write.0, libc::STDOUT_FILENO);
            libc::dup2(stdout_write.0, libc::STDERR_FILENO);
            if let Some(dir) = &workdir {
                libc::chdir(dir.as_ptr());
            }
            libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
            libc::_exit(127);
        }
    }

    drop(stdin_read);
    drop(stdout_write);
    Ok(CgiProcess {
        pid,
        input: stdin_write,
        output: stdout_read,
    })
}

/// Collects a child without blocking. True once the process is gone.
pub fn try_reap(pid: libc::pid_t) -> bool {
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    // ECHILD means somebody already collected it.
    ret == pid || ret < 0
}

fn pipe() -> Result<(Fd, Fd), CgiError> {
    let mut fds: [RawFd; 2] = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(CgiError::Pipe(io::Error::last_os_error()));
    }
    Ok((Fd(fds[0]), Fd(fds[1])))
}

fn write_all(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        data = &data[n as usize..];
    }
    Ok(())
}

fn path_cstr(p: &Path) -> Result<CString, NulError> {
    CString::new(p.as_os_str().as_bytes())
}
