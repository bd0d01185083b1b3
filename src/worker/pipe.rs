use std::{
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    process::ChildStdin,
};

use log::trace;

/// Outcome of a single non-blocking pipe operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    /// The OS accepted (or produced) this many bytes.
    Transferred(usize),
    /// The pipe is full (writes) or empty (reads) right now; retry later.
    WouldBlock,
    /// The other end went away.
    Closed,
    /// Any other I/O failure.
    Errored,
}

impl PipeStatus {
    fn from_io(result: io::Result<usize>, empty_is_closed: bool) -> Option<Self> {
        match result {
            Ok(0) if empty_is_closed => Some(PipeStatus::Closed),
            Ok(n) => Some(PipeStatus::Transferred(n)),
            Err(e) => match e.kind() {
                io::ErrorKind::Interrupted => None,
                io::ErrorKind::WouldBlock => Some(PipeStatus::WouldBlock),
                io::ErrorKind::BrokenPipe => Some(PipeStatus::Closed),
                _ => {
                    trace!("pipe error: {e}");
                    Some(PipeStatus::Errored)
                }
            },
        }
    }
}

/// Write end of the child's stdin, switched to non-blocking mode.
#[derive(Debug)]
pub struct InputPipe {
    inner: ChildStdin,
}

impl InputPipe {
    pub(crate) fn new(inner: ChildStdin) -> io::Result<Self> {
        set_nonblocking(inner.as_raw_fd())?;
        Ok(Self { inner })
    }

    pub fn write(&mut self, data: &[u8]) -> PipeStatus {
        if data.is_empty() {
            return PipeStatus::Transferred(0);
        }
        loop {
            if let Some(status) = PipeStatus::from_io(self.inner.write(data), false) {
                return status;
            }
        }
    }
}

/// Read end of the pipe shared by the child's stdout and stderr, switched to
/// non-blocking mode.
#[derive(Debug)]
pub struct OutputPipe {
    inner: File,
}

impl OutputPipe {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self { inner: File::from(fd) })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> PipeStatus {
        loop {
            if let Some(status) = PipeStatus::from_io(self.inner.read(buf), true) {
                return status;
            }
        }
    }
}

/// Creates an anonymous pipe, both ends close-on-exec. Returns `(read, write)`.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    // flag set atomically with creation
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Creates an anonymous pipe, both ends close-on-exec. Returns `(read, write)`.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // no pipe2 here; take ownership right away so both ends get closed on error
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd())?;
    set_cloexec(write.as_raw_fd())?;
    Ok((read, write))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
