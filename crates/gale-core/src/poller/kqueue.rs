//! kqueue adapter (macOS, iOS, FreeBSD, OpenBSD, DragonFly)
//!
//! `EV_CLEAR` gives the same edge-triggered behaviour as `EPOLLET`.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use super::{Event, Events, Interest, Poller};

#[derive(Debug)]
pub struct Kqueue {
    fd: OwnedFd,
    buf: Vec<libc::kevent>,
}

impl Kqueue {
    pub fn new() -> io::Result<Self> {
        let fd = syscall!(kqueue())?;
        // SAFETY: kqueue returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        syscall!(fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Self {
            fd,
            buf: Vec::new(),
        })
    }

    fn change(&self, fd: RawFd, filter: i16, flags: u16) -> io::Result<()> {
        // SAFETY: kevent is plain old data; all-zero is a valid value.
        let mut change: libc::kevent = unsafe { mem::zeroed() };
        change.ident = fd as _;
        change.filter = filter as _;
        change.flags = flags as _;

        syscall!(kevent(
            self.fd.as_raw_fd(),
            &change,
            1,
            ptr::null_mut(),
            0,
            ptr::null()
        ))?;
        Ok(())
    }

    /// Delete one filter. A filter that was never added is not an error.
    fn remove(&self, fd: RawFd, filter: i16) -> io::Result<()> {
        match self.change(fd, filter, libc::EV_DELETE as u16) {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

const ADD_CLEAR: u16 = (libc::EV_ADD | libc::EV_CLEAR) as u16;

impl AsRawFd for Kqueue {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Poller for Kqueue {
    fn name(&self) -> &'static str {
        "kqueue"
    }

    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.change(fd, libc::EVFILT_READ as i16, ADD_CLEAR)?;
        if interest.is_writable() {
            self.change(fd, libc::EVFILT_WRITE as i16, ADD_CLEAR)?;
        }
        Ok(())
    }

    // Read and write are separate filters; only the write filter changes.
    fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match interest {
            Interest::ReadWrite => self.change(fd, libc::EVFILT_WRITE as i16, ADD_CLEAR),
            Interest::Readable => self.remove(fd, libc::EVFILT_WRITE as i16),
        }
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.remove(fd, libc::EVFILT_WRITE as i16)?;
        self.remove(fd, libc::EVFILT_READ as i16)
    }

    fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.buf.clear();
        self.buf.reserve(events.capacity());

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let timespec_ptr = timespec
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        let n = match syscall!(kevent(
            self.fd.as_raw_fd(),
            ptr::null(),
            0,
            self.buf.as_mut_ptr(),
            events.capacity() as libc::c_int,
            timespec_ptr
        )) {
            Ok(n) => n as usize,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        };

        // SAFETY: the kernel initialised the first `n` entries, n <= capacity.
        unsafe { self.buf.set_len(n) };

        for raw in &self.buf {
            let flags = raw.flags as u32;
            events.push(Event {
                fd: raw.ident as RawFd,
                readable: raw.filter == libc::EVFILT_READ as _,
                writable: raw.filter == libc::EVFILT_WRITE as _,
                closed: flags & (libc::EV_EOF as u32 | libc::EV_ERROR as u32) != 0,
            });
        }
        Ok(())
    }
}
