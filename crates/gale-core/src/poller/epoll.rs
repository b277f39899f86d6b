//! epoll adapter (Linux, Android)

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use super::{timeout_millis, Event, Events, Interest, Poller};

const READ_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLET) as u32;
const WRITE_INTEREST: u32 = READ_INTEREST | libc::EPOLLOUT as u32;
const CLOSED_MASK: u32 = (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;

#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
    buf: Vec<libc::epoll_event>,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Self {
            // SAFETY: epoll_create1 returned a fresh descriptor we now own.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            buf: Vec::new(),
        })
    }

    fn control(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: match interest {
                Interest::Readable => READ_INTEREST,
                Interest::ReadWrite => WRITE_INTEREST,
            },
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event))?;
        Ok(())
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Poller for Epoll {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.control(libc::EPOLL_CTL_ADD, fd, interest)
    }

    fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.control(libc::EPOLL_CTL_MOD, fd, interest)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match syscall!(epoll_ctl(
            self.fd.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            ptr::null_mut()
        )) {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.buf.clear();
        self.buf.reserve(events.capacity());

        let n = match syscall!(epoll_wait(
            self.fd.as_raw_fd(),
            self.buf.as_mut_ptr(),
            events.capacity() as libc::c_int,
            timeout_millis(timeout)
        )) {
            Ok(n) => n as usize,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        };

        // SAFETY: the kernel initialised the first `n` entries, n <= capacity.
        unsafe { self.buf.set_len(n) };

        for raw in &self.buf {
            // Copy out of the (possibly packed) struct before use.
            let flags = raw.events;
            let data = raw.u64;
            events.push(Event {
                fd: data as RawFd,
                readable: flags & libc::EPOLLIN as u32 != 0,
                writable: flags & libc::EPOLLOUT as u32 != 0,
                closed: flags & CLOSED_MASK != 0,
            });
        }
        Ok(())
    }
}
