//! Thin wrapper around `epoll(7)` — one instance per forwarder worker, used
//! as its "readiness set" (spec §2 component 4 / §4.3). Edge-triggered
//! throughout; every registration implicitly requests `EPOLLET | EPOLLRDHUP`.

use std::io;
use std::os::unix::io::RawFd;

use pg_gateway_common::ConnRecord;

/// Which side of a connection an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

/// A decoded epoll event: either the worker's wakeup pipe, or one side of
/// an owned connection.
#[derive(Clone, Copy)]
pub enum Event {
    Wakeup,
    Conn(*const ConnRecord, Side),
}

pub struct Readiness {
    epfd: RawFd,
}

impl Readiness {
    pub fn new() -> io::Result<Self> {
        // SAFETY: epoll_create1 has no preconditions beyond a valid flags
        // argument.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    /// Register the wakeup pipe's read end with the sentinel (null)
    /// user-data tag.
    pub fn register_wakeup(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, read_mask(false), 0)
    }

    pub fn register(&self, fd: RawFd, record: *const ConnRecord, side: Side, want_write: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, read_mask(want_write), encode(record, side))
    }

    pub fn modify(&self, fd: RawFd, record: *const ConnRecord, side: Side, want_write: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, read_mask(want_write), encode(record, side))
    }

    /// Best-effort deregistration; ignores errors since teardown may race
    /// with the fd already having been closed.
    pub fn deregister(&self, fd: RawFd) {
        // SAFETY: epoll_ctl tolerates a dangling/closed fd by returning an
        // error (ENOENT/EBADF), which we intentionally ignore here.
        unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events_mask: u32, user_data: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: events_mask,
            u64: user_data,
        };
        // SAFETY: `ev` is a valid, fully-initialized epoll_event; fd is a
        // caller-owned, open descriptor.
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block for up to `timeout_ms` waiting for readiness, decoding each
    /// raw event into an `Event`.
    pub fn wait(&self, buf: &mut [libc::epoll_event], timeout_ms: i32) -> io::Result<Vec<(Event, bool, bool)>> {
        // SAFETY: buf is a valid, writable epoll_event array of buf.len().
        let n = unsafe { libc::epoll_wait(self.epfd, buf.as_mut_ptr(), buf.len() as i32, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        let mut out = Vec::with_capacity(n as usize);
        for ev in &buf[..n as usize] {
            let readable = ev.events & (libc::EPOLLIN as u32) != 0;
            let hangup = ev.events & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0;
            out.push((decode(ev.u64), readable, hangup));
        }
        Ok(out)
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        // SAFETY: epfd was created by epoll_create1 in `new` and is owned
        // by this struct exclusively.
        unsafe {
            libc::close(self.epfd);
        }
    }
}

fn read_mask(want_write: bool) -> u32 {
    let mut mask = (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLET) as u32;
    if want_write {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

/// Connection record pointers are at least 2-byte aligned (the struct's
/// largest field is `u64`), so the low bit is free to tag which side of
/// the connection an event belongs to.
fn encode(record: *const ConnRecord, side: Side) -> u64 {
    let tag = match side {
        Side::Client => 0u64,
        Side::Backend => 1u64,
    };
    (record as u64) | tag
}

fn decode(user_data: u64) -> Event {
    if user_data == 0 {
        return Event::Wakeup;
    }
    let side = if user_data & 1 == 1 { Side::Backend } else { Side::Client };
    let ptr = (user_data & !1u64) as *const ConnRecord;
    Event::Conn(ptr, side)
}
