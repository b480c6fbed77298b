use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel for "no file descriptor" — every fd field starts here.
pub const INVALID_FD: RawFd = -1;

/// Target capacity for each splice pipe (spec §5 resource caps).
pub const PIPE_CAPACITY: i32 = 1024 * 1024;

/// Maximum bytes moved per `splice` call (spec §4.3).
pub const SPLICE_CHUNK: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Established,
}

/// A non-blocking kernel FIFO used as the intermediate buffer for
/// zero-copy `splice` forwarding in one direction.
#[derive(Debug)]
pub struct Pipe {
    read_fd: Cell<RawFd>,
    write_fd: Cell<RawFd>,
}

impl Default for Pipe {
    fn default() -> Self {
        Self::empty()
    }
}

impl Pipe {
    pub fn empty() -> Self {
        Self {
            read_fd: Cell::new(INVALID_FD),
            write_fd: Cell::new(INVALID_FD),
        }
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd.get()
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd.get()
    }

    pub fn set(&self, read_fd: RawFd, write_fd: RawFd) {
        self.read_fd.set(read_fd);
        self.write_fd.set(write_fd);
    }

    pub fn is_allocated(&self) -> bool {
        self.read_fd.get() >= 0 && self.write_fd.get() >= 0
    }

    /// Close both ends that are still open and reset them to -1. Safe to
    /// call more than once.
    fn close(&self) {
        close_if_open(&self.read_fd);
        close_if_open(&self.write_fd);
    }
}

fn close_if_open(cell: &Cell<RawFd>) {
    let fd = cell.get();
    if fd >= 0 {
        // SAFETY: fd is a value we previously obtained from pipe2(2)/socket
        // creation and have not closed yet (guarded by resetting to -1
        // immediately below, under the record's exactly-once close guard).
        unsafe {
            libc::close(fd);
        }
        cell.set(INVALID_FD);
    }
}

/// One client<->backend connection, exclusively owned by a single worker
/// once the accept dispatcher hands it off. Allocated on the heap and
/// referenced by raw pointer from epoll user data; see `pg-gateway-server`'s
/// worker module for the arena that owns these allocations and the
/// deferred-reclamation policy described in spec §4.4 / §9.
pub struct ConnRecord {
    client_fd: Cell<RawFd>,
    backend_fd: Cell<RawFd>,
    /// client -> backend pipe.
    pub c2b: Pipe,
    /// backend -> client pipe.
    pub b2c: Pipe,
    epoch: u64,
    state: Cell<ConnState>,
    closed: AtomicBool,
    registered: AtomicBool,
    /// Index of the owning worker; stamped at allocation, never changes.
    pub worker_id: usize,
}

impl ConnRecord {
    pub fn new(epoch: u64, worker_id: usize, initial_state: ConnState) -> Self {
        Self {
            client_fd: Cell::new(INVALID_FD),
            backend_fd: Cell::new(INVALID_FD),
            c2b: Pipe::empty(),
            b2c: Pipe::empty(),
            epoch,
            state: Cell::new(initial_state),
            closed: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            worker_id,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// One-way transition out of Connecting; spec §3 invariant: Connecting
    /// only ever moves to Established (here) or to teardown (never back).
    pub fn mark_established(&self) {
        self.state.set(ConnState::Established);
    }

    pub fn client_fd(&self) -> RawFd {
        self.client_fd.get()
    }

    pub fn backend_fd(&self) -> RawFd {
        self.backend_fd.get()
    }

    pub fn set_client_fd(&self, fd: RawFd) {
        self.client_fd.set(fd);
    }

    pub fn set_backend_fd(&self, fd: RawFd) {
        self.backend_fd.set(fd);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    /// Mark that this record's counters have been incremented (accept step
    /// 9). Must happen together with the counter increments themselves so
    /// teardown's decrement-iff-registered can never underflow.
    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Relaxed);
    }

    /// Exactly-once close guard: atomically flips `closed` from false to
    /// true. Returns `true` if this call is the one that won the race (and
    /// must perform the actual teardown), `false` if the record was
    /// already closed.
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close all six file descriptors that are currently open. Idempotent.
    /// Does not check or flip the `closed` guard — callers must have
    /// already won `try_close`.
    pub fn close_all_fds(&self) {
        close_if_open(&self.client_fd);
        close_if_open(&self.backend_fd);
        self.c2b.close();
        self.b2c.close();
    }
}

// ConnRecord is handed off from the accept thread to exactly one worker
// thread and never touched concurrently afterwards; the `closed` guard is
// the only field that can race (batch-local double handling or an
// in-flight accept-path failure), and it is atomic.
unsafe impl Send for ConnRecord {}
unsafe impl Sync for ConnRecord {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_has_no_fds_and_is_unregistered() {
        let rec = ConnRecord::new(1, 0, ConnState::Connecting);
        assert_eq!(rec.client_fd(), INVALID_FD);
        assert_eq!(rec.backend_fd(), INVALID_FD);
        assert!(!rec.c2b.is_allocated());
        assert!(!rec.is_registered());
        assert!(!rec.is_closed());
    }

    #[test]
    fn try_close_is_exactly_once() {
        let rec = ConnRecord::new(1, 0, ConnState::Established);
        assert!(rec.try_close());
        assert!(rec.is_closed());
        // A second caller (e.g. batch-local double handling) loses the race.
        assert!(!rec.try_close());
    }

    #[test]
    fn connecting_transitions_one_way_to_established() {
        let rec = ConnRecord::new(1, 0, ConnState::Connecting);
        assert_eq!(rec.state(), ConnState::Connecting);
        rec.mark_established();
        assert_eq!(rec.state(), ConnState::Established);
    }

    #[test]
    fn registered_flag_gates_decrement_logic() {
        let rec = ConnRecord::new(1, 0, ConnState::Connecting);
        assert!(!rec.is_registered());
        rec.mark_registered();
        assert!(rec.is_registered());
    }
}
