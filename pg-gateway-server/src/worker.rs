//! Forwarder worker event loop (spec §4.3/§4.4): one OS thread per worker,
//! one edge-triggered epoll instance, splice-based bidirectional forwarding,
//! and a bounded, generation-tagged connection arena in place of the
//! deliberate single-record leak the source accepts (spec §9).

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use pg_gateway_common::{ConnRecord, ConnState, GatewayError, Pipe, RoutingState, SPLICE_CHUNK};

use crate::config::MAX_EVENTS_PER_WORKER;
use crate::epoll::{Event, Readiness, Side};
use crate::metrics::Metrics;
use crate::net;

const WAKEUP_TIMEOUT_MS: i32 = 1_000;

/// Everything the accept dispatcher needs to hand a freshly accepted
/// connection to a specific worker: its shared readiness set (so the
/// accept thread can register fds directly, per spec §4.2 step 8), its
/// wakeup pipe write end, the inbox that transfers record ownership, and
/// the load counter used for least-loaded placement.
pub struct WorkerHandle {
    pub readiness: Arc<Readiness>,
    pub wakeup_write: RawFd,
    pub inbox: mpsc::Sender<Box<ConnRecord>>,
    pub load: Arc<AtomicUsize>,
}

enum StepOutcome {
    Ok,
    Fatal(&'static str),
    BackendClosed,
}

/// A retained connection record plus the batch number it was torn down
/// in, if any. The record is freed only once a full subsequent batch has
/// elapsed since retirement (see `reclaim_retired`).
struct Slot {
    record: Box<ConnRecord>,
    retired_batch: Option<u64>,
}

pub struct Worker {
    id: usize,
    readiness: Arc<Readiness>,
    wakeup_read: RawFd,
    inbox: mpsc::Receiver<Box<ConnRecord>>,
    load: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
    routing: Arc<RoutingState>,
    running: Arc<AtomicBool>,
    slots: Vec<Slot>,
    batch: u64,
}

impl Worker {
    pub fn new(
        id: usize,
        metrics: Arc<Metrics>,
        routing: Arc<RoutingState>,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, WorkerHandle), GatewayError> {
        let readiness = Arc::new(Readiness::new().map_err(GatewayError::EpollInitFailed)?);
        let (wakeup_read, wakeup_write) = net::create_splice_pipe().map_err(GatewayError::PipeInitFailed)?;
        readiness.register_wakeup(wakeup_read).map_err(GatewayError::EpollInitFailed)?;

        let (tx, rx) = mpsc::channel();
        let load = Arc::new(AtomicUsize::new(0));

        let handle = WorkerHandle {
            readiness: readiness.clone(),
            wakeup_write,
            inbox: tx,
            load: load.clone(),
        };
        let worker = Self {
            id,
            readiness,
            wakeup_read,
            inbox: rx,
            load,
            metrics,
            routing,
            running,
            slots: Vec::new(),
            batch: 0,
        };
        Ok((worker, handle))
    }

    pub fn run(mut self) {
        let mut buf = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS_PER_WORKER];

        while self.running.load(Ordering::Relaxed) {
            self.reclaim_retired();

            let events = match self.readiness.wait(&mut buf, WAKEUP_TIMEOUT_MS) {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(worker = self.id, error = %err, "epoll_wait failed");
                    continue;
                }
            };
            self.batch += 1;
            let snapshot_epoch = self.routing.current_epoch();

            let mut events = events;
            for i in 0..events.len() {
                let (event, _readable, _hangup) = events[i];
                let (ptr, side) = match event {
                    Event::Wakeup => {
                        self.drain_wakeup();
                        continue;
                    }
                    Event::Conn(ptr, side) => (ptr, side),
                };
                if ptr.is_null() {
                    continue;
                }
                // SAFETY: ptr was produced from a `Box<ConnRecord>` owned by
                // `self.slots`; it is retained there until at least one full
                // batch after teardown (`reclaim_retired`), so it is always
                // valid for the lifetime of this batch's processing.
                let record: &ConnRecord = unsafe { &*ptr };
                if record.is_closed() {
                    continue;
                }

                if record.epoch() != snapshot_epoch {
                    self.teardown(record, &mut events[i + 1..]);
                    continue;
                }

                let outcome = self.forward_step(record, side);

                match outcome {
                    StepOutcome::Ok => self.rearm(record, side),
                    StepOutcome::Fatal(reason) => {
                        tracing::debug!(worker = self.id, reason, "connection torn down");
                        self.teardown(record, &mut events[i + 1..]);
                    }
                    StepOutcome::BackendClosed => {
                        tracing::warn!(worker = self.id, "backend closed unexpectedly");
                        self.teardown(record, &mut events[i + 1..]);
                    }
                }
            }
        }

        self.close_all_on_shutdown();
    }

    fn drain_wakeup(&mut self) {
        let mut byte = [0u8; 64];
        loop {
            // SAFETY: wakeup_read is this worker's own pipe read end.
            let rc = unsafe { libc::read(self.wakeup_read, byte.as_mut_ptr() as *mut libc::c_void, byte.len()) };
            if rc <= 0 {
                break;
            }
        }
        while let Ok(record) = self.inbox.try_recv() {
            self.slots.push(Slot {
                record,
                retired_batch: None,
            });
        }
    }

    /// `side` is the fd that actually fired this readiness event. The
    /// Connecting->Established check only makes sense for a backend-side
    /// event: a client-side event firing while the backend is mid-connect
    /// tells us nothing about whether `connect()` resolved, and reading
    /// `SO_ERROR` on the backend fd in that case can observe `0` (success)
    /// before the non-blocking connect has actually finished.
    fn forward_step(&self, record: &ConnRecord, side: Side) -> StepOutcome {
        if record.state() == ConnState::Connecting {
            if side != Side::Backend {
                return StepOutcome::Ok;
            }
            match net::take_socket_error(record.backend_fd()) {
                Ok(0) => record.mark_established(),
                Ok(err) if err == libc::EINPROGRESS => return StepOutcome::Ok,
                Ok(_err) => return StepOutcome::Fatal("backend connect failed"),
                Err(_) => return StepOutcome::Fatal("getsockopt(SO_ERROR) failed"),
            }
        }

        match self.step_client_to_backend(record) {
            StepOutcome::Ok => {}
            other => return other,
        }
        self.step_backend_to_client(record)
    }

    fn step_client_to_backend(&self, record: &ConnRecord) -> StepOutcome {
        match drain_socket_to_pipe(record.client_fd(), record.c2b.write_fd(), |n| self.metrics.add_bytes_c2b(n)) {
            StepOutcome::Ok => {}
            StepOutcome::BackendClosed => return StepOutcome::Fatal("client closed"),
            other => return other,
        }
        drain_pipe_to_socket(record.c2b.read_fd(), record.backend_fd())
    }

    fn step_backend_to_client(&self, record: &ConnRecord) -> StepOutcome {
        match drain_socket_to_pipe(record.backend_fd(), record.b2c.write_fd(), |n| self.metrics.add_bytes_b2c(n)) {
            StepOutcome::Ok => {}
            other => return other,
        }
        drain_pipe_to_socket(record.b2c.read_fd(), record.client_fd())
    }

    fn rearm(&self, record: &ConnRecord, _last_side: Side) {
        let connecting = record.state() == ConnState::Connecting;
        let client_wants_write = !connecting && pipe_has_residual(&record.b2c);
        let backend_wants_write = connecting || pipe_has_residual(&record.c2b);

        if let Err(err) = self.readiness.modify(record.client_fd(), record, Side::Client, client_wants_write) {
            tracing::debug!(worker = self.id, error = %err, "failed to re-arm client side");
        }
        if let Err(err) = self.readiness.modify(record.backend_fd(), record, Side::Backend, backend_wants_write) {
            tracing::debug!(worker = self.id, error = %err, "failed to re-arm backend side");
        }
    }

    /// Tear down `record` (spec §4.4). `rest_of_batch` is the remainder of
    /// the current batch, scanned to null out any later entry referencing
    /// the same record (batch-local double-handling guard).
    fn teardown(&mut self, record: &ConnRecord, rest_of_batch: &mut [(Event, bool, bool)]) {
        if !record.try_close() {
            return;
        }

        self.readiness.deregister(record.client_fd());
        self.readiness.deregister(record.backend_fd());

        let record_ptr = record as *const ConnRecord;
        for (event, _, _) in rest_of_batch.iter_mut() {
            if let Event::Conn(ptr, side) = *event {
                if ptr == record_ptr {
                    *event = Event::Conn(std::ptr::null(), side);
                }
            }
        }

        record.close_all_fds();

        if record.is_registered() {
            self.load.fetch_sub(1, Ordering::Relaxed);
            self.metrics.dec_active_connections();
        }

        let batch = self.batch;
        for slot in &mut self.slots {
            if std::ptr::eq(slot.record.as_ref(), record) {
                slot.retired_batch = Some(batch);
                break;
            }
        }
    }

    /// Free any record retired at least one full batch ago. Safe because
    /// a retired record was already deregistered from epoll (so no future
    /// `epoll_wait` reports it) and any same-batch duplicate pointers were
    /// already nulled out at retirement time.
    fn reclaim_retired(&mut self) {
        let current_batch = self.batch;
        self.slots.retain(|slot| match slot.retired_batch {
            Some(retired_at) => retired_at >= current_batch,
            None => true,
        });
    }

    fn close_all_on_shutdown(&mut self) {
        for slot in &self.slots {
            if slot.record.try_close() {
                slot.record.close_all_fds();
                if slot.record.is_registered() {
                    self.metrics.dec_active_connections();
                }
            }
        }
    }
}

fn pipe_has_residual(pipe: &Pipe) -> bool {
    net::pipe_residual(pipe.read_fd()).map(|n| n > 0).unwrap_or(false)
}

enum SpliceResult {
    Moved(usize),
    Eof,
    WouldBlock,
    Error(io::Error),
}

fn splice_once(fd_in: RawFd, fd_out: RawFd, cap: usize) -> SpliceResult {
    loop {
        // SAFETY: fd_in/fd_out are valid, open descriptors (socket or pipe
        // ends) owned by the connection record for the duration of this
        // call; off_in/off_out NULL means "use/advance the fd's own
        // position", required for both pipe ends and sockets here.
        let rc = unsafe {
            libc::splice(
                fd_in,
                std::ptr::null_mut(),
                fd_out,
                std::ptr::null_mut(),
                cap,
                libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
            )
        };
        if rc > 0 {
            return SpliceResult::Moved(rc as usize);
        }
        if rc == 0 {
            return SpliceResult::Eof;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        if err.kind() == io::ErrorKind::WouldBlock {
            return SpliceResult::WouldBlock;
        }
        return SpliceResult::Error(err);
    }
}

/// Drain `src_fd` into `pipe_write_fd` until EAGAIN, EOF, or a hard error.
/// `record_bytes` is called with each chunk's byte count as it moves.
fn drain_socket_to_pipe(src_fd: RawFd, pipe_write_fd: RawFd, record_bytes: impl Fn(u64)) -> StepOutcome {
    loop {
        match splice_once(src_fd, pipe_write_fd, SPLICE_CHUNK) {
            SpliceResult::Moved(n) => record_bytes(n as u64),
            SpliceResult::Eof => return StepOutcome::BackendClosed,
            SpliceResult::WouldBlock => return StepOutcome::Ok,
            SpliceResult::Error(_) => return StepOutcome::Fatal("splice(socket->pipe) error"),
        }
    }
}

/// Drain `pipe_read_fd` into `dst_fd` until EAGAIN or the pipe is empty.
fn drain_pipe_to_socket(pipe_read_fd: RawFd, dst_fd: RawFd) -> StepOutcome {
    loop {
        match splice_once(pipe_read_fd, dst_fd, SPLICE_CHUNK) {
            SpliceResult::Moved(_) => continue,
            SpliceResult::Eof | SpliceResult::WouldBlock => return StepOutcome::Ok,
            SpliceResult::Error(_) => return StepOutcome::Fatal("splice(pipe->socket) error"),
        }
    }
}
