//! Accept dispatcher (spec §4.2): owns the client-facing listener, turns
//! each accepted socket into a worker-owned connection record bound to the
//! current primary's epoch, following the strict per-accept step order.

use std::net::TcpListener as StdTcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pg_gateway_common::{no_primary_error_frame, Candidate, ConnRecord, ConnState, RoutingState};

use crate::epoll::Side;
use crate::metrics::Metrics;
use crate::net;
use crate::worker::WorkerHandle;

/// Brief yield applied on EAGAIN/EINTR so the running flag gets polled
/// instead of busy-spinning (spec §4.2 step 1).
const ACCEPT_YIELD: Duration = Duration::from_millis(10);

pub struct AcceptDispatcher {
    listener: StdTcpListener,
    candidates: Arc<Vec<Candidate>>,
    routing: Arc<RoutingState>,
    workers: Vec<WorkerHandle>,
    metrics: Arc<Metrics>,
    tcp_keepalive: bool,
    running: Arc<AtomicBool>,
}

impl AcceptDispatcher {
    pub fn new(
        listener: StdTcpListener,
        candidates: Arc<Vec<Candidate>>,
        routing: Arc<RoutingState>,
        workers: Vec<WorkerHandle>,
        metrics: Arc<Metrics>,
        tcp_keepalive: bool,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            listener,
            candidates,
            routing,
            workers,
            metrics,
            tcp_keepalive,
            running,
        }
    }

    pub fn run(self) {
        let listener_fd = self.listener.as_raw_fd();
        while self.running.load(Ordering::Relaxed) {
            match accept_nonblocking(listener_fd) {
                Ok(Some(client_fd)) => self.handle_accept(client_fd),
                Ok(None) => std::thread::sleep(ACCEPT_YIELD),
                Err(err) => {
                    tracing::error!(error = %err, "accept failed, accept dispatcher exiting");
                    break;
                }
            }
        }
    }

    fn handle_accept(&self, client_fd: RawFd) {
        // Step 2: client socket options.
        if let Err(err) = net::apply_client_socket_opts(client_fd, self.tcp_keepalive) {
            tracing::debug!(error = %err, "failed to apply client socket options");
        }

        // Step 3: sample routing state; no primary -> synthetic error frame.
        let sample = self.routing.sample();
        let candidate = if sample.has_primary() {
            self.candidates.get(sample.primary_index as usize)
        } else {
            None
        };
        let resolved = candidate.and_then(|c| c.resolved_addr());
        let Some(resolved) = resolved else {
            self.send_no_primary_error(client_fd);
            return;
        };

        // Step 4: non-blocking connect to the backend.
        let (backend_fd, completed) = match net::connect_nonblocking(resolved.socket_addr()) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::debug!(error = %err, "backend connect failed");
                close_fd(client_fd);
                return;
            }
        };

        let worker_idx = self.pick_least_loaded();
        let initial_state = if completed { ConnState::Established } else { ConnState::Connecting };

        // Step 5: allocate the connection record, bound to the sampled epoch.
        let record = Box::new(ConnRecord::new(sample.epoch, worker_idx, initial_state));
        record.set_client_fd(client_fd);
        record.set_backend_fd(backend_fd);

        // Step 6: splice pipes, one per direction.
        let (c2b_read, c2b_write) = match net::create_splice_pipe() {
            Ok(pipe) => pipe,
            Err(err) => {
                tracing::debug!(error = %err, "failed to create client->backend pipe");
                self.teardown_partial(&record, None);
                return;
            }
        };
        record.c2b.set(c2b_read, c2b_write);

        let (b2c_read, b2c_write) = match net::create_splice_pipe() {
            Ok(pipe) => pipe,
            Err(err) => {
                tracing::debug!(error = %err, "failed to create backend->client pipe");
                self.teardown_partial(&record, None);
                return;
            }
        };
        record.b2c.set(b2c_read, b2c_write);

        // Step 7: worker already chosen above (a pure, side-effect-free read
        // of load counters, hoisted so the record can be constructed with
        // its final worker_id).
        let worker = &self.workers[worker_idx];
        let record_ptr: *const ConnRecord = record.as_ref();

        // Step 8: register both sides, edge-triggered read + hangup; the
        // backend additionally wants write-readiness while still connecting.
        if let Err(err) = worker.readiness.register(client_fd, record_ptr, Side::Client, false) {
            tracing::debug!(error = %err, "failed to register client fd");
            self.teardown_partial(&record, None);
            return;
        }
        let backend_wants_write = initial_state == ConnState::Connecting;
        if let Err(err) = worker.readiness.register(backend_fd, record_ptr, Side::Backend, backend_wants_write) {
            tracing::debug!(error = %err, "failed to register backend fd");
            self.teardown_partial(&record, Some(&worker.readiness));
            return;
        }

        // Step 9: counters, then mark registered. Must happen together.
        worker.load.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_active_connections();
        record.mark_registered();

        if worker.inbox.send(record).is_err() {
            tracing::warn!(worker = worker_idx, "worker inbox closed, dropping connection");
            return;
        }

        // Step 10: wake the worker. Best-effort; see design notes on the
        // open question about missed wakeups under pressure.
        let byte = [1u8];
        // SAFETY: wakeup_write is the worker's own pipe write end, valid for
        // the process lifetime.
        let rc = unsafe { libc::write(worker.wakeup_write, byte.as_ptr() as *const libc::c_void, 1) };
        if rc < 0 {
            tracing::debug!(worker = worker_idx, "wakeup write failed");
        }
    }

    fn pick_least_loaded(&self) -> usize {
        let mut best = 0;
        let mut best_load = usize::MAX;
        for (i, worker) in self.workers.iter().enumerate() {
            let load = worker.load.load(Ordering::Relaxed);
            if load < best_load {
                best_load = load;
                best = i;
            }
        }
        best
    }

    fn send_no_primary_error(&self, client_fd: RawFd) {
        let frame = no_primary_error_frame("no primary available");
        // SAFETY: client_fd is a valid, open socket; write is best-effort
        // per spec §6, failures are ignored.
        unsafe {
            libc::write(client_fd, frame.as_ptr() as *const libc::c_void, frame.len());
        }
        close_fd(client_fd);
    }

    /// Tear down a record that failed setup before step 9. No counters were
    /// ever incremented for it, so none are decremented here. `readiness` is
    /// `Some` iff at least one side was already registered (deregistering an
    /// unregistered fd is a harmless no-op).
    fn teardown_partial(&self, record: &ConnRecord, readiness: Option<&crate::epoll::Readiness>) {
        if !record.try_close() {
            return;
        }
        if let Some(readiness) = readiness {
            readiness.deregister(record.client_fd());
            readiness.deregister(record.backend_fd());
        }
        record.close_all_fds();
    }
}

fn close_fd(fd: RawFd) {
    // SAFETY: fd is owned by the caller at the point this is invoked and
    // not referenced elsewhere.
    unsafe {
        libc::close(fd);
    }
}

/// Non-blocking `accept4`. Returns `Ok(None)` on EAGAIN/EINTR (the caller
/// yields briefly and retries), `Err` on any other failure.
fn accept_nonblocking(listener_fd: RawFd) -> std::io::Result<Option<RawFd>> {
    // SAFETY: listener_fd is a valid, non-blocking listening socket; a null
    // sockaddr/len pair is a documented way to discard the peer address.
    let fd = unsafe { libc::accept4(listener_fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK) };
    if fd >= 0 {
        return Ok(Some(fd));
    }
    let err = std::io::Error::last_os_error();
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(None),
        _ => Err(err),
    }
}
