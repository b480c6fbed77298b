use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use pg_gateway_common::{Candidate, ResolvedAddr, RoutingState};
use pg_gateway_server::accept::AcceptDispatcher;
use pg_gateway_server::metrics::Metrics;
use pg_gateway_server::worker::Worker;

/// A backend that writes a single identity byte on accept, then echoes
/// everything it reads until the connection closes. `identity` lets a
/// client confirm which candidate it actually landed on.
fn spawn_identity_echo_backend(identity: u8) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stress backend");
    let addr = listener.local_addr().expect("backend local_addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            thread::spawn(move || {
                if stream.write_all(&[identity]).is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A live forwarding engine (accept dispatcher + N workers) plus the
/// identity-echo candidates behind it, with every identity byte recorded so
/// the driver can tell which backend a given connection was routed to.
pub struct Cluster {
    pub listen_addr: SocketAddr,
    pub routing: Arc<RoutingState>,
    pub metrics: Arc<Metrics>,
    pub candidate_identities: Vec<u8>,
    pub worker_loads: Vec<Arc<AtomicUsize>>,
    running: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,
    worker_threads: Vec<thread::JoinHandle<()>>,
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.accept_thread.take() {
            t.join().ok();
        }
        for t in self.worker_threads.drain(..) {
            t.join().ok();
        }
    }
}

impl Cluster {
    /// Spawn `num_candidates` identity-echo backends and a forwarding
    /// engine with `num_workers` workers in front of them. The first
    /// candidate (index 0) is published as primary immediately.
    pub fn build_and_spawn(num_candidates: usize, num_workers: usize) -> Self {
        let mut candidates = Vec::with_capacity(num_candidates);
        let mut candidate_identities = Vec::with_capacity(num_candidates);
        for i in 0..num_candidates {
            let identity = b'A' + i as u8;
            let addr = spawn_identity_echo_backend(identity);
            let candidate = Candidate::new(addr.ip().to_string(), addr.port(), format!("host={} port={} dbname=stress", addr.ip(), addr.port()));
            *candidate.resolved.write().expect("candidate lock poisoned") = Some(ResolvedAddr::new(addr));
            candidates.push(candidate);
            candidate_identities.push(identity);
        }

        let candidates = Arc::new(candidates);
        let routing = Arc::new(RoutingState::new());
        let metrics = Arc::new(Metrics::new(candidates.len() as u64));
        let running = Arc::new(AtomicBool::new(true));

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stress listener");
        listener.set_nonblocking(true).expect("set listener nonblocking");
        let listen_addr = listener.local_addr().expect("listener local_addr");

        let mut workers = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        let mut worker_loads = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let (worker, handle) = Worker::new(id, metrics.clone(), routing.clone(), running.clone()).expect("create worker");
            worker_loads.push(handle.load.clone());
            workers.push(worker);
            handles.push(handle);
        }
        let worker_threads = workers.into_iter().map(|w| thread::spawn(move || w.run())).collect();

        let dispatcher = AcceptDispatcher::new(listener, candidates, routing.clone(), handles, metrics.clone(), true, running.clone());
        let accept_thread = thread::spawn(move || dispatcher.run());

        if !candidate_identities.is_empty() {
            routing.publish_if_changed(0);
        }

        Cluster {
            listen_addr,
            routing,
            metrics,
            candidate_identities,
            worker_loads,
            running,
            accept_thread: Some(accept_thread),
            worker_threads,
        }
    }

    /// Cut the primary over to candidate `index`, returning the epoch that
    /// was just published (or the current one if `index` was already
    /// primary).
    pub fn cut_over_to(&self, index: usize) -> u64 {
        self.routing.publish_if_changed(index as i64);
        self.routing.current_epoch()
    }
}

/// Open a connection to the cluster and read back the backend's identity
/// byte, with a bounded wait so a stalled dispatcher fails the driver loop
/// instead of hanging it forever.
pub fn connect_and_read_identity(addr: SocketAddr) -> std::io::Result<(TcpStream, u8)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(2)))?;
    let mut identity = [0u8; 1];
    stream.read_exact(&mut identity)?;
    Ok((stream, identity[0]))
}
