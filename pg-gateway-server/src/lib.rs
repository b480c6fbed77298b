//! pg-gateway: a transparent TCP load balancer for a replicated Postgres
//! cluster. `run` wires together the primary selector, the accept
//! dispatcher, the forwarder workers, and the telemetry endpoint from a
//! fully resolved `GatewayConfig`, and blocks until the running flag is
//! cleared.

pub mod accept;
pub mod cli;
pub mod config;
pub mod epoll;
pub mod metrics;
pub mod net;
pub mod selector;
pub mod shutdown;
pub mod worker;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::mpsc::Sender as StdSender;
use std::sync::Arc;

use pg_gateway_common::{GatewayError, RoutingState};

pub use config::GatewayConfig;
use metrics::Metrics;
use worker::Worker;

/// Assemble every component from `config`, install the SIGINT/SIGTERM
/// watcher, and run until shutdown. Mirrors `transdb_server::Server::run`'s
/// shape: a single entry point used by the binary's `main`.
pub fn run(config: GatewayConfig) -> ExitCode {
    let running = shutdown::new_running_flag();
    run_with(config, running, true, None)
}

/// Lower-level entry point used by both `run` and integration tests: the
/// caller supplies its own running flag and may opt out of installing
/// process-wide signal handlers (tests run many gateways per process and
/// must not race each other's SIGINT/SIGTERM watchers). If `ready` is
/// supplied, the bound client-listener address is sent on it as soon as
/// the listener is up, before any component starts serving — this lets a
/// test request an OS-assigned port (`listen_port: 0`) and learn which one
/// it actually got.
pub fn run_with(
    config: GatewayConfig,
    running: Arc<std::sync::atomic::AtomicBool>,
    install_signal_handlers: bool,
    ready: Option<StdSender<SocketAddr>>,
) -> ExitCode {
    let async_runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    let runtime_guard = async_runtime.enter();
    if install_signal_handlers {
        shutdown::spawn_signal_watcher(running.clone());
    }

    let connect_timeout = config.connect_timeout;
    let query_timeout_ms = config.query_timeout_ms;
    let check_every = config.check_every;

    let candidates = Arc::new(config.candidates);
    let routing = Arc::new(RoutingState::new());
    let metrics = Arc::new(Metrics::new(candidates.len() as u64));

    let listener = match net::bind_listener(&config.listen_addr, config.listen_port)
        .map_err(|err| GatewayError::BindFailed(format!("{}:{}", config.listen_addr, config.listen_port), err))
    {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    let metrics_listener = match net::bind_listener(&config.metrics_host, config.metrics_port)
        .map_err(|err| GatewayError::BindFailed(format!("{}:{}", config.metrics_host, config.metrics_port), err))
    {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind telemetry listener");
            return ExitCode::FAILURE;
        }
    };

    if let Some(tx) = ready {
        match listener.local_addr() {
            Ok(addr) => {
                let _ = tx.send(addr);
            }
            Err(err) => tracing::warn!(error = %err, "failed to read bound listener address"),
        }
    }

    let mut workers = Vec::with_capacity(config.num_threads);
    let mut handles = Vec::with_capacity(config.num_threads);
    for id in 0..config.num_threads {
        let (worker, handle) = match Worker::new(id, metrics.clone(), routing.clone(), running.clone()) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(error = %err, worker = id, "failed to create worker");
                return ExitCode::FAILURE;
            }
        };
        workers.push(worker);
        handles.push(handle);
    }

    let mut worker_threads = Vec::with_capacity(workers.len());
    for worker in workers {
        worker_threads.push(std::thread::spawn(move || worker.run()));
    }

    let accept_dispatcher = accept::AcceptDispatcher::new(
        listener,
        candidates.clone(),
        routing.clone(),
        handles,
        metrics.clone(),
        config.tcp_keepalive,
        running.clone(),
    );
    let accept_thread = std::thread::spawn(move || accept_dispatcher.run());

    drop(runtime_guard);
    async_runtime.block_on(async {
        let selector_running = running.clone();
        let selector = selector::Selector::new(
            candidates.clone(),
            routing.clone(),
            metrics.clone(),
            connect_timeout,
            query_timeout_ms,
            check_every,
            selector_running,
        );
        let selector_task = tokio::spawn(selector.run());

        let metrics_tokio_listener = match tokio::net::TcpListener::from_std(metrics_listener) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, "failed to adopt telemetry listener into async runtime");
                return;
            }
        };
        let telemetry_task = tokio::spawn(metrics::serve(metrics_tokio_listener, metrics.clone(), running.clone()));

        let _ = tokio::join!(selector_task, telemetry_task);
    });

    if let Err(err) = accept_thread.join() {
        tracing::error!(?err, "accept dispatcher thread panicked");
    }
    for handle in worker_threads {
        if let Err(err) = handle.join() {
            tracing::error!(?err, "worker thread panicked");
        }
    }

    ExitCode::SUCCESS
}
