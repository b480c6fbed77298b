//! Process-wide running flag (spec §5 Cancellation/shutdown) cleared on
//! SIGINT/SIGTERM. No component blocks on it directly; each polls it at its
//! own natural wakeup point (accept loop iteration, worker readiness wait
//! return, selector cycle boundary).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn new_running_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(true))
}

/// Spawn a task that clears `running` on SIGINT or SIGTERM.
pub fn spawn_signal_watcher(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    running.store(false, Ordering::Relaxed);
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received");
        running.store(false, Ordering::Relaxed);
    });
}
