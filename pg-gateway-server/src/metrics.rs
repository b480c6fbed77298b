//! Process-wide atomic counters (spec §2 component 5) and the tiny
//! telemetry HTTP responder (spec §6).

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Default)]
pub struct Metrics {
    active_connections: AtomicU64,
    connections_total: AtomicU64,
    bytes_c2b: AtomicU64,
    bytes_b2c: AtomicU64,
    servers_total: AtomicU64,
    servers_healthy: AtomicU64,
    servers_unhealthy: AtomicU64,
}

impl Metrics {
    pub fn new(servers_total: u64) -> Self {
        Self {
            servers_total: AtomicU64::new(servers_total),
            ..Default::default()
        }
    }

    pub fn inc_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn add_bytes_c2b(&self, n: u64) {
        self.bytes_c2b.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_b2c(&self, n: u64) {
        self.bytes_b2c.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_server_health(&self, healthy: u64, unhealthy: u64) {
        self.servers_healthy.store(healthy, Ordering::Relaxed);
        self.servers_unhealthy.store(unhealthy, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP pg_gateway_active_connections Currently open client connections.");
        let _ = writeln!(out, "# TYPE pg_gateway_active_connections gauge");
        let _ = writeln!(out, "pg_gateway_active_connections {}", self.active_connections.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_connections_total Total client connections accepted.");
        let _ = writeln!(out, "# TYPE pg_gateway_connections_total counter");
        let _ = writeln!(out, "pg_gateway_connections_total {}", self.connections_total.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_bytes_client_to_backend_total Bytes forwarded client to backend.");
        let _ = writeln!(out, "# TYPE pg_gateway_bytes_client_to_backend_total counter");
        let _ = writeln!(out, "pg_gateway_bytes_client_to_backend_total {}", self.bytes_c2b.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_bytes_backend_to_client_total Bytes forwarded backend to client.");
        let _ = writeln!(out, "# TYPE pg_gateway_bytes_backend_to_client_total counter");
        let _ = writeln!(out, "pg_gateway_bytes_backend_to_client_total {}", self.bytes_b2c.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_servers_total Configured candidate backends.");
        let _ = writeln!(out, "# TYPE pg_gateway_servers_total gauge");
        let _ = writeln!(out, "pg_gateway_servers_total {}", self.servers_total.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_servers_healthy Candidates currently classified healthy.");
        let _ = writeln!(out, "# TYPE pg_gateway_servers_healthy gauge");
        let _ = writeln!(out, "pg_gateway_servers_healthy {}", self.servers_healthy.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP pg_gateway_servers_unhealthy Candidates currently classified unhealthy.");
        let _ = writeln!(out, "# TYPE pg_gateway_servers_unhealthy gauge");
        let _ = writeln!(out, "pg_gateway_servers_unhealthy {}", self.servers_unhealthy.load(Ordering::Relaxed));
        out
    }
}

/// Serve the telemetry endpoint until `running` is cleared. One request
/// per connection; any path other than `/metrics` or `/` gets a 404.
pub async fn serve(
    listener: TcpListener,
    metrics: std::sync::Arc<Metrics>,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        let (mut stream, _) = match tokio::time::timeout(std::time::Duration::from_millis(500), listener.accept()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "metrics accept failed");
                continue;
            }
            Err(_) => continue,
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            let request = &buf[..n];

            let response = if request.starts_with(b"GET /metrics ") || request.starts_with(b"GET / ") {
                let body = metrics.render();
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
            };

            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_connections_round_trip_counters() {
        let m = Metrics::new(2);
        m.inc_active_connections();
        m.inc_active_connections();
        assert_eq!(m.active_connections(), 2);
        m.dec_active_connections();
        assert_eq!(m.active_connections(), 1);
    }

    #[test]
    fn render_contains_expected_metric_names() {
        let m = Metrics::new(2);
        m.inc_active_connections();
        m.add_bytes_c2b(1024);
        m.add_bytes_b2c(2048);
        for _ in 0..9 {
            m.inc_active_connections();
        }
        let body = m.render();
        assert!(body.contains("pg_gateway_connections_total 10"));
        assert!(body.contains("pg_gateway_bytes_client_to_backend_total 1024"));
        assert!(body.contains("pg_gateway_bytes_backend_to_client_total 2048"));
    }
}
