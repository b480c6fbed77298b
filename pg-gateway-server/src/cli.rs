use clap::Parser;

/// pg-gateway: a transparent TCP load balancer for a replicated Postgres
/// cluster. Routes every accepted connection to the current primary and
/// tears down connections left over from a previous primary.
#[derive(Parser, Debug)]
#[command(name = "pg-gateway")]
pub struct Args {
    /// Address to listen on. Falls back to LISTEN_HOST (default "localhost")
    /// when omitted.
    pub listen_addr: Option<String>,

    /// Port to listen on. Falls back to LISTEN_PORT (default "5432") when
    /// omitted.
    pub listen_port: Option<u16>,

    /// Comma-separated list of candidate backends, e.g. "db1:5432,db2:5432".
    #[arg(long, env = "CANDIDATES")]
    pub candidates: String,

    /// Database used for probe connections.
    #[arg(long, env = "PGDATABASE", default_value = "postgres")]
    pub pg_database: String,

    /// User used for probe connections. `PGPASSWORD`, if set, is read
    /// directly from the environment (not a flag, so it never shows up in
    /// a process listing) and appended to the probe conninfo.
    #[arg(long, env = "PGUSER", default_value = "postgres")]
    pub pg_user: String,

    /// Timeout for opening a probe connection, in milliseconds.
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 800)]
    pub connect_timeout_ms: u64,

    /// Statement timeout applied to fresh probe connections, in
    /// milliseconds.
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value_t = 500)]
    pub query_timeout_ms: u64,

    /// Seconds between primary-selector scan cycles.
    #[arg(long, env = "CHECK_EVERY", default_value_t = 2)]
    pub check_every: u64,

    /// Number of forwarder worker threads (clamped to [1, 64]).
    #[arg(long, env = "NUM_THREADS", default_value_t = 1)]
    pub num_threads: i64,

    /// TCP keepalive toggle; set to "0" to disable.
    #[arg(long, env = "TCP_KEEPALIVE", default_value_t = 1)]
    pub tcp_keepalive: i64,

    /// Address the telemetry endpoint listens on.
    #[arg(long, env = "METRICS_HOST", default_value = "::")]
    pub metrics_host: String,

    /// Port the telemetry endpoint listens on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,
}

impl Args {
    pub fn resolved_listen_addr(&self) -> String {
        self.listen_addr.clone().unwrap_or_else(|| {
            std::env::var("LISTEN_HOST").unwrap_or_else(|_| "localhost".to_string())
        })
    }

    pub fn resolved_listen_port(&self) -> Result<u16, String> {
        if let Some(port) = self.listen_port {
            return Ok(port);
        }
        let raw = std::env::var("LISTEN_PORT").unwrap_or_else(|_| "5432".to_string());
        raw.parse::<u16>()
            .map_err(|_| format!("LISTEN_PORT is not a valid port: {raw:?}"))
    }
}
