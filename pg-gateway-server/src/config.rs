use std::time::Duration;

use pg_gateway_common::{Candidate, GatewayError};

use crate::cli::Args;

/// Listener backlog (spec §5 resource caps).
pub const LISTEN_BACKLOG: i32 = 4096;

/// Readiness set size per worker (spec §5 resource caps).
pub const MAX_EVENTS_PER_WORKER: usize = 4096;

/// Fully resolved, validated configuration assembled once at startup and
/// shared (via `Arc`) by every component: the selector, the accept
/// dispatcher, every worker, and the telemetry endpoint.
pub struct GatewayConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub candidates: Vec<Candidate>,
    pub connect_timeout: Duration,
    pub query_timeout_ms: u64,
    pub check_every: Duration,
    pub num_threads: usize,
    pub tcp_keepalive: bool,
    pub metrics_host: String,
    pub metrics_port: u16,
}

impl GatewayConfig {
    pub fn from_args(args: &Args) -> Result<Self, GatewayError> {
        let listen_addr = args.resolved_listen_addr();
        let listen_port = args
            .resolved_listen_port()
            .map_err(GatewayError::InvalidListenPort)?;

        let pg_password = std::env::var("PGPASSWORD").ok();
        let candidates = parse_candidates(&args.candidates, &args.pg_database, &args.pg_user, pg_password.as_deref())?;

        let num_threads = args.num_threads.clamp(1, 64) as usize;
        if !(1..=64).contains(&args.num_threads) {
            tracing::warn!(
                requested = args.num_threads,
                clamped = num_threads,
                "NUM_THREADS out of range, clamping"
            );
        }

        Ok(Self {
            listen_addr,
            listen_port,
            candidates,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            query_timeout_ms: args.query_timeout_ms,
            check_every: Duration::from_secs(args.check_every),
            num_threads,
            tcp_keepalive: args.tcp_keepalive != 0,
            metrics_host: args.metrics_host.clone(),
            metrics_port: args.metrics_port,
        })
    }
}

/// Parse the `CANDIDATES` env value: comma-separated `host:port` entries,
/// leading spaces per element trimmed, malformed entries abort startup.
fn parse_candidates(
    raw: &str,
    pg_database: &str,
    pg_user: &str,
    pg_password: Option<&str>,
) -> Result<Vec<Candidate>, GatewayError> {
    if raw.trim().is_empty() {
        return Err(GatewayError::MissingCandidates);
    }

    raw.split(',')
        .map(|entry| {
            let trimmed = entry.trim_start();
            let (host, port_str) = trimmed
                .rsplit_once(':')
                .ok_or_else(|| GatewayError::InvalidCandidate(trimmed.to_string()))?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| GatewayError::InvalidCandidate(trimmed.to_string()))?;
            if host.is_empty() {
                return Err(GatewayError::InvalidCandidate(trimmed.to_string()));
            }
            let mut conninfo = format!("host={host} port={port} dbname={pg_database} user={pg_user}");
            if let Some(password) = pg_password {
                conninfo.push_str(&format!(" password={password}"));
            }
            Ok(Candidate::new(host.to_string(), port, conninfo))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_trimmed_candidates() {
        let candidates = parse_candidates(" db1:5432, db2:5433 ", "postgres", "postgres", None).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].host, "db1");
        assert_eq!(candidates[0].port, 5432);
        assert_eq!(candidates[1].host, "db2");
        assert_eq!(candidates[1].port, 5433);
    }

    #[test]
    fn rejects_empty_candidates() {
        assert!(matches!(
            parse_candidates("", "postgres", "postgres", None),
            Err(GatewayError::MissingCandidates)
        ));
    }

    #[test]
    fn rejects_malformed_entry() {
        let err = parse_candidates("db1", "postgres", "postgres", None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCandidate(_)));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = parse_candidates("db1:abc", "postgres", "postgres", None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCandidate(_)));
    }

    #[test]
    fn conninfo_includes_user_and_omits_password_when_unset() {
        let candidates = parse_candidates("db1:5432", "postgres", "app_user", None).unwrap();
        assert_eq!(candidates[0].probe_conninfo, "host=db1 port=5432 dbname=postgres user=app_user");
    }

    #[test]
    fn conninfo_includes_password_when_set() {
        let candidates = parse_candidates("db1:5432", "postgres", "app_user", Some("secret")).unwrap();
        assert_eq!(
            candidates[0].probe_conninfo,
            "host=db1 port=5432 dbname=postgres user=app_user password=secret"
        );
    }
}
