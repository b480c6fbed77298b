//! Primary Selector (spec §4.1): polls every candidate on a fixed cadence,
//! classifies it Primary / Replica / Unhealthy, and publishes the winning
//! index + epoch into the shared `RoutingState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pg_gateway_common::{Candidate, RoutingState, NO_PRIMARY};
use tokio_postgres::NoTls;

use crate::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    Primary,
    Replica,
    PrimaryNotUsed,
    Unhealthy(String),
}

pub struct Selector {
    candidates: Arc<Vec<Candidate>>,
    routing: Arc<RoutingState>,
    metrics: Arc<Metrics>,
    connect_timeout: Duration,
    query_timeout_ms: u64,
    check_every: Duration,
    running: Arc<AtomicBool>,
}

impl Selector {
    pub fn new(
        candidates: Arc<Vec<Candidate>>,
        routing: Arc<RoutingState>,
        metrics: Arc<Metrics>,
        connect_timeout: Duration,
        query_timeout_ms: u64,
        check_every: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            candidates,
            routing,
            metrics,
            connect_timeout,
            query_timeout_ms,
            check_every,
            running,
        }
    }

    pub async fn run(self) {
        while self.running.load(Ordering::Relaxed) {
            self.scan_once().await;
            tokio::time::sleep(self.check_every).await;
        }
    }

    async fn scan_once(&self) {
        let mut raw = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates.iter() {
            raw.push(self.probe_one(candidate).await);
        }
        let (classifications, found_primary) = resolve_split_brain(raw);

        let healthy = classifications
            .iter()
            .filter(|c| matches!(c, Classification::Primary | Classification::Replica | Classification::PrimaryNotUsed))
            .count() as u64;
        let unhealthy = classifications.len() as u64 - healthy;
        self.metrics.set_server_health(healthy, unhealthy);

        let new_index = found_primary.map(|i| i as i64).unwrap_or(NO_PRIMARY);
        if let Some(new_epoch) = self.routing.publish_if_changed(new_index) {
            match found_primary {
                Some(i) => tracing::info!(
                    epoch = new_epoch,
                    primary = %self.candidates[i].display_addr(),
                    "primary changed"
                ),
                None => tracing::info!(epoch = new_epoch, "no primary available"),
            }
            for (i, c) in classifications.iter().enumerate() {
                tracing::info!(
                    candidate = %self.candidates[i].display_addr(),
                    classification = ?c,
                    "candidate classification"
                );
            }
        }
    }

    async fn probe_one(&self, candidate: &Candidate) -> Classification {
        let mut client = {
            let mut guard = candidate.probe.lock().expect("candidate lock poisoned");
            guard.take()
        };

        if client.is_none() {
            match self.open_probe(candidate).await {
                Ok(fresh) => client = Some(fresh),
                Err(err) => {
                    tracing::debug!(candidate = %candidate.display_addr(), error = %err, "probe connect failed");
                    return Classification::Unhealthy(err);
                }
            }
        }

        let result = match &client {
            Some(c) => {
                tokio::time::timeout(
                    Duration::from_millis(self.query_timeout_ms.max(1)),
                    c.query_one("SELECT pg_is_in_recovery()", &[]),
                )
                .await
            }
            None => unreachable!(),
        };

        match result {
            Ok(Ok(row)) => {
                let read_only: bool = row.get(0);
                // Probe succeeded: keep the channel open for next cycle.
                *candidate.probe.lock().expect("candidate lock poisoned") = client;
                if read_only {
                    Classification::Replica
                } else {
                    Classification::Primary
                }
            }
            Ok(Err(err)) => Classification::Unhealthy(err.to_string()),
            Err(_) => Classification::Unhealthy("statement timeout".to_string()),
        }
    }

    async fn open_probe(&self, candidate: &Candidate) -> Result<tokio_postgres::Client, String> {
        let host_port = format!("{}:{}", candidate.host, candidate.port);
        let resolved = tokio::time::timeout(self.connect_timeout, tokio::net::lookup_host(&host_port))
            .await
            .map_err(|_| "DNS resolution timed out".to_string())?
            .map_err(|e| format!("DNS resolution failed: {e}"))?
            .next()
            .ok_or_else(|| "DNS resolution returned no addresses".to_string())?;
        *candidate.resolved.write().expect("candidate lock poisoned") =
            Some(pg_gateway_common::ResolvedAddr::new(resolved));

        let (client, connection) = tokio::time::timeout(
            self.connect_timeout,
            tokio_postgres::connect(&candidate.probe_conninfo, NoTls),
        )
        .await
        .map_err(|_| "connect timed out".to_string())?
        .map_err(|e| e.to_string())?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, "probe connection driver exited");
            }
        });

        client
            .batch_execute(&format!("SET statement_timeout = {}", self.query_timeout_ms))
            .await
            .map_err(|e| e.to_string())?;

        Ok(client)
    }
}

/// Resolve one scan's raw per-candidate classifications against each other:
/// the first `Primary` found (in candidate order) wins and is returned as
/// the elected index; any later `Primary` is downgraded to
/// `PrimaryNotUsed` (spec §4.1 split-brain handling).
fn resolve_split_brain(raw: Vec<Classification>) -> (Vec<Classification>, Option<usize>) {
    let mut classifications = Vec::with_capacity(raw.len());
    let mut found_primary: Option<usize> = None;

    for (i, classification) in raw.into_iter().enumerate() {
        if classification == Classification::Primary {
            if found_primary.is_some() {
                classifications.push(Classification::PrimaryNotUsed);
                continue;
            }
            found_primary = Some(i);
        }
        classifications.push(classification);
    }

    (classifications, found_primary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_primary_is_elected() {
        let raw = vec![Classification::Replica, Classification::Primary, Classification::Replica];
        let (classifications, found) = resolve_split_brain(raw);
        assert_eq!(found, Some(1));
        assert_eq!(classifications[1], Classification::Primary);
    }

    #[test]
    fn second_same_scan_primary_is_tagged_primary_not_used() {
        let raw = vec![Classification::Primary, Classification::Primary];
        let (classifications, found) = resolve_split_brain(raw);
        assert_eq!(found, Some(0));
        assert_eq!(classifications[0], Classification::Primary);
        assert_eq!(classifications[1], Classification::PrimaryNotUsed);
    }

    #[test]
    fn three_way_split_brain_only_first_stays_primary() {
        let raw = vec![Classification::Primary, Classification::Replica, Classification::Primary, Classification::Primary];
        let (classifications, found) = resolve_split_brain(raw);
        assert_eq!(found, Some(0));
        assert_eq!(classifications[0], Classification::Primary);
        assert_eq!(classifications[1], Classification::Replica);
        assert_eq!(classifications[2], Classification::PrimaryNotUsed);
        assert_eq!(classifications[3], Classification::PrimaryNotUsed);
    }

    #[test]
    fn no_primary_is_none() {
        let raw = vec![Classification::Replica, Classification::Unhealthy("timeout".to_string())];
        let (_, found) = resolve_split_brain(raw);
        assert_eq!(found, None);
    }
}
