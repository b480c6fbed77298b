pub struct Metrics {
    pub connections_total: u64,
    pub errors: u64,
    /// One entry per completed forward round-trip, in insertion order
    /// (unsorted).
    pub latency_ns: Vec<u64>,
    pub elapsed_secs: f64,
}

impl Metrics {
    pub fn p50_ns(&self) -> u64 {
        percentile(&self.latency_ns, 0.50)
    }

    pub fn p99_ns(&self) -> u64 {
        percentile(&self.latency_ns, 0.99)
    }

    pub fn error_rate(&self) -> f64 {
        if self.connections_total == 0 {
            return 0.0;
        }
        self.errors as f64 / self.connections_total as f64
    }

    pub fn throughput_cps(&self) -> f64 {
        self.connections_total as f64 / self.elapsed_secs
    }
}

/// Sort `data` ascending and return the element at index `floor(p * n)`.
/// Returns 0 for an empty slice.
fn percentile(data: &[u64], p: f64) -> u64 {
    if data.is_empty() {
        return 0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let idx = (p * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_picks_expected_element() {
        let data = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&data, 0.0), 10);
        assert_eq!(percentile(&data, 0.99), 50);
    }

    #[test]
    fn error_rate_is_zero_with_no_requests() {
        let m = Metrics { connections_total: 0, errors: 0, latency_ns: Vec::new(), elapsed_secs: 1.0 };
        assert_eq!(m.error_rate(), 0.0);
    }
}
