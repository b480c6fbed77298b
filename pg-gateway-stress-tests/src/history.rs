/// A single forwarding round driven by the workload worker: a connection
/// was opened, the identity byte it landed on was read back, and round-trip
/// bytes were exchanged.
pub struct ForwardSample {
    pub expected_identity: u8,
    pub actual_identity: u8,
    pub round_trip_ns: u64,
}

/// A primary cut-over the workload worker triggered itself, with the time
/// from publishing the new epoch to a pre-existing connection bound to the
/// old epoch observing EOF.
pub struct CutoverSample {
    pub latency_ns: u64,
}

#[derive(Default)]
pub struct History {
    pub forwards: Vec<ForwardSample>,
    pub cutovers: Vec<CutoverSample>,
}

pub enum ViolationKind {
    /// A connection echoed an identity byte different from the candidate
    /// the driver resolved it against — the dispatcher routed it to the
    /// wrong backend.
    Misrouted { expected: u8, actual: u8 },
    /// A stale-epoch connection was not torn down within the configured
    /// cut-over budget.
    CutoverTooSlow { latency_ns: u64, limit_ns: u64 },
    /// One worker's final load diverged from the mean by more than the
    /// configured ratio — least-loaded placement is not actually spreading
    /// load evenly.
    PlacementSkew { worker: usize, load: usize, mean: f64, ratio: f64 },
}

pub struct Violation {
    pub kind: ViolationKind,
}

impl History {
    /// Check every recorded sample against the configured budgets. Returns
    /// one `Violation` per inconsistency found; an empty result means the
    /// run was clean.
    pub fn check_correctness(&self, max_cutover_ns: u64, placement_loads: &[usize], max_skew_ratio: f64) -> Vec<Violation> {
        let mut violations = Vec::new();

        for sample in &self.forwards {
            if sample.actual_identity != sample.expected_identity {
                violations.push(Violation {
                    kind: ViolationKind::Misrouted {
                        expected: sample.expected_identity,
                        actual: sample.actual_identity,
                    },
                });
            }
        }

        for sample in &self.cutovers {
            if sample.latency_ns > max_cutover_ns {
                violations.push(Violation {
                    kind: ViolationKind::CutoverTooSlow { latency_ns: sample.latency_ns, limit_ns: max_cutover_ns },
                });
            }
        }

        violations.extend(check_placement_skew(placement_loads, max_skew_ratio));
        violations
    }
}

/// A worker's load is skewed if it diverges from the mean by more than
/// `max_skew_ratio` of the mean (e.g. 0.5 allows +/-50%). Workers with a
/// mean load under 1 are ignored — ratios are meaningless at that scale.
fn check_placement_skew(loads: &[usize], max_skew_ratio: f64) -> Vec<Violation> {
    if loads.is_empty() {
        return Vec::new();
    }
    let mean = loads.iter().sum::<usize>() as f64 / loads.len() as f64;
    if mean < 1.0 {
        return Vec::new();
    }
    loads
        .iter()
        .enumerate()
        .filter_map(|(worker, &load)| {
            let deviation = (load as f64 - mean).abs() / mean;
            if deviation > max_skew_ratio {
                Some(Violation {
                    kind: ViolationKind::PlacementSkew { worker, load, mean, ratio: deviation },
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_loads_produce_no_skew_violations() {
        let violations = check_placement_skew(&[10, 10, 9, 11], 0.3);
        assert!(violations.is_empty());
    }

    #[test]
    fn lopsided_loads_are_flagged() {
        let violations = check_placement_skew(&[1, 1, 1, 20], 0.3);
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0].kind, ViolationKind::PlacementSkew { worker: 3, .. }));
    }

    #[test]
    fn misrouted_connection_is_a_violation() {
        let history = History {
            forwards: vec![ForwardSample { expected_identity: b'A', actual_identity: b'B', round_trip_ns: 0 }],
            cutovers: Vec::new(),
        };
        let violations = history.check_correctness(u64::MAX, &[], 1.0);
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0].kind, ViolationKind::Misrouted { expected: b'A', actual: b'B' }));
    }

    #[test]
    fn cutover_within_budget_is_not_a_violation() {
        let history = History {
            forwards: Vec::new(),
            cutovers: vec![CutoverSample { latency_ns: 500 }],
        };
        assert!(history.check_correctness(1_000, &[], 1.0).is_empty());
    }
}
