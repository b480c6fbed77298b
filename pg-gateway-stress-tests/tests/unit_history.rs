use pg_gateway_stress_tests::history::{CutoverSample, ForwardSample, History, ViolationKind};

#[test]
fn test_no_violations_when_routing_and_timing_are_clean() {
    let history = History {
        forwards: vec![ForwardSample { expected_identity: b'A', actual_identity: b'A', round_trip_ns: 500 }],
        cutovers: vec![CutoverSample { latency_ns: 500 }],
    };
    assert!(history.check_correctness(1_000, &[10, 10], 0.5).is_empty());
}

#[test]
fn test_empty_history_has_no_violations() {
    assert!(History::default().check_correctness(1_000, &[], 0.5).is_empty());
}

#[test]
fn test_misrouted_connection_is_flagged() {
    let history = History {
        forwards: vec![ForwardSample { expected_identity: b'A', actual_identity: b'B', round_trip_ns: 0 }],
        cutovers: Vec::new(),
    };
    let v = history.check_correctness(u64::MAX, &[], 1.0);
    assert_eq!(v.len(), 1);
    assert!(matches!(v[0].kind, ViolationKind::Misrouted { expected: b'A', actual: b'B' }));
}

#[test]
fn test_cutover_over_budget_is_flagged() {
    let history = History {
        forwards: Vec::new(),
        cutovers: vec![CutoverSample { latency_ns: 2_000 }],
    };
    let v = history.check_correctness(1_000, &[], 1.0);
    assert_eq!(v.len(), 1);
    assert!(matches!(v[0].kind, ViolationKind::CutoverTooSlow { latency_ns: 2_000, limit_ns: 1_000 }));
}

#[test]
fn test_cutover_within_budget_is_not_flagged() {
    let history = History {
        forwards: Vec::new(),
        cutovers: vec![CutoverSample { latency_ns: 500 }],
    };
    assert!(history.check_correctness(1_000, &[], 1.0).is_empty());
}

#[test]
fn test_skewed_placement_is_flagged() {
    let history = History::default();
    let v = history.check_correctness(1_000, &[1, 1, 1, 20], 0.3);
    assert_eq!(v.len(), 1);
    assert!(matches!(v[0].kind, ViolationKind::PlacementSkew { worker: 3, .. }));
}

#[test]
fn test_balanced_placement_is_not_flagged() {
    let history = History::default();
    assert!(history.check_correctness(1_000, &[10, 10, 9, 11], 0.3).is_empty());
}

#[test]
fn test_tiny_loads_are_not_flagged_regardless_of_ratio() {
    let history = History::default();
    assert!(history.check_correctness(1_000, &[0, 0, 1, 0], 0.1).is_empty());
}

#[test]
fn test_multiple_violation_kinds_accumulate() {
    let history = History {
        forwards: vec![ForwardSample { expected_identity: b'A', actual_identity: b'B', round_trip_ns: 0 }],
        cutovers: vec![CutoverSample { latency_ns: 2_000 }],
    };
    let v = history.check_correctness(1_000, &[1, 1, 1, 20], 0.3);
    assert_eq!(v.len(), 3);
}
