use std::io::{Read, Write};
use std::sync::atomic::Ordering;
use std::time::Duration;

use pg_gateway_stress_tests::server::{connect_and_read_identity, Cluster};

// `Cluster::build_and_spawn` wires the forwarding engine entirely in-process
// (no subprocesses, no TCP-readiness polling against an external binary), so
// unlike a subprocess-spawning equivalent it's cheap enough to drive directly
// here rather than deferring it to the full stress run.

#[test]
fn test_build_and_spawn_routes_to_first_candidate() {
    let cluster = Cluster::build_and_spawn(2, 2);
    let (_stream, identity) = connect_and_read_identity(cluster.listen_addr).expect("connect");
    assert_eq!(identity, cluster.candidate_identities[0]);
}

#[test]
fn test_build_and_spawn_zero_candidates_leaves_primary_unset() {
    let cluster = Cluster::build_and_spawn(0, 1);
    assert!(cluster.candidate_identities.is_empty());
}

#[test]
fn test_cut_over_to_switches_routed_candidate() {
    let cluster = Cluster::build_and_spawn(2, 2);
    let (mut stream, identity) = connect_and_read_identity(cluster.listen_addr).expect("connect");
    assert_eq!(identity, cluster.candidate_identities[0]);

    cluster.cut_over_to(1);
    // nudge the worker so it observes the epoch change on this idle connection
    let _ = stream.write_all(b"x");
    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "stale-epoch connection should be closed after cut-over");

    let (_stream2, identity2) = connect_and_read_identity(cluster.listen_addr).expect("reconnect");
    assert_eq!(identity2, cluster.candidate_identities[1]);
}

#[test]
fn test_worker_loads_track_open_connections() {
    let cluster = Cluster::build_and_spawn(1, 2);
    let mut streams = Vec::new();
    for _ in 0..4 {
        streams.push(connect_and_read_identity(cluster.listen_addr).expect("connect").0);
    }
    // give the accept dispatcher a moment to place all four connections
    std::thread::sleep(Duration::from_millis(100));
    let total: usize = cluster.worker_loads.iter().map(|l| l.load(Ordering::Relaxed)).sum();
    assert_eq!(total, 4);
}
