use rand::{rngs::StdRng, SeedableRng};
use pg_gateway_stress_tests::worker::generate_payload;

// `worker::run` requires a live forwarding engine and is inherently
// integration-level. `generate_payload` is the only pure, testable logic
// exposed by worker.rs.

#[test]
fn test_generate_payload_length_and_variation() {
    let mut rng = StdRng::seed_from_u64(42);

    let mut all_same = true;
    let mut prev: Option<Vec<u8>> = None;
    for _ in 0..50 {
        let payload = generate_payload(&mut rng);
        assert!(payload.len() >= 8, "payload too short: {}", payload.len());
        assert!(payload.len() <= 1024, "payload too long: {}", payload.len());
        if let Some(ref p) = prev {
            if p != &payload {
                all_same = false;
            }
        }
        prev = Some(payload);
    }
    assert!(!all_same, "generate_payload returned identical bytes every time");
}
