use std::io;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::history::{CutoverSample, ForwardSample, History};
use crate::metrics::Metrics;
use crate::server::Cluster;
use crate::workload::{Op, WorkloadProfile};

const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive `cluster` with `profile` for `duration`, recording every forward
/// round and every self-triggered cut-over. Returns raw throughput/latency
/// metrics plus the full sample history for post-run correctness checking.
pub async fn run(cluster: &Cluster, profile: WorkloadProfile, duration: Duration) -> (Metrics, History) {
    let mut rng = rand::thread_rng();
    let mut history = History::default();
    let mut connections_total: u64 = 0;
    let mut errors: u64 = 0;
    let mut latency_ns: Vec<u64> = Vec::new();
    let mut current_primary: usize = 0;

    let run_start = Instant::now();

    while run_start.elapsed() < duration {
        let op = profile.sample(&mut rng);
        connections_total += 1;

        match op {
            Op::Forward => match forward_round(cluster, current_primary, &mut rng).await {
                Ok(sample) => {
                    latency_ns.push(sample.round_trip_ns);
                    history.forwards.push(sample);
                }
                Err(_) => errors += 1,
            },
            Op::TriggerCutover => {
                if cluster.candidate_identities.len() < 2 {
                    continue;
                }
                let next = (current_primary + 1) % cluster.candidate_identities.len();
                match cutover_round(cluster, next).await {
                    Ok(sample) => history.cutovers.push(sample),
                    Err(_) => errors += 1,
                }
                current_primary = next;
            }
        }
    }

    let elapsed_secs = run_start.elapsed().as_secs_f64();
    let metrics = Metrics { connections_total, errors, latency_ns, elapsed_secs };
    (metrics, history)
}

async fn forward_round(cluster: &Cluster, expected_index: usize, rng: &mut impl Rng) -> io::Result<ForwardSample> {
    let expected_identity = cluster.candidate_identities[expected_index];

    let mut stream = with_timeout(TcpStream::connect(cluster.listen_addr)).await?;
    let mut identity = [0u8; 1];
    with_timeout(stream.read_exact(&mut identity)).await?;

    let payload = generate_payload(rng);
    let start = Instant::now();
    with_timeout(stream.write_all(&payload)).await?;
    let mut echoed = vec![0u8; payload.len()];
    with_timeout(stream.read_exact(&mut echoed)).await?;
    let round_trip_ns = start.elapsed().as_nanos() as u64;

    Ok(ForwardSample { expected_identity, actual_identity: identity[0], round_trip_ns })
}

/// Open a connection bound to the current primary, flip the primary to
/// `next_index`, then measure how long the connection takes to observe the
/// epoch change and close. A single byte is written right after the
/// cut-over to give the owning worker a readiness event to wake on, rather
/// than waiting out its full idle timeout.
async fn cutover_round(cluster: &Cluster, next_index: usize) -> io::Result<CutoverSample> {
    let mut stream = with_timeout(TcpStream::connect(cluster.listen_addr)).await?;
    let mut identity = [0u8; 1];
    with_timeout(stream.read_exact(&mut identity)).await?;

    let start = Instant::now();
    cluster.cut_over_to(next_index);
    let _ = with_timeout(stream.write_all(b"x")).await;
    let mut buf = [0u8; 1];
    let n = with_timeout(stream.read(&mut buf)).await?;
    let latency_ns = start.elapsed().as_nanos() as u64;

    if n != 0 {
        return Err(io::Error::new(io::ErrorKind::Other, "connection kept forwarding after cut-over instead of closing"));
    }
    Ok(CutoverSample { latency_ns })
}

/// Generate a random byte payload for a forward round (8-1024 bytes).
pub fn generate_payload(rng: &mut impl Rng) -> Vec<u8> {
    let len: usize = rng.gen_range(8..=1024);
    (0..len).map(|_| rng.gen::<u8>()).collect()
}

async fn with_timeout<T>(fut: impl std::future::Future<Output = io::Result<T>>) -> io::Result<T> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "stress operation timed out")),
    }
}
