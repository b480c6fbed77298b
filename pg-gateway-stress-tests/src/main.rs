use clap::Parser;
use std::io::Write;
use std::process;
use std::time::Duration;

use pg_gateway_stress_tests::history::ViolationKind;
use pg_gateway_stress_tests::server::Cluster;
use pg_gateway_stress_tests::workload::WorkloadProfile;
use pg_gateway_stress_tests::worker;

#[derive(Parser)]
#[command(name = "pg-gateway-stress", about = "pg-gateway stress test harness")]
struct Args {
    /// How long to run (seconds)
    #[arg(long, default_value_t = 5)]
    duration: u64,

    /// Workload profile: steady-only | churn-light | churn-heavy
    #[arg(long, default_value = "churn-light")]
    workload: String,

    /// Number of candidate backends behind the gateway
    #[arg(long, default_value_t = 2)]
    num_candidates: usize,

    /// Number of forwarder worker threads
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// Fail if the error rate exceeds this fraction
    #[arg(long, default_value_t = 0.01)]
    max_error_rate: f64,

    /// Fail if any observed cut-over takes longer than this many milliseconds
    #[arg(long, default_value_t = 1100)]
    max_cutover_ms: u64,

    /// Fail if any worker's final load diverges from the mean by more than this fraction
    #[arg(long, default_value_t = 0.3)]
    max_skew_ratio: f64,

    /// Fail if correctness violations exceed this count
    #[arg(long, default_value_t = 0)]
    max_violations: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let profile = WorkloadProfile::from_name(&args.workload).unwrap_or_else(|| {
        eprintln!(
            "Unknown workload {:?}. Valid values: steady-only, churn-light, churn-heavy",
            args.workload
        );
        process::exit(3);
    });

    let cluster = Cluster::build_and_spawn(args.num_candidates, args.num_workers);
    println!(
        "Cluster ready: listening on {}  |  {} candidates  |  {} workers",
        cluster.listen_addr,
        args.num_candidates,
        args.num_workers,
    );

    let duration = Duration::from_secs(args.duration);

    print!("Running {}s {} workload ", args.duration, profile.as_name());
    std::io::stdout().flush().ok();

    let dot_handle = tokio::spawn(async {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await; // consume the immediate first tick
        loop {
            interval.tick().await;
            print!(".");
            std::io::stdout().flush().ok();
        }
    });

    let (metrics, history) = worker::run(&cluster, profile, duration).await;

    dot_handle.abort();
    println!();

    let max_cutover_ns = args.max_cutover_ms * 1_000_000;
    let placement_loads: Vec<usize> = cluster.worker_loads.iter().map(|l| l.load(std::sync::atomic::Ordering::Relaxed)).collect();
    drop(cluster);

    let violations = history.check_correctness(max_cutover_ns, &placement_loads, args.max_skew_ratio);

    print_report(&args, &metrics, violations.len() as u64, profile, &placement_loads);

    for v in &violations {
        let detail = match &v.kind {
            ViolationKind::Misrouted { expected, actual } => {
                format!("Misrouted: expected identity {:?}, got {:?}", *expected as char, *actual as char)
            }
            ViolationKind::CutoverTooSlow { latency_ns, limit_ns } => {
                format!("CutoverTooSlow: {:.1} ms (limit {:.1} ms)", ns_to_ms(*latency_ns), ns_to_ms(*limit_ns))
            }
            ViolationKind::PlacementSkew { worker, load, mean, ratio } => {
                format!("PlacementSkew: worker {worker} load {load} deviates {:.0}% from mean {mean:.1}", ratio * 100.0)
            }
        };
        eprintln!("VIOLATION {detail}");
    }

    let error_rate_exceeded = metrics.connections_total > 0 && metrics.error_rate() > args.max_error_rate;
    let violations_exceeded = violations.len() as u64 > args.max_violations;

    let exit_code = if error_rate_exceeded {
        1
    } else if violations_exceeded {
        2
    } else {
        0
    };

    process::exit(exit_code);
}

fn print_report(
    args: &Args,
    metrics: &pg_gateway_stress_tests::metrics::Metrics,
    violation_count: u64,
    profile: WorkloadProfile,
    placement_loads: &[usize],
) {
    let pass_fail = |exceeded: bool| if exceeded { "\u{2717}" } else { "\u{2713}" };

    let error_rate_exceeded = metrics.connections_total > 0 && metrics.error_rate() > args.max_error_rate;
    let violations_exceeded = violation_count > args.max_violations;
    let overall_pass = !error_rate_exceeded && !violations_exceeded;

    println!("pg-gateway Stress Test Results");
    println!("===============================");
    println!("Duration:              {:.1} s", args.duration as f64);
    println!("Workload:              {}", profile.as_name());
    println!("Candidates:            {}", args.num_candidates);
    println!("Workers:               {}", args.num_workers);
    println!("Worker loads:          {:?}", placement_loads);
    println!();
    println!("Connections:           {}", format_thousands(metrics.connections_total));
    println!("Throughput:            {:.1} cps", metrics.throughput_cps());
    println!("P50 latency:           {:.1} ms", ns_to_ms(metrics.p50_ns()));
    println!("P99 latency:           {:.1} ms", ns_to_ms(metrics.p99_ns()));
    println!();
    println!("Errors:                {}", format_thousands(metrics.errors));
    println!(
        "Error rate:            {:.3}%    [threshold: {:.3}%]  {}",
        metrics.error_rate() * 100.0,
        args.max_error_rate * 100.0,
        pass_fail(error_rate_exceeded),
    );
    println!();
    println!(
        "Correctness violations: {}        [threshold: {}]        {}",
        violation_count,
        args.max_violations,
        pass_fail(violations_exceeded),
    );
    println!();
    println!("Result: {}", if overall_pass { "PASS" } else { "FAIL" });
}

fn format_thousands(n: u64) -> String {
    if n >= 1_000_000 {
        format!("~{}M", n / 1_000_000)
    } else if n >= 1_000 {
        format!("~{}K", n / 1_000)
    } else {
        n.to_string()
    }
}

fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}
