use std::process::ExitCode;

use clap::Parser;

use pg_gateway_server::cli::Args;
use pg_gateway_server::config::GatewayConfig;

fn main() -> ExitCode {
    // SIGPIPE ignored globally (spec §5 resource caps): a half-closed peer
    // must surface as an EPIPE return from write/splice, not a signal.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match GatewayConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "fatal startup error");
            return ExitCode::FAILURE;
        }
    };

    pg_gateway_server::run(config)
}
