use thiserror::Error;

/// Fatal startup errors (spec §7 class 1). Anything that reaches this point
/// aborts the process with a non-zero exit code.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("CANDIDATES is not set")]
    MissingCandidates,

    #[error("invalid candidate entry {0:?}: expected host:port")]
    InvalidCandidate(String),

    #[error("invalid listen port: {0}")]
    InvalidListenPort(String),

    #[error("failed to bind listener on {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("failed to create pipe: {0}")]
    PipeInitFailed(std::io::Error),

    #[error("failed to create epoll instance: {0}")]
    EpollInitFailed(std::io::Error),
}
