//! Shared data model for the pg-gateway transparent Postgres load balancer:
//! the candidate registry, the connection record and its lifecycle state,
//! the global epoch-tagged routing state, the synthetic error frame, and
//! the error taxonomy used by fatal startup paths.

pub mod candidate;
pub mod conn;
pub mod error;
pub mod pgframe;
pub mod routing;

pub use candidate::{Candidate, ResolvedAddr};
pub use conn::{ConnRecord, ConnState, Pipe, INVALID_FD, PIPE_CAPACITY, SPLICE_CHUNK};
pub use error::GatewayError;
pub use pgframe::no_primary_error_frame;
pub use routing::{RoutingSample, RoutingState, NO_PRIMARY};
