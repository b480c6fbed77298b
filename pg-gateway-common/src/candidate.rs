use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, RwLock};

use tokio_postgres::Client as ProbeChannel;

/// A resolved socket address, tagged with the textual form it was resolved
/// from for logging. Equality and hashing are always structural (family,
/// address bytes, port) via the wrapped `SocketAddr` — never the text form.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAddr {
    addr: SocketAddr,
    host: &'static str,
}

impl ResolvedAddr {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, host: "" }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PartialEq for ResolvedAddr {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
impl Eq for ResolvedAddr {}

impl fmt::Display for ResolvedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// One configured backend endpoint. Allocated once at startup and never
/// destroyed; `resolved` and `probe` are mutated only by the primary
/// selector, and read (resolved only) by the accept dispatcher.
pub struct Candidate {
    pub host: String,
    pub port: u16,
    /// Precomputed libpq connection string used to open probe channels.
    pub probe_conninfo: String,
    pub resolved: RwLock<Option<ResolvedAddr>>,
    pub probe: Mutex<Option<ProbeChannel>>,
}

impl Candidate {
    pub fn new(host: String, port: u16, probe_conninfo: String) -> Self {
        Self {
            host,
            port,
            probe_conninfo,
            resolved: RwLock::new(None),
            probe: Mutex::new(None),
        }
    }

    pub fn display_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Snapshot the currently cached resolved address, if any.
    pub fn resolved_addr(&self) -> Option<ResolvedAddr> {
        *self.resolved.read().expect("candidate lock poisoned")
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("resolved", &self.resolved_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_addr_equality_is_structural() {
        let a = ResolvedAddr::new("127.0.0.1:5432".parse().unwrap());
        let b = ResolvedAddr::new("127.0.0.1:5432".parse().unwrap());
        assert_eq!(a, b);

        let c = ResolvedAddr::new("127.0.0.1:5433".parse().unwrap());
        assert_ne!(a, c);
    }

    #[test]
    fn candidate_starts_unresolved() {
        let c = Candidate::new("db1".into(), 5432, "host=db1 port=5432".into());
        assert!(c.resolved_addr().is_none());
        assert_eq!(c.display_addr(), "db1:5432");
    }
}
