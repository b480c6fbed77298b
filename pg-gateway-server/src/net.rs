//! Raw socket and pipe plumbing: non-blocking fd setup, the dual-stack
//! listener bind, and the splice pipe pair. Kept separate from the worker
//! and accept modules so the `unsafe` libc surface is concentrated here.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};

use pg_gateway_common::PIPE_CAPACITY;

use crate::config::LISTEN_BACKLOG;

/// Bind the gateway's client-facing listener. Tries the IPv6 wildcard
/// first with `IPV6_V6ONLY` off so one socket serves both families; falls
/// back to the IPv4 wildcard if IPv6 is unavailable. `SO_REUSEADDR` and
/// (where supported) `SO_REUSEPORT` are always set.
pub fn bind_listener(host: &str, port: u16) -> io::Result<StdTcpListener> {
    if host == "::" {
        match bind_one(Domain::IPV6, format!("[::]:{port}").parse().unwrap(), false) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                tracing::warn!(error = %err, "IPv6 wildcard bind failed, falling back to IPv4");
                return bind_one(Domain::IPV4, format!("0.0.0.0:{port}").parse().unwrap(), true);
            }
        }
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .or_else(|_| format!("[{host}]:{port}").parse())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "unparseable listen address"))?;
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    bind_one(domain, addr, true)
}

fn bind_one(domain: Domain, addr: SocketAddr, v6only: bool) -> io::Result<StdTcpListener> {
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if domain == Domain::IPV6 {
        socket.set_only_v6(v6only)?;
    }
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    {
        let _ = socket.set_reuse_port(true);
    }
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Apply `TCP_NODELAY` and, unless disabled, keepalive (idle 60s, interval
/// 10s, 3 probes) to a freshly accepted client socket (spec §4.2 step 2).
/// Does not take ownership of `fd` — the caller keeps closing it itself.
pub fn apply_client_socket_opts(fd: RawFd, tcp_keepalive: bool) -> io::Result<()> {
    // SAFETY: fd is a valid, open socket owned by the caller; `sock_ref`
    // never closes it (SockRef borrows).
    let sock_ref = unsafe { socket2::SockRef::from_raw_fd(fd) };
    sock_ref.set_nodelay(true)?;
    if tcp_keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10));
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let keepalive = keepalive.with_retries(3);
        sock_ref.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Open a non-blocking socket of the given address family and begin a
/// non-blocking `connect`. Returns `Ok((fd, true))` if the connect
/// completed immediately, `Ok((fd, false))` if it is still in progress.
pub fn connect_nonblocking(addr: SocketAddr) -> io::Result<(RawFd, bool)> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    let fd = socket.as_raw_fd();
    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => {
            std::mem::forget(socket);
            Ok((fd, true))
        }
        Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
            std::mem::forget(socket);
            Ok((fd, false))
        }
        Err(err) => Err(err),
    }
}

/// Create a non-blocking pipe pair and best-effort enlarge it to the
/// configured capacity. Returns `(read_fd, write_fd)`.
pub fn create_splice_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: fds is a valid pointer to two ints, O_NONBLOCK is a documented
    // pipe2(2) flag.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    enlarge_pipe(read_fd);
    enlarge_pipe(write_fd);
    Ok((read_fd, write_fd))
}

/// Best-effort pipe capacity enlargement; failure is non-fatal (spec §3).
fn enlarge_pipe(fd: RawFd) {
    // SAFETY: fd was just created by pipe2 above and is still open.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETPIPE_SZ, PIPE_CAPACITY) };
    if rc < 0 {
        tracing::debug!(fd, "failed to enlarge splice pipe, continuing with default size");
    }
}

/// Fetch and clear a non-blocking socket's pending error (used to detect
/// whether a Connecting backend's connect() finished, spec §4.3 step 1).
pub fn take_socket_error(fd: RawFd) -> io::Result<i32> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: fd is a valid socket fd owned by the caller; err/len are
    // correctly sized out-parameters for SO_ERROR.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(err)
}

/// Query how many bytes are currently queued in a pipe (used to decide
/// whether a direction still wants write-readiness on re-arm, spec §4.3).
pub fn pipe_residual(read_fd: RawFd) -> io::Result<i32> {
    let mut residual: libc::c_int = 0;
    // SAFETY: read_fd is a valid pipe read-end fd; FIONREAD writes an int.
    let rc = unsafe { libc::ioctl(read_fd, libc::FIONREAD, &mut residual as *mut libc::c_int) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(residual)
}
