//! Network utilities for the proxy server.
//!
//! Listener creation goes through socket2 so the socket options are set
//! before binding. Ephemeral ports are read back from the bound socket.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::warn;

/// Attempts made when binding an OS-assigned port
pub const EPHEMERAL_BIND_ATTEMPTS: u32 = 5;
pub const BIND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Create a TCP listener bound to `addr`.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?; // Backlog size

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Resolve `host` and bind `port` on it.
///
/// Port 0 asks the OS for a free port and is retried up to
/// [`EPHEMERAL_BIND_ATTEMPTS`] times; an explicit port gets a single attempt.
pub async fn bind_listener(host: &str, port: u16) -> io::Result<TcpListener> {
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve listen host '{host}'"),
            )
        })?;

    if port != 0 {
        return create_listener(addr);
    }

    let mut last_err = None;
    for attempt in 1..=EPHEMERAL_BIND_ATTEMPTS {
        match create_listener(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(
                    "Binding ephemeral port on {} failed (attempt {}/{}): {}",
                    host, attempt, EPHEMERAL_BIND_ATTEMPTS, e
                );
                last_err = Some(e);
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no bind attempt was made")))
}
