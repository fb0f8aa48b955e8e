//! Listen-port selection with fallback.

use std::io;
use std::net::TcpListener;

/// First port in `start..start + attempts` that `host` can bind.
///
/// The probe binds and immediately releases the port, so the caller should
/// bind it promptly.
pub fn find_available_port(host: &str, start: u16, attempts: u16) -> io::Result<u16> {
    for offset in 0..attempts.max(1) {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, port)) {
            Ok(_) => return Ok(port),
            Err(e) => {
                tracing::debug!(host, port, error = %e, "port unavailable");
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("no available port found starting from {start} (tried {attempts} ports)"),
    ))
}
