//! Free port discovery

use rand::Rng;
use tokio::net::TcpListener;
use tracing::debug;

use super::error::TransportError;

/// Bind a listener on the first free port in `[min, max)`.
///
/// The scan starts at a random port so that workers starting together on one
/// host do not all race for the same port, and wraps around once.
pub async fn bind_free_port(min: u16, max: u16) -> Result<(TcpListener, u16), TransportError> {
    debug!(min, max, "bind_free_port: called");
    if min >= max {
        return Err(TransportError::NoFreePort { min, max });
    }

    let start = rand::rng().random_range(min..max);
    let ports = (start..max).chain(min..start);

    for port in ports {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                debug!(port, "bind_free_port: bound");
                return Ok((listener, port));
            }
            Err(e) => {
                debug!(port, error = %e, "bind_free_port: port unavailable");
            }
        }
    }

    Err(TransportError::NoFreePort { min, max })
}
