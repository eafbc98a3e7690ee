//! Host port allocation.

use crate::error::{CoreError, Result};
use std::net::{IpAddr, TcpListener};

/// Attempts before giving up on finding a port nobody else has recorded.
const MAX_PROBES: usize = 16;

/// Hands out host ports for container publishing.
///
/// A free port is found by binding a probe socket to port 0 and releasing it
/// immediately. The port can be taken again before the engine publishes it;
/// the engine's bind failure at start is the authoritative conflict signal.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    bind_address: IpAddr,
}

impl PortAllocator {
    /// Creates an allocator probing on `bind_address`.
    #[must_use]
    pub const fn new(bind_address: IpAddr) -> Self {
        Self { bind_address }
    }

    /// Address ports are probed and published on.
    #[must_use]
    pub const fn bind_address(&self) -> IpAddr {
        self.bind_address
    }

    /// Returns `requested` unchanged when it is a valid TCP port, or a
    /// probed free port when it is absent or zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PortUnavailable`] if `requested` is out of range
    /// or no port could be probed.
    pub fn allocate(&self, requested: Option<i64>) -> Result<u16> {
        self.allocate_excluding(requested, |_| false)
    }

    /// Like [`allocate`](Self::allocate), but a probed port for which
    /// `taken` returns true is discarded and probed again.
    ///
    /// A specific requested port is never checked against `taken`; callers
    /// decide how to report a clash with a known owner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PortUnavailable`] if `requested` is out of range
    /// or no acceptable port could be probed.
    pub fn allocate_excluding(
        &self,
        requested: Option<i64>,
        taken: impl Fn(u16) -> bool,
    ) -> Result<u16> {
        match requested {
            None | Some(0) => {}
            Some(port) => {
                return u16::try_from(port)
                    .map_err(|_| {
                        CoreError::PortUnavailable(format!(
                            "host port {port} is outside 1-65535"
                        ))
                    });
            }
        }

        for _ in 0..MAX_PROBES {
            let port = self.probe()?;
            if !taken(port) {
                tracing::debug!(host_port = port, "probed free host port");
                return Ok(port);
            }
        }
        Err(CoreError::PortUnavailable(format!(
            "no free port on {} after {MAX_PROBES} probes",
            self.bind_address
        )))
    }

    fn probe(&self) -> Result<u16> {
        let listener = TcpListener::bind((self.bind_address, 0)).map_err(|e| {
            CoreError::PortUnavailable(format!("cannot probe {}: {e}", self.bind_address))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| CoreError::PortUnavailable(format!("cannot read probed port: {e}")))?
            .port();
        drop(listener);
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn allocator() -> PortAllocator {
        PortAllocator::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn requested_port_passes_through() {
        for port in [1_i64, 80, 8080, 49152, 65535] {
            assert_eq!(i64::from(allocator().allocate(Some(port)).unwrap()), port);
        }
    }

    #[test]
    fn requested_port_is_not_probed() {
        // Held open, yet still returned: conflicts are the engine's to report.
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        assert_eq!(allocator().allocate(Some(i64::from(port))).unwrap(), port);
    }

    #[test]
    fn out_of_range_is_unavailable() {
        for port in [-1_i64, 65536, 100_000] {
            assert!(matches!(
                allocator().allocate(Some(port)),
                Err(CoreError::PortUnavailable(_))
            ));
        }
    }

    #[test]
    fn absent_or_zero_probes_a_bindable_port() {
        for requested in [None, Some(0)] {
            let port = allocator().allocate(requested).unwrap();
            assert_ne!(port, 0);
            TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        }
    }

    #[test]
    fn taken_ports_are_skipped() {
        let first = allocator().allocate(None).unwrap();
        let next = allocator()
            .allocate_excluding(None, |p| p == first)
            .unwrap();
        assert_ne!(next, first);
    }

    #[test]
    fn gives_up_when_everything_is_taken() {
        assert!(matches!(
            allocator().allocate_excluding(None, |_| true),
            Err(CoreError::PortUnavailable(_))
        ));
    }
}
