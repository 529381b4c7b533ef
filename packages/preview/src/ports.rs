// ABOUTME: Port pool handing out dev server ports from a bounded range
// ABOUTME: Allocation is first-fit and never gives one port to two projects

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::debug;

/// Bounded pool of ports with an injective port → project mapping.
#[derive(Debug, Clone)]
pub struct PortPool {
    range: RangeInclusive<u16>,
    probe_host: bool,
    allocated: BTreeMap<u16, String>,
}

impl PortPool {
    pub fn new(range: RangeInclusive<u16>, probe_host: bool) -> Self {
        Self {
            range,
            probe_host,
            allocated: BTreeMap::new(),
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Lowest free port for `project_id`, or `None` if the pool is exhausted.
    ///
    /// A project that already holds a port gets the same port back.
    pub fn allocate(&mut self, project_id: &str) -> Option<u16> {
        if let Some(port) = self.port_of(project_id) {
            return Some(port);
        }

        let port = self.range.clone().find(|port| {
            !self.allocated.contains_key(port) && (!self.probe_host || is_port_available(*port))
        })?;

        debug!("Allocated port {} to project {}", port, project_id);
        self.allocated.insert(port, project_id.to_string());
        Some(port)
    }

    /// Release whatever port `project_id` holds.
    pub fn release(&mut self, project_id: &str) -> Option<u16> {
        let port = self.port_of(project_id)?;
        self.allocated.remove(&port);
        debug!("Released port {} from project {}", port, project_id);
        Some(port)
    }

    pub fn port_of(&self, project_id: &str) -> Option<u16> {
        self.allocated
            .iter()
            .find(|(_, owner)| owner.as_str() == project_id)
            .map(|(port, _)| *port)
    }

    pub fn owner_of(&self, port: u16) -> Option<&str> {
        self.allocated.get(&port).map(String::as_str)
    }

    pub fn allocated(&self) -> &BTreeMap<u16, String> {
        &self.allocated
    }
}

/// Whether nothing on the host is bound to `port` on the loopback interface
fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}
