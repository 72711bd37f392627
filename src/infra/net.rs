//! Free TCP port allocation for test runner subprocesses.
//!
//! An iterative bounded scan over a configured range. Ports handed out are
//! tracked as leased until released, so two concurrent module runs can never
//! be assigned the same port between probing and binding.

use anyhow::{Result, bail};
use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::Range;
use std::sync::Mutex;

pub struct PortAllocator {
    range: Range<u16>,
    leased: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            range: start..end,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Leases the first free port in the range. Fails when the range is
    /// exhausted.
    pub fn lease(&self) -> Result<u16> {
        let mut leased = self.leased.lock().expect("port allocator poisoned");
        for port in self.range.clone() {
            if leased.contains(&port) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                leased.insert(port);
                return Ok(port);
            }
        }
        bail!(
            "No free TCP port in range {}..{}",
            self.range.start,
            self.range.end
        );
    }

    pub fn release(&self, port: u16) {
        self.leased
            .lock()
            .expect("port allocator poisoned")
            .remove(&port);
    }
}
