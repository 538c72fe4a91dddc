//! Mapping of PMT PIDs to program numbers, learned from the PAT.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Thread-safe map from PMT PID to program number.
///
/// Written only while ingesting PAT sections; read by the payload
/// classifier to recognize PMT-carrying PIDs.
#[derive(Debug, Default)]
pub struct ProgramMap {
    inner: Mutex<HashMap<u16, u16>>,
}

impl ProgramMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `pid` as carrying the PMT of `program_number`. Idempotent.
    pub fn set(&self, pid: u16, program_number: u16) {
        self.inner.lock().insert(pid, program_number);
    }

    /// Returns whether `pid` is known to carry a PMT.
    pub fn exists(&self, pid: u16) -> bool {
        self.inner.lock().contains_key(&pid)
    }

    /// Forgets `pid`.
    pub fn unset(&self, pid: u16) {
        self.inner.lock().remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_exists_unset() {
        let map = ProgramMap::new();
        assert!(!map.exists(0x100));
        map.set(0x100, 2);
        map.set(0x100, 2);
        assert!(map.exists(0x100));
        map.unset(0x100);
        assert!(!map.exists(0x100));
    }
}
