use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::checksum::Md5Checksum;

/// In-process coordination keyed by checksum.
///
/// At most one guard per checksum exists at a time; other callers for the same
/// checksum block until it is dropped. Different checksums never wait on each
/// other. This does not coordinate separate processes.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<Md5Checksum>>,
    released: Condvar,
}

/// Released on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    checksum: Md5Checksum,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other guard for `checksum` is held, then take one.
    pub fn acquire(&self, checksum: &Md5Checksum) -> InFlightGuard<'_> {
        let mut active = self.lock();
        while active.contains(checksum) {
            active = self
                .released
                .wait(active)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        active.insert(checksum.clone());
        InFlightGuard {
            owner: self,
            checksum: checksum.clone(),
        }
    }

    pub fn is_active(&self, checksum: &Md5Checksum) -> bool {
        self.lock().contains(checksum)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Md5Checksum>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.checksum);
        self.owner.released.notify_all();
    }
}
