//! Shared resources of one harness run.

use crate::group::ResourceGroup;
use crate::pool::ResourcePool;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Every pool the scheduler arbitrates over.
///
/// The desktop pool guards the host: builds take it concurrently, simulator
/// runs exclusively. The package restore pool serializes dependency restores.
/// Physical devices get one single-slot pool per UDID, created on first use.
#[derive(Debug)]
pub struct Resources {
    desktop: ResourcePool,
    package_restore: ResourcePool,
    devices: Mutex<HashMap<String, ResourcePool>>,
}

impl Resources {
    /// Create the registry, allowing `max_concurrent_builds` builds on the host.
    pub fn new(max_concurrent_builds: NonZeroUsize) -> Self {
        Self {
            desktop: ResourcePool::new("desktop", max_concurrent_builds),
            package_restore: ResourcePool::single("package-restore"),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// The host machine.
    pub fn desktop(&self) -> &ResourcePool {
        &self.desktop
    }

    /// Lock held while restoring packages.
    pub fn package_restore(&self) -> &ResourcePool {
        &self.package_restore
    }

    /// Pool of a physical device; the same pool is returned for the same UDID.
    pub fn device(&self, udid: &str) -> ResourcePool {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        devices
            .entry(udid.to_string())
            .or_insert_with(|| ResourcePool::single(udid))
            .clone()
    }

    /// UDIDs that have a pool, sorted.
    pub fn known_devices(&self) -> Vec<String> {
        let devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut udids: Vec<String> = devices.keys().cloned().collect();
        udids.sort();
        udids
    }

    /// Group of device pools, in the given preference order.
    pub fn group_for<'a>(&self, udids: impl IntoIterator<Item = &'a str>) -> ResourceGroup {
        ResourceGroup::new(udids.into_iter().map(|udid| self.device(udid)).collect())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(NonZeroUsize::MIN)
    }
}
