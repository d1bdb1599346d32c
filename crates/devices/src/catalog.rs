//! The device catalog owned by a scheduler.

use crate::devices::Devices;
use crate::discovery::DiscoveryTool;
use crate::error::CatalogError;
use crate::simulators::Simulators;
use simlane_tools::SimulatorControl;
use std::sync::Arc;

/// Simulators and physical devices known to this run.
///
/// Created empty; the scheduler starts [`DeviceCatalog::load`] in the
/// background and tasks query the lists while it is still running.
pub struct DeviceCatalog {
    simulators: Arc<Simulators>,
    devices: Arc<Devices>,
}

impl DeviceCatalog {
    /// Create a catalog using the given discovery and control tools.
    pub fn new(discovery: Arc<dyn DiscoveryTool>, simctl: Arc<dyn SimulatorControl>) -> Self {
        Self {
            simulators: Arc::new(Simulators::new(Arc::clone(&discovery), simctl)),
            devices: Arc::new(Devices::new(discovery)),
        }
    }

    /// Simulator catalog.
    pub fn simulators(&self) -> &Arc<Simulators> {
        &self.simulators
    }

    /// Physical device catalog.
    pub fn devices(&self) -> &Arc<Devices> {
        &self.devices
    }

    /// Load both catalogs concurrently.
    ///
    /// Both loads always run to completion; the simulator error wins if both fail.
    pub async fn load(&self, force: bool) -> Result<(), CatalogError> {
        let (simulators, devices) =
            tokio::join!(self.simulators.load(force), self.devices.load(force));
        simulators.and(devices)
    }
}
