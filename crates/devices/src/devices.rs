//! Physical device catalog.

use crate::discovery::{failure_reason, DiscoveryTool, LoadState};
use crate::error::CatalogError;
use crate::loading::LoadingList;
use crate::query::Query;
use crate::xml::parse_devices;
use simlane_core::{Device, TargetDevice, TestTarget};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Physical devices attached to the host.
pub struct Devices {
    discovery: Arc<dyn DiscoveryTool>,
    load_gate: Mutex<LoadState>,
    devices: Arc<LoadingList<Device>>,
}

impl Devices {
    /// Create an empty catalog; nothing is listed until [`Devices::load`].
    pub fn new(discovery: Arc<dyn DiscoveryTool>) -> Self {
        Self {
            discovery,
            load_gate: Mutex::new(LoadState::default()),
            devices: Arc::new(LoadingList::new()),
        }
    }

    /// Run discovery once; `force` lists again.
    pub async fn load(&self, force: bool) -> Result<(), CatalogError> {
        let mut state = self.load_gate.lock().await;
        if let Some(previous) = state.cached("devices").filter(|_| !force) {
            return previous;
        }

        self.devices.reset();
        let result = self.fetch().await;
        match &result {
            Ok(devices) => {
                info!(count = devices.len(), "devices loaded");
                self.devices.extend(devices.iter().cloned());
            }
            Err(e) => warn!("device discovery failed: {e}"),
        }
        self.devices.set_completed();

        state.record(&result);
        result.map(|_| ())
    }

    async fn fetch(&self) -> Result<Vec<Device>, CatalogError> {
        let file = tempfile::Builder::new()
            .prefix("simlane-devices-")
            .suffix(".xml")
            .tempfile()?;
        let output = self.discovery.list_devices(file.path()).await?;
        if !output.succeeded() {
            return Err(CatalogError::LoadFailed {
                what: "devices",
                reason: failure_reason(&output),
            });
        }
        let xml = tokio::fs::read_to_string(file.path()).await?;
        parse_devices(&xml)
    }

    /// Every listed device.
    pub fn all(&self) -> Query<Device> {
        Query::new(Arc::clone(&self.devices))
    }

    /// Usable devices of the target's platform.
    pub fn candidates(&self, target: TestTarget) -> Query<Device> {
        let platform = target.platform();
        self.all()
            .filter(|device| device.usable_for_debugging)
            .filter(move |device| device.platform() == Some(platform))
    }

    /// The phone a watch is paired with, once discovery completes.
    pub async fn find_companion(&self, watch: &Device) -> Option<Device> {
        let companion = watch.companion_identifier.clone()?;
        self.devices
            .items_where(|device| device.udid == companion)
            .await
            .into_iter()
            .next()
    }
}
