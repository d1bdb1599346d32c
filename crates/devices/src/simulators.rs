//! Simulator catalog, provisioning and pairing.

use crate::discovery::{failure_reason, DiscoveryTool, LoadState};
use crate::error::CatalogError;
use crate::loading::LoadingList;
use crate::query::Query;
use crate::xml::{parse_simulators, SimulatorListing};
use simlane_core::{DevicePair, SimDeviceType, SimRuntime, SimulatorDevice, TestTarget};
use simlane_tools::SimulatorControl;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pairing errors that are resolved by pairing a fresh watch instead.
const RECOVERABLE_PAIR_ERRORS: [&str; 2] = [
    "already paired with the maximum",
    "already paired with each other",
];

/// A simulator chosen for a target, plus its companion phone for watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSelection {
    /// The simulator to run on
    pub device: SimulatorDevice,

    /// Paired phone, for watch targets
    pub companion: Option<SimulatorDevice>,
}

/// Simulators known to the host.
pub struct Simulators {
    discovery: Arc<dyn DiscoveryTool>,
    simctl: Arc<dyn SimulatorControl>,
    load_gate: Mutex<LoadState>,
    provision_gate: Mutex<()>,
    runtimes: Arc<LoadingList<SimRuntime>>,
    device_types: Arc<LoadingList<SimDeviceType>>,
    devices: Arc<LoadingList<SimulatorDevice>>,
    pairs: Arc<LoadingList<DevicePair>>,
}

impl Simulators {
    /// Create an empty catalog; nothing is listed until [`Simulators::load`].
    pub fn new(discovery: Arc<dyn DiscoveryTool>, simctl: Arc<dyn SimulatorControl>) -> Self {
        Self {
            discovery,
            simctl,
            load_gate: Mutex::new(LoadState::default()),
            provision_gate: Mutex::new(()),
            runtimes: Arc::new(LoadingList::new()),
            device_types: Arc::new(LoadingList::new()),
            devices: Arc::new(LoadingList::new()),
            pairs: Arc::new(LoadingList::new()),
        }
    }

    /// Simulator control used for provisioning.
    pub fn control(&self) -> &Arc<dyn SimulatorControl> {
        &self.simctl
    }

    /// Run discovery once; `force` discards the previous result and lists again.
    ///
    /// Concurrent callers wait for the same listing. A failed listing still
    /// completes every list (empty) so readers never hang.
    pub async fn load(&self, force: bool) -> Result<(), CatalogError> {
        let mut state = self.load_gate.lock().await;
        if let Some(previous) = state.cached("simulators").filter(|_| !force) {
            return previous;
        }

        self.runtimes.reset();
        self.device_types.reset();
        self.devices.reset();
        self.pairs.reset();

        let result = self.fetch().await;
        match &result {
            Ok(listing) => {
                info!(
                    runtimes = listing.runtimes.len(),
                    device_types = listing.device_types.len(),
                    devices = listing.devices.len(),
                    pairs = listing.pairs.len(),
                    "simulators loaded"
                );
                self.runtimes.extend(listing.runtimes.iter().cloned());
                self.device_types.extend(listing.device_types.iter().cloned());
                self.devices.extend(listing.devices.iter().cloned());
                self.pairs.extend(listing.pairs.iter().cloned());
            }
            Err(e) => warn!("simulator discovery failed: {e}"),
        }

        self.runtimes.set_completed();
        self.device_types.set_completed();
        self.devices.set_completed();
        self.pairs.set_completed();

        state.record(&result);
        result.map(|_| ())
    }

    async fn fetch(&self) -> Result<SimulatorListing, CatalogError> {
        let file = tempfile::Builder::new()
            .prefix("simlane-simulators-")
            .suffix(".xml")
            .tempfile()?;
        let output = self.discovery.list_simulators(file.path()).await?;
        if !output.succeeded() {
            return Err(CatalogError::LoadFailed {
                what: "simulators",
                reason: failure_reason(&output),
            });
        }
        let xml = tokio::fs::read_to_string(file.path()).await?;
        parse_simulators(&xml)
    }

    /// Installed runtimes.
    pub fn runtimes(&self) -> Query<SimRuntime> {
        Query::new(Arc::clone(&self.runtimes))
    }

    /// Supported device types.
    pub fn device_types(&self) -> Query<SimDeviceType> {
        Query::new(Arc::clone(&self.device_types))
    }

    /// Existing simulators.
    pub fn devices(&self) -> Query<SimulatorDevice> {
        Query::new(Arc::clone(&self.devices))
    }

    /// Watch/phone pairs.
    pub fn pairs(&self) -> Query<DevicePair> {
        Query::new(Arc::clone(&self.pairs))
    }

    /// Existing simulators whose runtime fits `target`.
    pub fn candidates(&self, target: TestTarget) -> Query<SimulatorDevice> {
        let prefix = target.runtime_prefix();
        self.devices().filter(move |device| {
            prefix
                .as_deref()
                .is_some_and(|prefix| device.runtime.starts_with(prefix))
        })
    }

    /// Pick a simulator for `target`, creating (and pairing) one if needed.
    pub async fn find_simulators(&self, target: TestTarget) -> Result<SimulatorSelection, CatalogError> {
        self.load(false).await?;
        let _provisioning = self.provision_gate.lock().await;

        let Some(companion_target) = target.companion() else {
            let device = self.select_or_create(target, None).await?;
            return Ok(SimulatorSelection {
                device,
                companion: None,
            });
        };

        let phone = self.select_or_create(companion_target, None).await?;
        let watch = self.select_or_create(target, Some(&phone.udid)).await?;
        let watch = if self.is_paired(&watch.udid, &phone.udid).await {
            watch
        } else {
            self.pair(&watch, &phone).await?
        };
        Ok(SimulatorSelection {
            device: watch,
            companion: Some(phone),
        })
    }

    async fn select_or_create(
        &self,
        target: TestTarget,
        paired_with: Option<&str>,
    ) -> Result<SimulatorDevice, CatalogError> {
        let prefix = target.runtime_prefix().ok_or(CatalogError::NoRuntime(target))?;
        let device_type = target
            .simulator_device_type()
            .ok_or(CatalogError::NoRuntime(target))?;

        let runtime = self
            .runtimes
            .items_where(|runtime| runtime.identifier.starts_with(&prefix))
            .await
            .into_iter()
            .max_by_key(SimRuntime::version_key)
            .ok_or(CatalogError::NoRuntime(target))?;

        if self
            .device_types
            .items_where(|t| t.identifier == device_type)
            .await
            .is_empty()
        {
            return Err(CatalogError::NoDeviceType {
                target,
                device_type: device_type.to_string(),
            });
        }

        let existing = self
            .devices
            .items_where(|d| d.runtime == runtime.identifier && d.device_type == device_type)
            .await;
        if let Some(phone) = paired_with {
            for device in &existing {
                if self.is_paired(&device.udid, phone).await {
                    return Ok(device.clone());
                }
            }
        }
        if let Some(device) = existing.into_iter().next() {
            debug!(target = %target, udid = %device.udid, "using existing simulator");
            return Ok(device);
        }

        let name = simulator_name(device_type, &runtime.identifier);
        let udid = self.create(&name, device_type, &runtime.identifier).await?;
        self.load(true).await?;
        Ok(self.lookup(&udid).await.unwrap_or(SimulatorDevice {
            udid,
            name,
            runtime: runtime.identifier,
            device_type: device_type.to_string(),
            data_path: String::new(),
            log_path: String::new(),
        }))
    }

    async fn create(&self, name: &str, device_type: &str, runtime: &str) -> Result<String, CatalogError> {
        let output = self.simctl.create(name, device_type, runtime).await?;
        let udid = output.stdout.trim().to_string();
        if !output.succeeded() || udid.is_empty() {
            return Err(CatalogError::CreateFailed {
                name: name.to_string(),
                reason: output.combined().trim().to_string(),
            });
        }
        info!(name, udid = %udid, "created simulator");
        Ok(udid)
    }

    async fn lookup(&self, udid: &str) -> Option<SimulatorDevice> {
        self.devices
            .items_where(|d| d.udid == udid)
            .await
            .into_iter()
            .next()
    }

    async fn is_paired(&self, watch: &str, phone: &str) -> bool {
        !self
            .pairs
            .items_where(|p| p.gizmo == watch && p.companion == phone)
            .await
            .is_empty()
    }

    /// Pair `watch` with `phone`, returning the watch that ended up paired.
    ///
    /// If the watch is already paired elsewhere, a new watch with the same
    /// device type and runtime is created and paired instead; existing pairs
    /// are left alone.
    pub async fn pair(
        &self,
        watch: &SimulatorDevice,
        phone: &SimulatorDevice,
    ) -> Result<SimulatorDevice, CatalogError> {
        let output = self.simctl.pair(&watch.udid, &phone.udid).await?;
        if output.succeeded() {
            info!(watch = %watch.udid, phone = %phone.udid, "paired simulators");
            self.load(true).await?;
            return Ok(watch.clone());
        }

        let reason = output.combined();
        if !RECOVERABLE_PAIR_ERRORS.iter().any(|phrase| reason.contains(phrase)) {
            return Err(CatalogError::PairFailed {
                watch: watch.udid.clone(),
                phone: phone.udid.clone(),
                reason: reason.trim().to_string(),
            });
        }

        info!(watch = %watch.udid, phone = %phone.udid, "watch already paired, creating a new one");
        let name = simulator_name(&watch.device_type, &watch.runtime);
        let udid = self.create(&name, &watch.device_type, &watch.runtime).await?;
        let output = self.simctl.pair(&udid, &phone.udid).await?;
        if !output.succeeded() {
            return Err(CatalogError::PairFailed {
                watch: udid,
                phone: phone.udid.clone(),
                reason: output.combined().trim().to_string(),
            });
        }
        info!(watch = %udid, phone = %phone.udid, "paired simulators");

        self.load(true).await?;
        Ok(self.lookup(&udid).await.unwrap_or(SimulatorDevice {
            udid,
            name,
            runtime: watch.runtime.clone(),
            device_type: watch.device_type.clone(),
            data_path: String::new(),
            log_path: String::new(),
        }))
    }
}

fn simulator_name(device_type: &str, runtime: &str) -> String {
    let short = |id: &str| id.rsplit('.').next().unwrap_or(id).to_string();
    format!("simlane {} {}", short(device_type), short(runtime))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::DiscoveryTool;
    use async_trait::async_trait;
    use simlane_tools::{ProcessError, ProcessOutput};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    pub(crate) const IOS: &str = "com.apple.CoreSimulator.SimRuntime.iOS-17-2";
    pub(crate) const WATCHOS: &str = "com.apple.CoreSimulator.SimRuntime.watchOS-10-2";
    pub(crate) const PHONE_TYPE: &str = "com.apple.CoreSimulator.SimDeviceType.iPhone-15";
    pub(crate) const WATCH_TYPE: &str =
        "com.apple.CoreSimulator.SimDeviceType.Apple-Watch-Series-9-45mm";

    /// Builds simulator listings for tests.
    #[derive(Default, Clone)]
    pub(crate) struct Listing {
        devices: Vec<(String, String, String)>,
        pairs: Vec<(String, String)>,
    }

    impl Listing {
        pub(crate) fn device(mut self, udid: &str, runtime: &str, device_type: &str) -> Self {
            self.devices
                .push((udid.to_string(), runtime.to_string(), device_type.to_string()));
            self
        }

        pub(crate) fn pair(mut self, watch: &str, phone: &str) -> Self {
            self.pairs.push((watch.to_string(), phone.to_string()));
            self
        }

        pub(crate) fn xml(&self) -> String {
            let mut xml = String::from("<MTouch><Simulator><SupportedRuntimes>");
            for (name, id, version) in [("iOS 17.2", IOS, "17.2"), ("watchOS 10.2", WATCHOS, "10.2")] {
                xml += &format!(
                    "<SimRuntime><Name>{name}</Name><Identifier>{id}</Identifier><Version>{version}</Version></SimRuntime>"
                );
            }
            xml += "</SupportedRuntimes><SupportedDeviceTypes>";
            for id in [PHONE_TYPE, WATCH_TYPE] {
                xml += &format!("<SimDeviceType><Name>{id}</Name><Identifier>{id}</Identifier></SimDeviceType>");
            }
            xml += "</SupportedDeviceTypes><AvailableDevices>";
            for (udid, runtime, device_type) in &self.devices {
                xml += &format!(
                    "<SimDevice UDID=\"{udid}\" Name=\"{udid}\"><SimRuntime>{runtime}</SimRuntime><SimDeviceType>{device_type}</SimDeviceType><DataPath>/sims/{udid}</DataPath><LogPath>/logs/{udid}</LogPath></SimDevice>"
                );
            }
            xml += "</AvailableDevices><AvailableDevicePairs>";
            for (watch, phone) in &self.pairs {
                xml += &format!(
                    "<SimDevicePair UDID=\"{watch}-{phone}\"><Companion>{phone}</Companion><Gizmo>{watch}</Gizmo></SimDevicePair>"
                );
            }
            xml += "</AvailableDevicePairs></Simulator></MTouch>";
            xml
        }
    }

    /// Discovery returning a sequence of listings; the last one repeats.
    pub(crate) struct FakeDiscovery {
        listings: StdMutex<VecDeque<String>>,
        pub(crate) calls: AtomicUsize,
        fail: bool,
    }

    impl FakeDiscovery {
        pub(crate) fn new(listings: impl IntoIterator<Item = String>) -> Self {
            Self {
                listings: StdMutex::new(listings.into_iter().collect()),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new([])
            }
        }

        fn next(&self) -> String {
            let mut listings = self.listings.lock().unwrap();
            if listings.len() > 1 {
                listings.pop_front().unwrap()
            } else {
                listings.front().cloned().unwrap_or_else(|| "<MTouch/>".to_string())
            }
        }
    }

    #[async_trait]
    impl DiscoveryTool for FakeDiscovery {
        async fn list_simulators(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Ok(ProcessOutput::failure(1, "listing crashed"));
            }
            tokio::fs::write(output, self.next()).await.unwrap();
            Ok(ProcessOutput::success(""))
        }

        async fn list_devices(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Ok(ProcessOutput::failure(1, "listing crashed"));
            }
            tokio::fs::write(output, self.next()).await.unwrap();
            Ok(ProcessOutput::success(""))
        }
    }

    /// Simulator control with scripted `create`/`pair` results.
    #[derive(Default)]
    pub(crate) struct FakeSimctl {
        pub(crate) calls: StdMutex<Vec<String>>,
        created: StdMutex<VecDeque<String>>,
        pair_results: StdMutex<VecDeque<ProcessOutput>>,
    }

    impl FakeSimctl {
        pub(crate) fn creating(self, udids: &[&str]) -> Self {
            self.created
                .lock()
                .unwrap()
                .extend(udids.iter().map(|u| u.to_string()));
            self
        }

        pub(crate) fn pairing(self, results: Vec<ProcessOutput>) -> Self {
            self.pair_results.lock().unwrap().extend(results);
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SimulatorControl for FakeSimctl {
        async fn create(
            &self,
            _name: &str,
            device_type: &str,
            runtime: &str,
        ) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("create {device_type} {runtime}"));
            Ok(match self.created.lock().unwrap().pop_front() {
                Some(udid) => ProcessOutput::success(format!("{udid}\n")),
                None => ProcessOutput::failure(1, "Invalid device type"),
            })
        }

        async fn pair(&self, watch: &str, phone: &str) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("pair {watch} {phone}"));
            Ok(self
                .pair_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ProcessOutput::success("")))
        }

        async fn boot(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("boot {udid}"));
            Ok(ProcessOutput::success(""))
        }

        async fn shutdown(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("shutdown {udid}"));
            Ok(ProcessOutput::success(""))
        }

        async fn erase(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("erase {udid}"));
            Ok(ProcessOutput::success(""))
        }

        async fn reset_permissions(
            &self,
            udid: &str,
            bundle_identifier: &str,
        ) -> Result<ProcessOutput, ProcessError> {
            self.record(format!("privacy {udid} {bundle_identifier}"));
            Ok(ProcessOutput::success(""))
        }

        async fn kill_simulator_processes(&self) -> Result<(), ProcessError> {
            self.record("kill".to_string());
            Ok(())
        }
    }

    fn simulators(discovery: FakeDiscovery, simctl: FakeSimctl) -> (Simulators, Arc<FakeDiscovery>, Arc<FakeSimctl>) {
        let discovery = Arc::new(discovery);
        let simctl = Arc::new(simctl);
        (
            Simulators::new(discovery.clone(), simctl.clone()),
            discovery,
            simctl,
        )
    }

    #[tokio::test]
    async fn test_concurrent_loads_collapse_into_one_listing() {
        let listing = Listing::default().device("P1", IOS, PHONE_TYPE).xml();
        let (simulators, discovery, _) = simulators(FakeDiscovery::new([listing]), FakeSimctl::default());
        let simulators = Arc::new(simulators);

        let loads: Vec<_> = (0..5)
            .map(|_| {
                let simulators = Arc::clone(&simulators);
                tokio::spawn(async move { simulators.load(false).await })
            })
            .collect();
        for load in loads {
            load.await.unwrap().unwrap();
        }
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
        assert_eq!(simulators.devices().collect().await.len(), 1);

        simulators.load(true).await.unwrap();
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_built_before_load_sees_results() {
        let listing = Listing::default()
            .device("P1", IOS, PHONE_TYPE)
            .device("W1", WATCHOS, WATCH_TYPE)
            .xml();
        let (simulators, _, _) = simulators(FakeDiscovery::new([listing]), FakeSimctl::default());
        let simulators = Arc::new(simulators);

        let watches = {
            let query = simulators.candidates(TestTarget::SimulatorWatchos);
            tokio::spawn(async move { query.collect().await })
        };
        simulators.load(false).await.unwrap();

        let watches = watches.await.unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].udid, "W1");
    }

    #[tokio::test]
    async fn test_failed_load_completes_lists_and_reports_failure() {
        let (simulators, discovery, _) = simulators(FakeDiscovery::failing(), FakeSimctl::default());
        let err = simulators.load(false).await.unwrap_err();
        assert!(matches!(err, CatalogError::LoadFailed { what: "simulators", .. }));
        assert!(simulators.devices().is_empty().await);

        // Later callers see the same failure without listing again.
        assert!(simulators.load(false).await.is_err());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_simulator_is_created_and_reloaded() {
        let before = Listing::default().xml();
        let after = Listing::default().device("NEW-P", IOS, PHONE_TYPE).xml();
        let (simulators, _, simctl) = simulators(
            FakeDiscovery::new([before, after]),
            FakeSimctl::default().creating(&["NEW-P"]),
        );

        let selection = simulators.find_simulators(TestTarget::SimulatorIos).await.unwrap();
        assert_eq!(selection.device.udid, "NEW-P");
        assert_eq!(selection.device.data_path, "/sims/NEW-P");
        assert_eq!(selection.companion, None);
        assert_eq!(simctl.calls(), vec![format!("create {PHONE_TYPE} {IOS}")]);
    }

    #[tokio::test]
    async fn test_tvos_without_runtime_is_no_runtime() {
        let (simulators, _, _) = simulators(
            FakeDiscovery::new([Listing::default().xml()]),
            FakeSimctl::default(),
        );
        let err = simulators.find_simulators(TestTarget::SimulatorTvos).await.unwrap_err();
        assert!(matches!(err, CatalogError::NoRuntime(TestTarget::SimulatorTvos)));
    }

    #[tokio::test]
    async fn test_watch_prefers_one_already_paired_with_the_phone() {
        let listing = Listing::default()
            .device("P1", IOS, PHONE_TYPE)
            .device("W1", WATCHOS, WATCH_TYPE)
            .device("W2", WATCHOS, WATCH_TYPE)
            .pair("W2", "P1")
            .xml();
        let (simulators, _, simctl) = simulators(FakeDiscovery::new([listing]), FakeSimctl::default());

        let selection = simulators.find_simulators(TestTarget::SimulatorWatchos).await.unwrap();
        assert_eq!(selection.device.udid, "W2");
        assert_eq!(selection.companion.unwrap().udid, "P1");
        assert!(simctl.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pairing_retry_provisions_a_new_watch() {
        let listing = Listing::default()
            .device("P1", IOS, PHONE_TYPE)
            .device("P2", IOS, PHONE_TYPE)
            .device("W1", WATCHOS, WATCH_TYPE)
            .pair("W1", "P2");
        let (simulators, _, simctl) = simulators(
            FakeDiscovery::new([listing.xml()]),
            FakeSimctl::default().creating(&["W-NEW"]).pairing(vec![
                ProcessOutput::failure(
                    1,
                    "Unable to pair: W1 is already paired with the maximum number of devices.",
                ),
                ProcessOutput::success(""),
            ]),
        );
        simulators.load(false).await.unwrap();
        let devices = simulators.devices().collect().await;
        let watch = devices.iter().find(|d| d.udid == "W1").unwrap();
        let phone = devices.iter().find(|d| d.udid == "P1").unwrap();

        let paired = simulators.pair(watch, phone).await.unwrap();
        assert_eq!(paired.udid, "W-NEW");
        assert_eq!(paired.runtime, WATCHOS);
        assert_eq!(
            simctl.calls(),
            vec![
                "pair W1 P1".to_string(),
                format!("create {WATCH_TYPE} {WATCHOS}"),
                "pair W-NEW P1".to_string(),
            ]
        );

        // The original pair was never touched.
        let pairs = simulators.pairs().collect().await;
        assert!(pairs.iter().any(|p| p.gizmo == "W1" && p.companion == "P2"));
    }

    #[tokio::test]
    async fn test_unrecoverable_pair_error_is_hard_failure() {
        let listing = Listing::default()
            .device("P1", IOS, PHONE_TYPE)
            .device("W1", WATCHOS, WATCH_TYPE);
        let (simulators, _, simctl) = simulators(
            FakeDiscovery::new([listing.xml()]),
            FakeSimctl::default().pairing(vec![ProcessOutput::failure(1, "Invalid device state")]),
        );

        let err = simulators.find_simulators(TestTarget::SimulatorWatchos).await.unwrap_err();
        assert!(matches!(err, CatalogError::PairFailed { .. }));
        assert_eq!(simctl.calls(), vec!["pair W1 P1".to_string()]);
    }
}
