//! Test targets - where a test project is built for and run on.

use crate::device::Platform;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A build/run destination for a test project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestTarget {
    /// iOS simulator
    SimulatorIos,
    /// tvOS simulator
    SimulatorTvos,
    /// watchOS simulator (paired with an iOS simulator)
    SimulatorWatchos,
    /// Physical iOS device
    DeviceIos,
    /// Physical tvOS device
    DeviceTvos,
    /// Physical watch (paired with a physical phone)
    DeviceWatchos,
    /// The host Mac
    Macos,
}

impl TestTarget {
    /// All targets, in declaration order.
    pub const ALL: [TestTarget; 7] = [
        TestTarget::SimulatorIos,
        TestTarget::SimulatorTvos,
        TestTarget::SimulatorWatchos,
        TestTarget::DeviceIos,
        TestTarget::DeviceTvos,
        TestTarget::DeviceWatchos,
        TestTarget::Macos,
    ];

    /// Platform family of the target.
    pub fn platform(&self) -> Platform {
        match self {
            TestTarget::SimulatorIos | TestTarget::DeviceIos => Platform::Ios,
            TestTarget::SimulatorTvos | TestTarget::DeviceTvos => Platform::Tvos,
            TestTarget::SimulatorWatchos | TestTarget::DeviceWatchos => Platform::Watchos,
            TestTarget::Macos => Platform::Macos,
        }
    }

    /// Check if the target runs on a simulator.
    pub fn is_simulator(&self) -> bool {
        matches!(
            self,
            TestTarget::SimulatorIos | TestTarget::SimulatorTvos | TestTarget::SimulatorWatchos
        )
    }

    /// Check if the target runs on a physical device.
    pub fn is_device(&self) -> bool {
        matches!(
            self,
            TestTarget::DeviceIos | TestTarget::DeviceTvos | TestTarget::DeviceWatchos
        )
    }

    /// Check if the target needs a companion phone.
    pub fn is_watch(&self) -> bool {
        self.platform() == Platform::Watchos
    }

    /// Build platform name handed to the build tool.
    pub fn build_platform(&self) -> &'static str {
        match self {
            TestTarget::SimulatorIos => "iphonesimulator",
            TestTarget::SimulatorTvos => "appletvsimulator",
            TestTarget::SimulatorWatchos => "watchsimulator",
            TestTarget::DeviceIos => "iphoneos",
            TestTarget::DeviceTvos => "appletvos",
            TestTarget::DeviceWatchos => "watchos",
            TestTarget::Macos => "macosx",
        }
    }

    /// Runtime identifier prefix for simulator targets.
    pub fn runtime_prefix(&self) -> Option<String> {
        self.is_simulator().then(|| {
            format!(
                "com.apple.CoreSimulator.SimRuntime.{}-",
                self.platform().runtime_name()
            )
        })
    }

    /// Device type used when a simulator has to be provisioned.
    pub fn simulator_device_type(&self) -> Option<&'static str> {
        match self {
            TestTarget::SimulatorIos => Some("com.apple.CoreSimulator.SimDeviceType.iPhone-15"),
            TestTarget::SimulatorTvos => {
                Some("com.apple.CoreSimulator.SimDeviceType.Apple-TV-4K-3rd-generation-4K")
            }
            TestTarget::SimulatorWatchos => {
                Some("com.apple.CoreSimulator.SimDeviceType.Apple-Watch-Series-9-45mm")
            }
            _ => None,
        }
    }

    /// Target of the companion phone for watch simulators.
    pub fn companion(&self) -> Option<TestTarget> {
        match self {
            TestTarget::SimulatorWatchos => Some(TestTarget::SimulatorIos),
            TestTarget::DeviceWatchos => Some(TestTarget::DeviceIos),
            _ => None,
        }
    }

    /// Kebab-case name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestTarget::SimulatorIos => "simulator-ios",
            TestTarget::SimulatorTvos => "simulator-tvos",
            TestTarget::SimulatorWatchos => "simulator-watchos",
            TestTarget::DeviceIos => "device-ios",
            TestTarget::DeviceTvos => "device-tvos",
            TestTarget::DeviceWatchos => "device-watchos",
            TestTarget::Macos => "macos",
        }
    }
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
