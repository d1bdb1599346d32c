//! Device model - physical devices and simulators as reported by discovery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Apple platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iPhone / iPad / iPod
    Ios,
    /// Apple TV
    Tvos,
    /// Apple Watch
    Watchos,
    /// Mac desktop
    Macos,
}

impl Platform {
    /// Name used in runtime identifiers (`com.apple.CoreSimulator.SimRuntime.<name>-17-0`).
    pub fn runtime_name(&self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::Tvos => "tvOS",
            Platform::Watchos => "watchOS",
            Platform::Macos => "macOS",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.runtime_name())
    }
}

/// CPU architecture class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// 64-bit ARM
    Arm64,
    /// 32-bit pointer ARM64 (watchOS)
    Arm64_32,
    /// 32-bit ARM (older watches)
    Armv7k,
    /// Intel
    X86_64,
    /// Not reported
    Unknown,
}

impl Architecture {
    /// Parse the architecture string reported by the discovery tool.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "arm64" | "arm64e" => Architecture::Arm64,
            "arm64_32" => Architecture::Arm64_32,
            "armv7k" => Architecture::Armv7k,
            "x86_64" => Architecture::X86_64,
            _ => Architecture::Unknown,
        }
    }
}

/// Hardware class of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// iPhone
    IPhone,
    /// iPad
    IPad,
    /// iPod touch
    IPod,
    /// Apple TV
    AppleTv,
    /// Apple Watch
    Watch,
    /// Unrecognized class
    Unknown,
}

impl DeviceClass {
    /// Parse the device class reported by the discovery tool.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "iPhone" => DeviceClass::IPhone,
            "iPad" => DeviceClass::IPad,
            "iPod" => DeviceClass::IPod,
            "AppleTV" => DeviceClass::AppleTv,
            "Watch" => DeviceClass::Watch,
            _ => DeviceClass::Unknown,
        }
    }

    /// Platform family for this class.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            DeviceClass::IPhone | DeviceClass::IPad | DeviceClass::IPod => Some(Platform::Ios),
            DeviceClass::AppleTv => Some(Platform::Tvos),
            DeviceClass::Watch => Some(Platform::Watchos),
            DeviceClass::Unknown => None,
        }
    }
}

/// How a physical device is attached to the host.
///
/// Variants are declared fastest first; the derived ordering is the
/// preference order when several devices are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// USB cable
    Usb,
    /// Network
    Wifi,
    /// Not reported
    Unknown,
    /// Anything else (e.g. proxied through a companion)
    Other,
}

impl ConnectionType {
    /// Parse the interface type reported by the discovery tool.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "usb" => ConnectionType::Usb,
            "wifi" | "network" => ConnectionType::Wifi,
            "" | "unknown" => ConnectionType::Unknown,
            _ => ConnectionType::Other,
        }
    }
}

/// Anything a run task can be bound to.
pub trait TargetDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// Unique device identifier
    fn udid(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    /// Platform family, if known
    fn platform(&self) -> Option<Platform>;

    /// Estimated speed; lower ranks are preferred.
    fn speed_rank(&self) -> ConnectionType {
        ConnectionType::Usb
    }
}

/// A physical device attached to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier
    pub udid: String,

    /// Device name
    pub name: String,

    /// Hardware class
    pub device_class: DeviceClass,

    /// Product type (e.g. "iPhone15,2")
    pub product_type: String,

    /// OS version (e.g. "17.2")
    pub product_version: String,

    /// CPU architecture
    pub architecture: Architecture,

    /// How the device is attached
    pub connection: ConnectionType,

    /// Whether the device can be used for debugging/running apps
    pub usable_for_debugging: bool,

    /// UDID of the paired phone (watches only)
    pub companion_identifier: Option<String>,
}

impl TargetDevice for Device {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Option<Platform> {
        self.device_class.platform()
    }

    fn speed_rank(&self) -> ConnectionType {
        self.connection
    }
}

/// A simulator runtime (e.g. iOS 17.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRuntime {
    /// Display name
    pub name: String,

    /// Runtime identifier (com.apple.CoreSimulator.SimRuntime.iOS-17-2)
    pub identifier: String,

    /// Version as reported
    pub version: String,
}

impl SimRuntime {
    /// Platform encoded in the runtime identifier.
    pub fn platform(&self) -> Option<Platform> {
        platform_from_runtime(&self.identifier)
    }

    /// Version split into numeric components for ordering.
    pub fn version_key(&self) -> Vec<u32> {
        self.version
            .split('.')
            .filter_map(|part| part.trim().parse().ok())
            .collect()
    }
}

/// A simulator device type (e.g. iPhone 15).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDeviceType {
    /// Display name
    pub name: String,

    /// Device type identifier (com.apple.CoreSimulator.SimDeviceType.iPhone-15)
    pub identifier: String,

    /// Product family (IPhone, IPad, AppleTV, Watch)
    pub product_family: String,

    /// Whether the type runs 64-bit code
    pub supports_64bits: bool,
}

/// A simulator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// Unique device identifier
    pub udid: String,

    /// Simulator name
    pub name: String,

    /// Runtime identifier
    pub runtime: String,

    /// Device type identifier
    pub device_type: String,

    /// Data directory
    pub data_path: String,

    /// Log directory
    pub log_path: String,
}

impl SimulatorDevice {
    /// Check if this simulator is a watch.
    pub fn is_watch(&self) -> bool {
        self.platform() == Some(Platform::Watchos)
    }
}

impl TargetDevice for SimulatorDevice {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Option<Platform> {
        platform_from_runtime(&self.runtime)
    }
}

/// A watch simulator paired with a companion phone simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePair {
    /// Pair identifier
    pub udid: String,

    /// Phone UDID
    pub companion: String,

    /// Watch UDID
    pub gizmo: String,
}

fn platform_from_runtime(identifier: &str) -> Option<Platform> {
    let name = identifier.rsplit('.').next()?;
    if name.starts_with("watchOS") {
        Some(Platform::Watchos)
    } else if name.starts_with("tvOS") {
        Some(Platform::Tvos)
    } else if name.starts_with("iOS") {
        Some(Platform::Ios)
    } else if name.starts_with("macOS") {
        Some(Platform::Macos)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_preference_order() {
        let mut kinds = vec![
            ConnectionType::Other,
            ConnectionType::Unknown,
            ConnectionType::Wifi,
            ConnectionType::Usb,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ConnectionType::Usb,
                ConnectionType::Wifi,
                ConnectionType::Unknown,
                ConnectionType::Other,
            ]
        );
    }

    #[test]
    fn test_platform_from_runtime_identifier() {
        let sim = SimulatorDevice {
            udid: "A".into(),
            name: "Watch".into(),
            runtime: "com.apple.CoreSimulator.SimRuntime.watchOS-10-2".into(),
            device_type: "com.apple.CoreSimulator.SimDeviceType.Apple-Watch-Series-9-45mm".into(),
            data_path: String::new(),
            log_path: String::new(),
        };
        assert!(sim.is_watch());
        assert_eq!(sim.platform(), Some(Platform::Watchos));
    }

    #[test]
    fn test_runtime_version_key_orders_numerically() {
        let older = SimRuntime {
            name: "iOS 9.3".into(),
            identifier: "com.apple.CoreSimulator.SimRuntime.iOS-9-3".into(),
            version: "9.3".into(),
        };
        let newer = SimRuntime {
            name: "iOS 17.2".into(),
            identifier: "com.apple.CoreSimulator.SimRuntime.iOS-17-2".into(),
            version: "17.2".into(),
        };
        assert!(newer.version_key() > older.version_key());
    }

    #[test]
    fn test_device_class_platform() {
        assert_eq!(DeviceClass::parse("Watch").platform(), Some(Platform::Watchos));
        assert_eq!(DeviceClass::parse("iPad").platform(), Some(Platform::Ios));
        assert_eq!(DeviceClass::parse("Toaster").platform(), None);
    }
}
