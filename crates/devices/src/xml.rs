//! Parsers for the XML listings written by the discovery tool.

use crate::error::CatalogError;
use serde::Deserialize;
use simlane_core::{
    Architecture, ConnectionType, Device, DeviceClass, DevicePair, SimDeviceType, SimRuntime,
    SimulatorDevice,
};

/// Everything a simulator listing describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorListing {
    /// Installed runtimes
    pub runtimes: Vec<SimRuntime>,
    /// Supported device types
    pub device_types: Vec<SimDeviceType>,
    /// Existing simulators
    pub devices: Vec<SimulatorDevice>,
    /// Watch/phone pairs
    pub pairs: Vec<DevicePair>,
}

#[derive(Debug, Default, Deserialize)]
struct RawListing {
    #[serde(rename = "Simulator", default)]
    simulator: Option<RawSimulator>,
    #[serde(rename = "Device", default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSimulator {
    #[serde(rename = "SupportedRuntimes", default)]
    runtimes: RawRuntimes,
    #[serde(rename = "SupportedDeviceTypes", default)]
    device_types: RawDeviceTypes,
    #[serde(rename = "AvailableDevices", default)]
    devices: RawSimDevices,
    #[serde(rename = "AvailableDevicePairs", default)]
    pairs: RawPairs,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuntimes {
    #[serde(rename = "SimRuntime", default)]
    items: Vec<RawRuntime>,
}

#[derive(Debug, Deserialize)]
struct RawRuntime {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Identifier", default)]
    identifier: Option<String>,
    #[serde(rename = "Version", default)]
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDeviceTypes {
    #[serde(rename = "SimDeviceType", default)]
    items: Vec<RawDeviceType>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceType {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Identifier", default)]
    identifier: Option<String>,
    #[serde(rename = "ProductFamilyId", default)]
    product_family: Option<String>,
    #[serde(rename = "Supports64Bits", default)]
    supports_64bits: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSimDevices {
    #[serde(rename = "SimDevice", default)]
    items: Vec<RawSimDevice>,
}

#[derive(Debug, Deserialize)]
struct RawSimDevice {
    #[serde(rename = "@UDID")]
    udid: String,
    #[serde(rename = "@Name", default)]
    name: Option<String>,
    #[serde(rename = "SimRuntime", default)]
    runtime: Option<String>,
    #[serde(rename = "SimDeviceType", default)]
    device_type: Option<String>,
    #[serde(rename = "DataPath", default)]
    data_path: Option<String>,
    #[serde(rename = "LogPath", default)]
    log_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPairs {
    #[serde(rename = "SimDevicePair", default)]
    items: Vec<RawPair>,
}

#[derive(Debug, Deserialize)]
struct RawPair {
    #[serde(rename = "@UDID")]
    udid: String,
    #[serde(rename = "Companion", default)]
    companion: Option<String>,
    #[serde(rename = "Gizmo", default)]
    gizmo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "DeviceIdentifier", default)]
    udid: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "DeviceClass", default)]
    device_class: Option<String>,
    #[serde(rename = "CompanionIdentifier", default)]
    companion_identifier: Option<String>,
    #[serde(rename = "ProductType", default)]
    product_type: Option<String>,
    #[serde(rename = "ProductVersion", default)]
    product_version: Option<String>,
    #[serde(rename = "InterfaceType", default)]
    interface_type: Option<String>,
    #[serde(rename = "IsUsableForDebugging", default)]
    usable_for_debugging: Option<String>,
    #[serde(rename = "CPUArchitecture", default)]
    architecture: Option<String>,
}

fn text(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    Some(text(value)).filter(|s| !s.is_empty())
}

fn flag(value: Option<String>) -> bool {
    matches!(
        text(value).to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    )
}

fn parse_raw(what: &'static str, xml: &str) -> Result<RawListing, CatalogError> {
    quick_xml::de::from_str(xml).map_err(|e| CatalogError::Parse {
        what,
        reason: e.to_string(),
    })
}

/// Parse a simulator listing.
pub fn parse_simulators(xml: &str) -> Result<SimulatorListing, CatalogError> {
    let simulator = parse_raw("simulator", xml)?.simulator.unwrap_or_default();

    let runtimes = simulator
        .runtimes
        .items
        .into_iter()
        .filter_map(|raw| {
            Some(SimRuntime {
                identifier: non_empty(raw.identifier)?,
                name: text(raw.name),
                version: text(raw.version),
            })
        })
        .collect();

    let device_types = simulator
        .device_types
        .items
        .into_iter()
        .filter_map(|raw| {
            Some(SimDeviceType {
                identifier: non_empty(raw.identifier)?,
                name: text(raw.name),
                product_family: text(raw.product_family),
                supports_64bits: flag(raw.supports_64bits),
            })
        })
        .collect();

    let devices = simulator
        .devices
        .items
        .into_iter()
        .map(|raw| SimulatorDevice {
            udid: raw.udid.trim().to_string(),
            name: text(raw.name),
            runtime: text(raw.runtime),
            device_type: text(raw.device_type),
            data_path: text(raw.data_path),
            log_path: text(raw.log_path),
        })
        .filter(|device| !device.udid.is_empty())
        .collect();

    let pairs = simulator
        .pairs
        .items
        .into_iter()
        .filter_map(|raw| {
            Some(DevicePair {
                udid: raw.udid.trim().to_string(),
                companion: non_empty(raw.companion)?,
                gizmo: non_empty(raw.gizmo)?,
            })
        })
        .collect();

    Ok(SimulatorListing {
        runtimes,
        device_types,
        devices,
        pairs,
    })
}

/// Parse a physical device listing.
pub fn parse_devices(xml: &str) -> Result<Vec<Device>, CatalogError> {
    let listing = parse_raw("device", xml)?;
    Ok(listing
        .devices
        .into_iter()
        .filter_map(|raw| {
            Some(Device {
                udid: non_empty(raw.udid)?,
                name: text(raw.name),
                device_class: DeviceClass::parse(&text(raw.device_class)),
                product_type: text(raw.product_type),
                product_version: text(raw.product_version),
                architecture: Architecture::parse(&text(raw.architecture)),
                connection: ConnectionType::parse(&text(raw.interface_type)),
                usable_for_debugging: flag(raw.usable_for_debugging),
                companion_identifier: non_empty(raw.companion_identifier),
            })
        })
        .collect())
}
