//! Domain XML descriptor schema.
//!
//! Only the slice of the descriptor the collector needs is modeled: the
//! UUID, the device topology (disks and network interfaces), and the
//! optional Nova instance metadata block. Every field defaults to its empty
//! value, so a descriptor without a metadata block yields empty-string
//! labels rather than a parse error.

use serde::Deserialize;

use crate::error::{CollectError, Result};

/// Parsed domain XML descriptor.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct DomainXml {
    /// Domain UUID.
    #[serde(default)]
    pub uuid: String,
    /// Device topology.
    #[serde(default)]
    pub devices: Devices,
    /// Optional workload-owner metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// The `<devices>` block.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Devices {
    /// Block devices.
    #[serde(default, rename = "disk")]
    pub disks: Vec<Disk>,
    /// Network interfaces.
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<Interface>,
}

/// One `<disk>` device.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Disk {
    /// Device class, e.g. `disk`, `cdrom`, `fd`.
    #[serde(default, rename = "@device")]
    pub device: String,
    /// Backing source.
    #[serde(default)]
    pub source: DiskSource,
    /// Guest-visible target.
    #[serde(default)]
    pub target: DiskTarget,
}

/// Disk backing source.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct DiskSource {
    /// Backing file path.
    #[serde(default, rename = "@file")]
    pub file: String,
}

/// Disk guest-visible target.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct DiskTarget {
    /// Target device name, e.g. `vda`.
    #[serde(default, rename = "@dev")]
    pub device: String,
}

/// One `<interface>` device.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Interface {
    /// Host-side source.
    #[serde(default)]
    pub source: InterfaceSource,
    /// Host-side target.
    #[serde(default)]
    pub target: InterfaceTarget,
}

/// Interface host-side source.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct InterfaceSource {
    /// Bridge name.
    #[serde(default, rename = "@bridge")]
    pub bridge: String,
}

/// Interface host-side target.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct InterfaceTarget {
    /// Target device name, e.g. `vnet0`.
    #[serde(default, rename = "@dev")]
    pub device: String,
}

/// The `<metadata>` block.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Metadata {
    /// Nova instance metadata.
    #[serde(default, rename = "nova:instance")]
    pub instance: NovaInstance,
}

/// The `<nova:instance>` metadata element.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct NovaInstance {
    /// Instance display name.
    #[serde(default, rename = "nova:name")]
    pub name: String,
    /// Flavor reference.
    #[serde(default, rename = "nova:flavor")]
    pub flavor: NovaFlavor,
    /// Owner block.
    #[serde(default, rename = "nova:owner")]
    pub owner: NovaOwner,
}

/// The `<nova:flavor>` element.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct NovaFlavor {
    /// Flavor name.
    #[serde(default, rename = "@name")]
    pub name: String,
}

/// The `<nova:owner>` element.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct NovaOwner {
    /// Owning project.
    #[serde(default, rename = "nova:project")]
    pub project: NovaProject,
}

/// The `<nova:project>` element; the project name is the element text.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct NovaProject {
    /// Project name.
    #[serde(default, rename = "$text")]
    pub name: String,
}

/// Parses a domain XML descriptor.
///
/// # Errors
///
/// Returns [`CollectError::DomainXml`] when the document is not well-formed.
pub fn parse_domain_xml(xml: &str) -> Result<DomainXml> {
    quick_xml::de::from_str(xml).map_err(|e| CollectError::DomainXml(e.to_string()))
}
