//! Host statistics probe.
//!
//! [`HostProbe`] is the seam between the host collector and the operating
//! system; [`SystemProbe`] is the production implementation backed by
//! `sysinfo` and `/proc` (via `procfs`). Every call returns a fresh
//! point-in-time snapshot; nothing is cached across scrapes.

use std::fs;

use procfs::Current;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::error::{CollectError, Result};

/// One logical CPU as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfo {
    /// Physical socket identifier.
    pub physical_id: u32,
    /// Core identifier within the socket.
    pub core_id: u32,
    /// CPU vendor string.
    pub vendor_id: String,
    /// CPU model string.
    pub model_name: String,
    /// Clock speed in MHz.
    pub mhz: f64,
}

/// Host virtual memory facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Total physical memory in bytes.
    pub total_bytes: u64,
}

/// One network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetInterface {
    /// Interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Assigned addresses in CIDR notation.
    pub addresses: Vec<String>,
    /// Hardware (MAC) address.
    pub mac_address: String,
    /// Maximum transmission unit.
    pub mtu: u64,
}

/// Host identity facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    /// Host name.
    pub hostname: String,
    /// Operating system family, e.g. `linux`.
    pub os: String,
    /// Distribution identifier, e.g. `ubuntu`.
    pub platform: String,
    /// Distribution family or OS name.
    pub platform_family: String,
    /// Distribution version.
    pub platform_version: String,
    /// Machine identifier.
    pub host_id: String,
    /// Virtualization system, e.g. `kvm`, when detectable.
    pub virtualization_system: String,
    /// Virtualization role, `host` or `guest`, when detectable.
    pub virtualization_role: String,
}

/// One mounted disk partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPartition {
    /// Mount point path.
    pub mountpoint: String,
    /// Total capacity in bytes, `None` when usage could not be read.
    pub total_bytes: Option<u64>,
}

/// Point-in-time access to host OS statistics.
pub trait HostProbe: Send + Sync {
    /// All logical CPUs.
    ///
    /// # Errors
    ///
    /// Returns an error when CPU information cannot be read.
    fn cpu_info(&self) -> Result<Vec<CpuInfo>>;

    /// Virtual memory facts.
    ///
    /// # Errors
    ///
    /// Returns an error when memory information cannot be read.
    fn virtual_memory(&self) -> Result<MemoryInfo>;

    /// All network interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error when the interface list cannot be read.
    fn net_interfaces(&self) -> Result<Vec<NetInterface>>;

    /// Host identity facts.
    ///
    /// # Errors
    ///
    /// Returns an error when host identity cannot be determined.
    fn host_identity(&self) -> Result<HostIdentity>;

    /// All mounted disk partitions.
    ///
    /// # Errors
    ///
    /// Returns an error when the partition list cannot be read.
    fn disk_partitions(&self) -> Result<Vec<DiskPartition>>;
}

/// Production probe backed by `sysinfo` and `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl SystemProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HostProbe for SystemProbe {
    fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        let cpuinfo = procfs::CpuInfo::current()
            .map_err(|e| CollectError::HostProbe(format!("/proc/cpuinfo: {e}")))?;

        let cpus = sys
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, cpu)| CpuInfo {
                physical_id: cpuinfo.physical_id(i).unwrap_or(0),
                core_id: cpuinfo
                    .get_field(i, "core id")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(i as u32),
                vendor_id: cpu.vendor_id().to_string(),
                model_name: cpu.brand().to_string(),
                mhz: cpu.frequency() as f64,
            })
            .collect();
        Ok(cpus)
    }

    fn virtual_memory(&self) -> Result<MemoryInfo> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        Ok(MemoryInfo {
            total_bytes: sys.total_memory(),
        })
    }

    fn net_interfaces(&self) -> Result<Vec<NetInterface>> {
        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<NetInterface> = networks
            .iter()
            .map(|(name, data)| NetInterface {
                index: read_sysfs_u64(&format!("/sys/class/net/{name}/ifindex")) as u32,
                name: name.clone(),
                addresses: data.ip_networks().iter().map(ToString::to_string).collect(),
                mac_address: data.mac_address().to_string(),
                mtu: read_sysfs_u64(&format!("/sys/class/net/{name}/mtu")),
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }

    fn host_identity(&self) -> Result<HostIdentity> {
        let hostname = hostname::get()
            .map_err(|e| CollectError::HostProbe(format!("hostname: {e}")))?
            .to_string_lossy()
            .into_owned();

        let (virtualization_system, virtualization_role) = detect_virtualization();

        Ok(HostIdentity {
            hostname,
            os: std::env::consts::OS.to_string(),
            platform: System::distribution_id(),
            platform_family: System::name().unwrap_or_default(),
            platform_version: System::os_version().unwrap_or_default(),
            host_id: fs::read_to_string("/etc/machine-id")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            virtualization_system,
            virtualization_role,
        })
    }

    fn disk_partitions(&self) -> Result<Vec<DiskPartition>> {
        let disks = Disks::new_with_refreshed_list();
        Ok(disks
            .list()
            .iter()
            .map(|disk| DiskPartition {
                mountpoint: disk.mount_point().display().to_string(),
                total_bytes: Some(disk.total_space()),
            })
            .collect())
    }
}

fn read_sysfs_u64(path: &str) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn detect_virtualization() -> (String, String) {
    if std::path::Path::new("/sys/module/kvm").exists() {
        return ("kvm".to_string(), "host".to_string());
    }
    let is_guest = procfs::CpuInfo::current()
        .ok()
        .and_then(|info| info.get_field(0, "flags").map(|f| f.contains("hypervisor")))
        .unwrap_or(false);
    if is_guest {
        (String::new(), "guest".to_string())
    } else {
        (String::new(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_info_default_is_zeroed() {
        let info = CpuInfo::default();
        assert_eq!(info.physical_id, 0);
        assert_eq!(info.core_id, 0);
        assert!(info.vendor_id.is_empty());
    }

    #[test]
    fn disk_partition_without_usage_carries_none() {
        let partition = DiskPartition {
            mountpoint: "/data".to_string(),
            total_bytes: None,
        };
        assert_eq!(partition.total_bytes, None);
    }

    #[test]
    fn system_probe_memory_is_readable() {
        let probe = SystemProbe::new();
        let mem = probe.virtual_memory().unwrap();
        assert!(mem.total_bytes > 0);
    }

    #[test]
    fn system_probe_identity_has_os() {
        let probe = SystemProbe::new();
        let identity = probe.host_identity().unwrap();
        assert!(!identity.os.is_empty());
    }
}
