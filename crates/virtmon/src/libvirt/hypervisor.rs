//! Hypervisor access seam.
//!
//! These traits mirror the narrow slice of the libvirt API the collector
//! needs. The production implementation lives in [`crate::libvirt::driver`]
//! behind the `libvirt` cargo feature; tests use drop-counting fakes.
//!
//! Counters the hypervisor may not report for a given snapshot are modeled
//! as `Option`: `None` means "not set" and the corresponding sample must be
//! omitted, never emitted as zero.

use crate::error::Result;

/// Runtime info for one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainRuntimeInfo {
    /// Domain state code.
    pub state: u32,
    /// Maximum allowed memory in KiB.
    pub max_mem_kib: u64,
    /// Current memory balloon size in KiB.
    pub memory_kib: u64,
    /// Number of virtual CPUs.
    pub nr_virt_cpu: u32,
    /// Cumulative CPU time in nanoseconds.
    pub cpu_time_ns: u64,
}

/// Per-domain CPU time breakdown, each value gated by its own presence flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTotals {
    /// Total CPU time in nanoseconds.
    pub cpu_time_ns: Option<u64>,
    /// System-mode CPU time in nanoseconds.
    pub system_time_ns: Option<u64>,
    /// User-mode CPU time in nanoseconds.
    pub user_time_ns: Option<u64>,
    /// Virtual-CPU time in nanoseconds.
    pub vcpu_time_ns: Option<u64>,
}

/// One balloon memory statistic.
///
/// The tag identifies the meaning of the value; unrecognized tags are
/// ignored by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStat {
    /// Statistic tag (libvirt `VIR_DOMAIN_MEMORY_STAT_*`).
    pub tag: i32,
    /// Statistic value.
    pub value: u64,
}

/// Balloon statistic tags the collector understands.
pub mod memory_stat_tag {
    /// Memory left completely unused by the guest, in KiB.
    pub const UNUSED: i32 = 4;
    /// Total usable memory as seen by the guest, in KiB.
    pub const AVAILABLE: i32 = 5;
    /// Resident set size of the domain process, in KiB.
    pub const RSS: i32 = 7;
    /// Memory usable without pushing the guest to swap, in KiB.
    pub const USABLE: i32 = 8;
    /// Timestamp of the last statistics refresh, in seconds.
    pub const LAST_UPDATE: i32 = 9;
}

/// Static sizing of one block device image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockDeviceInfo {
    /// Logical size of the image in bytes.
    pub capacity: u64,
    /// Host storage occupied by the image in bytes.
    pub allocation: u64,
    /// Physical size of the image container in bytes.
    pub physical: u64,
}

/// Cumulative I/O counters of one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockIoStats {
    /// Bytes read.
    pub rd_bytes: Option<u64>,
    /// Read requests.
    pub rd_reqs: Option<u64>,
    /// Time spent reading, in nanoseconds.
    pub rd_time_ns: Option<u64>,
    /// Bytes written.
    pub wr_bytes: Option<u64>,
    /// Write requests.
    pub wr_reqs: Option<u64>,
    /// Time spent writing, in nanoseconds.
    pub wr_time_ns: Option<u64>,
    /// Flush requests.
    pub flush_reqs: Option<u64>,
    /// Time spent flushing, in nanoseconds.
    pub flush_time_ns: Option<u64>,
}

/// Cumulative I/O counters of one network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceIoStats {
    /// Bytes received.
    pub rx_bytes: Option<u64>,
    /// Packets received.
    pub rx_packets: Option<u64>,
    /// Receive errors.
    pub rx_errs: Option<u64>,
    /// Receive drops.
    pub rx_drops: Option<u64>,
    /// Bytes transmitted.
    pub tx_bytes: Option<u64>,
    /// Packets transmitted.
    pub tx_packets: Option<u64>,
    /// Transmit errors.
    pub tx_errs: Option<u64>,
    /// Transmit drops.
    pub tx_drops: Option<u64>,
}

/// Opens connections to the hypervisor daemon.
pub trait HypervisorConnector: Send + Sync {
    /// Opens a new connection for one scrape.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon is unreachable.
    fn connect(&self) -> Result<Box<dyn HypervisorConnection>>;
}

/// One per-scrape connection to the hypervisor daemon.
///
/// The connection is closed when the value is dropped.
pub trait HypervisorConnection {
    /// Identifiers of all active domains.
    ///
    /// # Errors
    ///
    /// Returns an error when the enumeration fails.
    fn active_domain_ids(&self) -> Result<Vec<u32>>;

    /// Number of defined but inactive domains.
    ///
    /// Implementations must release every handle obtained while counting
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns an error when the enumeration fails.
    fn inactive_domain_count(&self) -> Result<usize>;

    /// Looks up one domain by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the domain no longer exists; callers treat
    /// this as "the domain stopped between enumeration and lookup".
    fn lookup_domain(&self, id: u32) -> Result<Box<dyn DomainHandle>>;
}

/// A handle to one domain.
///
/// Handles own a reference on the underlying hypervisor object and release
/// it exactly once on drop, on every code path.
pub trait DomainHandle {
    /// The domain name.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn name(&self) -> Result<String>;

    /// The XML descriptor of the domain.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn xml_desc(&self) -> Result<String>;

    /// Runtime state and resource usage.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn runtime_info(&self) -> Result<DomainRuntimeInfo>;

    /// CPU time breakdown for the whole domain.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn cpu_totals(&self) -> Result<CpuTotals>;

    /// Balloon memory statistics.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn memory_stats(&self) -> Result<Vec<MemoryStat>>;

    /// Static sizing of one block device, by target device name.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn block_info(&self, target_dev: &str) -> Result<BlockDeviceInfo>;

    /// I/O counters of one block device, by target device name.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn block_io_stats(&self, target_dev: &str) -> Result<BlockIoStats>;

    /// I/O counters of one network interface, by target device name.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon query fails.
    fn interface_io_stats(&self, target_dev: &str) -> Result<InterfaceIoStats>;
}
