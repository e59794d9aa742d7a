//! Libvirt domain collector.
//!
//! Connects to the local virtualization daemon once per scrape, enumerates
//! domains, and translates runtime info, CPU, balloon, block-device, and
//! network-interface counters into samples. Collection is strictly
//! sequential; every domain handle is released exactly once via RAII on
//! every path.

pub mod hypervisor;
pub mod xml;

#[cfg(feature = "libvirt")]
pub mod driver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::metrics::{Collector, Descriptor, Sample, SampleSink, fq_name};

pub use hypervisor::{
    BlockDeviceInfo, BlockIoStats, CpuTotals, DomainHandle, DomainRuntimeInfo, HypervisorConnection,
    HypervisorConnector, InterfaceIoStats, MemoryStat, memory_stat_tag,
};
pub use xml::{DomainXml, parse_domain_xml};

#[cfg(feature = "libvirt")]
pub use driver::LibvirtConnector;

const NAMESPACE: &str = "libvirt";

/// The default connection URI for the local system daemon.
pub const DEFAULT_URI: &str = "qemu:///system";

/// Which metric subset the collector emits.
///
/// `Basic` keeps only domain info and per-device I/O counters; `Full` adds
/// domain counts, the CPU time breakdown, balloon statistics, and block
/// device sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsProfile {
    /// Emit every metric family.
    #[default]
    Full,
    /// Emit the reduced subset.
    Basic,
}

impl StatsProfile {
    fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Collector for libvirt domain metrics.
pub struct LibvirtCollector {
    connector: Box<dyn HypervisorConnector>,
    profile: StatsProfile,

    up: Arc<Descriptor>,
    active: Arc<Descriptor>,
    total: Arc<Descriptor>,

    domain_state: Arc<Descriptor>,
    max_mem: Arc<Descriptor>,
    memory_usage: Arc<Descriptor>,
    virtual_cpus: Arc<Descriptor>,
    cpu_time: Arc<Descriptor>,

    cpu_cpu_time: Arc<Descriptor>,
    cpu_system_time: Arc<Descriptor>,
    cpu_user_time: Arc<Descriptor>,
    cpu_vcpu_time: Arc<Descriptor>,

    mem_unused: Arc<Descriptor>,
    mem_available: Arc<Descriptor>,
    mem_usable: Arc<Descriptor>,
    mem_rss: Arc<Descriptor>,
    mem_last_update: Arc<Descriptor>,

    block_capacity: Arc<Descriptor>,
    block_allocation: Arc<Descriptor>,
    block_physical: Arc<Descriptor>,
    block_read_bytes: Arc<Descriptor>,
    block_read_requests: Arc<Descriptor>,
    block_read_seconds: Arc<Descriptor>,
    block_write_bytes: Arc<Descriptor>,
    block_write_requests: Arc<Descriptor>,
    block_write_seconds: Arc<Descriptor>,
    block_flush_requests: Arc<Descriptor>,
    block_flush_seconds: Arc<Descriptor>,

    iface_rx_bytes: Arc<Descriptor>,
    iface_rx_packets: Arc<Descriptor>,
    iface_rx_errors: Arc<Descriptor>,
    iface_rx_drops: Arc<Descriptor>,
    iface_tx_bytes: Arc<Descriptor>,
    iface_tx_packets: Arc<Descriptor>,
    iface_tx_errors: Arc<Descriptor>,
    iface_tx_drops: Arc<Descriptor>,
}

impl std::fmt::Debug for LibvirtCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibvirtCollector")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

const DOMAIN_LABELS: &[&str] = &["domain", "uuid", "name", "flavor", "project_name"];
const BLOCK_LABELS: &[&str] = &[
    "domain",
    "uuid",
    "name",
    "flavor",
    "project_name",
    "source_file",
    "target_device",
];
const IFACE_LABELS: &[&str] = &[
    "domain",
    "uuid",
    "name",
    "flavor",
    "project_name",
    "source_bridge",
    "target_device",
];

impl LibvirtCollector {
    /// Creates the collector and its descriptors.
    ///
    /// Workload-owner metadata labels are always exported; a descriptor
    /// without a metadata block yields empty-string label values.
    #[must_use]
    pub fn new(connector: Box<dyn HypervisorConnector>, profile: StatsProfile) -> Self {
        let domain_info = |name: &str, help: &str| {
            Descriptor::new(fq_name(NAMESPACE, "domain_info", name), help, DOMAIN_LABELS)
        };
        let cpu_state = |name: &str, help: &str| {
            Descriptor::new(fq_name(NAMESPACE, "domain_cpu_state", name), help, DOMAIN_LABELS)
        };
        let mem_state = |name: &str, help: &str| {
            Descriptor::new(fq_name(NAMESPACE, "domain_mem_state", name), help, DOMAIN_LABELS)
        };
        let block_stats = |name: &str, help: &str| {
            Descriptor::new(fq_name(NAMESPACE, "domain_block_stats", name), help, BLOCK_LABELS)
        };
        let iface_stats = |name: &str, help: &str| {
            Descriptor::new(
                fq_name(NAMESPACE, "domain_interface_stats", name),
                help,
                IFACE_LABELS,
            )
        };

        Self {
            connector,
            profile,
            up: Descriptor::new(
                fq_name(NAMESPACE, "", "up"),
                "Whether scraping libvirt's metrics was successful.",
                &[],
            ),
            active: Descriptor::new(
                fq_name(NAMESPACE, "", "active"),
                "The number of active domains.",
                &[],
            ),
            total: Descriptor::new(
                fq_name(NAMESPACE, "", "total"),
                "The number of active and inactive domains.",
                &[],
            ),
            domain_state: domain_info("domain_state", "The state of the domain."),
            max_mem: domain_info(
                "maximum_memory_bytes",
                "Maximum allowed memory of the domain, in bytes.",
            ),
            memory_usage: domain_info("memory_usage_bytes", "Memory usage of the domain, in bytes."),
            virtual_cpus: domain_info("virtual_cpus", "Number of virtual CPUs for the domain."),
            cpu_time: domain_info(
                "cpu_time_seconds_total",
                "Amount of CPU time used by the domain, in seconds.",
            ),
            cpu_cpu_time: cpu_state("cpu_cpu_time_ns", "CPU time used, in nanoseconds."),
            cpu_system_time: cpu_state(
                "cpu_system_time_ns",
                "CPU time used in system mode, in nanoseconds.",
            ),
            cpu_user_time: cpu_state(
                "cpu_user_time_ns",
                "CPU time used in user mode, in nanoseconds.",
            ),
            cpu_vcpu_time: cpu_state("cpu_vcpu_time_ns", "Virtual CPU time used, in nanoseconds."),
            mem_unused: mem_state(
                "mem_unused",
                "Memory left completely unused by the guest, in KiB.",
            ),
            mem_available: mem_state(
                "mem_available",
                "Total usable memory as seen by the guest, in KiB.",
            ),
            mem_usable: mem_state(
                "mem_usable",
                "Memory usable without pushing the guest to swap, in KiB.",
            ),
            mem_rss: mem_state(
                "mem_rss",
                "Resident set size of the process running the domain, in KiB.",
            ),
            mem_last_update: mem_state(
                "mem_last_update",
                "Timestamp of the last statistics update, in seconds.",
            ),
            block_capacity: block_stats(
                "block_capacity",
                "Logical size of the image in bytes, as seen by the guest.",
            ),
            block_allocation: block_stats(
                "block_allocation",
                "Host storage occupied by the image, in bytes.",
            ),
            block_physical: block_stats(
                "block_physical",
                "Physical size of the image container, in bytes.",
            ),
            block_read_bytes: block_stats(
                "read_bytes_total",
                "Number of bytes read from a block device.",
            ),
            block_read_requests: block_stats(
                "read_requests_total",
                "Number of read requests from a block device.",
            ),
            block_read_seconds: block_stats(
                "read_seconds_total",
                "Amount of time spent reading from a block device, in seconds.",
            ),
            block_write_bytes: block_stats(
                "write_bytes_total",
                "Number of bytes written to a block device.",
            ),
            block_write_requests: block_stats(
                "write_requests_total",
                "Number of write requests to a block device.",
            ),
            block_write_seconds: block_stats(
                "write_seconds_total",
                "Amount of time spent writing to a block device, in seconds.",
            ),
            block_flush_requests: block_stats(
                "flush_requests_total",
                "Number of flush requests of a block device.",
            ),
            block_flush_seconds: block_stats(
                "flush_seconds_total",
                "Amount of time spent flushing a block device, in seconds.",
            ),
            iface_rx_bytes: iface_stats(
                "receive_bytes_total",
                "Number of bytes received on a network interface.",
            ),
            iface_rx_packets: iface_stats(
                "receive_packets_total",
                "Number of packets received on a network interface.",
            ),
            iface_rx_errors: iface_stats(
                "receive_errors_total",
                "Number of packet receive errors on a network interface.",
            ),
            iface_rx_drops: iface_stats(
                "receive_drops_total",
                "Number of packet receive drops on a network interface.",
            ),
            iface_tx_bytes: iface_stats(
                "transmit_bytes_total",
                "Number of bytes transmitted on a network interface.",
            ),
            iface_tx_packets: iface_stats(
                "transmit_packets_total",
                "Number of packets transmitted on a network interface.",
            ),
            iface_tx_errors: iface_stats(
                "transmit_errors_total",
                "Number of packet transmit errors on a network interface.",
            ),
            iface_tx_drops: iface_stats(
                "transmit_drops_total",
                "Number of packet transmit drops on a network interface.",
            ),
        }
    }

    fn collect_from_hypervisor(&self, buf: &mut Vec<Sample>) -> Result<()> {
        let conn = self.connector.connect()?;

        let active_ids = conn.active_domain_ids()?;
        if self.profile.is_full() {
            buf.push(self.active.gauge(active_ids.len() as f64, vec![]));

            let inactive = conn.inactive_domain_count()?;
            buf.push(self.total.gauge((inactive + active_ids.len()) as f64, vec![]));
        }

        for id in active_ids {
            match conn.lookup_domain(id) {
                // The handle is dropped (and the underlying object released)
                // when this arm ends, also on the early-error return.
                Ok(domain) => self.collect_domain(domain.as_ref(), buf)?,
                Err(e) => {
                    debug!(id, error = %e, "domain vanished between listing and lookup, skipping");
                }
            }
        }

        Ok(())
    }

    fn collect_domain(&self, domain: &dyn DomainHandle, buf: &mut Vec<Sample>) -> Result<()> {
        let desc = parse_domain_xml(&domain.xml_desc()?)?;
        let name = domain.name()?;
        let instance = &desc.metadata.instance;
        let labels = vec![
            name,
            desc.uuid.clone(),
            instance.name.clone(),
            instance.flavor.name.clone(),
            instance.owner.project.name.clone(),
        ];

        let info = domain.runtime_info()?;
        buf.push(self.domain_state.gauge(f64::from(info.state), labels.clone()));
        buf.push(self.max_mem.gauge(info.max_mem_kib as f64 * 1024.0, labels.clone()));
        buf.push(
            self.memory_usage
                .gauge(info.memory_kib as f64 * 1024.0, labels.clone()),
        );
        buf.push(
            self.virtual_cpus
                .gauge(f64::from(info.nr_virt_cpu), labels.clone()),
        );
        buf.push(
            self.cpu_time
                .counter(info.cpu_time_ns as f64 / 1e9, labels.clone()),
        );

        if self.profile.is_full() {
            self.collect_cpu_totals(domain, &labels, buf)?;
            self.collect_memory_stats(domain, &labels, buf)?;
        }

        for disk in &desc.devices.disks {
            if disk.device == "cdrom" || disk.device == "fd" {
                continue;
            }
            self.collect_block_device(domain, disk, &labels, buf)?;
        }

        for iface in &desc.devices.interfaces {
            if iface.target.device.is_empty() {
                continue;
            }
            self.collect_interface(domain, iface, &labels, buf)?;
        }

        Ok(())
    }

    fn collect_cpu_totals(
        &self,
        domain: &dyn DomainHandle,
        labels: &[String],
        buf: &mut Vec<Sample>,
    ) -> Result<()> {
        let totals = domain.cpu_totals()?;
        // The breakdown stays in raw nanoseconds while the top-level CPU
        // time above is reported in seconds.
        if let Some(v) = totals.cpu_time_ns {
            buf.push(self.cpu_cpu_time.counter(v as f64, labels.to_vec()));
        }
        if let Some(v) = totals.system_time_ns {
            buf.push(self.cpu_system_time.counter(v as f64, labels.to_vec()));
        }
        if let Some(v) = totals.user_time_ns {
            buf.push(self.cpu_user_time.counter(v as f64, labels.to_vec()));
        }
        if let Some(v) = totals.vcpu_time_ns {
            buf.push(self.cpu_vcpu_time.counter(v as f64, labels.to_vec()));
        }
        Ok(())
    }

    fn collect_memory_stats(
        &self,
        domain: &dyn DomainHandle,
        labels: &[String],
        buf: &mut Vec<Sample>,
    ) -> Result<()> {
        for stat in domain.memory_stats()? {
            let descriptor = match stat.tag {
                memory_stat_tag::UNUSED => &self.mem_unused,
                memory_stat_tag::AVAILABLE => &self.mem_available,
                memory_stat_tag::RSS => &self.mem_rss,
                memory_stat_tag::USABLE => &self.mem_usable,
                memory_stat_tag::LAST_UPDATE => &self.mem_last_update,
                _ => continue,
            };
            buf.push(descriptor.gauge(stat.value as f64, labels.to_vec()));
        }
        Ok(())
    }

    fn collect_block_device(
        &self,
        domain: &dyn DomainHandle,
        disk: &xml::Disk,
        labels: &[String],
        buf: &mut Vec<Sample>,
    ) -> Result<()> {
        let target = &disk.target.device;
        let io = domain.block_io_stats(target)?;
        let device_labels = with_device(labels, &disk.source.file, target);

        if self.profile.is_full() {
            let sizing = domain.block_info(target)?;
            buf.push(
                self.block_capacity
                    .gauge(sizing.capacity as f64, device_labels.clone()),
            );
            buf.push(
                self.block_allocation
                    .gauge(sizing.allocation as f64, device_labels.clone()),
            );
            buf.push(
                self.block_physical
                    .gauge(sizing.physical as f64, device_labels.clone()),
            );
        }

        if let Some(v) = io.rd_bytes {
            buf.push(self.block_read_bytes.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.rd_reqs {
            buf.push(
                self.block_read_requests
                    .counter(v as f64, device_labels.clone()),
            );
        }
        if let Some(v) = io.rd_time_ns {
            buf.push(
                self.block_read_seconds
                    .counter(v as f64 / 1e9, device_labels.clone()),
            );
        }
        if let Some(v) = io.wr_bytes {
            buf.push(self.block_write_bytes.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.wr_reqs {
            buf.push(
                self.block_write_requests
                    .counter(v as f64, device_labels.clone()),
            );
        }
        if let Some(v) = io.wr_time_ns {
            buf.push(
                self.block_write_seconds
                    .counter(v as f64 / 1e9, device_labels.clone()),
            );
        }
        if let Some(v) = io.flush_reqs {
            buf.push(
                self.block_flush_requests
                    .counter(v as f64, device_labels.clone()),
            );
        }
        if let Some(v) = io.flush_time_ns {
            buf.push(
                self.block_flush_seconds
                    .counter(v as f64 / 1e9, device_labels.clone()),
            );
        }
        Ok(())
    }

    fn collect_interface(
        &self,
        domain: &dyn DomainHandle,
        iface: &xml::Interface,
        labels: &[String],
        buf: &mut Vec<Sample>,
    ) -> Result<()> {
        let io = domain.interface_io_stats(&iface.target.device)?;
        let device_labels = with_device(labels, &iface.source.bridge, &iface.target.device);

        if let Some(v) = io.rx_bytes {
            buf.push(self.iface_rx_bytes.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.rx_packets {
            buf.push(self.iface_rx_packets.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.rx_errs {
            buf.push(self.iface_rx_errors.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.rx_drops {
            buf.push(self.iface_rx_drops.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.tx_bytes {
            buf.push(self.iface_tx_bytes.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.tx_packets {
            buf.push(self.iface_tx_packets.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.tx_errs {
            buf.push(self.iface_tx_errors.counter(v as f64, device_labels.clone()));
        }
        if let Some(v) = io.tx_drops {
            buf.push(self.iface_tx_drops.counter(v as f64, device_labels.clone()));
        }
        Ok(())
    }
}

fn with_device(base: &[String], source: &str, target: &str) -> Vec<String> {
    let mut labels = base.to_vec();
    labels.push(source.to_string());
    labels.push(target.to_string());
    labels
}

impl Collector for LibvirtCollector {
    fn name(&self) -> &'static str {
        "libvirt"
    }

    fn describe(&self) -> Vec<Arc<Descriptor>> {
        vec![
            Arc::clone(&self.up),
            Arc::clone(&self.active),
            Arc::clone(&self.total),
            Arc::clone(&self.domain_state),
            Arc::clone(&self.max_mem),
            Arc::clone(&self.memory_usage),
            Arc::clone(&self.virtual_cpus),
            Arc::clone(&self.cpu_time),
            Arc::clone(&self.cpu_cpu_time),
            Arc::clone(&self.cpu_system_time),
            Arc::clone(&self.cpu_user_time),
            Arc::clone(&self.cpu_vcpu_time),
            Arc::clone(&self.mem_unused),
            Arc::clone(&self.mem_available),
            Arc::clone(&self.mem_usable),
            Arc::clone(&self.mem_rss),
            Arc::clone(&self.mem_last_update),
            Arc::clone(&self.block_capacity),
            Arc::clone(&self.block_allocation),
            Arc::clone(&self.block_physical),
            Arc::clone(&self.block_read_bytes),
            Arc::clone(&self.block_read_requests),
            Arc::clone(&self.block_read_seconds),
            Arc::clone(&self.block_write_bytes),
            Arc::clone(&self.block_write_requests),
            Arc::clone(&self.block_write_seconds),
            Arc::clone(&self.block_flush_requests),
            Arc::clone(&self.block_flush_seconds),
            Arc::clone(&self.iface_rx_bytes),
            Arc::clone(&self.iface_rx_packets),
            Arc::clone(&self.iface_rx_errors),
            Arc::clone(&self.iface_rx_drops),
            Arc::clone(&self.iface_tx_bytes),
            Arc::clone(&self.iface_tx_packets),
            Arc::clone(&self.iface_tx_errors),
            Arc::clone(&self.iface_tx_drops),
        ]
    }

    fn update(&self, sink: &mut dyn SampleSink) -> Result<()> {
        let mut buf = Vec::new();
        match self.collect_from_hypervisor(&mut buf) {
            Ok(()) => {
                for sample in buf {
                    sink.emit(sample);
                }
                sink.emit(self.up.gauge(1.0, vec![]));
                Ok(())
            }
            Err(e) => {
                sink.emit(self.up.gauge(0.0, vec![]));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DOMAIN_XML: &str = r#"
<domain type='kvm'>
  <uuid>b6d2d1bc-5cb8-4e5a-8e6c-481f90bd75a9</uuid>
  <metadata>
    <nova:instance xmlns:nova="http://openstack.org/xmlns/libvirt/nova/1.0">
      <nova:name>web-1</nova:name>
      <nova:flavor name="m1.small"/>
      <nova:owner>
        <nova:project uuid="77aa">service</nova:project>
      </nova:owner>
    </nova:instance>
  </metadata>
  <devices>
    <disk type='file' device='disk'>
      <source file='/images/web-1.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <target dev='hdc' bus='ide'/>
    </disk>
    <interface type='bridge'>
      <source bridge='br-int'/>
      <target dev='tap0'/>
    </interface>
    <interface type='bridge'>
      <source bridge='br-ex'/>
      <target dev=''/>
    </interface>
  </devices>
</domain>
"#;

    const PLAIN_XML: &str = r"
<domain type='qemu'>
  <uuid>11111111-2222-3333-4444-555555555555</uuid>
</domain>
";

    #[derive(Clone, Default)]
    struct FakeDomainSpec {
        id: u32,
        name: String,
        xml: String,
        info: DomainRuntimeInfo,
        cpu: CpuTotals,
        mem_stats: Vec<MemoryStat>,
        block_info: HashMap<String, BlockDeviceInfo>,
        block_io: HashMap<String, BlockIoStats>,
        iface_io: HashMap<String, InterfaceIoStats>,
        fail_lookup: bool,
        fail_info: bool,
    }

    fn web_domain() -> FakeDomainSpec {
        FakeDomainSpec {
            id: 1,
            name: "instance-00000042".to_string(),
            xml: DOMAIN_XML.to_string(),
            info: DomainRuntimeInfo {
                state: 1,
                max_mem_kib: 2048,
                memory_kib: 1024,
                nr_virt_cpu: 2,
                cpu_time_ns: 1_500_000_000,
            },
            cpu: CpuTotals {
                cpu_time_ns: Some(1_500_000_000),
                system_time_ns: None,
                user_time_ns: Some(900_000_000),
                vcpu_time_ns: Some(1_400_000_000),
            },
            mem_stats: vec![
                MemoryStat { tag: 4, value: 100 },
                MemoryStat { tag: 5, value: 200 },
                MemoryStat { tag: 7, value: 300 },
                MemoryStat { tag: 8, value: 400 },
                MemoryStat { tag: 9, value: 1_700_000_000 },
                MemoryStat { tag: 3, value: 999 },
            ],
            block_info: HashMap::from([(
                "vda".to_string(),
                BlockDeviceInfo {
                    capacity: 10_000,
                    allocation: 8_000,
                    physical: 9_000,
                },
            )]),
            block_io: HashMap::from([(
                "vda".to_string(),
                BlockIoStats {
                    rd_bytes: Some(1_000),
                    rd_reqs: Some(10),
                    rd_time_ns: Some(2_000_000_000),
                    wr_bytes: Some(2_000),
                    wr_reqs: Some(20),
                    wr_time_ns: Some(4_000_000_000),
                    flush_reqs: Some(5),
                    flush_time_ns: None,
                },
            )]),
            iface_io: HashMap::from([(
                "tap0".to_string(),
                InterfaceIoStats {
                    rx_bytes: Some(111),
                    rx_packets: Some(11),
                    rx_errs: Some(1),
                    rx_drops: None,
                    tx_bytes: Some(222),
                    tx_packets: Some(22),
                    tx_errs: None,
                    tx_drops: Some(2),
                },
            )]),
            ..FakeDomainSpec::default()
        }
    }

    #[derive(Default)]
    struct FakeHypervisor {
        domains: Vec<FakeDomainSpec>,
        inactive: usize,
        fail_connect: bool,
        fail_list: bool,
        fail_inactive: bool,
        drops: Arc<AtomicUsize>,
    }

    impl FakeHypervisor {
        fn with_domains(domains: Vec<FakeDomainSpec>) -> Self {
            Self {
                domains,
                ..Self::default()
            }
        }
    }

    struct FakeConnector {
        hv: Arc<FakeHypervisor>,
    }

    impl HypervisorConnector for FakeConnector {
        fn connect(&self) -> Result<Box<dyn HypervisorConnection>> {
            if self.hv.fail_connect {
                return Err(CollectError::Hypervisor("connection refused".to_string()));
            }
            Ok(Box::new(FakeConnection {
                hv: Arc::clone(&self.hv),
            }))
        }
    }

    struct FakeConnection {
        hv: Arc<FakeHypervisor>,
    }

    impl HypervisorConnection for FakeConnection {
        fn active_domain_ids(&self) -> Result<Vec<u32>> {
            if self.hv.fail_list {
                return Err(CollectError::Hypervisor("listing failed".to_string()));
            }
            Ok(self.hv.domains.iter().map(|d| d.id).collect())
        }

        fn inactive_domain_count(&self) -> Result<usize> {
            if self.hv.fail_inactive {
                return Err(CollectError::Hypervisor("listing failed".to_string()));
            }
            Ok(self.hv.inactive)
        }

        fn lookup_domain(&self, id: u32) -> Result<Box<dyn DomainHandle>> {
            let spec = self
                .hv
                .domains
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| CollectError::Hypervisor(format!("no domain with id {id}")))?;
            if spec.fail_lookup {
                return Err(CollectError::Hypervisor(format!("domain {id} not found")));
            }
            Ok(Box::new(FakeDomain {
                spec: spec.clone(),
                drops: Arc::clone(&self.hv.drops),
            }))
        }
    }

    struct FakeDomain {
        spec: FakeDomainSpec,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for FakeDomain {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DomainHandle for FakeDomain {
        fn name(&self) -> Result<String> {
            Ok(self.spec.name.clone())
        }

        fn xml_desc(&self) -> Result<String> {
            Ok(self.spec.xml.clone())
        }

        fn runtime_info(&self) -> Result<DomainRuntimeInfo> {
            if self.spec.fail_info {
                return Err(CollectError::Hypervisor("info query failed".to_string()));
            }
            Ok(self.spec.info)
        }

        fn cpu_totals(&self) -> Result<CpuTotals> {
            Ok(self.spec.cpu)
        }

        fn memory_stats(&self) -> Result<Vec<MemoryStat>> {
            Ok(self.spec.mem_stats.clone())
        }

        fn block_info(&self, target_dev: &str) -> Result<BlockDeviceInfo> {
            self.spec
                .block_info
                .get(target_dev)
                .copied()
                .ok_or_else(|| CollectError::Hypervisor(format!("no block info for {target_dev}")))
        }

        fn block_io_stats(&self, target_dev: &str) -> Result<BlockIoStats> {
            self.spec
                .block_io
                .get(target_dev)
                .copied()
                .ok_or_else(|| CollectError::Hypervisor(format!("no block stats for {target_dev}")))
        }

        fn interface_io_stats(&self, target_dev: &str) -> Result<InterfaceIoStats> {
            self.spec
                .iface_io
                .get(target_dev)
                .copied()
                .ok_or_else(|| CollectError::Hypervisor(format!("no iface stats for {target_dev}")))
        }
    }

    fn scrape(hv: FakeHypervisor, profile: StatsProfile) -> (Vec<Sample>, Result<()>, Arc<AtomicUsize>) {
        let drops = Arc::clone(&hv.drops);
        let collector = LibvirtCollector::new(
            Box::new(FakeConnector { hv: Arc::new(hv) }),
            profile,
        );
        let mut sink: Vec<Sample> = Vec::new();
        let result = collector.update(&mut sink);
        (sink, result, drops)
    }

    fn find<'a>(samples: &'a [Sample], name: &str) -> &'a Sample {
        samples
            .iter()
            .find(|s| s.descriptor.name() == name)
            .unwrap_or_else(|| panic!("no sample named {name}"))
    }

    fn all<'a>(samples: &'a [Sample], name: &str) -> Vec<&'a Sample> {
        samples
            .iter()
            .filter(|s| s.descriptor.name() == name)
            .collect()
    }

    mod scrape_state_machine_tests {
        use super::*;

        #[test]
        fn connect_failure_emits_only_up_zero() {
            let hv = FakeHypervisor {
                fail_connect: true,
                ..FakeHypervisor::default()
            };
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            assert!(result.is_err());
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].descriptor.name(), "libvirt_up");
            assert!((samples[0].value - 0.0).abs() < f64::EPSILON);
        }

        #[test]
        fn listing_failure_emits_only_up_zero() {
            let hv = FakeHypervisor {
                fail_list: true,
                ..FakeHypervisor::default()
            };
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            assert!(result.is_err());
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].descriptor.name(), "libvirt_up");
        }

        #[test]
        fn empty_host_emits_counts_and_up_one() {
            let hv = FakeHypervisor {
                inactive: 3,
                ..FakeHypervisor::default()
            };
            let (samples, result, _) = scrape(hv, StatsProfile::Full);
            result.unwrap();

            assert!((find(&samples, "libvirt_active").value - 0.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_total").value - 3.0).abs() < f64::EPSILON);

            let last = samples.last().unwrap();
            assert_eq!(last.descriptor.name(), "libvirt_up");
            assert!((last.value - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn total_is_inactive_plus_active() {
            let hv = FakeHypervisor {
                inactive: 2,
                ..FakeHypervisor::with_domains(vec![web_domain()])
            };
            let (samples, result, _) = scrape(hv, StatsProfile::Full);
            result.unwrap();

            assert!((find(&samples, "libvirt_active").value - 1.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_total").value - 3.0).abs() < f64::EPSILON);
        }

        #[test]
        fn vanished_domain_is_skipped_silently() {
            let mut gone = web_domain();
            gone.id = 2;
            gone.fail_lookup = true;
            let hv = FakeHypervisor::with_domains(vec![web_domain(), gone]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            result.unwrap();
            // One domain collected, one skipped; the scrape still succeeds.
            assert_eq!(all(&samples, "libvirt_domain_info_domain_state").len(), 1);
            assert!((samples.last().unwrap().value - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn detail_failure_suppresses_everything_but_up_zero() {
            let mut broken = web_domain();
            broken.id = 2;
            broken.fail_info = true;
            let hv = FakeHypervisor::with_domains(vec![web_domain(), broken]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            assert!(result.is_err());
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].descriptor.name(), "libvirt_up");
            assert!((samples[0].value - 0.0).abs() < f64::EPSILON);
        }

        #[test]
        fn malformed_xml_aborts_the_scrape() {
            let mut bad = web_domain();
            bad.xml = "<domain><uuid>oops".to_string();
            let hv = FakeHypervisor::with_domains(vec![bad]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            assert!(matches!(result, Err(CollectError::DomainXml(_))));
            assert_eq!(samples.len(), 1);
        }
    }

    mod handle_release_tests {
        use super::*;

        #[test]
        fn every_handle_dropped_once_on_success() {
            let mut second = web_domain();
            second.id = 2;
            let hv = FakeHypervisor::with_domains(vec![web_domain(), second]);
            let (_, result, drops) = scrape(hv, StatsProfile::Full);

            result.unwrap();
            assert_eq!(drops.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn every_handle_dropped_once_under_fault_injection() {
            let mut broken = web_domain();
            broken.id = 2;
            broken.fail_info = true;
            let mut never_reached = web_domain();
            never_reached.id = 3;
            let hv = FakeHypervisor::with_domains(vec![web_domain(), broken, never_reached]);
            let (_, result, drops) = scrape(hv, StatsProfile::Full);

            assert!(result.is_err());
            // Two handles were created (the third domain is never looked up
            // after the abort); both were released exactly once.
            assert_eq!(drops.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn skipped_lookup_creates_no_handle() {
            let mut gone = web_domain();
            gone.fail_lookup = true;
            let hv = FakeHypervisor::with_domains(vec![gone]);
            let (_, result, drops) = scrape(hv, StatsProfile::Full);

            result.unwrap();
            assert_eq!(drops.load(Ordering::SeqCst), 0);
        }
    }

    mod domain_info_tests {
        use super::*;

        #[test]
        fn labels_include_workload_metadata() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let state = find(&samples, "libvirt_domain_info_domain_state");
            assert_eq!(
                state.label_values,
                vec![
                    "instance-00000042",
                    "b6d2d1bc-5cb8-4e5a-8e6c-481f90bd75a9",
                    "web-1",
                    "m1.small",
                    "service",
                ]
            );
        }

        #[test]
        fn absent_metadata_yields_empty_label_values() {
            let mut plain = web_domain();
            plain.xml = PLAIN_XML.to_string();
            plain.block_io.clear();
            plain.block_info.clear();
            plain.iface_io.clear();
            let hv = FakeHypervisor::with_domains(vec![plain]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);
            result.unwrap();

            let state = find(&samples, "libvirt_domain_info_domain_state");
            assert_eq!(state.label_values[2], "");
            assert_eq!(state.label_values[3], "");
            assert_eq!(state.label_values[4], "");
        }

        #[test]
        fn memory_is_converted_from_kib_to_bytes() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let max_mem = find(&samples, "libvirt_domain_info_maximum_memory_bytes");
            assert!((max_mem.value - 2_097_152.0).abs() < f64::EPSILON);

            let usage = find(&samples, "libvirt_domain_info_memory_usage_bytes");
            assert!((usage.value - 1_048_576.0).abs() < f64::EPSILON);
        }

        #[test]
        fn cpu_time_is_converted_to_seconds() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let cpu_time = find(&samples, "libvirt_domain_info_cpu_time_seconds_total");
            assert!((cpu_time.value - 1.5).abs() < f64::EPSILON);
        }

        #[test]
        fn state_and_vcpus_are_gauges_of_raw_values() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!((find(&samples, "libvirt_domain_info_domain_state").value - 1.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_domain_info_virtual_cpus").value - 2.0).abs() < f64::EPSILON);
        }
    }

    mod cpu_breakdown_tests {
        use super::*;

        #[test]
        fn breakdown_counters_stay_in_nanoseconds() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let cpu = find(&samples, "libvirt_domain_cpu_state_cpu_cpu_time_ns");
            assert!((cpu.value - 1_500_000_000.0).abs() < f64::EPSILON);

            let user = find(&samples, "libvirt_domain_cpu_state_cpu_user_time_ns");
            assert!((user.value - 900_000_000.0).abs() < f64::EPSILON);
        }

        #[test]
        fn unset_breakdown_value_is_omitted() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!(all(&samples, "libvirt_domain_cpu_state_cpu_system_time_ns").is_empty());
        }
    }

    mod balloon_tests {
        use super::*;

        #[test]
        fn known_tags_map_to_their_families() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!((find(&samples, "libvirt_domain_mem_state_mem_unused").value - 100.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_domain_mem_state_mem_available").value - 200.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_domain_mem_state_mem_rss").value - 300.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_domain_mem_state_mem_usable").value - 400.0).abs() < f64::EPSILON);
            assert!(
                (find(&samples, "libvirt_domain_mem_state_mem_last_update").value - 1_700_000_000.0).abs()
                    < f64::EPSILON
            );
        }

        #[test]
        fn unrecognized_tag_is_ignored_and_processing_continues() {
            // web_domain carries tag 3 before none of the known families;
            // all five known tags must still be emitted.
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            result.unwrap();
            let mem_families = samples
                .iter()
                .filter(|s| s.descriptor.name().starts_with("libvirt_domain_mem_state_"))
                .count();
            assert_eq!(mem_families, 5);
        }
    }

    mod block_device_tests {
        use super::*;

        #[test]
        fn cdrom_devices_are_skipped() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);
            result.unwrap();

            for sample in &samples {
                assert!(
                    !sample.label_values.iter().any(|v| v == "hdc"),
                    "cdrom target leaked into {}",
                    sample.descriptor.name()
                );
            }
        }

        #[test]
        fn sizing_gauges_carry_device_labels() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let capacity = find(&samples, "libvirt_domain_block_stats_block_capacity");
            assert!((capacity.value - 10_000.0).abs() < f64::EPSILON);
            assert_eq!(capacity.label_values[5], "/images/web-1.qcow2");
            assert_eq!(capacity.label_values[6], "vda");
        }

        #[test]
        fn io_times_are_converted_to_seconds() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!((find(&samples, "libvirt_domain_block_stats_read_seconds_total").value - 2.0).abs() < f64::EPSILON);
            assert!((find(&samples, "libvirt_domain_block_stats_write_seconds_total").value - 4.0).abs() < f64::EPSILON);
        }

        #[test]
        fn unset_flush_time_is_omitted() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!(all(&samples, "libvirt_domain_block_stats_flush_seconds_total").is_empty());
            assert!((find(&samples, "libvirt_domain_block_stats_flush_requests_total").value - 5.0).abs() < f64::EPSILON);
        }

        #[test]
        fn block_query_failure_aborts_the_domain() {
            let mut broken = web_domain();
            broken.block_io.clear();
            let hv = FakeHypervisor::with_domains(vec![broken]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);

            assert!(result.is_err());
            assert_eq!(samples.len(), 1);
        }
    }

    mod interface_tests {
        use super::*;

        #[test]
        fn empty_target_device_is_skipped() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, result, _) = scrape(hv, StatsProfile::Full);
            result.unwrap();

            for sample in &samples {
                assert!(
                    !sample.label_values.iter().any(|v| v == "br-ex"),
                    "empty-target interface leaked into {}",
                    sample.descriptor.name()
                );
            }
        }

        #[test]
        fn counters_carry_bridge_and_target_labels() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            let rx = find(&samples, "libvirt_domain_interface_stats_receive_bytes_total");
            assert!((rx.value - 111.0).abs() < f64::EPSILON);
            assert_eq!(rx.label_values[5], "br-int");
            assert_eq!(rx.label_values[6], "tap0");
        }

        #[test]
        fn unset_interface_counters_are_omitted() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, _, _) = scrape(hv, StatsProfile::Full);

            assert!(all(&samples, "libvirt_domain_interface_stats_receive_drops_total").is_empty());
            assert!(all(&samples, "libvirt_domain_interface_stats_transmit_errors_total").is_empty());
            assert!((find(&samples, "libvirt_domain_interface_stats_transmit_drops_total").value - 2.0).abs() < f64::EPSILON);
        }
    }

    mod profile_tests {
        use super::*;

        #[test]
        fn basic_profile_drops_counts_and_extended_families() {
            let hv = FakeHypervisor {
                inactive: 2,
                ..FakeHypervisor::with_domains(vec![web_domain()])
            };
            let (samples, result, _) = scrape(hv, StatsProfile::Basic);
            result.unwrap();

            assert!(all(&samples, "libvirt_active").is_empty());
            assert!(all(&samples, "libvirt_total").is_empty());
            assert!(all(&samples, "libvirt_domain_cpu_state_cpu_cpu_time_ns").is_empty());
            assert!(all(&samples, "libvirt_domain_mem_state_mem_unused").is_empty());
            assert!(all(&samples, "libvirt_domain_block_stats_block_capacity").is_empty());
        }

        #[test]
        fn basic_profile_keeps_domain_info_and_io() {
            let hv = FakeHypervisor::with_domains(vec![web_domain()]);
            let (samples, result, _) = scrape(hv, StatsProfile::Basic);
            result.unwrap();

            assert_eq!(all(&samples, "libvirt_domain_info_domain_state").len(), 1);
            assert_eq!(all(&samples, "libvirt_domain_block_stats_read_bytes_total").len(), 1);
            assert_eq!(all(&samples, "libvirt_domain_interface_stats_receive_bytes_total").len(), 1);
        }

        #[test]
        fn profile_deserializes_from_lowercase() {
            let full: StatsProfile = serde_json::from_str("\"full\"").unwrap();
            let basic: StatsProfile = serde_json::from_str("\"basic\"").unwrap();
            assert_eq!(full, StatsProfile::Full);
            assert_eq!(basic, StatsProfile::Basic);
        }
    }

    #[test]
    fn collector_name_is_libvirt() {
        let hv = FakeHypervisor::default();
        let collector = LibvirtCollector::new(
            Box::new(FakeConnector { hv: Arc::new(hv) }),
            StatsProfile::Full,
        );
        assert_eq!(collector.name(), "libvirt");
    }

    #[test]
    fn describe_covers_every_family() {
        let hv = FakeHypervisor::default();
        let collector = LibvirtCollector::new(
            Box::new(FakeConnector { hv: Arc::new(hv) }),
            StatsProfile::Full,
        );
        let descriptors = collector.describe();
        assert_eq!(descriptors.len(), 36);
        assert!(descriptors.iter().any(|d| d.name() == "libvirt_up"));
        assert!(
            descriptors
                .iter()
                .any(|d| d.name() == "libvirt_domain_block_stats_flush_seconds_total")
        );
    }
}
