//! Host facts collector.
//!
//! Emits one constant-value sample per descriptor family, with the facts
//! carried in labels: CPU topology, memory size, disk capacity, network
//! interfaces, and host identity.

pub mod probe;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{CollectError, Result};
use crate::metrics::{Collector, Descriptor, Sample, SampleSink, fq_name};

pub use probe::{CpuInfo, DiskPartition, HostIdentity, HostProbe, MemoryInfo, NetInterface, SystemProbe};

const NAMESPACE: &str = "node";
const SUBSYSTEM: &str = "basic";

/// Collector for host hardware and OS facts.
pub struct HostCollector {
    probe: Box<dyn HostProbe>,

    up: Arc<Descriptor>,
    host_info: Arc<Descriptor>,
    cpu: Arc<Descriptor>,
    mem: Arc<Descriptor>,
    disk: Arc<Descriptor>,
    net_dev: Arc<Descriptor>,
}

impl std::fmt::Debug for HostCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCollector").finish_non_exhaustive()
    }
}

impl HostCollector {
    /// Creates the collector and its descriptors.
    #[must_use]
    pub fn new(probe: Box<dyn HostProbe>) -> Self {
        Self {
            probe,
            up: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "up"),
                "Whether scraping host facts was successful.",
                &[],
            ),
            host_info: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "host_info"),
                "Host operating system identity.",
                &[
                    "hostname",
                    "os",
                    "platform",
                    "platform_family",
                    "platform_version",
                    "host_id",
                    "virtualization_system",
                    "virtualization_role",
                ],
            ),
            cpu: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "cpu"),
                "Host CPU topology.",
                &["count", "core", "vendor_id", "model_name", "mhz"],
            ),
            mem: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "mem"),
                "Host memory size.",
                &["total"],
            ),
            disk: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "disk"),
                "Host disk capacity.",
                &["total"],
            ),
            net_dev: Descriptor::new(
                fq_name(NAMESPACE, SUBSYSTEM, "net_dev"),
                "Host network interface identity.",
                &["if_index", "if_name", "ip_address", "hw_address", "mtu"],
            ),
        }
    }

    fn collect_into(&self, buf: &mut Vec<Sample>) -> Result<()> {
        self.collect_cpu(buf)?;
        self.collect_mem(buf)?;
        self.collect_net_dev(buf)?;
        self.collect_host_info(buf)?;
        self.collect_disk(buf)?;
        Ok(())
    }

    fn collect_cpu(&self, buf: &mut Vec<Sample>) -> Result<()> {
        let cpus = self.probe.cpu_info()?;
        if cpus.is_empty() {
            return Err(CollectError::NoCpuInfo);
        }

        let sockets: HashSet<u32> = cpus.iter().map(|c| c.physical_id).collect();
        let cores: HashSet<u32> = cpus.iter().map(|c| c.core_id).collect();
        let core_count = sockets.len() * cores.len();
        let mhz = cpus.iter().map(|c| c.mhz).sum::<f64>() / cpus.len() as f64;

        buf.push(self.cpu.gauge(
            1.0,
            vec![
                sockets.len().to_string(),
                core_count.to_string(),
                cpus[0].vendor_id.clone(),
                cpus[0].model_name.clone(),
                format!("{mhz:.0}"),
            ],
        ));
        Ok(())
    }

    fn collect_mem(&self, buf: &mut Vec<Sample>) -> Result<()> {
        let mem = self.probe.virtual_memory()?;
        buf.push(self.mem.gauge(1.0, vec![mem.total_bytes.to_string()]));
        Ok(())
    }

    fn collect_net_dev(&self, buf: &mut Vec<Sample>) -> Result<()> {
        for iface in self.probe.net_interfaces()? {
            buf.push(self.net_dev.gauge(
                1.0,
                vec![
                    iface.index.to_string(),
                    iface.name.clone(),
                    serde_json::to_string(&iface.addresses).unwrap_or_default(),
                    iface.mac_address.clone(),
                    iface.mtu.to_string(),
                ],
            ));
        }
        Ok(())
    }

    fn collect_host_info(&self, buf: &mut Vec<Sample>) -> Result<()> {
        let id = self.probe.host_identity()?;
        buf.push(self.host_info.gauge(
            1.0,
            vec![
                id.hostname,
                id.os,
                id.platform,
                id.platform_family,
                id.platform_version,
                id.host_id,
                id.virtualization_system,
                id.virtualization_role,
            ],
        ));
        Ok(())
    }

    fn collect_disk(&self, buf: &mut Vec<Sample>) -> Result<()> {
        let partitions = self.probe.disk_partitions()?;
        // Partitions whose usage could not be read contribute nothing.
        let total: u64 = partitions.iter().filter_map(|p| p.total_bytes).sum();
        buf.push(self.disk.gauge(1.0, vec![total.to_string()]));
        Ok(())
    }
}

impl Collector for HostCollector {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn describe(&self) -> Vec<Arc<Descriptor>> {
        vec![
            Arc::clone(&self.up),
            Arc::clone(&self.host_info),
            Arc::clone(&self.cpu),
            Arc::clone(&self.mem),
            Arc::clone(&self.disk),
            Arc::clone(&self.net_dev),
        ]
    }

    fn update(&self, sink: &mut dyn SampleSink) -> Result<()> {
        let mut buf = Vec::new();
        match self.collect_into(&mut buf) {
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
