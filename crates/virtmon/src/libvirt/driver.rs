//! Production hypervisor access backed by the `virt` crate.
//!
//! Compiled only with the `libvirt` cargo feature, since it links against
//! the native libvirt library. Handles wrap the crate's RAII objects, so
//! dropping a [`DomainHandle`] releases the underlying domain reference.

use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::error::{CollectError, Result};
use crate::libvirt::hypervisor::{
    BlockDeviceInfo, BlockIoStats, CpuTotals, DomainHandle, DomainRuntimeInfo, HypervisorConnection,
    HypervisorConnector, InterfaceIoStats, MemoryStat,
};

fn virt_err(e: &virt::error::Error) -> CollectError {
    CollectError::Hypervisor(e.to_string())
}

/// Connects to a libvirt daemon at a fixed URI.
#[derive(Debug, Clone)]
pub struct LibvirtConnector {
    uri: String,
}

impl LibvirtConnector {
    /// Creates a connector for the given URI, e.g. `qemu:///system`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl HypervisorConnector for LibvirtConnector {
    fn connect(&self) -> Result<Box<dyn HypervisorConnection>> {
        let conn = Connect::open(Some(&self.uri)).map_err(|e| virt_err(&e))?;
        Ok(Box::new(LibvirtConnection { conn }))
    }
}

struct LibvirtConnection {
    conn: Connect,
}

impl Drop for LibvirtConnection {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            tracing::debug!(error = %e, "closing libvirt connection failed");
        }
    }
}

impl HypervisorConnection for LibvirtConnection {
    fn active_domain_ids(&self) -> Result<Vec<u32>> {
        self.conn.list_domains().map_err(|e| virt_err(&e))
    }

    fn inactive_domain_count(&self) -> Result<usize> {
        // Handles in the returned list are freed as soon as the list drops.
        let domains = self
            .conn
            .list_all_domains(sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE)
            .map_err(|e| virt_err(&e))?;
        Ok(domains.len())
    }

    fn lookup_domain(&self, id: u32) -> Result<Box<dyn DomainHandle>> {
        let domain = Domain::lookup_by_id(&self.conn, id).map_err(|e| virt_err(&e))?;
        Ok(Box::new(LibvirtDomain { domain }))
    }
}

struct LibvirtDomain {
    domain: Domain,
}

/// Maps a raw counter to `None` when libvirt reports it as unset (-1).
fn counter(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

impl DomainHandle for LibvirtDomain {
    fn name(&self) -> Result<String> {
        self.domain.get_name().map_err(|e| virt_err(&e))
    }

    fn xml_desc(&self) -> Result<String> {
        self.domain.get_xml_desc(0).map_err(|e| virt_err(&e))
    }

    fn runtime_info(&self) -> Result<DomainRuntimeInfo> {
        let info = self.domain.get_info().map_err(|e| virt_err(&e))?;
        Ok(DomainRuntimeInfo {
            state: info.state,
            max_mem_kib: info.max_mem,
            memory_kib: info.memory,
            nr_virt_cpu: info.nr_virt_cpu,
            cpu_time_ns: info.cpu_time,
        })
    }

    fn cpu_totals(&self) -> Result<CpuTotals> {
        // TODO: populate from virDomainGetCPUStats once the virt crate
        // exposes it; until then every breakdown value reads as unset and
        // the corresponding samples are omitted.
        Ok(CpuTotals::default())
    }

    fn memory_stats(&self) -> Result<Vec<MemoryStat>> {
        let stats = self.domain.memory_stats(0).map_err(|e| virt_err(&e))?;
        Ok(stats
            .iter()
            .map(|s| MemoryStat {
                tag: s.tag as i32,
                value: s.val,
            })
            .collect())
    }

    fn block_info(&self, target_dev: &str) -> Result<BlockDeviceInfo> {
        let info = self
            .domain
            .get_block_info(target_dev, 0)
            .map_err(|e| virt_err(&e))?;
        Ok(BlockDeviceInfo {
            capacity: info.capacity,
            allocation: info.allocation,
            physical: info.physical,
        })
    }

    fn block_io_stats(&self, target_dev: &str) -> Result<BlockIoStats> {
        let stats = self
            .domain
            .block_stats(target_dev)
            .map_err(|e| virt_err(&e))?;
        Ok(BlockIoStats {
            rd_bytes: counter(stats.rd_bytes),
            rd_reqs: counter(stats.rd_req),
            wr_bytes: counter(stats.wr_bytes),
            wr_reqs: counter(stats.wr_req),
            // virDomainBlockStats carries no timing or flush counters; the
            // flags variant is not wrapped by the virt crate yet.
            rd_time_ns: None,
            wr_time_ns: None,
            flush_reqs: None,
            flush_time_ns: None,
        })
    }

    fn interface_io_stats(&self, target_dev: &str) -> Result<InterfaceIoStats> {
        let stats = self
            .domain
            .interface_stats(target_dev)
            .map_err(|e| virt_err(&e))?;
        Ok(InterfaceIoStats {
            rx_bytes: counter(stats.rx_bytes),
            rx_packets: counter(stats.rx_packets),
            rx_errs: counter(stats.rx_errs),
            rx_drops: counter(stats.rx_drop),
            tx_bytes: counter(stats.tx_bytes),
            tx_packets: counter(stats.tx_packets),
            tx_errs: counter(stats.tx_errs),
            tx_drops: counter(stats.tx_drop),
        })
    }
}
