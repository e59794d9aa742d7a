//! Prometheus collectors for a virtualization host.
#![forbid(unsafe_code)]
//!
//! `virtmon` bridges two data sources to the Prometheus exposition format:
//!
//! - **Host facts**: CPU topology, memory size, disk capacity, network
//!   interfaces, and OS identity, read through a [`host::HostProbe`].
//! - **Libvirt domains**: per-VM runtime info, CPU time, balloon memory,
//!   block-device and network-interface counters, read through a
//!   [`libvirt::HypervisorConnector`] (the production driver requires the
//!   `libvirt` cargo feature).
//!
//! Collectors implement the [`metrics::Collector`] trait and are registered
//! into an explicit [`registry::CollectorRegistry`] by the process
//! composition root. Every scrape rebuilds its snapshot from scratch:
//! nothing is cached, and a fatal error reduces a collector's output to its
//! health gauge at 0.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use virtmon::host::{HostCollector, SystemProbe};
//! use virtmon::registry::{CollectorRegistry, PrometheusBridge, text_exposition};
//!
//! let mut collectors = CollectorRegistry::new();
//! collectors
//!     .register(Box::new(HostCollector::new(Box::new(SystemProbe::new()))))
//!     .unwrap();
//!
//! let mut prom = prometheus_client::registry::Registry::default();
//! prom.register_collector(Box::new(PrometheusBridge::new(Arc::new(collectors))));
//!
//! let output = text_exposition(&prom);
//! assert!(output.contains("node_basic_up"));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod host;
pub mod libvirt;
pub mod metrics;
pub mod registry;

pub use error::{CollectError, Result};
pub use host::{HostCollector, SystemProbe};
pub use libvirt::{LibvirtCollector, StatsProfile};
pub use metrics::{Collector, Descriptor, MetricKind, Sample, SampleSink};
pub use registry::{CollectorRegistry, PrometheusBridge};
