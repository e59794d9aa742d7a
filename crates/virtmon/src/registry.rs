//! Explicit collector registry and the Prometheus exposition bridge.
//!
//! The [`CollectorRegistry`] is a constructed object owned by the process
//! composition root; collectors are registered by name and run sequentially
//! on each scrape. [`PrometheusBridge`] adapts the registry to
//! `prometheus-client`'s scrape-time [`Collector`] abstraction so that the
//! exposition text format is produced entirely by the client library.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus_client::collector::Collector as PromCollector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, NoLabelSet};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;
use tracing::warn;

use crate::error::{CollectError, Result};
use crate::metrics::{Collector, Descriptor, MetricKind, Sample};

/// An explicit registry of collectors, keyed by name.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.names())
            .finish()
    }
}

impl CollectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::DuplicateCollector`] if a collector with the
    /// same name is already registered.
    pub fn register(&mut self, collector: Box<dyn Collector>) -> Result<()> {
        if self.collectors.iter().any(|c| c.name() == collector.name()) {
            return Err(CollectError::DuplicateCollector(collector.name().to_string()));
        }
        self.collectors.push(collector);
        Ok(())
    }

    /// The names of all registered collectors, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// The number of registered collectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// All descriptors from all registered collectors.
    #[must_use]
    pub fn describe_all(&self) -> Vec<Arc<Descriptor>> {
        self.collectors.iter().flat_map(|c| c.describe()).collect()
    }

    /// Runs every collector once and returns the emitted samples.
    ///
    /// A failing collector has already reduced its output to its health
    /// gauge at 0; the error is logged here and the scrape continues with
    /// the remaining collectors.
    #[must_use]
    pub fn update_all(&self) -> Vec<Sample> {
        let mut samples = Vec::new();
        for collector in &self.collectors {
            if let Err(e) = collector.update(&mut samples) {
                warn!(collector = collector.name(), error = %e, "scrape failed");
            }
        }
        samples
    }
}

/// Adapter that runs a [`CollectorRegistry`] on each scrape and encodes the
/// emitted samples through `prometheus-client`.
pub struct PrometheusBridge {
    collectors: Arc<CollectorRegistry>,
}

impl std::fmt::Debug for PrometheusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusBridge")
            .field("collectors", &self.collectors.names())
            .finish()
    }
}

impl PrometheusBridge {
    /// Creates a bridge over the given registry.
    #[must_use]
    pub fn new(collectors: Arc<CollectorRegistry>) -> Self {
        Self { collectors }
    }
}

impl PromCollector for PrometheusBridge {
    fn encode(&self, mut encoder: DescriptorEncoder) -> std::fmt::Result {
        let samples = self.collectors.update_all();

        // Group samples by descriptor, preserving first-seen order, so each
        // family is encoded under a single descriptor block.
        let mut order: Vec<Arc<Descriptor>> = Vec::new();
        let mut groups: HashMap<String, Vec<Sample>> = HashMap::new();
        for sample in samples {
            let name = sample.descriptor.name().to_string();
            if !groups.contains_key(&name) {
                order.push(Arc::clone(&sample.descriptor));
            }
            groups.entry(name).or_default().push(sample);
        }

        for descriptor in order {
            let Some(group) = groups.get(descriptor.name()) else {
                continue;
            };
            let kind = group[0].kind;
            // The text encoder appends `_total` to counters; descriptors
            // carry the exposition name, so strip the suffix here.
            let name = match kind {
                MetricKind::Counter => descriptor
                    .name()
                    .strip_suffix("_total")
                    .unwrap_or_else(|| descriptor.name()),
                MetricKind::Gauge => descriptor.name(),
            };
            let metric_type = match kind {
                MetricKind::Counter => MetricType::Counter,
                MetricKind::Gauge => MetricType::Gauge,
            };
            let mut metric_encoder =
                encoder.encode_descriptor(name, descriptor.help(), None, metric_type)?;

            for sample in group {
                if sample.label_values.is_empty() {
                    // Encode directly into the descriptor-level encoder, which
                    // is reused across samples in the group. These calls are the
                    // bodies of `ConstGauge::encode`/`ConstCounter::encode`, which
                    // take the encoder by value; calling them here by `&mut`
                    // keeps the encoder available for subsequent samples.
                    match sample.kind {
                        MetricKind::Gauge => {
                            metric_encoder.encode_gauge(&sample.value)?;
                        }
                        MetricKind::Counter => {
                            metric_encoder
                                .encode_counter::<NoLabelSet, _, u64>(&sample.value, None)?;
                        }
                    }
                } else {
                    let labels = sample.label_pairs();
                    let family_encoder = metric_encoder.encode_family(&labels)?;
                    match sample.kind {
                        MetricKind::Gauge => {
                            ConstGauge::new(sample.value).encode(family_encoder)?;
                        }
                        MetricKind::Counter => {
                            ConstCounter::new(sample.value).encode(family_encoder)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Encodes all metrics of a `prometheus-client` registry in text format.
#[must_use]
pub fn text_exposition(registry: &Registry) -> String {
    let mut buffer = String::new();
    if prometheus_client::encoding::text::encode(&mut buffer, registry).is_err() {
        tracing::error!("failed to encode prometheus metrics");
        return String::new();
    }
    buffer
}

/// The Content-Type header value for the exposition format.
#[must_use]
pub const fn content_type() -> &'static str {
    "text/plain; version=0.0.4; charset=utf-8"
}
