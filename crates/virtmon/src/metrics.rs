//! The metric model shared by all collectors.
//!
//! A [`Descriptor`] is immutable metadata (fully-qualified name, help text,
//! ordered label names) built once when a collector is constructed. A
//! [`Sample`] is one data point emitted during a scrape: a descriptor
//! reference, a value, and label values matching the descriptor's label
//! names. Samples are rebuilt from scratch on every scrape and never
//! persisted.

use std::sync::Arc;

use crate::error::Result;

/// Whether a sample carries gauge or counter semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A value that can go up and down.
    Gauge,
    /// A monotonically increasing value.
    Counter,
}

/// Builds a fully-qualified metric name from namespace, subsystem, and name.
///
/// Empty parts are skipped, so `fq_name("libvirt", "", "up")` yields
/// `libvirt_up`.
#[must_use]
pub fn fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Static metadata for one metric family.
///
/// Created once at collector construction and shared via [`Arc`]; immutable
/// for the process lifetime.
#[derive(Debug, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    help: String,
    labels: Vec<&'static str>,
}

impl Descriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, labels: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            help: help.into(),
            labels: labels.to_vec(),
        })
    }

    /// The fully-qualified metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The ordered label names.
    #[must_use]
    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    /// Creates a gauge sample for this descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the number of label values does not match the descriptor's
    /// label names. Descriptors and their call sites are fixed at compile
    /// time, so a mismatch is a programming error, not a runtime condition.
    #[must_use]
    pub fn gauge(self: &Arc<Self>, value: f64, label_values: Vec<String>) -> Sample {
        Sample::new(Arc::clone(self), MetricKind::Gauge, value, label_values)
    }

    /// Creates a counter sample for this descriptor.
    ///
    /// # Panics
    ///
    /// Panics on label arity mismatch, as for [`Descriptor::gauge`].
    #[must_use]
    pub fn counter(self: &Arc<Self>, value: f64, label_values: Vec<String>) -> Sample {
        Sample::new(Arc::clone(self), MetricKind::Counter, value, label_values)
    }
}

/// One emitted metric data point.
#[derive(Debug, Clone)]
pub struct Sample {
    /// The descriptor this sample belongs to.
    pub descriptor: Arc<Descriptor>,
    /// Gauge or counter semantics.
    pub kind: MetricKind,
    /// The sample value.
    pub value: f64,
    /// Label values, in the descriptor's label-name order.
    pub label_values: Vec<String>,
}

impl Sample {
    fn new(descriptor: Arc<Descriptor>, kind: MetricKind, value: f64, label_values: Vec<String>) -> Self {
        assert_eq!(
            descriptor.labels.len(),
            label_values.len(),
            "label arity mismatch for metric {}: descriptor has {} labels, sample has {} values",
            descriptor.name,
            descriptor.labels.len(),
            label_values.len(),
        );
        Self {
            descriptor,
            kind,
            value,
            label_values,
        }
    }

    /// The label names and values of this sample, zipped in order.
    #[must_use]
    pub fn label_pairs(&self) -> Vec<(String, String)> {
        self.descriptor
            .labels
            .iter()
            .map(|name| (*name).to_string())
            .zip(self.label_values.iter().cloned())
            .collect()
    }
}

/// The per-scrape sink collectors emit samples into.
pub trait SampleSink {
    /// Accepts one sample.
    fn emit(&mut self, sample: Sample);
}

impl SampleSink for Vec<Sample> {
    fn emit(&mut self, sample: Sample) {
        self.push(sample);
    }
}

/// A source of metric samples, invoked once per scrape.
///
/// Implementations are not required to be callable concurrently with
/// themselves; the registry runs collectors sequentially within a scrape
/// pass.
pub trait Collector: Send + Sync {
    /// A short unique name, used as the registry key and in logs.
    fn name(&self) -> &'static str;

    /// The descriptors this collector may emit samples for.
    fn describe(&self) -> Vec<Arc<Descriptor>>;

    /// Collects samples for one scrape.
    ///
    /// On failure the collector emits only its health gauge at 0 and
    /// suppresses all other samples for this scrape.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the collection pass.
    fn update(&self, sink: &mut dyn SampleSink) -> Result<()>;
}
