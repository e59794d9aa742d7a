//! Error types for the virtmon collectors.

use thiserror::Error;

/// Errors that can occur during a collection pass.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The hypervisor daemon returned an error.
    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    /// A host statistics query failed.
    #[error("host probe error: {0}")]
    HostProbe(String),

    /// A domain XML descriptor could not be parsed.
    #[error("malformed domain xml: {0}")]
    DomainXml(String),

    /// The CPU-info query returned zero entries.
    #[error("no cpu info")]
    NoCpuInfo,

    /// A collector with the same name is already registered.
    #[error("collector already registered: {0}")]
    DuplicateCollector(String),
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, CollectError>;
