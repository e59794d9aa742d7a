//! Daemon configuration.
//!
//! Loaded from a TOML file; every section has defaults so an empty file
//! (or no file at all) yields a working exporter. Collector enable flags
//! mirror the exporter's registry: a disabled collector is simply never
//! registered.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use virtmon::StatsProfile;

/// Default listen address for the HTTP endpoint.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:60616";

/// Host collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    /// Whether to register the host facts collector.
    pub enabled: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Libvirt collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibvirtConfig {
    /// Whether to register the libvirt collector.
    pub enabled: bool,
    /// Connection URI of the virtualization daemon.
    pub uri: String,
    /// Which metric subset to emit.
    #[serde(default)]
    pub profile: StatsProfile,
}

impl Default for LibvirtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: virtmon::libvirt::DEFAULT_URI.to_string(),
            profile: StatsProfile::Full,
        }
    }
}

/// Main exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExporterConfig {
    /// Address the HTTP endpoint binds to.
    #[serde(default)]
    pub listen_address: Option<String>,
    /// Host collector settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Libvirt collector settings.
    #[serde(default)]
    pub libvirt: LibvirtConfig,
}

impl ExporterConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            )
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(addr) = &self.listen_address {
            addr.parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("invalid listen address '{addr}': {e}"))?;
        }
        if self.libvirt.enabled && self.libvirt.uri.is_empty() {
            anyhow::bail!("libvirt uri cannot be empty");
        }
        Ok(())
    }

    /// The effective listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured address cannot be parsed.
    pub fn listen_address(&self) -> anyhow::Result<SocketAddr> {
        let addr = self
            .listen_address
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDRESS);
        addr.parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid listen address '{addr}': {e}"))
    }
}
