//! virtmond - virtmon exporter daemon.
//!
//! Builds the collector registry from configuration and serves the
//! Prometheus exposition format over HTTP.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prometheus_client::registry::Registry;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use virtmon::host::SystemProbe;
use virtmon::registry::{CollectorRegistry, PrometheusBridge};
use virtmon::{HostCollector, StatsProfile};

use crate::config::ExporterConfig;

#[derive(Parser)]
#[command(name = "virtmond")]
#[command(about = "Prometheus exporter for libvirt domains and host facts")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long)]
    listen_address: Option<String>,

    /// Libvirt connection URI (overrides the config file)
    #[arg(long)]
    libvirt_uri: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("virtmond=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExporterConfig::from_file(path)?,
        None => ExporterConfig::default(),
    };
    if let Some(addr) = cli.listen_address {
        config.listen_address = Some(addr);
    }
    if let Some(uri) = cli.libvirt_uri {
        config.libvirt.uri = uri;
    }
    config.validate()?;

    let addr = config.listen_address()?;
    let collectors = build_collectors(&config)?;
    info!(collectors = ?collectors.names(), "registered collectors");

    let mut registry = Registry::default();
    registry.register_collector(Box::new(PrometheusBridge::new(Arc::new(collectors))));

    server::serve(addr, Arc::new(registry)).await
}

fn build_collectors(config: &ExporterConfig) -> anyhow::Result<CollectorRegistry> {
    let mut collectors = CollectorRegistry::new();

    if config.host.enabled {
        collectors.register(Box::new(HostCollector::new(Box::new(SystemProbe::new()))))?;
    }

    if config.libvirt.enabled {
        register_libvirt(&mut collectors, &config.libvirt.uri, config.libvirt.profile)?;
    }

    Ok(collectors)
}

#[cfg(feature = "libvirt")]
fn register_libvirt(
    collectors: &mut CollectorRegistry,
    uri: &str,
    profile: StatsProfile,
) -> anyhow::Result<()> {
    use virtmon::LibvirtCollector;
    use virtmon::libvirt::LibvirtConnector;

    collectors.register(Box::new(LibvirtCollector::new(
        Box::new(LibvirtConnector::new(uri)),
        profile,
    )))?;
    Ok(())
}

#[cfg(not(feature = "libvirt"))]
fn register_libvirt(
    _collectors: &mut CollectorRegistry,
    _uri: &str,
    _profile: StatsProfile,
) -> anyhow::Result<()> {
    tracing::warn!("libvirt support not compiled in (libvirt feature disabled), skipping collector");
    Ok(())
}
