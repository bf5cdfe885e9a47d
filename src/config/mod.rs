use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Default directory for the per-attachment result cache.
pub const DEFAULT_CACHE_DIR: &str = "/var/lib/cni/metacni";

/// Network configuration read from stdin on every CNI invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    /// Name of the network
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Directory holding the result cache (`<cniDir>/results/...`)
    #[serde(rename = "cniDir", default, skip_serializing_if = "Option::is_none")]
    pub cni_dir: Option<PathBuf>,
    /// Default gateways to install on the attachment interface
    #[serde(
        rename = "defaultGateways",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_gateways: Option<Vec<IpAddr>>,
}

impl NetConf {
    /// Parse NetConf from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let conf: NetConf = serde_json::from_slice(bytes)
            .context("Failed to parse network configuration")?;

        // Validation
        if conf.name.is_empty() {
            anyhow::bail!("Network name is required");
        }

        if conf.plugin_type.is_empty() {
            anyhow::bail!("Plugin type is required");
        }

        Ok(conf)
    }

    /// Cache directory for this network, falling back to the default.
    pub fn cache_dir(&self) -> PathBuf {
        self.cni_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
    }

    /// Which address families the configured gateways cover.
    ///
    /// With no gateways configured both families are selected, so a
    /// detach still clears every default route it may have recorded.
    pub fn gateway_families(&self) -> (bool, bool) {
        match &self.default_gateways {
            Some(gws) if !gws.is_empty() => (
                gws.iter().any(|gw| gw.is_ipv4()),
                gws.iter().any(|gw| gw.is_ipv6()),
            ),
            _ => (true, true),
        }
    }
}
