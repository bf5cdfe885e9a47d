use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// CNI command arguments
#[derive(Debug, Clone)]
pub struct CmdArgs {
    /// Container ID
    pub container_id: String,
    /// Network namespace path
    pub netns: String,
    /// Interface name
    pub ifname: String,
    /// Arguments
    pub args: HashMap<String, String>,
    /// Path
    pub path: String,
    /// Standard input data
    pub stdin_data: Vec<u8>,
}

/// Legacy result schema versions (routes nested under `ip4`/`ip6`).
pub const LEGACY_VERSIONS: [&str; 2] = ["0.1.0", "0.2.0"];

/// Unified result schema versions (single top-level `routes` array).
pub const UNIFIED_VERSIONS: [&str; 4] = ["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// A route entry inside a cached CNI result.
///
/// `dst` is optional because cached documents in the wild carry route
/// objects without one; such entries are dropped by the delete filter
/// rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRoute {
    /// Destination CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Gateway for this route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
    /// Any further keys (mtu, advmss, ...) round-trip untouched
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl CachedRoute {
    /// Build a `{dst, gw}` entry for a default route.
    pub fn default_route(dst: &str, gw: &str) -> Self {
        Self {
            dst: Some(dst.to_string()),
            gw: Some(gw.to_string()),
            rest: Map::new(),
        }
    }
}

/// Cached result in the unified schema (cniVersion 0.3.0 through 1.0.0).
///
/// Only the fields this plugin rewrites are typed; everything else
/// (interfaces, ips, dns, vendor extensions) is preserved verbatim in
/// `rest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    /// CNI specification version
    #[serde(rename = "cniVersion", default, skip_serializing_if = "Option::is_none")]
    pub cni_version: Option<String>,
    /// Routes to configure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<CachedRoute>>,
    /// Unrecognized result fields
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Per-family sub-object of a legacy result (`ip4` or `ip6`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyIpInfo {
    /// Routes for this address family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<CachedRoute>>,
    /// Unrecognized sub-object fields (ip, gateway, ...)
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Cached result in the legacy schema (cniVersion absent, 0.1.0 or 0.2.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyResult {
    /// CNI specification version, absent on the oldest documents
    #[serde(rename = "cniVersion", default, skip_serializing_if = "Option::is_none")]
    pub cni_version: Option<String>,
    /// IPv4 configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip4: Option<LegacyIpInfo>,
    /// IPv6 configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip6: Option<LegacyIpInfo>,
    /// Unrecognized result fields
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
