use ipnetwork::IpNetwork;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::types::{
    CachedRoute, LegacyResult, UnifiedResult, LEGACY_VERSIONS, UNIFIED_VERSIONS,
};

/// IPv4 default destination as written to cached results.
pub const V4_DEFAULT: &str = "0.0.0.0/0";
/// IPv6 default destination written by the unified schema path.
pub const V6_DEFAULT: &str = "::0/0";
/// IPv6 default destination written by the legacy schema path.
pub const V6_DEFAULT_LEGACY: &str = "::/0";

/// Errors from the result cache patcher.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed cache document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("cannot get result from cache")]
    MissingResult,
    #[error("wrong result type")]
    WrongResultType,
    #[error("wrong cniVersion format: {0}")]
    WrongVersionFormat(String),
    #[error("not supported version: {0}")]
    UnsupportedVersion(String),
}

/// The two result schema shapes a cached document can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schema {
    /// cniVersion absent, 0.1.0 or 0.2.0: routes nested under ip4/ip6
    Legacy,
    /// cniVersion 0.3.0 through 1.0.0: one top-level routes array
    Unified,
}

/// Version lookup: legacy, unified, or unsupported.
fn schema_of(result: &Map<String, Value>) -> Result<Schema, CacheError> {
    match result.get("cniVersion") {
        None => Ok(Schema::Legacy),
        Some(Value::String(v)) if LEGACY_VERSIONS.contains(&v.as_str()) => Ok(Schema::Legacy),
        Some(Value::String(v)) if UNIFIED_VERSIONS.contains(&v.as_str()) => Ok(Schema::Unified),
        Some(Value::String(v)) => Err(CacheError::UnsupportedVersion(v.clone())),
        Some(other) => Err(CacheError::WrongVersionFormat(other.to_string())),
    }
}

/// Whether `dst` is the default network for the requested family.
///
/// Both IPv6 spellings (`::/0` and `::0/0`) appear in cached documents and
/// both must match, so the comparison parses the CIDR instead of matching a
/// literal.
fn is_default_dst(dst: &str, ipv6: bool) -> bool {
    match dst.parse::<IpNetwork>() {
        Ok(net) => net.prefix() == 0 && net.ip().is_unspecified() && net.is_ipv6() == ipv6,
        Err(_) => false,
    }
}

/// Drop every default route of the given family.
///
/// Entries with no `dst` key are dropped too, matching how existing cache
/// consumers filter.
fn retain_non_default(routes: Vec<CachedRoute>, ipv6: bool) -> Vec<CachedRoute> {
    routes
        .into_iter()
        .filter(|r| matches!(&r.dst, Some(d) if !is_default_dst(d, ipv6)))
        .collect()
}

fn to_map<T: Serialize>(value: T) -> Result<Map<String, Value>, CacheError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(CacheError::WrongResultType),
    }
}

/// Append default-route entries to a unified-schema result.
fn add_gw_result_unified(
    result: Map<String, Value>,
    gateways: &[IpAddr],
) -> Result<Map<String, Value>, CacheError> {
    let mut parsed: UnifiedResult = serde_json::from_value(Value::Object(result))?;

    let mut routes = parsed.routes.take().unwrap_or_default();
    for gw in gateways {
        let dst = if gw.is_ipv4() { V4_DEFAULT } else { V6_DEFAULT };
        routes.push(CachedRoute::default_route(dst, &gw.to_string()));
    }

    // An empty routes array is never written; the key is left out instead.
    parsed.routes = if routes.is_empty() { None } else { Some(routes) };
    to_map(parsed)
}

/// Append default-route entries to a legacy-schema result.
///
/// A gateway whose family sub-object (`ip4`/`ip6`) is absent is dropped
/// without creating the sub-object.
fn add_gw_result_legacy(
    result: Map<String, Value>,
    gateways: &[IpAddr],
) -> Result<Map<String, Value>, CacheError> {
    let mut parsed: LegacyResult = serde_json::from_value(Value::Object(result))?;

    for gw in gateways {
        let (info, dst) = if gw.is_ipv4() {
            (parsed.ip4.as_mut(), V4_DEFAULT)
        } else {
            (parsed.ip6.as_mut(), V6_DEFAULT_LEGACY)
        };
        if let Some(info) = info {
            info.routes
                .get_or_insert_with(Vec::new)
                .push(CachedRoute::default_route(dst, &gw.to_string()));
        }
    }

    to_map(parsed)
}

/// Strip default routes of the selected families from a unified-schema
/// result. Absent `routes` is a no-op.
fn delete_gw_result_unified(
    result: Map<String, Value>,
    ipv4: bool,
    ipv6: bool,
) -> Result<Map<String, Value>, CacheError> {
    let mut parsed: UnifiedResult = serde_json::from_value(Value::Object(result))?;

    let Some(mut routes) = parsed.routes.take() else {
        return to_map(parsed);
    };

    if ipv4 {
        routes = retain_non_default(routes, false);
    }
    if ipv6 {
        routes = retain_non_default(routes, true);
    }

    parsed.routes = if routes.is_empty() { None } else { Some(routes) };
    to_map(parsed)
}

/// Strip default routes of the selected families from a legacy-schema
/// result, independently within `ip4` and `ip6`. Absent sub-objects and
/// absent route arrays are left untouched.
fn delete_gw_result_legacy(
    result: Map<String, Value>,
    ipv4: bool,
    ipv6: bool,
) -> Result<Map<String, Value>, CacheError> {
    let mut parsed: LegacyResult = serde_json::from_value(Value::Object(result))?;

    if ipv4 {
        if let Some(ip4) = parsed.ip4.as_mut() {
            if let Some(routes) = ip4.routes.take() {
                let routes = retain_non_default(routes, false);
                ip4.routes = if routes.is_empty() { None } else { Some(routes) };
            }
        }
    }

    if ipv6 {
        if let Some(ip6) = parsed.ip6.as_mut() {
            if let Some(routes) = ip6.routes.take() {
                let routes = retain_non_default(routes, true);
                ip6.routes = if routes.is_empty() { None } else { Some(routes) };
            }
        }
    }

    to_map(parsed)
}

/// Extract the `result` object, run `patch` on it, and splice the patched
/// object back without disturbing any sibling field.
fn patch_document<F>(cache: &[u8], patch: F) -> Result<Vec<u8>, CacheError>
where
    F: FnOnce(Map<String, Value>) -> Result<Map<String, Value>, CacheError>,
{
    let mut doc: Map<String, Value> = serde_json::from_slice(cache)?;

    let result = match doc.get("result") {
        None => return Err(CacheError::MissingResult),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(CacheError::WrongResultType),
    };

    let new_result = patch(result)?;
    if let Some(slot) = doc.get_mut("result") {
        *slot = Value::Object(new_result);
    }

    Ok(serde_json::to_vec(&doc)?)
}

/// Patch serialized cache bytes to record freshly installed default
/// gateways.
pub fn add_default_gw_bytes(cache: &[u8], gateways: &[IpAddr]) -> Result<Vec<u8>, CacheError> {
    patch_document(cache, |result| match schema_of(&result)? {
        Schema::Legacy => add_gw_result_legacy(result, gateways),
        Schema::Unified => add_gw_result_unified(result, gateways),
    })
}

/// Patch serialized cache bytes to drop default routes of the selected
/// families.
pub fn delete_default_gw_bytes(
    cache: &[u8],
    ipv4: bool,
    ipv6: bool,
) -> Result<Vec<u8>, CacheError> {
    patch_document(cache, |result| match schema_of(&result)? {
        Schema::Legacy => delete_gw_result_legacy(result, ipv4, ipv6),
        Schema::Unified => delete_gw_result_unified(result, ipv4, ipv6),
    })
}

/// Cache file location for one attachment:
/// `<cacheDir>/results/<network>-<containerID>-<ifName>`.
pub fn cache_file_path(
    cache_dir: &Path,
    net_name: &str,
    container_id: &str,
    ifname: &str,
) -> PathBuf {
    cache_dir
        .join("results")
        .join(format!("{}-{}-{}", net_name, container_id, ifname))
}

fn read_cache(path: &Path) -> Result<Vec<u8>, CacheError> {
    fs::read(path).map_err(|source| CacheError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_cache(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    fs::write(path, bytes).map_err(|source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        CacheError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Record default gateways in the cached result for one attachment.
///
/// The cache file must already exist; a missing file is an error, never a
/// create.
pub fn add_default_gw_cache(
    cache_dir: &Path,
    net_name: &str,
    container_id: &str,
    ifname: &str,
    gateways: &[IpAddr],
) -> Result<(), CacheError> {
    let path = cache_file_path(cache_dir, net_name, container_id, ifname);
    let cache = read_cache(&path)?;
    debug!(
        "AddDefaultGWCache: update cache to add GW from: {}",
        String::from_utf8_lossy(&cache)
    );

    let new_cache = add_default_gw_bytes(&cache, gateways)?;
    debug!(
        "AddDefaultGWCache: update cache to add GW: {}",
        String::from_utf8_lossy(&new_cache)
    );
    write_cache(&path, &new_cache)
}

/// Drop recorded default routes of the selected families from the cached
/// result for one attachment.
pub fn delete_default_gw_cache(
    cache_dir: &Path,
    net_name: &str,
    container_id: &str,
    ifname: &str,
    ipv4: bool,
    ipv6: bool,
) -> Result<(), CacheError> {
    let path = cache_file_path(cache_dir, net_name, container_id, ifname);
    let cache = read_cache(&path)?;
    debug!(
        "DeleteDefaultGWCache: update cache to delete GW from: {}",
        String::from_utf8_lossy(&cache)
    );

    let new_cache = delete_default_gw_bytes(&cache, ipv4, ipv6)?;
    debug!(
        "DeleteDefaultGWCache: update cache to delete GW: {}",
        String::from_utf8_lossy(&new_cache)
    );
    write_cache(&path, &new_cache)
}

/// Load the cached result for an attachment, verifying it parses and is in
/// a supported schema.
pub fn cached_result(
    cache_dir: &Path,
    net_name: &str,
    container_id: &str,
    ifname: &str,
) -> Result<Value, CacheError> {
    let path = cache_file_path(cache_dir, net_name, container_id, ifname);
    let cache = read_cache(&path)?;

    let mut doc: Map<String, Value> = serde_json::from_slice(&cache)?;
    match doc.get("result") {
        None => Err(CacheError::MissingResult),
        Some(Value::Object(result)) => {
            schema_of(result)?;
            Ok(doc.remove("result").unwrap_or(Value::Null))
        }
        Some(_) => Err(CacheError::WrongResultType),
    }
}
