use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::io::{self, Read};
use tracing::{debug, info};

use crate::cache;
use crate::config::NetConf;
use crate::netns;
use crate::types::{CmdArgs, LEGACY_VERSIONS, UNIFIED_VERSIONS};

/// Parse command arguments from environment
pub fn parse_args() -> Result<CmdArgs> {
    // Get required environment variables
    let container_id = env::var("CNI_CONTAINERID")
        .context("CNI_CONTAINERID not found in environment")?;

    let netns = env::var("CNI_NETNS")
        .context("CNI_NETNS not found in environment")?;

    let ifname = env::var("CNI_IFNAME")
        .context("CNI_IFNAME not found in environment")?;

    let path = env::var("CNI_PATH")
        .context("CNI_PATH not found in environment")?;

    // Get args (if any)
    let args_str = env::var("CNI_ARGS").unwrap_or_default();
    let args = parse_cni_args(&args_str);

    // Read stdin data
    let mut stdin_data = Vec::new();
    io::stdin().read_to_end(&mut stdin_data)
        .context("Failed to read from stdin")?;

    Ok(CmdArgs {
        container_id,
        netns,
        ifname,
        args,
        path,
        stdin_data,
    })
}

/// Parse CNI_ARGS string into key-value pairs
fn parse_cni_args(args_str: &str) -> HashMap<String, String> {
    let mut args = HashMap::new();

    if !args_str.is_empty() {
        for pair in args_str.split(';') {
            if let Some(idx) = pair.find('=') {
                let key = pair[..idx].to_string();
                let value = pair[idx + 1..].to_string();
                args.insert(key, value);
            }
        }
    }

    args
}

/// Execute the add command: install the configured default gateways in the
/// container namespace and record them in the result cache.
pub fn cmd_add() -> Result<()> {
    let args = parse_args()?;
    let conf = NetConf::parse(&args.stdin_data)?;

    if let Some(gateways) = conf.default_gateways.as_deref().filter(|g| !g.is_empty()) {
        info!(
            "Installing {} default gateway(s) on {} for container {}",
            gateways.len(),
            args.ifname,
            args.container_id
        );
        netns::set_default_gw(&args.netns, &args.ifname, gateways)?;
        cache::add_default_gw_cache(
            &conf.cache_dir(),
            &conf.name,
            &args.container_id,
            &args.ifname,
            gateways,
        )?;
    }

    // Echo the (possibly just patched) cached result for the runtime.
    let result = cache::cached_result(
        &conf.cache_dir(),
        &conf.name,
        &args.container_id,
        &args.ifname,
    )?;
    println!("{}", serde_json::to_string(&result)?);

    Ok(())
}

/// Execute the delete command: strip default routes from the container
/// namespace and from the result cache.
pub fn cmd_del() -> Result<()> {
    let args = parse_args()?;
    let conf = NetConf::parse(&args.stdin_data)?;

    let (ipv4, ipv6) = conf.gateway_families();
    info!(
        "Removing default routes (ipv4={}, ipv6={}) on {} for container {}",
        ipv4, ipv6, args.ifname, args.container_id
    );

    netns::delete_default_gw(&args.netns, &args.ifname)?;
    cache::delete_default_gw_cache(
        &conf.cache_dir(),
        &conf.name,
        &args.container_id,
        &args.ifname,
        ipv4,
        ipv6,
    )?;

    Ok(())
}

/// Execute the check command: the cached result for this attachment must
/// exist and be in a supported schema.
pub fn cmd_check() -> Result<()> {
    let args = parse_args()?;
    let conf = NetConf::parse(&args.stdin_data)?;

    cache::cached_result(
        &conf.cache_dir(),
        &conf.name,
        &args.container_id,
        &args.ifname,
    )
    .with_context(|| {
        format!(
            "CHECK failed for network {} container {}",
            conf.name, args.container_id
        )
    })?;

    Ok(())
}

/// Main entry point for the CNI plugin
pub fn run_cni() -> Result<()> {
    // Get command from environment
    let cmd = env::var("CNI_COMMAND")
        .context("CNI_COMMAND not found in environment")?;

    // Execute the appropriate command
    match cmd.as_str() {
        "ADD" => cmd_add(),
        "DEL" => cmd_del(),
        "CHECK" => cmd_check(),
        // Garbage collection and status are handled entirely by the
        // delegated plugins; the shim just acknowledges them.
        "GC" | "STATUS" => {
            debug!("{}: nothing to do", cmd);
            Ok(())
        }
        "VERSION" => {
            let versions: Vec<&str> = LEGACY_VERSIONS
                .iter()
                .chain(UNIFIED_VERSIONS.iter())
                .copied()
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "cniVersion": "1.0.0",
                    "supportedVersions": versions,
                })
            );
            Ok(())
        }
        _ => anyhow::bail!("Unknown CNI command: {}", cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cni_args_split_on_semicolons() {
        let args = parse_cni_args("K8S_POD_NAME=web-0;K8S_POD_NAMESPACE=default");
        assert_eq!(args.get("K8S_POD_NAME").map(String::as_str), Some("web-0"));
        assert_eq!(
            args.get("K8S_POD_NAMESPACE").map(String::as_str),
            Some("default")
        );
    }

    #[test]
    fn cni_args_empty_string_yields_no_pairs() {
        assert!(parse_cni_args("").is_empty());
    }
}
