use anyhow::{Context, Result};
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;
use serde::Deserialize;
use std::net::IpAddr;
use std::os::unix::io::RawFd;
use std::process::Command;
use tracing::{debug, error, warn};

/// Scoped entry into a network namespace.
///
/// Opening the guard moves the calling thread into the target namespace;
/// dropping it moves the thread back to the namespace it started in.
/// Restoration runs on every exit path, including unwinding.
pub struct NetnsGuard {
    host_fd: RawFd,
}

impl NetnsGuard {
    /// Enter the namespace at `netns_path`.
    pub fn enter(netns_path: &str) -> Result<Self> {
        // setns moves only the calling thread, so the handle to return to
        // must be the thread's namespace, not the process one.
        let host_fd = open(
            "/proc/thread-self/ns/net",
            OFlag::O_RDONLY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .context("Failed to open current network namespace")?;

        let target_fd = match open(netns_path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = close(host_fd);
                return Err(e).with_context(|| {
                    format!("Failed to open network namespace {}", netns_path)
                });
            }
        };

        let entered = setns(target_fd, CloneFlags::CLONE_NEWNET);
        let _ = close(target_fd);
        if let Err(e) = entered {
            let _ = close(host_fd);
            return Err(e).with_context(|| {
                format!("Failed to enter network namespace {}", netns_path)
            });
        }

        Ok(Self { host_fd })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(self.host_fd, CloneFlags::CLONE_NEWNET) {
            // Nothing sane to do; the thread is stuck in the wrong namespace.
            error!("Failed to restore original network namespace: {}", e);
        }
        let _ = close(self.host_fd);
    }
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    ifindex: i32,
    #[allow(dead_code)]
    ifname: String,
}

#[derive(Debug, Deserialize)]
struct KernelRoute {
    #[serde(default)]
    dst: Option<String>,
    #[serde(default)]
    gateway: Option<String>,
}

/// Resolve a link by name in the current namespace.
fn link_by_name(ifname: &str) -> Result<LinkInfo> {
    let out = Command::new("ip")
        .args(["-j", "link", "show", "dev", ifname])
        .output()
        .context("Failed to execute ip link show command")?;

    if !out.status.success() {
        anyhow::bail!(
            "Failed to get link {}: {}",
            ifname,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    let mut links: Vec<LinkInfo> = serde_json::from_slice(&out.stdout)
        .with_context(|| format!("Failed to parse link info for {}", ifname))?;
    links
        .pop()
        .with_context(|| format!("No link named {}", ifname))
}

/// List the routes bound to a link for one address family.
fn routes_for_link(ifname: &str, ipv6: bool) -> Result<Vec<KernelRoute>> {
    let mut cmd = Command::new("ip");
    cmd.arg("-j");
    if ipv6 {
        cmd.arg("-6");
    }
    cmd.args(["route", "show", "dev", ifname]);

    let out = cmd.output().context("Failed to execute ip route show command")?;
    if !out.status.success() {
        anyhow::bail!(
            "Failed to list routes on {}: {}",
            ifname,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    serde_json::from_slice(&out.stdout)
        .with_context(|| format!("Failed to parse route list for {}", ifname))
}

/// Install one default route per gateway on `ifname` inside the namespace
/// at `netns_path`.
///
/// Gateways are applied in input order. A route that already exists counts
/// as success; any other kernel failure is recorded and the remaining
/// gateways are still attempted, so a partial application is possible.
pub fn set_default_gw(netns_path: &str, ifname: &str, gateways: &[IpAddr]) -> Result<()> {
    let _ns = NetnsGuard::enter(netns_path)
        .with_context(|| format!("SetDefaultGW: error getting namespace {}", netns_path))?;

    // The index is what identifies the link to the kernel; failing to
    // resolve it aborts before any route is touched.
    let link = link_by_name(ifname).context("SetDefaultGW: error getting link")?;

    let mut last_err: Option<anyhow::Error> = None;
    for gw in gateways {
        debug!(
            "SetDefaultGW: adding default route on {} (index: {}) to {}",
            ifname, link.ifindex, gw
        );

        let gw_addr = gw.to_string();
        let mut cmd = Command::new("ip");
        if gw.is_ipv6() {
            cmd.arg("-6");
        }
        cmd.args(["route", "add", "default", "via", gw_addr.as_str(), "dev", ifname]);

        let out = cmd.output().context("Failed to execute ip route add command")?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("File exists") {
                debug!("SetDefaultGW: route already exists, ignoring: {}", stderr.trim());
            } else {
                error!("SetDefaultGW: error adding route via {}: {}", gw, stderr.trim());
                last_err = Some(anyhow::anyhow!(
                    "Failed to add default route via {}: {}",
                    gw,
                    stderr.trim()
                ));
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Remove every default route on `ifname` inside the namespace at
/// `netns_path`, across both address families.
///
/// A link that cannot be resolved is treated as having nothing to delete.
pub fn delete_default_gw(netns_path: &str, ifname: &str) -> Result<()> {
    let _ns = NetnsGuard::enter(netns_path)
        .with_context(|| format!("DeleteDefaultGW: error getting namespace {}", netns_path))?;

    // Missing link means nothing to delete.
    if let Err(e) = link_by_name(ifname) {
        debug!("DeleteDefaultGW: skipping absent link {}: {}", ifname, e);
        return Ok(());
    }

    let mut last_err: Option<anyhow::Error> = None;
    for ipv6 in [false, true] {
        let routes = match routes_for_link(ifname, ipv6) {
            Ok(routes) => routes,
            Err(e) => {
                warn!("DeleteDefaultGW: {}", e);
                last_err = Some(e);
                continue;
            }
        };

        for route in routes {
            if route.dst.as_deref() != Some("default") {
                continue;
            }

            let mut cmd = Command::new("ip");
            if ipv6 {
                cmd.arg("-6");
            }
            cmd.args(["route", "del", "default"]);
            if let Some(gw) = &route.gateway {
                cmd.args(["via", gw.as_str()]);
            }
            cmd.args(["dev", ifname]);

            let out = cmd.output().context("Failed to execute ip route del command")?;
            if !out.status.success() {
                let stderr = String::from_utf8_lossy(&out.stderr);
                error!("DeleteDefaultGW: error deleting route: {}", stderr.trim());
                last_err = Some(anyhow::anyhow!(
                    "Failed to delete default route on {}: {}",
                    ifname,
                    stderr.trim()
                ));
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
