use std::net::IpAddr;
use std::process::Command;

use metacni::netns::{delete_default_gw, set_default_gw, NetnsGuard};

// Function to create a test netns
fn create_test_netns(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let _ = Command::new("ip").args(["netns", "delete", name]).output();

    let output = Command::new("ip").args(["netns", "add", name]).output()?;
    if !output.status.success() {
        return Err(format!(
            "Failed to create netns: {}",
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }

    Ok(())
}

// Function to delete a test netns
fn delete_test_netns(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::new("ip").args(["netns", "delete", name]).output()?;
    if !output.status.success() {
        return Err(format!(
            "Failed to delete netns: {}",
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }

    Ok(())
}

// Give the test netns a veth with an address so a default gateway on the
// same subnet is on-link.
fn setup_test_link(netns: &str, ifname: &str) -> Result<(), Box<dyn std::error::Error>> {
    let steps: &[&[&str]] = &[
        &["link", "add", "veth-host", "type", "veth", "peer", "name", ifname],
        &["link", "set", ifname, "netns", netns],
        &["-n", netns, "addr", "add", "10.200.0.2/24", "dev", ifname],
        &["-n", netns, "link", "set", ifname, "up"],
        &["-n", netns, "link", "set", "lo", "up"],
    ];
    for step in steps {
        let output = Command::new("ip").args(*step).output()?;
        if !output.status.success() {
            return Err(format!(
                "ip {:?} failed: {}",
                step,
                String::from_utf8_lossy(&output.stderr)
            )
            .into());
        }
    }
    Ok(())
}

fn count_default_routes(netns: &str, ifname: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let output = Command::new("ip")
        .args(["-n", netns, "route", "show", "dev", ifname])
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| l.starts_with("default"))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require root privileges to run
    #[test]
    #[ignore]
    fn test_set_default_gw_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        if !nix::unistd::geteuid().is_root() {
            println!("Skipping test_set_default_gw_is_idempotent: not running as root");
            return Ok(());
        }

        let netns = "metacni-test-add";
        let ifname = "eth0";
        create_test_netns(netns)?;
        let result = (|| -> Result<(), Box<dyn std::error::Error>> {
            setup_test_link(netns, ifname)?;
            let netns_path = format!("/var/run/netns/{}", netns);
            let gateways: Vec<IpAddr> = vec!["10.200.0.1".parse()?];

            // Adding the same gateway twice must succeed both times and
            // leave exactly one default route installed.
            set_default_gw(&netns_path, ifname, &gateways)?;
            set_default_gw(&netns_path, ifname, &gateways)?;
            assert_eq!(count_default_routes(netns, ifname)?, 1);

            delete_default_gw(&netns_path, ifname)?;
            assert_eq!(count_default_routes(netns, ifname)?, 0);
            Ok(())
        })();
        let _ = Command::new("ip").args(["link", "delete", "veth-host"]).output();
        delete_test_netns(netns)?;
        result
    }

    #[test]
    #[ignore]
    fn test_delete_default_gw_missing_link_is_ok() -> Result<(), Box<dyn std::error::Error>> {
        if !nix::unistd::geteuid().is_root() {
            println!("Skipping test_delete_default_gw_missing_link_is_ok: not running as root");
            return Ok(());
        }

        let netns = "metacni-test-del";
        create_test_netns(netns)?;
        let netns_path = format!("/var/run/netns/{}", netns);

        // No such link in the namespace: treated as nothing to delete.
        let result = delete_default_gw(&netns_path, "nosuchdev");
        delete_test_netns(netns)?;
        assert!(result.is_ok());
        Ok(())
    }

    #[test]
    #[ignore]
    fn test_netns_guard_restores_on_drop() -> Result<(), Box<dyn std::error::Error>> {
        if !nix::unistd::geteuid().is_root() {
            println!("Skipping test_netns_guard_restores_on_drop: not running as root");
            return Ok(());
        }

        let netns = "metacni-test-guard";
        create_test_netns(netns)?;
        let netns_path = format!("/var/run/netns/{}", netns);

        let before = std::fs::read_link("/proc/thread-self/ns/net")?;
        {
            let _guard = NetnsGuard::enter(&netns_path)?;
            assert_ne!(std::fs::read_link("/proc/thread-self/ns/net")?, before);
        }
        let after = std::fs::read_link("/proc/thread-self/ns/net")?;
        delete_test_netns(netns)?;
        assert_eq!(after, before);
        Ok(())
    }

    #[test]
    fn test_set_default_gw_bad_namespace_fails() {
        let gateways: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap()];
        assert!(set_default_gw("/var/run/netns/does-not-exist", "eth0", &gateways).is_err());
        assert!(delete_default_gw("/var/run/netns/does-not-exist", "eth0").is_err());
    }
}
