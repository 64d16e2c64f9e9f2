//! Open the VPN port and let VPN clients reach the internet through this host

use crate::config::{Protocol, VPN_PORT};
use crate::layout::Layout;
use crate::services::openvpn::VPN_CIDR;
use crate::utils::exec::CommandExecutor;
use crate::utils::networking;
use crate::utils::PackageManager;
use anyhow::Result;
use tracing::warn;

/// Firewall front-ends this tool knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallManager {
    Ufw,
    Firewalld,
}

impl FirewallManager {
    pub fn detect(exec: &dyn CommandExecutor) -> Result<Option<Self>> {
        if exec.check_command_exists("ufw")? {
            Ok(Some(FirewallManager::Ufw))
        } else if exec.check_command_exists("firewall-cmd")? {
            Ok(Some(FirewallManager::Firewalld))
        } else {
            Ok(None)
        }
    }

    /// Commands that open `port/proto`, in order
    pub fn open_port_commands(&self, port: u16, protocol: Protocol) -> Vec<Vec<String>> {
        let spec = format!("{}/{}", port, protocol);
        match self {
            FirewallManager::Ufw => vec![vec!["ufw".into(), "allow".into(), spec]],
            FirewallManager::Firewalld => vec![
                vec![
                    "firewall-cmd".into(),
                    "--permanent".into(),
                    format!("--add-port={}", spec),
                ],
                vec!["firewall-cmd".into(), "--reload".into()],
            ],
        }
    }
}

fn run_soft(exec: &dyn CommandExecutor, argv: &[String]) -> bool {
    let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
    match exec.execute_simple(&argv[0], &args) {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %argv.join(" "), stderr = %stderr.trim(), "command failed");
            false
        }
        Err(e) => {
            warn!(command = %argv.join(" "), error = %e, "command could not run");
            false
        }
    }
}

/// Open the VPN port. A missing firewall manager only produces a warning.
pub fn open_vpn_port(exec: &dyn CommandExecutor, protocol: Protocol) -> Result<()> {
    println!();
    println!("=== Updating firewall ===");

    let Some(manager) = FirewallManager::detect(exec)? else {
        eprintln!("⚠ Neither ufw nor firewalld found");
        eprintln!("  Open {}/{} in your firewall manually", VPN_PORT, protocol);
        return Ok(());
    };

    let all_ok = manager
        .open_port_commands(VPN_PORT, protocol)
        .iter()
        .all(|argv| run_soft(exec, argv));
    if all_ok {
        println!("✓ Opened {}/{} via {:?}", VPN_PORT, protocol, manager);
    } else {
        eprintln!(
            "⚠ Could not open {}/{} via {:?}; open it manually",
            VPN_PORT, protocol, manager
        );
    }
    Ok(())
}

/// Enable forwarding and masquerade the VPN pool behind the default interface
pub fn enable_forwarding(
    exec: &dyn CommandExecutor,
    layout: &Layout,
    package_manager: PackageManager,
) -> Result<()> {
    let conf = layout.sysctl_conf.to_string_lossy().to_string();
    let applied = match exec.write_file(&layout.sysctl_conf, b"net.ipv4.ip_forward = 1\n") {
        Ok(()) => run_soft(exec, &["sysctl".into(), "-p".into(), conf]),
        Err(e) => {
            warn!(path = %layout.sysctl_conf.display(), error = %e, "could not write sysctl drop-in");
            false
        }
    };
    if !applied {
        eprintln!("⚠ Could not apply net.ipv4.ip_forward; clients may not reach the internet");
    }

    let iface = match networking::get_default_interface(exec) {
        Ok(Some(iface)) => iface,
        Ok(None) => {
            eprintln!("⚠ No default route found; skipping NAT for {}", VPN_CIDR);
            return Ok(());
        }
        Err(e) => {
            warn!(error = %e, "could not read the default route");
            eprintln!("⚠ Could not read the default route; skipping NAT for {}", VPN_CIDR);
            return Ok(());
        }
    };

    let rule = |op: &str| -> Vec<String> {
        [
            "iptables", "-t", "nat", op, "POSTROUTING", "-s", VPN_CIDR, "-o", iface.as_str(), "-j",
            "MASQUERADE",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    };
    // -C succeeds when the rule is already present
    let present = run_soft(exec, &rule("-C"));
    if !present && !run_soft(exec, &rule("-A")) {
        eprintln!("⚠ Could not add NAT rule for {} on {}", VPN_CIDR, iface);
        return Ok(());
    }

    let persist: Vec<String> = match package_manager {
        PackageManager::Apt => vec!["netfilter-persistent".into(), "save".into()],
        PackageManager::Dnf | PackageManager::Yum => {
            vec!["service".into(), "iptables".into(), "save".into()]
        }
    };
    if run_soft(exec, &persist) {
        println!("✓ NAT enabled for {} via {}", VPN_CIDR, iface);
    } else {
        eprintln!("⚠ NAT rule added but not persisted; it will be lost on reboot");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::testing::RecordingExecutor;
    use std::path::Path;

    #[test]
    fn test_ufw_preferred() {
        let exec = RecordingExecutor::new().with_commands(&["firewall-cmd", "ufw"]);
        open_vpn_port(&exec, Protocol::Udp).unwrap();
        assert!(exec.ran("ufw allow 1194/udp"));
        assert!(!exec.ran("firewall-cmd"));
    }

    #[test]
    fn test_firewalld_reloads() {
        let exec = RecordingExecutor::new().with_commands(&["firewall-cmd"]);
        open_vpn_port(&exec, Protocol::Tcp).unwrap();
        assert!(exec.ran("firewall-cmd --permanent --add-port=1194/tcp"));
        assert!(exec.ran("firewall-cmd --reload"));
    }

    #[test]
    fn test_no_firewall_is_not_fatal() {
        let exec = RecordingExecutor::new();
        assert!(open_vpn_port(&exec, Protocol::Tcp).is_ok());
        assert!(exec.commands.borrow().is_empty());
    }

    #[test]
    fn test_failed_firewall_command_is_not_fatal() {
        let exec = RecordingExecutor::new()
            .with_commands(&["ufw"])
            .respond("ufw", 1, "");
        assert!(open_vpn_port(&exec, Protocol::Tcp).is_ok());
    }

    #[test]
    fn test_nat_rule_added_once() {
        let layout = Layout::with_root(Path::new("/t"), PackageManager::Apt, Path::new("/root"));
        let exec = RecordingExecutor::new()
            .respond("ip route show default", 0, "default via 10.0.0.1 dev eth0\n")
            .respond("iptables -t nat -C", 1, "");
        enable_forwarding(&exec, &layout, PackageManager::Apt).unwrap();

        assert_eq!(
            exec.file("/t/etc/sysctl.d/99-natvpn.conf").as_deref(),
            Some("net.ipv4.ip_forward = 1\n")
        );
        assert!(exec.ran("iptables -t nat -A POSTROUTING -s 10.8.0.0/24 -o eth0 -j MASQUERADE"));
        assert!(exec.ran("netfilter-persistent save"));
    }

    #[test]
    fn test_forwarding_failures_are_not_fatal() {
        let layout = Layout::with_root(Path::new("/t"), PackageManager::Apt, Path::new("/root"));
        let exec = RecordingExecutor::new()
            .failing_write("/t/etc/sysctl.d/99-natvpn.conf")
            .failing_to_spawn("ip");
        enable_forwarding(&exec, &layout, PackageManager::Apt).unwrap();

        assert!(!exec.ran("sysctl -p"));
        assert!(exec.ran("ip route show default"));
        assert!(!exec.ran("iptables"));
    }

    #[test]
    fn test_existing_nat_rule_is_kept() {
        let layout = Layout::with_root(Path::new("/t"), PackageManager::Dnf, Path::new("/root"));
        let exec = RecordingExecutor::new()
            .respond("ip route show default", 0, "default via 10.0.0.1 dev ens3\n");
        enable_forwarding(&exec, &layout, PackageManager::Dnf).unwrap();
        assert!(!exec.ran("iptables -t nat -A"));
        assert!(exec.ran("service iptables save"));
    }
}
