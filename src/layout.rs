//! Every path a provisioning run reads, writes or deletes
//!
//! Built once per run from the detected package manager and the operator's
//! home directory, then passed to each stage.

use crate::utils::PackageManager;
use std::path::{Path, PathBuf};

pub const RELAY_UNIT: &str = "frpc.service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub pki_root: PathBuf,
    pub vpn_config_dir: PathBuf,
    pub vpn_log_dir: PathBuf,
    pub vpn_unit: String,
    pub vpn_group: String,
    pub relay_config_dir: PathBuf,
    pub relay_unit_path: PathBuf,
    pub relay_binary: PathBuf,
    pub sysctl_conf: PathBuf,
}

impl Layout {
    pub fn new(package_manager: PackageManager, home: &Path) -> Self {
        Self::with_root(Path::new("/"), package_manager, home)
    }

    /// Same layout with every system path moved under `root`
    pub fn with_root(root: &Path, package_manager: PackageManager, home: &Path) -> Self {
        // Debian ships openvpn@.service reading /etc/openvpn/<name>.conf,
        // Fedora/RHEL ship openvpn-server@.service reading /etc/openvpn/server/
        let (vpn_config_dir, vpn_unit, vpn_group) = match package_manager {
            PackageManager::Apt => ("etc/openvpn", "openvpn@server", "nogroup"),
            PackageManager::Dnf | PackageManager::Yum => {
                ("etc/openvpn/server", "openvpn-server@server", "nobody")
            }
        };

        Self {
            home: home.to_path_buf(),
            pki_root: home.join("openvpn-ca"),
            vpn_config_dir: root.join(vpn_config_dir),
            vpn_log_dir: root.join("var/log/openvpn"),
            vpn_unit: vpn_unit.to_string(),
            vpn_group: vpn_group.to_string(),
            relay_config_dir: root.join("etc/frp"),
            relay_unit_path: root.join("etc/systemd/system").join(RELAY_UNIT),
            relay_binary: root.join("usr/local/bin/frpc"),
            sysctl_conf: root.join("etc/sysctl.d/99-natvpn.conf"),
        }
    }

    pub fn pki_dir(&self) -> PathBuf {
        self.pki_root.join("pki")
    }

    pub fn server_conf(&self) -> PathBuf {
        self.vpn_config_dir.join("server.conf")
    }

    pub fn check_script(&self) -> PathBuf {
        self.vpn_config_dir.join("check_credentials.sh")
    }

    /// Server-side copies of the issued material, as referenced by server.conf
    pub fn vpn_material(&self) -> [PathBuf; 4] {
        [
            self.vpn_config_dir.join("ca.crt"),
            self.vpn_config_dir.join("server.crt"),
            self.vpn_config_dir.join("server.key"),
            self.vpn_config_dir.join("dh.pem"),
        ]
    }

    pub fn relay_config(&self) -> PathBuf {
        self.relay_config_dir.join("frpc.ini")
    }

    pub fn client_profile(&self, hostname: &str, passphrase: &str) -> PathBuf {
        self.home.join(format!("{}_{}.ovpn", hostname, passphrase))
    }

    /// Whether a file name in the home directory is a profile from an earlier run
    pub fn is_client_profile(hostname: &str, file_name: &str) -> bool {
        file_name.starts_with(&format!("{}_", hostname)) && file_name.ends_with(".ovpn")
    }
}
