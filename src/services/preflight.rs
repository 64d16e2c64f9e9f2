//! Preflight checks and teardown of state left by earlier runs

use crate::error::ProvisionError;
use crate::layout::{Layout, RELAY_UNIT};
use crate::utils::exec::CommandExecutor;
use crate::utils::service;
use crate::utils::PackageManager;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// The non-elevated user who invoked the tool (via sudo) and owns the outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

/// Fail unless running with an effective uid of 0
pub fn ensure_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(ProvisionError::NotRoot.into());
    }
    Ok(())
}

/// Detect the package manager or fail
pub fn require_package_manager(exec: &dyn CommandExecutor) -> Result<PackageManager> {
    let manager = PackageManager::detect(exec)?.ok_or(ProvisionError::NoPackageManager)?;
    println!("✓ Using {}", manager.display_name());
    Ok(manager)
}

/// Resolve the operator from `SUDO_USER`, else the current user
pub fn resolve_operator() -> Result<Operator> {
    let sudo_user = std::env::var("SUDO_USER").ok();
    let home_env = std::env::var("HOME").ok();
    resolve_operator_with(sudo_user, home_env, &mut |name| {
        let user = nix::unistd::User::from_name(name)
            .with_context(|| format!("Failed to look up user '{}'", name))?;
        Ok(user.map(|u| (u.dir, u.uid.as_raw(), u.gid.as_raw())))
    })
}

type PasswdLookup<'a> = dyn FnMut(&str) -> Result<Option<(PathBuf, u32, u32)>> + 'a;

fn resolve_operator_with(
    sudo_user: Option<String>,
    home_env: Option<String>,
    lookup: &mut PasswdLookup<'_>,
) -> Result<Operator> {
    let via_sudo = sudo_user.as_deref().is_some_and(|u| !u.is_empty());
    let name = match sudo_user.filter(|u| !u.is_empty()) {
        Some(user) => user,
        None => whoami::username(),
    };

    let (home, uid, gid) = match lookup(&name)? {
        Some(entry) => entry,
        None if !via_sudo => {
            let home = home_env.map(PathBuf::from).unwrap_or_default();
            let uid = nix::unistd::getuid().as_raw();
            let gid = nix::unistd::getgid().as_raw();
            (home, uid, gid)
        }
        None => return Err(ProvisionError::HomeDirUnresolved(name).into()),
    };

    if home.as_os_str().is_empty() {
        return Err(ProvisionError::HomeDirUnresolved(name).into());
    }
    debug!(operator = %name, home = %home.display(), "resolved operator");
    Ok(Operator {
        name,
        home,
        uid,
        gid,
    })
}

/// Stop previous services and delete everything earlier runs generated.
/// Best-effort: nothing in here aborts the run.
pub fn teardown(exec: &dyn CommandExecutor, layout: &Layout, hostname: &str) {
    println!();
    println!("=== Removing previous installation ===");

    service::stop_and_disable(exec, &layout.vpn_unit);
    service::stop_and_disable(exec, RELAY_UNIT);

    let mut doomed = vec![
        layout.pki_root.clone(),
        layout.relay_config_dir.clone(),
        layout.relay_unit_path.clone(),
        layout.relay_binary.clone(),
        layout.server_conf(),
        layout.check_script(),
        layout.vpn_config_dir.join("ipp.txt"),
        layout.sysctl_conf.clone(),
    ];
    doomed.extend(layout.vpn_material());

    match exec.list_directory(&layout.home) {
        Ok(names) => doomed.extend(
            names
                .iter()
                .filter(|name| Layout::is_client_profile(hostname, name))
                .map(|name| layout.home.join(name)),
        ),
        Err(e) => warn!(error = %e, "could not list home directory for old profiles"),
    }

    for path in &doomed {
        if let Err(e) = exec.remove_path(path) {
            warn!(path = %path.display(), error = %e, "failed to remove, continuing");
        }
    }

    if let Err(e) = service::daemon_reload(exec) {
        warn!(error = %e, "daemon-reload failed, continuing");
    }
    println!("✓ Previous state cleared");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::testing::RecordingExecutor;
    use std::path::Path;

    #[test]
    fn test_sudo_user_home_is_used() {
        let operator = resolve_operator_with(
            Some("alice".into()),
            Some("/root".into()),
            &mut |name| {
                assert_eq!(name, "alice");
                Ok(Some((PathBuf::from("/home/alice"), 1000, 1000)))
            },
        )
        .unwrap();
        assert_eq!(operator.home, PathBuf::from("/home/alice"));
        assert_eq!(operator.uid, 1000);
    }

    #[test]
    fn test_unknown_sudo_user_is_fatal() {
        let err = resolve_operator_with(Some("ghost".into()), None, &mut |_| Ok(None)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::HomeDirUnresolved(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_empty_home_is_fatal() {
        let err = resolve_operator_with(Some("bob".into()), None, &mut |_| {
            Ok(Some((PathBuf::new(), 1001, 1001)))
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::HomeDirUnresolved(_))
        ));
    }

    #[test]
    fn test_missing_package_manager_is_fatal() {
        let exec = RecordingExecutor::new();
        let err = require_package_manager(&exec).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::NoPackageManager)
        ));
    }

    #[test]
    fn test_teardown_removes_previous_state() {
        let layout = Layout::with_root(Path::new("/sys"), PackageManager::Apt, Path::new("/home/ops"));
        let exec = RecordingExecutor::new()
            .respond("systemctl stop frpc.service", 5, "")
            .with_file("/home/ops/edge_OLDPASS.ovpn", "client")
            .with_file("/home/ops/notes.txt", "keep me")
            .with_file("/home/ops/openvpn-ca/pki/ca.crt", "ca")
            .with_file("/sys/etc/frp/frpc.ini", "[common]")
            .with_file("/sys/usr/local/bin/frpc", "bin");

        teardown(&exec, &layout, "edge");

        assert!(exec.ran("systemctl stop openvpn@server"));
        assert!(exec.ran("systemctl disable frpc.service"));
        assert!(exec.ran("systemctl daemon-reload"));
        assert!(exec.file("/home/ops/edge_OLDPASS.ovpn").is_none());
        assert!(exec.file("/home/ops/openvpn-ca/pki/ca.crt").is_none());
        assert!(exec.file("/sys/etc/frp/frpc.ini").is_none());
        assert!(exec.file("/sys/usr/local/bin/frpc").is_none());
        assert_eq!(exec.file("/home/ops/notes.txt").as_deref(), Some("keep me"));
    }
}
