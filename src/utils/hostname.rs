// Hostname utilities

use crate::utils::exec::CommandExecutor;
use anyhow::Result;

/// Get the current hostname from the system, exactly as reported (whitespace trimmed)
pub fn get_current_hostname(exec: &dyn CommandExecutor) -> Result<String> {
    let output = exec.execute_simple("hostname", &[])?;
    let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !hostname.is_empty() {
        return Ok(hostname);
    }

    let from_proc = exec.read_file(std::path::Path::new("/proc/sys/kernel/hostname"))?;
    let hostname = from_proc.trim().to_string();
    if hostname.is_empty() {
        anyhow::bail!("Failed to get hostname");
    }
    Ok(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::utils::exec::testing::RecordingExecutor;
    use crate::utils::PackageManager;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_fqdn_and_case_are_kept() {
        let exec = RecordingExecutor::new().respond("hostname", 0, "VPN-Box.example.com\n");
        let hostname = get_current_hostname(&exec).unwrap();
        assert_eq!(hostname, "VPN-Box.example.com");

        let layout = Layout::new(PackageManager::Apt, Path::new("/home/ops"));
        assert_eq!(
            layout.client_profile(&hostname, "PASS"),
            PathBuf::from("/home/ops/VPN-Box.example.com_PASS.ovpn")
        );
    }

    #[test]
    fn test_falls_back_to_proc() {
        let exec = RecordingExecutor::new()
            .respond("hostname", 1, "")
            .with_file("/proc/sys/kernel/hostname", "relay01\n");
        assert_eq!(get_current_hostname(&exec).unwrap(), "relay01");
    }
}
