//! systemd unit helpers shared by the VPN and relay stages

use crate::utils::exec::{ensure_success, CommandExecutor};
use anyhow::Result;
use tracing::warn;

/// Stop and disable a unit. Missing units are fine.
pub fn stop_and_disable(exec: &dyn CommandExecutor, unit: &str) {
    for action in ["stop", "disable"] {
        match exec.execute_simple("systemctl", &[action, unit]) {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(unit, action, stderr = %stderr.trim(), "systemctl failed, continuing");
            }
            Err(e) => warn!(unit, action, error = %e, "systemctl could not run, continuing"),
        }
    }
}

/// Reload unit files after writing or deleting one
pub fn daemon_reload(exec: &dyn CommandExecutor) -> Result<()> {
    let output = exec.execute_simple("systemctl", &["daemon-reload"])?;
    ensure_success(&output, "systemctl daemon-reload")
}

/// Restart a unit and enable it at boot
pub fn restart_and_enable(exec: &dyn CommandExecutor, unit: &str) -> Result<()> {
    let output = exec.execute_simple("systemctl", &["restart", unit])?;
    ensure_success(&output, &format!("systemctl restart {}", unit))?;
    let output = exec.execute_simple("systemctl", &["enable", unit])?;
    ensure_success(&output, &format!("systemctl enable {}", unit))?;
    println!("✓ {} started and enabled", unit);
    Ok(())
}
