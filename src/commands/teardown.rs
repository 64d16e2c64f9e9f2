use crate::provision;
use crate::utils::LocalExecutor;
use anyhow::Result;

/// Handle teardown command
pub fn handle_teardown() -> Result<()> {
    provision::run_teardown(&LocalExecutor)?;
    println!("✓ Teardown complete");
    Ok(())
}
