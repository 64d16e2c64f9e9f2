use crate::config::{SetupConfig, SetupInputs};
use crate::provision;
use crate::utils::LocalExecutor;
use anyhow::Result;

/// Handle setup command
pub fn handle_setup(inputs: SetupInputs) -> Result<()> {
    let config = SetupConfig::resolve(inputs)?;
    provision::run_setup(&LocalExecutor, &config)
}
