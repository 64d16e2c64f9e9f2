// Command module routing
//
// To add a new command:
// 1. Create a new file in this directory (e.g., `mycommand.rs`)
// 2. Add `pub mod mycommand;` below
// 3. Add the match arm in `handle_command` function

pub mod setup;
pub mod teardown;

use crate::Commands;
use crate::Commands::*;
use anyhow::Result;

/// Dispatch command to appropriate handler
pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Setup {
            server_addr,
            token,
            remote_port,
            proto,
            server_port,
            frp_version,
            delivery_port,
            no_serve,
        } => setup::handle_setup(crate::config::SetupInputs {
            server_addr,
            token,
            remote_port,
            protocol: proto,
            server_port,
            frp_version,
            delivery_port,
            serve: !no_serve,
        }),
        Teardown => teardown::handle_teardown(),
    }
}
