// natvpn library
// Provisioning stages live in services/, the pipeline that runs them in provision.rs

mod cli_types;
mod commands;

pub mod config;
pub mod error;
pub mod layout;
pub mod provision;
pub mod services;
pub mod utils;

pub use cli_types::Commands;
pub use commands::handle_command;
pub use error::ProvisionError;
