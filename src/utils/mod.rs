// Utils module - host-level helpers used by every provisioning stage
pub mod exec;
pub mod hostname;
pub mod networking;
pub mod secret;
pub mod service;

pub use exec::{CommandExecutor, LocalExecutor, PackageManager};
