//! Fatal provisioning conditions
//!
//! Everything else flows through `anyhow` with context; these are the
//! conditions callers and tests need to tell apart.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("This command must be run as root (try: sudo natvpn ...)")]
    NotRoot,

    #[error("No supported package manager found (looked for apt-get, dnf, yum)")]
    NoPackageManager,

    #[error("Could not resolve the home directory of the invoking user '{0}'")]
    HomeDirUnresolved(String),

    #[error("Unsupported architecture: {0} (supported: x86_64, armv7l, aarch64)")]
    UnsupportedArchitecture(String),

    #[error("Certificate issuance did not produce {0}")]
    MissingCredential(PathBuf),

    #[error("frpc binary not found in extracted archive under {0}")]
    RelayBinaryMissing(PathBuf),

    #[error("Port {0} is already in use; stop whatever is listening on it and rerun")]
    PortInUse(u16),
}
