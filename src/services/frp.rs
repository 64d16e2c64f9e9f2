//! frp client: release download, install, config and systemd unit

use crate::config::{Protocol, SetupConfig, VPN_PORT};
use crate::error::ProvisionError;
use crate::layout::{Layout, RELAY_UNIT};
use crate::utils::exec::{ensure_success, CommandExecutor};
use crate::utils::service;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;

const RELEASE_BASE: &str = "https://github.com/fatedier/frp/releases/download";

/// Release architecture tags published by frp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayArch {
    Amd64,
    Arm,
    Arm64,
}

impl RelayArch {
    /// Map `uname -m` output onto a release tag
    pub fn from_machine(machine: &str) -> Result<Self, ProvisionError> {
        match machine.trim() {
            "x86_64" => Ok(RelayArch::Amd64),
            "armv7l" => Ok(RelayArch::Arm),
            "aarch64" => Ok(RelayArch::Arm64),
            other => Err(ProvisionError::UnsupportedArchitecture(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RelayArch::Amd64 => "amd64",
            RelayArch::Arm => "arm",
            RelayArch::Arm64 => "arm64",
        }
    }
}

pub fn release_url(version: &str, arch: RelayArch) -> String {
    let version = version.trim_start_matches('v');
    format!(
        "{}/v{}/frp_{}_linux_{}.tar.gz",
        RELEASE_BASE,
        version,
        version,
        arch.tag()
    )
}

/// Read the host architecture via `uname -m`
pub fn host_machine(exec: &dyn CommandExecutor) -> Result<String> {
    let output = exec.execute_simple("uname", &["-m"])?;
    ensure_success(&output, "uname -m")?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Retrieves a release archive from `url` into a local file
pub type Fetcher<'a> = dyn FnMut(&str, &Path) -> Result<()> + 'a;

/// Download `url` to `dest` over HTTPS
pub fn download(url: &str, dest: &Path) -> Result<()> {
    println!("Downloading from: {}", url);

    let client = reqwest::blocking::Client::builder()
        .user_agent("natvpn")
        .connect_timeout(Duration::from_secs(30))
        .timeout(None)
        .build()
        .context("Failed to create HTTP client")?;

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download {}: HTTP {}", url, response.status());
    }

    let mut file = std::fs::File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    response
        .copy_to(&mut file)
        .context("Failed to write download")?;
    println!("✓ Download successful");
    Ok(())
}

/// Unpack a .tar.gz archive into `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .context("Failed to extract tar.gz archive")
}

/// Find the `frpc` binary anywhere below `dir`
pub fn locate_binary(dir: &Path) -> Result<PathBuf> {
    let pattern = format!("{}/**/frpc", glob::Pattern::escape(&dir.to_string_lossy()));
    let found = glob::glob(&pattern)
        .context("Invalid search pattern")?
        .filter_map(|entry| entry.ok())
        .find(|path| path.is_file());
    found.ok_or_else(|| ProvisionError::RelayBinaryMissing(dir.to_path_buf()).into())
}

/// Fetch the pinned frp release for `machine` and install frpc to `target`.
/// The architecture is checked before anything is fetched.
pub fn install_binary(
    machine: &str,
    version: &str,
    target: &Path,
    fetch: &mut Fetcher<'_>,
) -> Result<()> {
    let arch = RelayArch::from_machine(machine)?;
    let url = release_url(version, arch);

    let workspace = tempfile::tempdir().context("Failed to create download directory")?;
    let archive = workspace.path().join("frp.tar.gz");
    fetch(&url, &archive)?;

    println!("Extracting archive...");
    let extracted = workspace.path().join("extracted");
    std::fs::create_dir_all(&extracted)?;
    extract_archive(&archive, &extracted)?;
    let binary = locate_binary(&extracted)?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::copy(&binary, target)
        .with_context(|| format!("Failed to install frpc to {}", target.display()))?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to set permissions for: {}", target.display()))?;
    }
    println!("✓ Installed frpc {} ({}) to {}", version, arch.tag(), target.display());
    Ok(())
}

/// Proxy section name for the tunnel
fn proxy_name(protocol: Protocol) -> String {
    format!("openvpn-{}", protocol)
}

pub fn render_client_config(config: &SetupConfig) -> String {
    format!(
        r#"[common]
server_addr = {addr}
server_port = {server_port}
token = {token}

[{name}]
type = {proto}
local_ip = 127.0.0.1
local_port = {local_port}
remote_port = {remote_port}
"#,
        addr = config.server_addr,
        server_port = config.server_port,
        token = config.token,
        name = proxy_name(config.protocol),
        proto = config.protocol,
        local_port = VPN_PORT,
        remote_port = config.remote_port,
    )
}

pub fn render_service_unit(binary: &Path, config_file: &Path) -> String {
    format!(
        r#"[Unit]
Description=frp client exposing the local OpenVPN server
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={bin} -c {config}
Restart=always
RestartSec=5s

[Install]
WantedBy=multi-user.target
"#,
        bin = binary.display(),
        config = config_file.display(),
    )
}

/// Write frpc.ini and the unit, then start the relay
pub fn configure_and_start(
    exec: &dyn CommandExecutor,
    layout: &Layout,
    config: &SetupConfig,
) -> Result<()> {
    exec.mkdir_p(&layout.relay_config_dir)?;
    let config_file = layout.relay_config();
    exec.write_file(&config_file, render_client_config(config).as_bytes())?;
    // holds the relay token
    exec.set_mode(&config_file, 0o600)?;

    exec.write_file(
        &layout.relay_unit_path,
        render_service_unit(&layout.relay_binary, &config_file).as_bytes(),
    )?;
    println!("✓ Wrote {} and {}", config_file.display(), layout.relay_unit_path.display());

    service::daemon_reload(exec)?;
    service::restart_and_enable(exec, RELAY_UNIT)
}

/// Write a gzip'd tarball holding one small executable at `entry`
#[cfg(test)]
pub(crate) fn write_test_archive(path: &Path, entry: &str) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let data = b"#!/bin/sh\necho frpc\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, entry, &data[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}
