//! OpenVPN server configuration, credential check and client profile

use crate::config::{Protocol, SetupConfig, VPN_PORT, VPN_USERNAME};
use crate::layout::Layout;
use crate::services::pki::IssuedCredentials;
use crate::services::preflight::Operator;
use crate::utils::exec::CommandExecutor;
use crate::utils::service;
use anyhow::Result;
use std::path::{Path, PathBuf};

pub const VPN_SUBNET: &str = "10.8.0.0";
pub const VPN_NETMASK: &str = "255.255.255.0";
pub const VPN_CIDR: &str = "10.8.0.0/24";
const CIPHER: &str = "AES-256-CBC";

/// The single login accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub passphrase: String,
}

impl Credential {
    pub fn new(passphrase: String) -> Self {
        Self {
            username: VPN_USERNAME.to_string(),
            passphrase,
        }
    }
}

/// Paths the server config points at
pub struct ServerPaths<'a> {
    pub ca: &'a Path,
    pub cert: &'a Path,
    pub key: &'a Path,
    pub dh: &'a Path,
    pub check_script: &'a Path,
    pub log_dir: &'a Path,
    pub pool_file: &'a Path,
}

pub fn render_server_config(protocol: Protocol, group: &str, paths: &ServerPaths<'_>) -> String {
    format!(
        r#"port {port}
proto {proto}
dev tun
ca {ca}
cert {cert}
key {key}
dh {dh}
server {subnet} {netmask}
ifconfig-pool-persist {pool}
push "redirect-gateway def1 bypass-dhcp"
push "dhcp-option DNS 8.8.8.8"
push "dhcp-option DNS 1.1.1.1"
client-to-client
keepalive 10 120
cipher {cipher}
persist-key
persist-tun
user nobody
group {group}
status {log_dir}/openvpn-status.log
log-append {log_dir}/openvpn.log
verb 3
script-security 3
auth-user-pass-verify {check} via-env
"#,
        port = VPN_PORT,
        proto = protocol,
        ca = paths.ca.display(),
        cert = paths.cert.display(),
        key = paths.key.display(),
        dh = paths.dh.display(),
        subnet = VPN_SUBNET,
        netmask = VPN_NETMASK,
        pool = paths.pool_file.display(),
        cipher = CIPHER,
        group = group,
        log_dir = paths.log_dir.display(),
        check = paths.check_script.display(),
    )
}

/// Shell script run by OpenVPN with `$username`/`$password` in its environment
pub fn render_check_script(credential: &Credential) -> String {
    format!(
        r#"#!/bin/sh
# Accepts exactly one username/password pair
if [ "$username" = "{user}" ] && [ "$password" = "{pass}" ]; then
    exit 0
fi
exit 1
"#,
        user = credential.username,
        pass = credential.passphrase,
    )
}

/// Inline PEM material for the client profile
pub struct ClientMaterial<'a> {
    pub ca: &'a str,
    pub cert: &'a str,
    pub key: &'a str,
}

pub fn render_client_profile(
    protocol: Protocol,
    remote_host: &str,
    remote_port: u16,
    material: &ClientMaterial<'_>,
) -> String {
    format!(
        r#"client
dev tun
proto {proto}
remote {host} {port}
resolv-retry infinite
nobind
persist-key
persist-tun
remote-cert-tls server
cipher {cipher}
auth-user-pass
verb 3
<ca>
{ca}
</ca>
<cert>
{cert}
</cert>
<key>
{key}
</key>
"#,
        proto = protocol,
        host = remote_host,
        port = remote_port,
        cipher = CIPHER,
        ca = pem_only(material.ca),
        cert = pem_only(material.cert),
        key = pem_only(material.key),
    )
}

/// Drop the human-readable dump Easy-RSA puts before the PEM armor
pub fn pem_only(content: &str) -> &str {
    match content.find("-----BEGIN") {
        Some(start) => content[start..].trim_end(),
        None => content.trim(),
    }
}

/// Copy issued material, write server.conf and the check script, start the daemon
pub fn install_server(
    exec: &dyn CommandExecutor,
    layout: &Layout,
    issued: &IssuedCredentials,
    credential: &Credential,
    protocol: Protocol,
) -> Result<()> {
    println!();
    println!("=== Configuring OpenVPN server ===");

    exec.mkdir_p(&layout.vpn_config_dir)?;
    exec.mkdir_p(&layout.vpn_log_dir)?;

    let [ca, cert, key, dh] = layout.vpn_material();
    let sources = [
        &issued.ca_cert,
        &issued.server_cert,
        &issued.server_key,
        &issued.dh_params,
    ];
    for (from, to) in sources.into_iter().zip([&ca, &cert, &key, &dh]) {
        exec.copy_file(from, to)?;
    }
    exec.set_mode(&key, 0o600)?;

    let check_script = layout.check_script();
    exec.write_file(&check_script, render_check_script(credential).as_bytes())?;
    exec.set_mode(&check_script, 0o755)?;

    let pool_file = layout.vpn_config_dir.join("ipp.txt");
    let paths = ServerPaths {
        ca: &ca,
        cert: &cert,
        key: &key,
        dh: &dh,
        check_script: &check_script,
        log_dir: &layout.vpn_log_dir,
        pool_file: &pool_file,
    };
    let server_conf = layout.server_conf();
    exec.write_file(
        &server_conf,
        render_server_config(protocol, &layout.vpn_group, &paths).as_bytes(),
    )?;
    println!("✓ Wrote {}", server_conf.display());

    service::daemon_reload(exec)?;
    service::restart_and_enable(exec, &layout.vpn_unit)?;
    Ok(())
}

/// Write the client profile into the operator's home and hand it to them
pub fn write_client_profile(
    exec: &dyn CommandExecutor,
    layout: &Layout,
    issued: &IssuedCredentials,
    operator: &Operator,
    hostname: &str,
    credential: &Credential,
    config: &SetupConfig,
) -> Result<PathBuf> {
    let ca = exec.read_file(&issued.ca_cert)?;
    let cert = exec.read_file(&issued.client_cert)?;
    let key = exec.read_file(&issued.client_key)?;
    let material = ClientMaterial {
        ca: &ca,
        cert: &cert,
        key: &key,
    };

    let profile = layout.client_profile(hostname, &credential.passphrase);
    let content = render_client_profile(
        config.protocol,
        &config.server_addr,
        config.remote_port,
        &material,
    );
    exec.write_file(&profile, content.as_bytes())?;
    exec.set_mode(&profile, 0o600)?;
    exec.chown(&profile, operator.uid, operator.gid)?;

    println!("✓ Client profile written to {}", profile.display());
    Ok(profile)
}
