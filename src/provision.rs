//! The provisioning pipeline: preflight, packages, PKI, OpenVPN, frp, firewall, delivery

use crate::config::SetupConfig;
use crate::layout::Layout;
use crate::services::delivery::{self, DeliveryServer};
use crate::services::firewall;
use crate::services::frp::{self, Fetcher};
use crate::services::openvpn::{self, Credential};
use crate::services::pki::{Identity, Pki};
use crate::services::preflight::{self, Operator};
use crate::utils::exec::CommandExecutor;
use crate::utils::{hostname, networking, secret, PackageManager};
use anyhow::Result;
use std::net::TcpListener;
use std::path::PathBuf;
use tracing::info;

/// Facts about the machine gathered during preflight
#[derive(Debug, Clone)]
pub struct Host {
    pub package_manager: PackageManager,
    pub operator: Operator,
    pub hostname: String,
    pub layout: Layout,
}

impl Host {
    /// Privilege check, package manager, operator and hostname
    pub fn detect(exec: &dyn CommandExecutor) -> Result<Self> {
        println!("=== Preflight ===");
        preflight::ensure_root()?;
        let package_manager = preflight::require_package_manager(exec)?;
        let operator = preflight::resolve_operator()?;
        let hostname = hostname::get_current_hostname(exec)?;
        let layout = Layout::new(package_manager, &operator.home);
        println!(
            "✓ Host '{}', outputs for '{}' in {}",
            hostname,
            operator.name,
            operator.home.display()
        );
        Ok(Self {
            package_manager,
            operator,
            hostname,
            layout,
        })
    }
}

/// Random material generated once per run
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Only used to drive Easy-RSA
    pub ca_passphrase: String,
    pub credential: Credential,
    pub identity: Identity,
}

impl Secrets {
    pub fn generate(hostname: &str) -> Self {
        Self {
            ca_passphrase: secret::generate_passphrase(),
            credential: Credential::new(secret::generate_passphrase()),
            identity: Identity::generate(hostname),
        }
    }
}

/// What the operator needs once provisioning is done
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub credential: Credential,
    pub profile: PathBuf,
}

/// Stages 1 to 7: teardown through firewall. Stops at the first fatal error.
pub fn provision(
    exec: &dyn CommandExecutor,
    host: &Host,
    config: &SetupConfig,
    secrets: &Secrets,
    fetch: &mut Fetcher<'_>,
) -> Result<Provisioned> {
    let layout = &host.layout;
    preflight::teardown(exec, layout, &host.hostname);

    println!();
    println!("=== Installing packages ===");
    host.package_manager
        .install_packages(exec, host.package_manager.provisioning_packages())?;
    println!("✓ Packages installed");

    println!();
    println!("=== Issuing certificates ===");
    let pki = Pki::locate(exec, layout, &secrets.ca_passphrase)?;
    let issued = pki.issue(&secrets.identity)?;

    openvpn::install_server(exec, layout, &issued, &secrets.credential, config.protocol)?;
    let profile = openvpn::write_client_profile(
        exec,
        layout,
        &issued,
        &host.operator,
        &host.hostname,
        &secrets.credential,
        config,
    )?;

    println!();
    println!("=== Installing frp client ===");
    let machine = frp::host_machine(exec)?;
    frp::install_binary(&machine, &config.frp_version, &layout.relay_binary, fetch)?;
    frp::configure_and_start(exec, layout, config)?;

    firewall::open_vpn_port(exec, config.protocol)?;
    firewall::enable_forwarding(exec, layout, host.package_manager)?;

    info!(profile = %profile.display(), "provisioning finished");
    Ok(Provisioned {
        credential: secrets.credential.clone(),
        profile,
    })
}

/// Claim the delivery port before anything on the host is changed.
/// `None` when the download server is disabled.
pub fn reserve_delivery_port(config: &SetupConfig) -> Result<Option<TcpListener>> {
    if !config.serve {
        return Ok(None);
    }
    let listener = delivery::reserve_port(config.delivery_port)?;
    println!("✓ Port {} reserved for the profile download", config.delivery_port);
    Ok(Some(listener))
}

/// `natvpn setup`
pub fn run_setup(exec: &dyn CommandExecutor, config: &SetupConfig) -> Result<()> {
    let host = Host::detect(exec)?;
    let reserved = reserve_delivery_port(config)?;
    let secrets = Secrets::generate(&host.hostname);
    let outcome = provision(exec, &host, config, &secrets, &mut frp::download)?;
    deliver(&host, config, &outcome, reserved)
}

/// `natvpn teardown`
pub fn run_teardown(exec: &dyn CommandExecutor) -> Result<()> {
    let host = Host::detect(exec)?;
    preflight::teardown(exec, &host.layout, &host.hostname);
    Ok(())
}

/// Stage 8: serve the operator's home until they confirm the download
fn deliver(
    host: &Host,
    config: &SetupConfig,
    outcome: &Provisioned,
    reserved: Option<TcpListener>,
) -> Result<()> {
    let Some(listener) = reserved else {
        print_summary(outcome, None);
        return Ok(());
    };

    println!();
    println!("=== Serving client profile ===");
    let server = DeliveryServer::serve(listener, &host.layout.home)?;

    let address = match networking::get_primary_ipv4()? {
        Some(ip) => ip.to_string(),
        None => {
            eprintln!("⚠ Could not determine this host's IP address");
            "<this-host>".to_string()
        }
    };
    let file_name = outcome
        .profile
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let url = delivery::download_url(&address, config.delivery_port, &file_name);

    print_summary(outcome, Some(&url));
    delivery::wait_for_keypress("Press any key once the profile has been downloaded...")?;
    server.stop()?;
    println!("✓ File server stopped");
    Ok(())
}

fn print_summary(outcome: &Provisioned, url: Option<&str>) {
    println!();
    println!("=== Setup complete ===");
    println!("  VPN username:   {}", outcome.credential.username);
    println!("  VPN password:   {}", outcome.credential.passphrase);
    println!("  Client profile: {}", outcome.profile.display());
    if let Some(url) = url {
        println!("  Download URL:   {}", url);
    }
    println!();
    println!("Note: certificate keys are stored without a passphrase (nopass).");
    println!("      Protect the client profile; it carries the client private key.");
}
