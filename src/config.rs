//! Operator inputs for a provisioning run
//!
//! Values come from CLI flags, then environment (including `.env`), then an
//! interactive prompt for whatever is still missing.

use anyhow::Result;
use std::fmt;
use std::io::{self, Write};

pub const DEFAULT_REMOTE_PORT: u16 = 6000;
pub const DEFAULT_RELAY_SERVER_PORT: u16 = 7000;
pub const DEFAULT_FRP_VERSION: &str = "0.51.3";
pub const DEFAULT_DELIVERY_PORT: u16 = 8000;
pub const VPN_PORT: u16 = 1194;
pub const VPN_USERNAME: &str = "openvpn";

/// Transport used by both OpenVPN and the relay tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// `udp` selects UDP; anything else, including garbage, is TCP
    pub fn parse_or_default(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "udp" => Protocol::Udp,
            _ => Protocol::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw inputs as given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct SetupInputs {
    pub server_addr: Option<String>,
    pub token: Option<String>,
    pub remote_port: Option<String>,
    pub protocol: Option<String>,
    pub server_port: u16,
    pub frp_version: String,
    pub delivery_port: u16,
    pub serve: bool,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConfig {
    pub server_addr: String,
    pub token: String,
    pub remote_port: u16,
    pub protocol: Protocol,
    pub server_port: u16,
    pub frp_version: String,
    pub delivery_port: u16,
    pub serve: bool,
}

impl SetupConfig {
    /// Resolve inputs, asking on the terminal for anything missing
    pub fn resolve(inputs: SetupInputs) -> Result<Self> {
        Self::resolve_with(inputs, &mut prompt)
    }

    /// Resolve inputs with a caller-supplied prompt
    pub fn resolve_with<F>(inputs: SetupInputs, ask: &mut F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let server_addr = match inputs.server_addr.filter(|s| !s.trim().is_empty()) {
            Some(addr) => addr.trim().to_string(),
            None => loop {
                let addr = ask("frp server address (IP or hostname): ")?;
                if !addr.trim().is_empty() {
                    break addr.trim().to_string();
                }
                eprintln!("⚠ The frp server address is required");
            },
        };

        let token = match inputs.token {
            Some(token) => token,
            None => ask("frp authentication token: ")?,
        }
        .trim()
        .to_string();

        let mut remote_port = inputs.remote_port;
        let remote_port = loop {
            let raw = match remote_port.take() {
                Some(raw) => raw,
                None => ask(&format!("Remote port to expose [{}]: ", DEFAULT_REMOTE_PORT))?,
            };
            match parse_port(&raw) {
                Some(port) => break port,
                None => eprintln!("⚠ '{}' is not a valid port number", raw.trim()),
            }
        };

        let protocol = match inputs.protocol {
            Some(proto) => proto,
            None => ask("Protocol (tcp/udp) [tcp]: ")?,
        };
        let protocol = Protocol::parse_or_default(&protocol);

        Ok(Self {
            server_addr,
            token,
            remote_port,
            protocol,
            server_port: inputs.server_port,
            frp_version: inputs.frp_version,
            delivery_port: inputs.delivery_port,
            serve: inputs.serve,
        })
    }
}

/// Empty input means the default remote port
fn parse_port(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(DEFAULT_REMOTE_PORT);
    }
    raw.parse::<u16>().ok().filter(|port| *port != 0)
}

fn prompt(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
