use crate::utils::exec::CommandExecutor;
use anyhow::{Context, Result};
use std::net::Ipv4Addr;

/// First non-loopback IPv4 address of this host
pub fn get_primary_ipv4() -> Result<Option<Ipv4Addr>> {
    let addrs = if_addrs::get_if_addrs().context("Failed to get network interfaces")?;
    let mut candidates: Vec<(String, Ipv4Addr)> = addrs
        .into_iter()
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) if !v4.ip.is_loopback() => Some((iface.name, v4.ip)),
            _ => None,
        })
        .collect();

    // VPN tunnels should not win over the physical uplink
    candidates.sort_by_key(|(name, _)| name.starts_with("tun"));
    Ok(candidates.into_iter().map(|(_, ip)| ip).next())
}

/// Interface carrying the default route, from `ip route show default`
pub fn get_default_interface(exec: &dyn CommandExecutor) -> Result<Option<String>> {
    let output = exec.execute_simple("ip", &["route", "show", "default"])?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(parse_default_interface(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

fn parse_default_interface(route: &str) -> Option<String> {
    let mut words = route.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(|s| s.to_string());
        }
    }
    None
}
