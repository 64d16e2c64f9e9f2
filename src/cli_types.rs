// CLI types for natvpn

use crate::config::{DEFAULT_DELIVERY_PORT, DEFAULT_FRP_VERSION, DEFAULT_RELAY_SERVER_PORT};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Provision OpenVPN behind an frp tunnel on this host (run as root)
    Setup {
        /// frp server address (IP or hostname)
        #[arg(long, env = "NATVPN_SERVER_ADDR")]
        server_addr: Option<String>,
        /// frp authentication token
        #[arg(long, env = "NATVPN_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Port exposed on the frp server (empty means 6000)
        #[arg(long, env = "NATVPN_REMOTE_PORT")]
        remote_port: Option<String>,
        /// Tunnel protocol, tcp or udp (anything else means tcp)
        #[arg(long, env = "NATVPN_PROTO")]
        proto: Option<String>,
        /// frp server control port
        #[arg(long, default_value_t = DEFAULT_RELAY_SERVER_PORT)]
        server_port: u16,
        /// frp release to install
        #[arg(long, default_value = DEFAULT_FRP_VERSION)]
        frp_version: String,
        /// Port of the temporary download server
        #[arg(long, default_value_t = DEFAULT_DELIVERY_PORT)]
        delivery_port: u16,
        /// Skip the download server and only print the credentials
        #[arg(long)]
        no_serve: bool,
    },
    /// Stop both services and remove everything a previous setup generated
    Teardown,
}
