pub mod delivery;
pub mod firewall;
pub mod frp;
pub mod openvpn;
pub mod pki;
pub mod preflight;
