//! Host network helpers: interface addresses and hardware addresses.

use std::net::Ipv4Addr;
use std::path::Path;

/// Default sysfs root holding `<iface>/address` files.
pub const SYSFS_NET_ROOT: &str = "/sys/class/net";

/// First IPv4 address assigned to `interface`.
///
/// With an empty name, returns the first address of any non-loopback
/// interface. Returns `None` if nothing matches or enumeration fails.
pub fn interface_ipv4(interface: &str) -> Option<Ipv4Addr> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "getifaddrs failed");
            return None;
        }
    };

    for ifaddr in addrs {
        if !interface.is_empty() && ifaddr.interface_name != interface {
            continue;
        }
        if interface.is_empty() && ifaddr.interface_name == "lo" {
            continue;
        }
        let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        return Some(Ipv4Addr::from(sin.ip()));
    }
    None
}

/// [`interface_ipv4`] falling back to `0.0.0.0`, as used on the wire.
pub fn interface_ipv4_or_unspecified(interface: &str) -> Ipv4Addr {
    interface_ipv4(interface).unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Read the 6-byte hardware address of `interface` from sysfs.
pub fn read_mac_address(sysfs_root: &Path, interface: &str) -> Option<[u8; 6]> {
    let path = sysfs_root.join(interface).join("address");
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_mac(text.trim()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read MAC address");
            None
        }
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (case-insensitive).
pub fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
