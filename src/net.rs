// ABOUTME: Tailscale interface discovery for the /api/server-info endpoint
// Tailscale's CGNAT range is 100.64.0.0/10; we find the outbound local address and check it

use std::net::{IpAddr, UdpSocket};

fn in_tailscale_range(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000
        }
        IpAddr::V6(_) => false,
    }
}

/// Finds the local address the OS would route a packet from without
/// actually sending anything, then checks whether it falls in Tailscale's
/// CGNAT range. Returns `None` if no interface is up or none match.
pub fn discover_tailscale_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("100.100.100.100:1").ok()?;
    let local_ip = socket.local_addr().ok()?.ip();
    in_tailscale_range(local_ip).then(|| local_ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_tailscale_cgnat_range() {
        assert!(in_tailscale_range("100.64.0.1".parse().unwrap()));
        assert!(in_tailscale_range("100.100.50.1".parse().unwrap()));
        assert!(!in_tailscale_range("100.128.0.1".parse().unwrap()));
        assert!(!in_tailscale_range("192.168.1.1".parse().unwrap()));
        assert!(!in_tailscale_range("10.0.0.1".parse().unwrap()));
    }
}
