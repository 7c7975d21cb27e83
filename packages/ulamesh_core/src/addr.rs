//! Deterministic address synthesis.
//!
//! Every peer owns the /48 prefix formed by prepending `0xFD` to the
//! first 40 bits of its identity hash, per RFC 4193's locally-assigned
//! range. Distinct peers may collide on a prefix with negligible
//! probability; a collision is routing ambiguity, not a safety
//! violation.

use std::net::Ipv6Addr;

use cidr::Ipv6Cidr;
use ulamesh_proto::PeerId;

/// Prefix length of every synthesized network.
pub const NET_PREFIX_LEN: u8 = 48;

/// Subnets 0 and 1 of the local /48 are reserved for local services;
/// tunnel interfaces are numbered from here.
const SUBNET_START: u16 = 2;

/// The /48 network owned by a peer. Pure: equal ids yield equal
/// prefixes.
pub fn peer_to_net(peer: &PeerId) -> Ipv6Cidr {
    let id = peer.as_bytes();
    let mut octets = [0u8; 16];
    octets[0] = 0xFD;
    octets[1..6].copy_from_slice(&id[..5]);
    Ipv6Cidr::new(Ipv6Addr::from(octets), NET_PREFIX_LEN)
        .expect("host bits of a /48 built from 6 octets are zero")
}

/// The /64 address assigned to the local end of tunnel `local_index`:
/// our own prefix with the fourth segment set to `local_index + 2` and
/// zero host bits.
pub fn iface_addr(own: &PeerId, local_index: usize) -> Ipv6Addr {
    let mut octets = peer_to_net(own).first_address().octets();
    let subnet = local_index as u16 + SUBNET_START;
    octets[6..8].copy_from_slice(&subnet.to_be_bytes());
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(lead: [u8; 5]) -> PeerId {
        let mut id = [0u8; 32];
        id[..5].copy_from_slice(&lead);
        PeerId(id)
    }

    #[test]
    fn prefix_from_hash_bytes() {
        let net = peer_to_net(&peer([0xAA, 0xBB, 0xCC, 0xDD, 0xEE]));
        assert_eq!(net.to_string(), "fdaa:bbcc:ddee::/48");
    }

    #[test]
    fn leading_byte_is_always_fd() {
        for fill in [0x00, 0x7F, 0xFF] {
            let net = peer_to_net(&PeerId([fill; 32]));
            assert_eq!(net.first_address().octets()[0], 0xFD);
            assert_eq!(net.network_length(), 48);
        }
    }

    #[test]
    fn synthesis_is_pure() {
        let p = peer([1, 2, 3, 4, 5]);
        assert_eq!(peer_to_net(&p), peer_to_net(&p));
    }

    #[test]
    fn iface_addr_offsets_the_subnet() {
        let own = peer([0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert_eq!(
            iface_addr(&own, 0),
            "fdaa:bbcc:ddee:2::".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(
            iface_addr(&own, 3),
            "fdaa:bbcc:ddee:5::".parse::<Ipv6Addr>().unwrap()
        );
    }
}
