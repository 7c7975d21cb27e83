//! TUN packet-information framing and the ULA anonymity filter.
//!
//! Every read from and write to a tunnel device carries a 4-byte
//! packet-information prefix (`u16` flags then `u16` ethertype, both
//! network byte order, Linux `struct tun_pi`). [`FrameBuf`] owns one
//! such frame; the validation functions decide whether a frame read
//! from a device may leave the node, and whether a datagram received
//! from a peer may be written to one.

use thiserror::Error;

/// Length of the packet-information prefix.
pub const PI_LEN: usize = 4;

/// Largest IP datagram a frame may carry. One read buffer is 65,536
/// bytes, 4 of which are the prefix.
pub const MAX_PACKET: usize = 65536 - PI_LEN;

/// Ethertype for IPv6, as carried in the packet-information prefix.
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
/// Ethertype for IPv4. Recognized only to be rejected by name.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// An owned TUN frame: packet-information prefix plus IP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuf(Vec<u8>);

impl FrameBuf {
    /// Wrap bytes read from a tunnel device.
    ///
    /// Only the minimum structural bound is checked here; use
    /// [`validate_outbound`] before forwarding the payload.
    pub fn from_raw(bytes: Vec<u8>) -> Result<Self, PacketError> {
        if bytes.len() < PI_LEN {
            return Err(PacketError::TooShort(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Build a frame around a datagram about to be written to a
    /// tunnel device.
    pub fn encapsulate(ethertype: u16, packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() > MAX_PACKET {
            return Err(PacketError::TooLong(packet.len()));
        }
        let mut bytes = Vec::with_capacity(PI_LEN + packet.len());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&ethertype.to_be_bytes());
        bytes.extend_from_slice(packet);
        Ok(Self(bytes))
    }

    /// The ethertype from the packet-information prefix.
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// The IP datagram after the prefix.
    pub fn packet(&self) -> &[u8] {
        &self.0[PI_LEN..]
    }

    /// The whole frame, prefix included, for writing to a device.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Check a frame read from a tunnel device before its datagram leaves
/// the node, returning the datagram on success.
///
/// Rejects anything that is not a well-formed IPv6 datagram whose
/// source *and* destination both sit in fd00::/8. Unique-local
/// addresses are the anonymity boundary: a packet addressed outside
/// the mesh must never reach a peer.
pub fn validate_outbound(frame: &FrameBuf) -> Result<&[u8], PacketError> {
    let packet = frame.packet();
    if packet.len() > MAX_PACKET {
        return Err(PacketError::TooLong(packet.len()));
    }

    match frame.ethertype() {
        ETHERTYPE_IPV6 => {}
        ETHERTYPE_IPV4 => return Err(PacketError::Ipv4NotCarried),
        other => return Err(PacketError::UnknownEtherType(other)),
    }

    if packet.len() < IPV6_HEADER_LEN {
        return Err(PacketError::TooShort(packet.len()));
    }
    let version = packet[0] >> 4;
    if version != 6 {
        return Err(PacketError::VersionMismatch(version));
    }

    check_ula(packet)?;
    Ok(packet)
}

/// Check an IPv6 datagram received from a peer before it is written to
/// a tunnel device.
///
/// The same anonymity guard applies on the way in, plus a consistency
/// check between the header's payload-length field and the bytes
/// actually received.
pub fn validate_inbound(packet: &[u8]) -> Result<(), PacketError> {
    if packet.len() > MAX_PACKET {
        return Err(PacketError::TooLong(packet.len()));
    }
    if packet.len() < IPV6_HEADER_LEN {
        return Err(PacketError::TooShort(packet.len()));
    }
    let version = packet[0] >> 4;
    if version == 4 {
        return Err(PacketError::Ipv4NotCarried);
    }
    if version != 6 {
        return Err(PacketError::VersionMismatch(version));
    }

    let payload_len = u16::from_be_bytes([packet[4], packet[5]]) as usize;
    if IPV6_HEADER_LEN + payload_len != packet.len() {
        return Err(PacketError::InconsistentLength {
            header: payload_len,
            actual: packet.len() - IPV6_HEADER_LEN,
        });
    }

    check_ula(packet)
}

const IPV6_HEADER_LEN: usize = 40;

/// Source address bytes of an IPv6 header.
const SRC_OFF: usize = 8;
/// Destination address bytes of an IPv6 header.
const DST_OFF: usize = 24;

fn check_ula(packet: &[u8]) -> Result<(), PacketError> {
    let src = u16::from_be_bytes([packet[SRC_OFF], packet[SRC_OFF + 1]]);
    let dst = u16::from_be_bytes([packet[DST_OFF], packet[DST_OFF + 1]]);
    // fd00::/8 and above. fc00::/8 is excluded on purpose: only the
    // locally-assigned half of RFC 4193 space belongs to the mesh.
    if src < 0xFD00 {
        return Err(PacketError::NotUniqueLocal { segment: src });
    }
    if dst < 0xFD00 {
        return Err(PacketError::NotUniqueLocal { segment: dst });
    }
    Ok(())
}

/// An error representing a packet that must not be forwarded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet of {0} bytes is too short to carry an IPv6 header")]
    TooShort(usize),

    #[error("packet of {0} bytes exceeds the maximum frame size")]
    TooLong(usize),

    #[error("IPv4 is not carried over the mesh")]
    Ipv4NotCarried,

    #[error("unknown ethertype {0:#06x}")]
    UnknownEtherType(u16),

    #[error("IP version {0} does not match the frame's ethertype")]
    VersionMismatch(u8),

    #[error("header claims {header} payload bytes but {actual} were received")]
    InconsistentLength { header: usize, actual: usize },

    #[error("address segment {segment:#06x} is outside unique-local space")]
    NotUniqueLocal { segment: u16 },
}
