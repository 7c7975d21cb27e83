//! Wire formats for the ulamesh overlay VPN.
//!
//! Performs no I/O. Defines the peer-to-peer message types exchanged
//! through the overlay, the TUN packet-information framing, the ULA
//! anonymity filter applied to every tunnelled packet, and the framed
//! ASCII protocol spoken on the admin socket.

pub mod admin;
pub mod frame;
pub mod message;

pub use frame::FrameBuf;
pub use message::Message;

use std::fmt;

/// An opaque 256-bit peer identity supplied by the overlay.
///
/// This is the overlay's content-addressed handle for a peer (the hash
/// of its public key). Compared byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 32]);

/// A peer's full long-term public key, as an opaque byte string.
///
/// Two routes refer to the same destination iff their owner keys are
/// equal byte-wise. The overlay converts between `PublicKey` and
/// [`PeerId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

/// Length of a serialized public key on the wire.
pub const PUBLIC_KEY_LEN: usize = 64;

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}
