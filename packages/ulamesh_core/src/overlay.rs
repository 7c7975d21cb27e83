//! The overlay interface the core consumes.
//!
//! The peer-to-peer transport (authenticated messaging, connection
//! management, identity service) lives outside this crate. The core
//! only ever submits messages, queries identities, and nudges the
//! overlay's resource allocator through this trait; the embedder wires
//! a real transport to it and feeds received messages into
//! [`crate::VpnCore::handle_raw`].

use ulamesh_proto::{Message, PeerId, PublicKey};

/// Transmission priority of a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
    /// Ahead of everything else. The core sends all of its traffic at
    /// this priority; a VPN that queues behind bulk transfers is
    /// unusable.
    Extreme,
}

/// Result of asking the overlay's session layer for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A session already exists.
    Already,
    /// A connection attempt has been queued.
    Scheduled,
    /// The overlay declined to try.
    Refused,
}

pub trait Overlay: Send + Sync {
    /// Submit a message for delivery to `to`. Non-blocking; the
    /// overlay owns queueing and may drop past the deadline.
    fn send(&self, to: PeerId, message: Message, priority: Priority, deadline_secs: u64);

    fn local_peer_id(&self) -> PeerId;

    fn local_public_key(&self) -> PublicKey;

    /// The content-addressed handle of a full public key.
    fn peer_id_of(&self, key: &PublicKey) -> PeerId;

    /// Ask the transport to favor `peer` when allocating bandwidth.
    fn preference_increase(&self, peer: PeerId, amount: u64);

    /// Adjust the identity service's trust in `peer`, returning the
    /// new trust value.
    fn trust_change(&self, peer: PeerId, delta: i32) -> i32;

    fn session_try_connect(&self, peer: PeerId) -> ConnectOutcome;

    /// Exempt `peer` from connection admission limits.
    fn identity_whitelist(&self, peer: PeerId);
}
