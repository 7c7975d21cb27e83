//! Peer-to-peer messages carried through the overlay.
//!
//! Framing is one overlay message per message; the overlay tags each
//! with its numeric type and the sender's identity. All multi-byte
//! fields are network byte order.

use thiserror::Error;

use crate::{PublicKey, PUBLIC_KEY_LEN};

/// A typed peer-to-peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Data plane: a raw IPv6 datagram.
    Ip(Vec<u8>),

    /// "Send me your route table entry number `index`."
    RouteRequest { index: u32 },

    /// Reply to a `RouteRequest` whose index was within range.
    RouteAnnounce { owner: PublicKey, hops: u32 },

    /// Reply to a `RouteRequest` whose index was past the end of the
    /// responder's table; `limit` is that table's size.
    RouteEnd { limit: u32 },

    /// Peer liveness signal.
    Pong,

    /// Peer link-down signal. Advisory only; delivery is not
    /// guaranteed, so embedders should also wire their overlay's
    /// disconnect callback to the same deactivation path.
    HangUp,
}

// Numeric message types. Any fixed assignment works so long as both
// endpoints agree.
pub const KIND_PONG: u16 = 3;
pub const KIND_HANG_UP: u16 = 4;
pub const KIND_IP: u16 = 64;
pub const KIND_ROUTE_REQUEST: u16 = 65;
pub const KIND_ROUTE_ANNOUNCE: u16 = 66;
pub const KIND_ROUTE_END: u16 = 67;

impl Message {
    /// The numeric overlay message type of this message.
    pub fn kind(&self) -> u16 {
        match self {
            Message::Ip(_) => KIND_IP,
            Message::RouteRequest { .. } => KIND_ROUTE_REQUEST,
            Message::RouteAnnounce { .. } => KIND_ROUTE_ANNOUNCE,
            Message::RouteEnd { .. } => KIND_ROUTE_END,
            Message::Pong => KIND_PONG,
            Message::HangUp => KIND_HANG_UP,
        }
    }

    /// Serialize the message payload (everything after the overlay's
    /// own type/sender header).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::Ip(packet) => packet.clone(),
            Message::RouteRequest { index } => index.to_be_bytes().to_vec(),
            Message::RouteAnnounce { owner, hops } => {
                let mut buf = Vec::with_capacity(PUBLIC_KEY_LEN + 4);
                buf.extend_from_slice(owner.as_bytes());
                buf.extend_from_slice(&hops.to_be_bytes());
                buf
            }
            Message::RouteEnd { limit } => limit.to_be_bytes().to_vec(),
            Message::Pong | Message::HangUp => Vec::new(),
        }
    }

    /// Parse a message from its numeric type and payload.
    ///
    /// Control payloads must match their fixed sizes exactly; `Ip`
    /// payloads are taken verbatim (the data-plane validation lives in
    /// [`crate::frame`]). `Pong` and `HangUp` ignore any payload.
    pub fn parse(kind: u16, payload: &[u8]) -> Result<Self, ParseError> {
        match kind {
            KIND_IP => Ok(Message::Ip(payload.to_vec())),
            KIND_ROUTE_REQUEST => Ok(Message::RouteRequest {
                index: parse_u32(kind, payload)?,
            }),
            KIND_ROUTE_ANNOUNCE => {
                if payload.len() != PUBLIC_KEY_LEN + 4 {
                    return Err(ParseError::BadLength {
                        kind,
                        len: payload.len(),
                    });
                }
                let mut owner = [0u8; PUBLIC_KEY_LEN];
                owner.copy_from_slice(&payload[..PUBLIC_KEY_LEN]);
                let hops = u32::from_be_bytes(payload[PUBLIC_KEY_LEN..].try_into().unwrap());
                Ok(Message::RouteAnnounce {
                    owner: PublicKey(owner),
                    hops,
                })
            }
            KIND_ROUTE_END => Ok(Message::RouteEnd {
                limit: parse_u32(kind, payload)?,
            }),
            KIND_PONG => Ok(Message::Pong),
            KIND_HANG_UP => Ok(Message::HangUp),
            kind => Err(ParseError::UnknownKind(kind)),
        }
    }
}

fn parse_u32(kind: u16, payload: &[u8]) -> Result<u32, ParseError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| ParseError::BadLength {
        kind,
        len: payload.len(),
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// An error representing a failure to parse a peer-to-peer message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown message type {0}")]
    UnknownKind(u16),

    #[error("message of type {kind} has impossible size {len}")]
    BadLength { kind: u16, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let parsed = Message::parse(message.kind(), &message.encode_payload()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn round_trip_ip() {
        round_trip(Message::Ip(vec![0x60, 0, 0, 0]));
    }

    #[test]
    fn round_trip_route_request() {
        round_trip(Message::RouteRequest { index: 7 });
    }

    #[test]
    fn round_trip_route_announce() {
        round_trip(Message::RouteAnnounce {
            owner: PublicKey([0xab; PUBLIC_KEY_LEN]),
            hops: 4,
        });
    }

    #[test]
    fn round_trip_route_end() {
        round_trip(Message::RouteEnd { limit: 100 });
    }

    #[test]
    fn round_trip_signals() {
        round_trip(Message::Pong);
        round_trip(Message::HangUp);
    }

    #[test]
    fn announce_encoding_is_network_byte_order() {
        let payload = Message::RouteAnnounce {
            owner: PublicKey([1; PUBLIC_KEY_LEN]),
            hops: 0x0102_0304,
        }
        .encode_payload();

        assert_eq!(payload.len(), PUBLIC_KEY_LEN + 4);
        assert_eq!(&payload[PUBLIC_KEY_LEN..], &[1, 2, 3, 4]);
    }

    #[test]
    fn truncated_announce_is_rejected() {
        assert!(matches!(
            Message::parse(KIND_ROUTE_ANNOUNCE, &[0; PUBLIC_KEY_LEN + 3]),
            Err(ParseError::BadLength { kind: KIND_ROUTE_ANNOUNCE, len }) if len == PUBLIC_KEY_LEN + 3
        ));
    }

    #[test]
    fn oversized_route_request_is_rejected() {
        assert!(matches!(
            Message::parse(KIND_ROUTE_REQUEST, &[0; 5]),
            Err(ParseError::BadLength { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            Message::parse(999, &[]),
            Err(ParseError::UnknownKind(999))
        ));
    }
}
