//! Message handlers: the data plane and the pull-based route exchange.
//!
//! Each side asks the other for route table entry 0, then 1, and so
//! on until the remote answers `RouteEnd`. The only per-peer protocol
//! state is the `next_route_index` counter on the tunnel entry, so
//! lost messages cost nothing but staleness; the next reset or
//! spontaneous announcement repairs the view. Messages from unknown
//! peers implicitly create their tunnel.

use std::io::Write;

use ulamesh_proto::frame::{self, FrameBuf, ETHERTYPE_IPV6};
use ulamesh_proto::message::ParseError;
use ulamesh_proto::{Message, PeerId, PublicKey};

use crate::overlay::Priority;
use crate::VpnCore;

/// Delivery deadlines, in seconds. Data-plane packets are worthless
/// when late; table pulls can wait out a congested link.
const DEADLINE_IP: u64 = 1;
const DEADLINE_ANNOUNCE: u64 = 15;
const DEADLINE_REQUEST: u64 = 60;

/// Bandwidth-preference quantum signalled per forwarded packet.
const PREFERENCE_QUANTUM: u64 = 1000;

impl VpnCore {
    /// Entry point for raw overlay messages: parse and dispatch.
    /// Malformed messages are dropped without penalty to the sender.
    pub fn handle_raw(&self, from: PeerId, kind: u16, payload: &[u8]) {
        match Message::parse(kind, payload) {
            Ok(message) => self.handle_message(from, message),
            Err(err @ ParseError::UnknownKind(_)) => {
                log::debug!("ignoring message from {from:?}: {err}")
            }
            Err(err) => log::debug!("dropping message from {from:?}: {err}"),
        }
    }

    pub fn handle_message(&self, from: PeerId, message: Message) {
        match message {
            Message::Ip(packet) => self.handle_ip(from, &packet),
            Message::RouteRequest { index } => self.handle_route_request(from, index),
            Message::RouteAnnounce { owner, hops } => {
                self.handle_route_announce(from, owner, hops)
            }
            Message::RouteEnd { limit } => self.handle_route_end(from, limit),
            Message::Pong => {
                let mut state = self.lock_state();
                self.ensure_tunnel(&mut state, from);
            }
            Message::HangUp => self.peer_disconnected(from),
        }
    }

    /// Inbound data plane: deliver a datagram from a peer to the
    /// kernel through that peer's tunnel.
    ///
    /// The anonymity guard runs before anything else; a datagram
    /// addressed outside unique-local space must not even cause a
    /// tunnel to exist.
    fn handle_ip(&self, from: PeerId, packet: &[u8]) {
        if let Err(err) = frame::validate_inbound(packet) {
            log::warn!("dropping datagram from {from:?}: {err}");
            return;
        }

        let mut state = self.lock_state();
        if state.debug {
            log::debug!("{} byte datagram from {from:?}", packet.len());
        }
        let index = self.ensure_tunnel(&mut state, from);
        let Some(entry) = state.tunnels.by_index_mut(index) else {
            return;
        };
        let Some(file) = entry.file.as_ref() else {
            log::warn!("tunnel {}: no device, dropping inbound datagram", entry.name);
            return;
        };

        let frame = match FrameBuf::encapsulate(ETHERTYPE_IPV6, packet) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("tunnel {}: {err}", entry.name);
                return;
            }
        };
        // One write per datagram. TUN accepts a frame whole or not at
        // all; anything short means the device is wedged.
        let mut device = file;
        match device.write(frame.as_bytes()) {
            Ok(n) if n == frame.as_bytes().len() => {}
            Ok(n) => {
                log::warn!(
                    "tunnel {}: short write ({n} of {} bytes), deactivating",
                    entry.name,
                    frame.as_bytes().len()
                );
                entry.active = false;
            }
            Err(err) => {
                log::warn!("tunnel {}: write failed, deactivating: {err}", entry.name);
                entry.active = false;
            }
        }
    }

    /// Outbound data plane: a frame the tunnel thread read from the
    /// device at `index`. Validates and forwards it to the tunnel's
    /// peer.
    pub fn handle_tun_frame(&self, index: usize, frame: FrameBuf) {
        let packet = match frame::validate_outbound(&frame) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("tunnel {index}: dropping outbound frame: {err}");
                return;
            }
        };

        let peer = {
            let state = self.lock_state();
            let Some(entry) = state.tunnels.by_index(index) else {
                log::debug!("frame from unknown tunnel {index}");
                return;
            };
            if state.debug {
                log::debug!("{} byte datagram to {:?}", packet.len(), entry.peer);
            }
            entry.peer
        };

        self.overlay
            .send(peer, Message::Ip(packet.to_vec()), Priority::Extreme, DEADLINE_IP);
        self.overlay.preference_increase(peer, PREFERENCE_QUANTUM);
    }

    fn handle_route_request(&self, from: PeerId, index: u32) {
        let reply = {
            let mut state = self.lock_state();
            self.ensure_tunnel(&mut state, from);
            match state.realised.get(index as usize) {
                Some(entry) => Message::RouteAnnounce {
                    owner: entry.owner,
                    hops: entry.hops,
                },
                None => Message::RouteEnd {
                    limit: state.realised.len() as u32,
                },
            }
        };
        self.overlay.send(from, reply, Priority::Extreme, DEADLINE_ANNOUNCE);
    }

    fn handle_route_announce(&self, from: PeerId, owner: PublicKey, hops: u32) {
        let next = {
            let mut state = self.lock_state();
            let index = self.ensure_tunnel(&mut state, from);
            // +1 for the hop that reached us.
            state.routes.add(owner, hops.saturating_add(1), Some(index));

            let view_limit = self.config.view_limit as u32;
            let Some(entry) = state.tunnels.by_index_mut(index) else {
                return;
            };
            if entry.route_limit.is_some() || entry.next_route_index >= view_limit {
                None
            } else {
                entry.next_route_index += 1;
                Some(entry.next_route_index)
            }
        };

        if let Some(index) = next {
            self.overlay.send(
                from,
                Message::RouteRequest { index },
                Priority::Extreme,
                DEADLINE_REQUEST,
            );
        }
    }

    fn handle_route_end(&self, from: PeerId, limit: u32) {
        let mut state = self.lock_state();
        let index = self.ensure_tunnel(&mut state, from);
        if let Some(entry) = state.tunnels.by_index_mut(index) {
            log::debug!("tunnel {} reports {limit} routes", entry.name);
            entry.route_limit = Some(limit);
        }
    }

    /// Flush the prototype table and restart discovery: clear every
    /// tunnel's pull state and ask each known peer (active or not, to
    /// probe returning peers) for its first route.
    pub fn reset(&self) -> usize {
        let peers = {
            let mut state = self.lock_state();
            state.routes.init();
            state
                .tunnels
                .iter_mut()
                .map(|entry| {
                    entry.next_route_index = 0;
                    entry.route_limit = None;
                    entry.peer
                })
                .collect::<Vec<_>>()
        };

        for peer in &peers {
            self.overlay.send(
                *peer,
                Message::RouteRequest { index: 0 },
                Priority::Extreme,
                DEADLINE_REQUEST,
            );
        }
        log::debug!("route exchange reset, probing {} peers", peers.len());
        peers.len()
    }
}
