//! The admin query/command surface.
//!
//! One framed request in, a few tagged ASCII lines out, ending with a
//! summary line carrying the request's own tag. The socket handling
//! lives in `ulamesh_admin`; this module only formats tables and
//! drives the core's operations.

use base64::prelude::*;
use thiserror::Error;
use ulamesh_proto::admin::{Reply, Request, RequestTag};
use ulamesh_proto::PeerId;

use crate::route::RouteEntry;
use crate::{addr, VpnCore};

/// Trust quantum granted to every active peer by the `trust` command.
const TRUST_QUANTUM: i32 = 1000;

impl VpnCore {
    /// Execute one admin request. Always ends with a `Reply::Done`
    /// carrying the request's tag.
    pub fn admin(&self, request: &Request) -> Vec<Reply> {
        match request.tag {
            RequestTag::Tunnels => self.admin_tunnels(),
            RequestTag::Routes => self.admin_routes(RequestTag::Routes),
            RequestTag::Realised => self.admin_routes(RequestTag::Realised),
            RequestTag::Realise => self.admin_realise(),
            RequestTag::Reset => self.admin_reset(),
            RequestTag::Trust => self.admin_trust(),
            RequestTag::Add => self.admin_add(&request.param),
            RequestTag::DebugOn => self.admin_debug(true),
            RequestTag::DebugOff => self.admin_debug(false),
        }
    }

    fn admin_tunnels(&self) -> Vec<Reply> {
        let state = self.lock_state();
        let own = addr::peer_to_net(&self.overlay.local_peer_id());
        let mut replies = vec![Reply::Line(format!("{own} this node"))];
        for entry in state.tunnels.iter() {
            replies.push(Reply::Line(format!(
                "{} if {} peer {} active {} seen {}",
                addr::peer_to_net(&entry.peer),
                entry.name,
                BASE64_STANDARD.encode(entry.peer.as_bytes()),
                entry.active,
                entry.next_route_index,
            )));
        }
        let count = state.tunnels.len();
        replies.push(Reply::Done {
            tag: RequestTag::Tunnels,
            summary: format!("{count} tunnels"),
        });
        replies
    }

    fn admin_routes(&self, tag: RequestTag) -> Vec<Reply> {
        let state = self.lock_state();
        let entries: &[RouteEntry] = match tag {
            RequestTag::Realised => &state.realised,
            _ => state.routes.entries(),
        };
        let mut replies: Vec<Reply> = entries
            .iter()
            .map(|entry| Reply::Line(self.route_line(entry)))
            .collect();
        replies.push(Reply::Done {
            tag,
            summary: format!("{} routes", entries.len()),
        });
        replies
    }

    fn route_line(&self, entry: &RouteEntry) -> String {
        let net = addr::peer_to_net(&self.overlay.peer_id_of(&entry.owner));
        match entry.tunnel {
            None => format!("{net} hops {} (this node)", entry.hops),
            Some(tunnel) => format!("{net} hops {} tunnel {tunnel}", entry.hops),
        }
    }

    fn admin_realise(&self) -> Vec<Reply> {
        let actions = self.realise();
        let count = actions.len();
        let mut replies: Vec<Reply> = actions.into_iter().map(Reply::Line).collect();
        replies.push(Reply::Done {
            tag: RequestTag::Realise,
            summary: format!("{count} changes"),
        });
        replies
    }

    fn admin_reset(&self) -> Vec<Reply> {
        let probed = self.reset();
        vec![Reply::Done {
            tag: RequestTag::Reset,
            summary: format!("reset, probing {probed} peers"),
        }]
    }

    fn admin_trust(&self) -> Vec<Reply> {
        let peers: Vec<PeerId> = {
            let state = self.lock_state();
            state
                .tunnels
                .iter()
                .filter(|e| e.active)
                .map(|e| e.peer)
                .collect()
        };
        let mut replies = Vec::with_capacity(peers.len() + 1);
        for peer in &peers {
            let trust = self.overlay.trust_change(*peer, TRUST_QUANTUM);
            replies.push(Reply::Line(format!(
                "peer {} trust {trust}",
                BASE64_STANDARD.encode(peer.as_bytes()),
            )));
        }
        replies.push(Reply::Done {
            tag: RequestTag::Trust,
            summary: format!("trust raised for {} peers", peers.len()),
        });
        replies
    }

    fn admin_add(&self, param: &str) -> Vec<Reply> {
        let peer = match decode_peer_id(param) {
            Ok(peer) => peer,
            Err(err) => {
                return vec![Reply::Done {
                    tag: RequestTag::Add,
                    summary: format!("error: {err}"),
                }]
            }
        };
        self.overlay.identity_whitelist(peer);
        let outcome = self.overlay.session_try_connect(peer);
        vec![Reply::Done {
            tag: RequestTag::Add,
            summary: match outcome {
                crate::ConnectOutcome::Already => "connected".to_string(),
                crate::ConnectOutcome::Scheduled => "scheduled".to_string(),
                crate::ConnectOutcome::Refused => "refused".to_string(),
            },
        }]
    }

    fn admin_debug(&self, enabled: bool) -> Vec<Reply> {
        let mut state = self.lock_state();
        state.debug = enabled;
        vec![Reply::Done {
            tag: if enabled {
                RequestTag::DebugOn
            } else {
                RequestTag::DebugOff
            },
            summary: format!("debug {}", if enabled { "on" } else { "off" }),
        }]
    }
}

/// An error representing an unusable peer id argument.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("peer id is not valid base64")]
    BadEncoding(#[source] base64::DecodeError),

    #[error("peer id decodes to {0} bytes, expected 32")]
    BadLength(usize),
}

fn decode_peer_id(encoded: &str) -> Result<PeerId, IdentityError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(IdentityError::BadEncoding)?;
    let id: [u8; 32] = bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| IdentityError::BadLength(bytes.len()))?;
    Ok(PeerId(id))
}
