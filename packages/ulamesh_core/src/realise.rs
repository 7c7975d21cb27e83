//! Route realisation: reconcile the prototype table with the kernel.
//!
//! Computes the set-difference between the realised snapshot and the
//! current prototype, keyed on the whole `(owner, hops, tunnel)`
//! triple, so a hop-count change is a delete followed by an add. Only
//! relayed routes (two or more hops) are pushed here; the direct /48
//! is installed when its tunnel is provisioned.

use cidr::Ipv6Cidr;

use crate::route::RouteEntry;
use crate::tunnel::TunnelTable;
use crate::{addr, VpnCore};

impl VpnCore {
    /// Run one reconciliation pass, returning a description of each
    /// applied change. Called by the cron and by the admin surface.
    ///
    /// Individual syscall failures are logged and skipped; partial
    /// convergence now beats none, and the next pass retries.
    pub fn realise(&self) -> Vec<String> {
        let mut state = self.lock_state();
        let state = &mut *state;
        let prototype = state.routes.entries().to_vec();
        let mut actions = Vec::new();

        for entry in state.realised.iter() {
            if entry.hops < 2 || prototype.contains(entry) {
                continue;
            }
            let Some((destination, interface)) = self.route_target(&state.tunnels, entry) else {
                log::warn!("stale route at {} hops has no usable tunnel", entry.hops);
                continue;
            };
            match self.net.del_route(destination, interface, entry.hops) {
                Ok(()) => actions.push(format!("del {destination} metric {}", entry.hops)),
                Err(err) => log::warn!("failed to delete route {destination}: {err}"),
            }
        }

        for entry in prototype.iter() {
            if entry.hops < 2 || state.realised.contains(entry) {
                continue;
            }
            let Some((destination, interface)) = self.route_target(&state.tunnels, entry) else {
                log::warn!("route at {} hops has no usable tunnel", entry.hops);
                continue;
            };
            match self.net.add_route(destination, interface, entry.hops) {
                Ok(()) => actions.push(format!("add {destination} metric {}", entry.hops)),
                Err(err) => log::warn!("failed to add route {destination}: {err}"),
            }
        }

        state.realised = prototype;
        actions
    }

    fn route_target(
        &self,
        tunnels: &TunnelTable,
        entry: &RouteEntry,
    ) -> Option<(Ipv6Cidr, u32)> {
        let tunnel = entry.tunnel.and_then(|index| tunnels.by_index(index))?;
        let interface = tunnel.interface?;
        let peer = self.overlay.peer_id_of(&entry.owner);
        Some((addr::peer_to_net(&peer), interface))
    }
}
