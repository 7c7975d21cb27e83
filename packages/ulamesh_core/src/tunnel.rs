//! Per-peer tunnel interfaces.
//!
//! One TUN device per directly connected peer, created lazily the
//! first time traffic involves that peer. Entries are deactivated in
//! place (by `HangUp`, a disconnect callback, or an I/O failure) and
//! removed only by the tunnel thread's sweep, so removal never races a
//! concurrent write.

use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};

use ulamesh_proto::PeerId;

use crate::{addr, State, VpnCore};

/// One per-peer virtual interface.
pub struct TunnelEntry {
    pub peer: PeerId,
    /// Small local index, unique across live entries and reused after
    /// removal. Doubles as the interface name suffix.
    pub index: usize,
    pub name: String,
    /// The TUN descriptor; `None` when device creation failed.
    pub file: Option<File>,
    /// OS interface index; `None` until provisioning got that far.
    pub interface: Option<u32>,
    pub active: bool,
    /// Next route index to pull from this peer.
    pub next_route_index: u32,
    /// Table size reported by the peer's `RouteEnd`, if any. Pulling
    /// stops once set, until the next reset.
    pub route_limit: Option<u32>,
}

impl TunnelEntry {
    fn new(peer: PeerId, index: usize, name: String) -> Self {
        Self {
            peer,
            index,
            name,
            file: None,
            interface: None,
            active: true,
            next_route_index: 0,
            route_limit: None,
        }
    }
}

/// The set of live tunnels. At most one entry per peer.
pub struct TunnelTable {
    entries: Vec<TunnelEntry>,
}

impl TunnelTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TunnelEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TunnelEntry> {
        self.entries.iter_mut()
    }

    pub fn by_peer_mut(&mut self, peer: &PeerId) -> Option<&mut TunnelEntry> {
        self.entries.iter_mut().find(|e| e.peer == *peer)
    }

    pub fn by_index(&self, index: usize) -> Option<&TunnelEntry> {
        self.entries.iter().find(|e| e.index == index)
    }

    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut TunnelEntry> {
        self.entries.iter_mut().find(|e| e.index == index)
    }

    /// The smallest local index not used by a live entry.
    fn free_index(&self) -> usize {
        let mut index = 0;
        while self.by_index(index).is_some() {
            index += 1;
        }
        index
    }

    fn push(&mut self, entry: TunnelEntry) {
        self.entries.push(entry);
    }

    fn take_inactive(&mut self) -> Vec<TunnelEntry> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].active {
                i += 1;
            } else {
                removed.push(self.entries.remove(i));
            }
        }
        removed
    }

    fn take_all(&mut self) -> Vec<TunnelEntry> {
        std::mem::take(&mut self.entries)
    }
}

impl Default for TunnelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VpnCore {
    /// Find or create the tunnel for `peer`, marking it active, and
    /// return its local index. Idempotent.
    ///
    /// Provisioning a new tunnel is a sequence of independently
    /// checked kernel calls; a failed step is logged and the entry is
    /// kept in whatever state it reached, so a later reconciliation
    /// pass can still route around it.
    pub(crate) fn ensure_tunnel(&self, state: &mut State, peer: PeerId) -> usize {
        if let Some(entry) = state.tunnels.by_peer_mut(&peer) {
            entry.active = true;
            return entry.index;
        }

        let index = state.tunnels.free_index();
        let name = format!("{}{}", self.config.interface_prefix, index);
        let mut entry = TunnelEntry::new(peer, index, name.clone());

        match self.net.open_tun(&name) {
            Ok(file) => entry.file = Some(file),
            Err(err) => log::warn!("{name}: failed to open tun device: {err}"),
        }
        if entry.file.is_some() {
            if let Err(err) = self.net.link_up(&name) {
                log::warn!("{name}: failed to bring link up: {err}");
            }
            if let Err(err) = self.net.set_mtu(&name, self.config.mtu) {
                log::warn!("{name}: failed to set mtu: {err}");
            }
            match self.net.interface_index(&name) {
                Ok(interface) => entry.interface = Some(interface),
                Err(err) => log::warn!("{name}: failed to resolve interface index: {err}"),
            }
        }
        if let Some(interface) = entry.interface {
            let address = addr::iface_addr(&self.overlay.local_peer_id(), index);
            if let Err(err) = self.net.add_address(interface, address, 64) {
                log::warn!("{name}: failed to assign {address}/64: {err}");
            }
            let destination = addr::peer_to_net(&peer);
            if let Err(err) = self.net.add_route(destination, interface, 1) {
                log::warn!("{name}: failed to add direct route {destination}: {err}");
            }
        }

        log::debug!("created tunnel {name} for {peer:?}");
        state.tunnels.push(entry);
        index
    }

    /// Mark the tunnel for `peer` inactive. Called on `HangUp` and by
    /// the overlay's disconnect callback.
    pub fn peer_disconnected(&self, peer: PeerId) {
        let mut state = self.lock_state();
        if let Some(entry) = state.tunnels.by_peer_mut(&peer) {
            entry.active = false;
            log::debug!("tunnel {} deactivated", entry.name);
        }
    }

    /// Mark the tunnel at `index` inactive after an I/O failure.
    pub fn deactivate_index(&self, index: usize) {
        let mut state = self.lock_state();
        if let Some(entry) = state.tunnels.by_index_mut(index) {
            entry.active = false;
            log::debug!("tunnel {} deactivated", entry.name);
        }
    }

    /// Every pollable tunnel descriptor, for the tunnel thread's
    /// registration pass.
    pub fn poll_targets(&self) -> Vec<(usize, RawFd)> {
        let state = self.lock_state();
        state
            .tunnels
            .iter()
            .filter_map(|e| e.file.as_ref().map(|f| (e.index, f.as_raw_fd())))
            .collect()
    }

    /// Remove every inactive entry, handing their descriptors to the
    /// caller. The tunnel thread deregisters each before dropping it.
    pub fn sweep_inactive(&self) -> Vec<(usize, File)> {
        let mut state = self.lock_state();
        state
            .tunnels
            .take_inactive()
            .into_iter()
            .filter_map(|e| e.file.map(|f| (e.index, f)))
            .collect()
    }

    /// Drop every tunnel, closing each descriptor. Final teardown
    /// only, after the tunnel thread has joined.
    pub fn close_all_tunnels(&self) -> Vec<(usize, File)> {
        let mut state = self.lock_state();
        state
            .tunnels
            .take_all()
            .into_iter()
            .filter_map(|e| e.file.map(|f| (e.index, f)))
            .collect()
    }
}
