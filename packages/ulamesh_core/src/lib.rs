//! The ulamesh VPN core.
//!
//! Tunnels RFC 4193 unique-local IPv6 across an authenticated
//! peer-to-peer mesh. Each node derives a /48 prefix from its identity,
//! provisions one TUN interface per directly connected peer, forwards
//! datagrams between the kernel and the overlay, and runs a pull-based
//! distance-vector exchange so that nodes beyond one hop are reachable
//! through kernel routes installed by a periodic reconciliation pass.
//!
//! This crate is the state machine only. It performs no network I/O of
//! its own: overlay messaging arrives through [`VpnCore::handle_raw`],
//! TUN frames through [`VpnCore::handle_tun_frame`], and every kernel
//! interaction goes through the injected [`NetOps`] implementation.
//! The event loop that feeds it lives in `ulamesh_worker`.

pub mod addr;
pub mod admin;
pub mod net;
pub mod overlay;
pub mod protocol;
pub mod realise;
pub mod route;
pub mod tunnel;

pub use net::NetOps;
pub use overlay::{ConnectOutcome, Overlay, Priority};
pub use route::RouteEntry;

use std::sync::{Arc, Mutex, MutexGuard};

use route::RouteTable;
use serde::Deserialize;
use tunnel::TunnelTable;

/// Core configuration. All fields have conservative defaults; the
/// embedder typically deserializes this from a TOML table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of prototype routes to keep. Announcements past
    /// this bound are dropped silently.
    pub view_limit: usize,

    /// MTU configured on every tunnel interface.
    pub mtu: u32,

    /// Tunnel interface names are this prefix followed by the tunnel's
    /// local index.
    pub interface_prefix: String,

    /// Tunnel thread wakeup interval in seconds.
    pub poll_interval_secs: u64,

    /// Route reconciliation interval in seconds.
    pub realise_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            view_limit: 100,
            mtu: 1280,
            interface_prefix: "ula".to_string(),
            poll_interval_secs: 60,
            realise_interval_secs: 300,
        }
    }
}

/// The VPN core: tunnel table, prototype and realised route tables,
/// and the handlers that mutate them.
///
/// All shared state sits behind one mutex. Entry points lock it, do
/// one batch of work, and release it before calling back into the
/// overlay, so handlers may be called from any thread.
pub struct VpnCore {
    pub(crate) overlay: Arc<dyn Overlay>,
    pub(crate) net: Arc<dyn NetOps>,
    pub(crate) config: Config,
    pub(crate) state: Mutex<State>,
}

pub(crate) struct State {
    pub tunnels: TunnelTable,
    /// The live, still-evolving route view.
    pub routes: RouteTable,
    /// Snapshot of `routes` at the last reconciliation point; what the
    /// kernel currently knows.
    pub realised: Vec<RouteEntry>,
    /// Verbose per-packet logging, toggled over the admin socket.
    pub debug: bool,
}

impl VpnCore {
    pub fn new(overlay: Arc<dyn Overlay>, net: Arc<dyn NetOps>, config: Config) -> Self {
        let self_key = overlay.local_public_key();
        let routes = RouteTable::new(self_key, config.view_limit);
        let realised = routes.entries().to_vec();
        Self {
            overlay,
            net,
            config,
            state: Mutex::new(State {
                tunnels: TunnelTable::new(),
                routes,
                realised,
                debug: false,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock poisons it; the tables are
        // still structurally sound, so keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.view_limit, 100);
        assert_eq!(config.mtu, 1280);
        assert_eq!(config.interface_prefix, "ula");
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.realise_interval_secs, 300);
    }

    #[test]
    fn config_from_toml() {
        let config: Config = toml::from_str(
            r#"
                view_limit = 7
                interface_prefix = "mesh"
            "#,
        )
        .unwrap();
        assert_eq!(config.view_limit, 7);
        assert_eq!(config.interface_prefix, "mesh");
        assert_eq!(config.mtu, 1280);
    }
}
