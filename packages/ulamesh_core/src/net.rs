//! Kernel operations the core depends on.
//!
//! Exactly the OS surface the VPN touches: TUN device creation,
//! interface flags, MTU, one IPv6 address per interface, and IPv6
//! route add/delete by interface index. `ulamesh_worker` provides the
//! Linux implementation; tests substitute a recording mock.

use std::fs::File;
use std::io;
use std::net::Ipv6Addr;

use cidr::Ipv6Cidr;

pub trait NetOps: Send + Sync {
    /// Create a TUN device named `name` and return its descriptor,
    /// opened for non-blocking reads. The device carries the 4-byte
    /// packet-information prefix on every frame.
    fn open_tun(&self, name: &str) -> io::Result<File>;

    /// Set the interface UP and RUNNING.
    fn link_up(&self, name: &str) -> io::Result<()>;

    fn set_mtu(&self, name: &str, mtu: u32) -> io::Result<()>;

    fn interface_index(&self, name: &str) -> io::Result<u32>;

    /// Assign `address`/`prefix_len` to the interface.
    fn add_address(&self, interface: u32, address: Ipv6Addr, prefix_len: u8) -> io::Result<()>;

    /// Install a route to `destination` through `interface`.
    fn add_route(&self, destination: Ipv6Cidr, interface: u32, metric: u32) -> io::Result<()>;

    fn del_route(&self, destination: Ipv6Cidr, interface: u32, metric: u32) -> io::Result<()>;
}
