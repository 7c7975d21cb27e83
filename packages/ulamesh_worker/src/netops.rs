//! Linux implementation of the core's kernel interface.
//!
//! Everything goes through classic ioctls: `TUNSETIFF` on
//! `/dev/net/tun` for device creation, `SIOCSIF*` on an `AF_INET6`
//! control socket for flags, MTU and addresses, and
//! `SIOCADDRT`/`SIOCDELRT` with `in6_rtmsg` for routes.

use std::fs::File;
use std::io;
use std::net::Ipv6Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use cidr::Ipv6Cidr;
use ulamesh_core::NetOps;

const TUN_DEVICE: &str = "/dev/net/tun";

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxNetOps;

impl NetOps for LinuxNetOps {
    fn open_tun(&self, name: &str) -> io::Result<File> {
        // Non-blocking: the tunnel thread reads until it would block.
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(TUN_DEVICE)?;
        // IFF_TUN without IFF_NO_PI: frames carry the 4-byte
        // packet-information prefix the framing layer expects.
        let mut request = IfReq {
            name: ifname_bytes(name)?,
            data: IfReqData {
                flags: libc::IFF_TUN as libc::c_short,
            },
        };
        ioctl(file.as_raw_fd(), libc::TUNSETIFF, &mut request)?;
        Ok(file)
    }

    fn link_up(&self, name: &str) -> io::Result<()> {
        let socket = inet6_socket()?;
        let mut request = IfReq {
            name: ifname_bytes(name)?,
            data: IfReqData { flags: 0 },
        };
        ioctl(socket.as_raw_fd(), libc::SIOCGIFFLAGS, &mut request)?;
        let flags =
            unsafe { request.data.flags } | (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        request.data = IfReqData { flags };
        ioctl(socket.as_raw_fd(), libc::SIOCSIFFLAGS, &mut request)
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> io::Result<()> {
        let socket = inet6_socket()?;
        let mut request = IfReq {
            name: ifname_bytes(name)?,
            data: IfReqData {
                mtu: mtu as libc::c_int,
            },
        };
        ioctl(socket.as_raw_fd(), libc::SIOCSIFMTU, &mut request)
    }

    fn interface_index(&self, name: &str) -> io::Result<u32> {
        let socket = inet6_socket()?;
        let mut request = IfReq {
            name: ifname_bytes(name)?,
            data: IfReqData { index: 0 },
        };
        ioctl(socket.as_raw_fd(), libc::SIOCGIFINDEX, &mut request)?;
        Ok(unsafe { request.data.index } as u32)
    }

    fn add_address(&self, interface: u32, address: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
        let socket = inet6_socket()?;
        let mut request = In6Ifreq {
            addr: in6(address),
            prefix_len: prefix_len as u32,
            ifindex: interface as libc::c_int,
        };
        ioctl(socket.as_raw_fd(), libc::SIOCSIFADDR, &mut request)
    }

    fn add_route(&self, destination: Ipv6Cidr, interface: u32, metric: u32) -> io::Result<()> {
        route_op(libc::SIOCADDRT, destination, interface, metric)
    }

    fn del_route(&self, destination: Ipv6Cidr, interface: u32, metric: u32) -> io::Result<()> {
        route_op(libc::SIOCDELRT, destination, interface, metric)
    }
}

fn route_op(
    op: libc::c_ulong,
    destination: Ipv6Cidr,
    interface: u32,
    metric: u32,
) -> io::Result<()> {
    let socket = inet6_socket()?;
    let mut request = In6Rtmsg {
        dst: in6(destination.first_address()),
        src: in6(Ipv6Addr::UNSPECIFIED),
        gateway: in6(Ipv6Addr::UNSPECIFIED),
        kind: 0,
        dst_len: destination.network_length() as u16,
        src_len: 0,
        metric,
        info: 0,
        flags: libc::RTF_UP as u32,
        ifindex: interface as libc::c_int,
    };
    ioctl(socket.as_raw_fd(), op, &mut request)
}

// Layout-compatible with struct ifreq; only the members this crate
// touches are named.
#[repr(C)]
struct IfReq {
    name: [u8; libc::IFNAMSIZ],
    data: IfReqData,
}

#[repr(C)]
union IfReqData {
    flags: libc::c_short,
    mtu: libc::c_int,
    index: libc::c_int,
    _pad: [u8; 24],
}

// struct in6_ifreq from linux/ipv6.h.
#[repr(C)]
struct In6Ifreq {
    addr: libc::in6_addr,
    prefix_len: u32,
    ifindex: libc::c_int,
}

// struct in6_rtmsg from linux/ipv6_route.h.
#[repr(C)]
struct In6Rtmsg {
    dst: libc::in6_addr,
    src: libc::in6_addr,
    gateway: libc::in6_addr,
    kind: u32,
    dst_len: u16,
    src_len: u16,
    metric: u32,
    info: libc::c_ulong,
    flags: u32,
    ifindex: libc::c_int,
}

fn in6(address: Ipv6Addr) -> libc::in6_addr {
    libc::in6_addr {
        s6_addr: address.octets(),
    }
}

fn ifname_bytes(name: &str) -> io::Result<[u8; libc::IFNAMSIZ]> {
    let bytes = name.as_bytes();
    if bytes.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface name {name:?} too long"),
        ));
    }
    let mut buf = [0u8; libc::IFNAMSIZ];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

fn inet6_socket() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    if unsafe { libc::ioctl(fd, request, arg as *mut T) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
