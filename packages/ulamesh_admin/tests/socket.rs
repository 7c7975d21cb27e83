//! Admin protocol over a real Unix socket.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::Ipv6Addr;
use std::os::unix::net::UnixStream;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cidr::Ipv6Cidr;
use ulamesh_core::{Config, ConnectOutcome, NetOps, Overlay, Priority, VpnCore};
use ulamesh_proto::admin::{self, Reply, Request, RequestTag};
use ulamesh_proto::{Message, PeerId, PublicKey};

struct StubOverlay;

impl Overlay for StubOverlay {
    fn send(&self, _to: PeerId, _message: Message, _priority: Priority, _deadline_secs: u64) {}

    fn local_peer_id(&self) -> PeerId {
        PeerId([0xEE; 32])
    }

    fn local_public_key(&self) -> PublicKey {
        PublicKey([0xEE; 64])
    }

    fn peer_id_of(&self, key: &PublicKey) -> PeerId {
        let mut id = [0u8; 32];
        id.copy_from_slice(&key.as_bytes()[..32]);
        PeerId(id)
    }

    fn preference_increase(&self, _peer: PeerId, _amount: u64) {}

    fn trust_change(&self, _peer: PeerId, delta: i32) -> i32 {
        delta
    }

    fn session_try_connect(&self, _peer: PeerId) -> ConnectOutcome {
        ConnectOutcome::Scheduled
    }

    fn identity_whitelist(&self, _peer: PeerId) {}
}

/// A kernel that refuses everything; tunnel entries still exist, just
/// without devices.
struct StubNet {
    calls: Mutex<usize>,
}

impl NetOps for StubNet {
    fn open_tun(&self, _name: &str) -> io::Result<File> {
        *self.calls.lock().unwrap() += 1;
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "no tun in tests"))
    }

    fn link_up(&self, _name: &str) -> io::Result<()> {
        Ok(())
    }

    fn set_mtu(&self, _name: &str, _mtu: u32) -> io::Result<()> {
        Ok(())
    }

    fn interface_index(&self, _name: &str) -> io::Result<u32> {
        Ok(1)
    }

    fn add_address(&self, _interface: u32, _address: Ipv6Addr, _prefix_len: u8) -> io::Result<()> {
        Ok(())
    }

    fn add_route(&self, _destination: Ipv6Cidr, _interface: u32, _metric: u32) -> io::Result<()> {
        Ok(())
    }

    fn del_route(&self, _destination: Ipv6Cidr, _interface: u32, _metric: u32) -> io::Result<()> {
        Ok(())
    }
}

fn test_core() -> Arc<VpnCore> {
    Arc::new(VpnCore::new(
        Arc::new(StubOverlay),
        Arc::new(StubNet {
            calls: Mutex::new(0),
        }),
        Config::default(),
    ))
}

fn read_reply(stream: &mut UnixStream) -> Reply {
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).unwrap();
    let mut frame = header.to_vec();
    frame.resize(3 + admin::body_len(&header), 0);
    stream.read_exact(&mut frame[3..]).unwrap();
    Reply::parse(&frame).unwrap()
}

fn transact(stream: &mut UnixStream, request: &Request) -> (Vec<String>, String) {
    stream.write_all(&request.encode()).unwrap();
    let mut lines = Vec::new();
    loop {
        match read_reply(stream) {
            Reply::Line(line) => lines.push(line),
            Reply::Done { tag, summary } => {
                assert_eq!(tag, request.tag);
                return (lines, summary);
            }
        }
    }
}

#[test]
fn requests_are_served_over_the_socket() {
    let core = test_core();
    core.handle_message(PeerId([1; 32]), Message::Pong);

    let path = std::env::temp_dir().join(format!("ulamesh-admin-{}.sock", std::process::id()));
    let server = ulamesh_admin::bind(&path, core).unwrap();

    let mut stream = UnixStream::connect(&path).unwrap();

    let (lines, summary) = transact(&mut stream, &Request::new(RequestTag::Tunnels));
    assert_eq!(summary, "1 tunnels");
    assert_eq!(lines[0], "fdee:eeee:ee00::/48 this node");
    assert!(lines[1].starts_with("fd01:101:100::/48 if ula0"), "{}", lines[1]);

    let (lines, summary) = transact(&mut stream, &Request::new(RequestTag::Routes));
    assert_eq!(summary, "1 routes");
    assert_eq!(lines, vec!["fdee:eeee:ee00::/48 hops 0 (this node)"]);

    // Multiple requests ride the same connection.
    let (_, summary) = transact(&mut stream, &Request::new(RequestTag::DebugOn));
    assert_eq!(summary, "debug on");
    let (_, summary) = transact(&mut stream, &Request::new(RequestTag::DebugOff));
    assert_eq!(summary, "debug off");

    drop(stream);
    server.shutdown();
    assert!(!path.exists());
}

#[test]
fn shutdown_returns_while_a_client_sits_idle() {
    let path =
        std::env::temp_dir().join(format!("ulamesh-admin-idle-{}.sock", std::process::id()));
    let server = ulamesh_admin::bind(&path, test_core()).unwrap();

    // A client that connects and then says nothing must not pin the
    // listener thread.
    let idle = UnixStream::connect(&path).unwrap();
    thread::sleep(Duration::from_millis(200));

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        server.shutdown();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("shutdown blocked on the idle client");
    drop(idle);
    assert!(!path.exists());
}
