//! The admin socket server.
//!
//! Listens on a Unix socket, reads framed requests, executes them
//! against the core and writes the framed reply lines back. One
//! listener thread, one client at a time; the admin surface is a
//! diagnostic console, not a service.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ulamesh_core::VpnCore;
use ulamesh_proto::admin::{self, Request};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("failed to bind the admin socket at {path}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn the admin thread")]
    SpawnAdminThread(#[source] io::Error),
}

/// A running admin listener. Dropping the handle leaks the thread;
/// call [`AdminServer::shutdown`] to stop it.
pub struct AdminServer {
    path: PathBuf,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

const ACCEPT_PAUSE: Duration = Duration::from_millis(100);

/// Bind `path` and start serving `core`'s admin surface. A stale
/// socket file at `path` is replaced.
pub fn bind(path: impl Into<PathBuf>, core: Arc<VpnCore>) -> Result<AdminServer, Error> {
    let path = path.into();
    let _ = fs::remove_file(&path);
    let listener = UnixListener::bind(&path).map_err(|source| Error::Bind {
        path: path.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| Error::Bind {
            path: path.clone(),
            source,
        })?;

    let running = Arc::new(AtomicBool::new(true));
    let thread = {
        let running = running.clone();
        thread::Builder::new()
            .name("ulamesh-admin".to_string())
            .spawn(move || listen(&listener, &core, &running))
            .map_err(Error::SpawnAdminThread)?
    };

    Ok(AdminServer {
        path,
        running,
        thread,
    })
}

impl AdminServer {
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.thread.join();
        let _ = fs::remove_file(&self.path);
    }
}

fn listen(listener: &UnixListener, core: &VpnCore, running: &AtomicBool) {
    log::debug!("admin socket listening");
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = serve(core, stream, running) {
                    log::debug!("admin connection ended: {err}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_PAUSE);
            }
            Err(err) => {
                log::warn!("admin accept failed: {err}");
                thread::sleep(ACCEPT_PAUSE);
            }
        }
    }
    log::debug!("admin socket closed");
}

/// Serve one client until it disconnects, sends garbage, or the
/// server shuts down.
fn serve(core: &VpnCore, stream: UnixStream, running: &AtomicBool) -> io::Result<()> {
    // The listener is non-blocking for the accept loop; the accepted
    // stream uses blocking reads with a short timeout, so a silent
    // client cannot pin the thread across a shutdown.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(ACCEPT_PAUSE))?;
    let mut stream = stream;
    loop {
        let mut header = [0u8; 3];
        if !read_full(&mut stream, &mut header, running)? {
            return Ok(());
        }
        let mut frame = header.to_vec();
        frame.resize(3 + admin::body_len(&header), 0);
        if !read_full(&mut stream, &mut frame[3..], running)? {
            return Ok(());
        }

        let request = match Request::parse(&frame) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("malformed admin request: {err}");
                return Ok(());
            }
        };
        log::debug!("admin request: {}", request.tag);
        for reply in core.admin(&request) {
            stream.write_all(&reply.encode())?;
        }
    }
}

/// Fill `buf` from the stream, waking on the read timeout to check
/// the shutdown flag. Returns `Ok(false)` when the client hung up or
/// the server is stopping.
fn read_full(stream: &mut UnixStream, buf: &mut [u8], running: &AtomicBool) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if !running.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
