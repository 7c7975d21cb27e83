//! The tunnel thread: the one parallel worker in a ulamesh node.
//!
//! Multiplexes reads across every open TUN descriptor plus a self-pipe
//! used for shutdown, feeding each frame into the core's outbound
//! path. Also hosts the realisation cron ([`cron`]) and the Linux
//! implementation of the core's kernel interface ([`netops`]).

pub mod cron;
pub mod netops;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::unix::pipe;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use ulamesh_core::VpnCore;
use ulamesh_proto::FrameBuf;

/// An error preventing the worker threads from starting or stopping.
/// Data-plane failures never surface here; they are logged and the
/// offending tunnel is deactivated.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("failed to create the shutdown pipe")]
    CreateShutdownPipe(#[source] io::Error),

    #[error("failed to create the readiness poller")]
    CreatePoll(#[source] io::Error),

    #[error("failed to spawn the tunnel thread")]
    SpawnTunnelThread(#[source] io::Error),

    #[error("failed to spawn the realisation cron thread")]
    SpawnCronThread(#[source] io::Error),

    #[error("failed to signal the tunnel thread to stop")]
    SignalShutdown(#[source] io::Error),

    #[error("the tunnel thread panicked")]
    TunnelThreadPanicked,
}

const SHUTDOWN_TOKEN: Token = Token(usize::MAX);

/// One TUN read buffer. A read returns exactly one frame.
const READ_BUF: usize = 65536;

/// Start the tunnel thread over `core`'s tunnels.
pub fn spawn(core: Arc<VpnCore>) -> Result<TunnelThreadHandle, Error> {
    let (signal, mut shutdown) = pipe::new().map_err(Error::CreateShutdownPipe)?;
    let poll = Poll::new().map_err(Error::CreatePoll)?;
    poll.registry()
        .register(&mut shutdown, SHUTDOWN_TOKEN, Interest::READABLE)
        .map_err(Error::CreatePoll)?;

    let thread = thread::Builder::new()
        .name("ulamesh-tunnels".to_string())
        .spawn(move || {
            TunnelThread {
                core,
                poll,
                shutdown,
                registered: HashMap::new(),
                buf: vec![0; READ_BUF],
            }
            .run()
        })
        .map_err(Error::SpawnTunnelThread)?;

    Ok(TunnelThreadHandle { signal, thread })
}

/// Owner's handle to a running tunnel thread.
pub struct TunnelThreadHandle {
    signal: pipe::Sender,
    thread: JoinHandle<()>,
}

impl TunnelThreadHandle {
    /// Signal the thread and wait for it to exit. Every TUN
    /// descriptor is closed by the time this returns.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.signal.write_all(&[0]).map_err(Error::SignalShutdown)?;
        self.thread.join().map_err(|_| Error::TunnelThreadPanicked)
    }
}

struct TunnelThread {
    core: Arc<VpnCore>,
    poll: Poll,
    shutdown: pipe::Receiver,
    /// Local tunnel index to registered descriptor. The core owns the
    /// descriptors; this map only mirrors what the poller knows.
    registered: HashMap<usize, RawFd>,
    buf: Vec<u8>,
}

impl TunnelThread {
    fn run(mut self) {
        let timeout = Duration::from_secs(self.core.config().poll_interval_secs);
        let mut events = Events::with_capacity(64);
        log::debug!("tunnel thread running");

        loop {
            self.sync_registrations();

            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("tunnel readiness poll failed: {err}");
                break;
            }

            let mut stop = false;
            for event in events.iter() {
                match event.token() {
                    SHUTDOWN_TOKEN => {
                        let mut byte = [0u8; 8];
                        let _ = self.shutdown.read(&mut byte);
                        stop = true;
                    }
                    Token(index) => self.drain(index),
                }
            }

            // Deactivated entries are removed here and only here, so a
            // removal can never race a write on another thread.
            self.sweep();

            if stop {
                break;
            }
        }

        for (index, file) in self.core.close_all_tunnels() {
            if self.registered.remove(&index).is_some() {
                let _ = self.poll.registry().deregister(&mut SourceFd(&file.as_raw_fd()));
            }
        }
        log::debug!("tunnel thread exited");
    }

    /// Register descriptors of tunnels created since the last pass.
    fn sync_registrations(&mut self) {
        for (index, fd) in self.core.poll_targets() {
            if self.registered.contains_key(&index) {
                continue;
            }
            match self
                .poll
                .registry()
                .register(&mut SourceFd(&fd), Token(index), Interest::READABLE)
            {
                Ok(()) => {
                    log::debug!("tunnel {index}: registered for readiness");
                    self.registered.insert(index, fd);
                }
                Err(err) => log::warn!("tunnel {index}: failed to register: {err}"),
            }
        }
    }

    /// Read frames from the device at `index` until it would block.
    fn drain(&mut self, index: usize) {
        let Some(&fd) = self.registered.get(&index) else {
            return;
        };
        loop {
            let n = unsafe { libc::read(fd, self.buf.as_mut_ptr().cast(), READ_BUF) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    break;
                }
                log::warn!("tunnel {index}: read failed, deactivating: {err}");
                self.core.deactivate_index(index);
                break;
            }
            if n == 0 {
                log::warn!("tunnel {index}: device closed, deactivating");
                self.core.deactivate_index(index);
                break;
            }
            log::trace!("tunnel {index}: read {n} byte frame");
            match FrameBuf::from_raw(self.buf[..n as usize].to_vec()) {
                Ok(frame) => self.core.handle_tun_frame(index, frame),
                Err(err) => log::warn!("tunnel {index}: dropping frame: {err}"),
            }
        }
    }

    fn sweep(&mut self) {
        for (index, file) in self.core.sweep_inactive() {
            if self.registered.remove(&index).is_some() {
                if let Err(err) = self
                    .poll
                    .registry()
                    .deregister(&mut SourceFd(&file.as_raw_fd()))
                {
                    log::debug!("tunnel {index}: failed to deregister: {err}");
                }
            }
            log::debug!("tunnel {index} removed");
        }
    }
}
