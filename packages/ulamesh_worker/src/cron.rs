//! Interval-driven route realisation.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ulamesh_core::VpnCore;

use crate::Error;

/// Runs [`VpnCore::realise`] every `realise_interval_secs`.
pub struct RealiseCron {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub fn spawn(core: Arc<VpnCore>) -> Result<RealiseCron, Error> {
    let interval = Duration::from_secs(core.config().realise_interval_secs);
    let (stop, ticks) = mpsc::channel();

    let thread = thread::Builder::new()
        .name("ulamesh-realise".to_string())
        .spawn(move || loop {
            match ticks.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    for action in core.realise() {
                        log::debug!("realise: {action}");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(Error::SpawnCronThread)?;

    Ok(RealiseCron { stop, thread })
}

impl RealiseCron {
    pub fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.thread.join();
    }
}
