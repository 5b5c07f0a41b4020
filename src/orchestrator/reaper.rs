//! Keeps the microphone held for a capture process that would not exit.
//!
//! A lease may only go back to the arbiter once its process is known to be
//! gone. When termination fails, the source and its lease move into a reaper
//! task that waits for the exit and only then releases.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::arbiter::LeaseToken;
use crate::audio::FrameSource;

/// Pause between attempts when waiting on the process itself fails
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Release `lease` once `source` has been observed to exit
pub fn release_after_exit(mut source: Box<dyn FrameSource>, lease: LeaseToken) -> JoinHandle<()> {
    warn!(
        "[{}] still running; {:?} keeps the mic until it exits",
        source.name(),
        lease.holder()
    );

    tokio::spawn(async move {
        while let Err(e) = source.wait_exit().await {
            error!("[{}] waiting for exit failed: {:#}", source.name(), e);
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        info!("[{}] finally exited; releasing the mic", source.name());
        lease.release();
    })
}
