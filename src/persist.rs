//! Per-camera persistence queue.
//!
//! The frame loop hands confirmed batches to a channel and never waits on
//! storage. A dedicated `persist-<camera>` thread drains the channel, writing
//! each batch in one storage call. Dropping the `PersistenceQueue` closes the
//! channel; the drain thread writes everything still buffered and exits.
//!
//! Delivery is at most once: a failed write is logged and the batch dropped.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::stabilize::ConfirmedPlate;
use crate::storage::Storage;
use crate::{CameraId, OwnerId};

/// How long the drain thread blocks on an empty queue before polling again.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct PersistBatch {
    events: Vec<ConfirmedPlate>,
    owner_id: OwnerId,
}

/// Totals reported by a drain thread when it exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub batches_written: usize,
    pub batches_dropped: usize,
    pub events_written: usize,
}

pub struct PersistenceQueue {
    camera_id: CameraId,
    sender: Sender<PersistBatch>,
}

impl PersistenceQueue {
    /// Create the queue and start its drain thread.
    pub fn spawn(
        camera_id: CameraId,
        storage: Arc<dyn Storage>,
    ) -> Result<(Self, JoinHandle<DrainStats>)> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("persist-{}", camera_id))
            .spawn(move || drain(camera_id, receiver, storage.as_ref()))
            .context("failed to spawn persistence thread")?;
        Ok((Self { camera_id, sender }, handle))
    }

    /// Queue one frame's confirmations. Empty batches are ignored.
    pub fn enqueue(&self, events: Vec<ConfirmedPlate>, owner_id: OwnerId) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.sender
            .send(PersistBatch { events, owner_id })
            .map_err(|_| anyhow!("camera {}: persistence thread has exited", self.camera_id))
    }
}

fn drain(camera_id: CameraId, receiver: Receiver<PersistBatch>, storage: &dyn Storage) -> DrainStats {
    let mut stats = DrainStats::default();
    loop {
        let batch = match receiver.recv_timeout(DRAIN_POLL_INTERVAL) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match storage.save_detection_batch(&batch.events, batch.owner_id) {
            Ok(written) => {
                stats.batches_written += 1;
                stats.events_written += written;
                log::debug!("camera {}: persisted {} plate(s)", camera_id, written);
            }
            Err(err) => {
                stats.batches_dropped += 1;
                log::error!(
                    "camera {}: dropping batch of {} plate(s): {:#}",
                    camera_id,
                    batch.events.len(),
                    err
                );
            }
        }
    }
    log::debug!(
        "camera {}: persistence drained ({} written, {} dropped)",
        camera_id,
        stats.batches_written,
        stats.batches_dropped
    );
    stats
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
