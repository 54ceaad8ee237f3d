//! Live pipeline output for viewers.
//!
//! `LiveState` maps each camera to a `LiveSlot` holding the latest
//! `LiveSnapshot`. The registry lock is only taken to add or remove slots;
//! a pipeline keeps its own `Arc<LiveSlot>` and publishes by swapping one
//! `Arc` under the slot's mutex. Readers clone the `Arc` and release the lock
//! immediately, so a slow viewer never stalls a pipeline. There is no
//! history: every publish replaces the previous snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use serde::Serialize;

use crate::frame::BoundingBox;
use crate::stabilize::PlateState;
use crate::{CameraId, CameraStatus};

/// Health reported for every online frame until a real score exists.
pub const HEALTH_PLACEHOLDER: u8 = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveDetection {
    /// Plate text, or `N/A` when OCR failed.
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub state: PlateState,
}

/// Latest processed frame of one camera.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub camera_id: CameraId,
    /// Annotated frame as JPEG. Empty when the camera is offline.
    #[serde(skip)]
    pub image_jpeg: Vec<u8>,
    pub detections: Vec<LiveDetection>,
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub status: CameraStatus,
    pub health: u8,
    /// From the start of the frame read to the end of processing.
    pub latency_ms: u64,
}

impl LiveSnapshot {
    pub fn offline(camera_id: CameraId, frame_index: u64, timestamp_ms: u64) -> Self {
        Self {
            camera_id,
            image_jpeg: Vec::new(),
            detections: Vec::new(),
            frame_index,
            timestamp_ms,
            status: CameraStatus::Offline,
            health: 0,
            latency_ms: 0,
        }
    }

    /// JSON for relaying to viewers. The image travels separately.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Single-camera snapshot cell.
#[derive(Debug, Default)]
pub struct LiveSlot {
    current: Mutex<Option<Arc<LiveSnapshot>>>,
}

impl LiveSlot {
    pub fn publish(&self, snapshot: LiveSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    pub fn latest(&self) -> Option<Arc<LiveSnapshot>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Registry of live slots keyed by camera.
#[derive(Debug, Default)]
pub struct LiveState {
    slots: RwLock<HashMap<CameraId, Arc<LiveSlot>>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `camera_id`, created empty on first use.
    pub fn slot(&self, camera_id: CameraId) -> Arc<LiveSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&camera_id)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(camera_id)
            .or_default()
            .clone()
    }

    pub fn publish(&self, snapshot: LiveSnapshot) {
        self.slot(snapshot.camera_id).publish(snapshot);
    }

    pub fn get(&self, camera_id: CameraId) -> Option<Arc<LiveSnapshot>> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&camera_id)
            .cloned()?;
        slot.latest()
    }

    pub fn remove(&self, camera_id: CameraId) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&camera_id)
            .is_some()
    }

    /// Cameras with a slot, ascending.
    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Latest snapshot of every camera that has published, ordered by camera.
    pub fn snapshot_all(&self) -> Vec<Arc<LiveSnapshot>> {
        let slots: Vec<Arc<LiveSlot>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut out: Vec<Arc<LiveSnapshot>> = slots.iter().filter_map(|s| s.latest()).collect();
        out.sort_by_key(|s| s.camera_id);
        out
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn online(camera_id: CameraId, frame_index: u64) -> LiveSnapshot {
        LiveSnapshot {
            camera_id,
            image_jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            detections: vec![LiveDetection {
                text: "ABC123".to_string(),
                confidence: 0.9,
                bbox: BoundingBox::new(1, 1, 10, 5),
                state: PlateState::Candidate,
            }],
            frame_index,
            timestamp_ms: frame_index * 10,
            status: CameraStatus::Online,
            health: HEALTH_PLACEHOLDER,
            latency_ms: 4,
        }
    }

    #[test]
    fn last_write_wins() {
        let live = LiveState::new();
        live.publish(online(1, 3));
        live.publish(online(1, 6));
        let snapshot = live.get(1).expect("snapshot");
        assert_eq!(snapshot.frame_index, 6);
        assert!(live.get(2).is_none());
    }

    #[test]
    fn empty_slots_are_listed_but_not_snapshotted() {
        let live = LiveState::new();
        live.slot(4);
        live.publish(online(2, 1));
        assert_eq!(live.camera_ids(), vec![2, 4]);
        let all = live.snapshot_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].camera_id, 2);
    }

    #[test]
    fn removing_a_slot_hides_the_camera() {
        let live = LiveState::new();
        live.publish(online(1, 1));
        assert!(live.remove(1));
        assert!(!live.remove(1));
        assert!(live.get(1).is_none());
        assert!(live.camera_ids().is_empty());
    }

    #[test]
    fn readers_keep_their_snapshot_after_replacement() {
        let live = LiveState::new();
        live.publish(online(1, 1));
        let held = live.get(1).unwrap();
        live.publish(LiveSnapshot::offline(1, 2, 20));
        assert_eq!(held.status, CameraStatus::Online);
        assert_eq!(live.get(1).unwrap().status, CameraStatus::Offline);
    }

    #[test]
    fn json_omits_image_bytes() {
        let json = online(3, 9).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "online");
        assert_eq!(value["detections"][0]["state"], "candidate");
        assert!(value.get("image_jpeg").is_none());
    }

    #[test]
    fn concurrent_publish_and_read() {
        let live = Arc::new(LiveState::new());
        let slot = live.slot(1);
        let writer = thread::spawn(move || {
            for frame in 1..=500 {
                slot.publish(online(1, frame));
            }
        });
        let mut last = 0;
        while last < 500 {
            if let Some(snapshot) = live.get(1) {
                assert!(snapshot.frame_index >= last);
                last = snapshot.frame_index;
            }
        }
        writer.join().unwrap();
    }
}
