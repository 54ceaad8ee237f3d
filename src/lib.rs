//! plate-watch
//!
//! Continuous license plate recognition over many live camera streams.
//!
//! # Architecture
//!
//! Every camera gets its own pipeline: a dedicated read loop that samples
//! frames, runs plate detection and OCR, feeds reads through the
//! stabilization state machine, checks confirmed plates against the owner's
//! watchlist and hands them to a per-camera persistence thread. The latest
//! annotated frame of each camera is published to a shared live registry.
//!
//! # Module Structure
//!
//! - `frame`: Frame container and bounding boxes
//! - `ingest`: Frame sources (synthetic `stub://`, RTSP via GStreamer)
//! - `detect`: Plate detector / reader backends and the confidence-gated inference adapter
//! - `stabilize`: Candidate promotion and cooldown suppression
//! - `watchlist`: Watchlist matching and alert dispatch
//! - `persist`: Batched, asynchronous persistence queue
//! - `live`: Latest-snapshot registry for live viewers
//! - `annotate`: Box drawing and JPEG encoding of processed frames
//! - `pipeline`: The per-camera read/process loop
//! - `supervisor`: Lifecycle of all camera pipelines
//! - `storage`: Storage contract with SQLite and in-memory implementations
//! - `config`: Daemon configuration (file + environment)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod live;
pub mod persist;
pub mod pipeline;
pub mod stabilize;
pub mod storage;
pub mod supervisor;
pub mod watchlist;

pub use detect::{
    BackendFactory, BackendRegistry, FrameDetection, Inference, PlateDetector, PlateReader,
    RawDetection, StubBackendFactory, UNRECOGNIZED_TEXT,
};
pub use frame::{BoundingBox, Frame};
pub use ingest::{DefaultSourceOpener, FrameSource, RtspConfig, RtspSource, SourceError, SourceOpener};
pub use live::{LiveDetection, LiveSlot, LiveSnapshot, LiveState};
pub use persist::{DrainStats, PersistenceQueue};
pub use pipeline::{
    CameraPipeline, Collaborators, ExitReason, PipelineHandle, PipelineReport, PipelineSettings,
};
pub use stabilize::{
    ConfirmedPlate, FrameOutcome, Observation, PlateState, Stabilizer, StabilizerConfig,
};
pub use storage::{
    CameraRecord, InMemoryStorage, PlateLogRecord, SqliteStorage, Storage, WatchlistEntry,
};
pub use supervisor::Supervisor;
pub use watchlist::{AlertChannel, AlertIntent, LogNotifier, Notifier};

/// Storage identifier of a camera.
pub type CameraId = i64;

/// Storage identifier of the user owning cameras and watchlists.
pub type OwnerId = i64;

/// Connectivity status recorded for a camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    #[default]
    Offline,
}

impl CameraStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraStatus::Online => "online",
            CameraStatus::Offline => "offline",
        }
    }

    /// Parse a stored status. Anything that is not `online` counts as offline.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("online") {
            CameraStatus::Online
        } else {
            CameraStatus::Offline
        }
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_status_round_trips_through_storage_strings() {
        assert_eq!(CameraStatus::parse(CameraStatus::Online.as_str()), CameraStatus::Online);
        assert_eq!(CameraStatus::parse("OFFLINE"), CameraStatus::Offline);
        assert_eq!(CameraStatus::parse("error"), CameraStatus::Offline);
    }

    #[test]
    fn camera_status_serializes_lowercase() {
        let json = serde_json::to_string(&CameraStatus::Online).unwrap();
        assert_eq!(json, "\"online\"");
    }
}
