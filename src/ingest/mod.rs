//! Frame ingestion sources.
//!
//! A camera pipeline only knows two capabilities:
//! - `SourceOpener::open(uri)` produces a connected `FrameSource` or a `SourceError::Connect`
//! - `FrameSource::read_frame()` yields the next decoded frame, `SourceError::EndOfStream`
//!   or `SourceError::Read`
//!
//! Reconnect policy lives in the pipeline, not here. Dropping a source releases
//! the underlying capture handle.
//!
//! Supported URIs:
//! - `stub://<name>[?frames=N&fps=F]`: deterministic synthetic scene (tests, demos)
//! - anything else: RTSP via GStreamer (feature: rtsp-gstreamer)

pub mod rtsp;

pub use rtsp::{RtspConfig, RtspSource};

use crate::frame::Frame;

/// Frame source failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source could not be opened (or re-opened).
    #[error("failed to open video source {uri:?}: {reason}")]
    Connect { uri: String, reason: String },
    /// A mid-stream read failed.
    #[error("frame read failed: {0}")]
    Read(String),
    /// The stream ended.
    #[error("end of stream")]
    EndOfStream,
}

impl SourceError {
    pub fn connect(uri: &str, reason: impl ToString) -> Self {
        SourceError::Connect {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A connected capture handle for one camera.
pub trait FrameSource: Send {
    /// Block until the next frame is decoded.
    fn read_frame(&mut self) -> Result<Frame, SourceError>;

    /// Frames decoded since this handle was opened.
    fn frames_read(&self) -> u64;
}

/// Opens capture handles for source URIs.
pub trait SourceOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opener backed by `RtspSource`, sharing one output geometry for all cameras.
#[derive(Clone, Debug)]
pub struct DefaultSourceOpener {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for DefaultSourceOpener {
    fn default() -> Self {
        let defaults = RtspConfig::default();
        Self {
            width: defaults.width,
            height: defaults.height,
            target_fps: defaults.target_fps,
        }
    }
}

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let source = RtspSource::open(RtspConfig {
            url: uri.to_string(),
            target_fps: self.target_fps,
            width: self.width,
            height: self.height,
        })?;
        Ok(Box::new(source))
    }
}
