use anyhow::Result;

use crate::detect::inference::Inference;
use crate::frame::Frame;
use crate::CameraId;

/// License plate localisation model.
///
/// Implementations own whatever model state they need and are driven from a
/// single camera thread, hence `&mut self` and `Send`.
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Find plate candidates in a full frame.
    ///
    /// Boxes are in frame pixel coordinates; confidence is in `0.0..=1.0`.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<crate::detect::RawDetection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Plate OCR model.
pub trait PlateReader: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Read the text on a plate crop. `Ok(None)` means nothing legible.
    fn recognize(&mut self, crop: &Frame) -> Result<Option<String>>;
}

/// Builds per-camera inference bundles.
pub trait BackendFactory: Send + Sync {
    /// Backend identifier used for selection in configuration.
    fn name(&self) -> &'static str;

    /// Load models for one camera pipeline. Failure takes that camera offline.
    fn create(&self, camera_id: CameraId) -> Result<Inference>;
}
