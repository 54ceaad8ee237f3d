use serde::Serialize;

use crate::frame::BoundingBox;

/// Text reported for detections whose plate could not be read.
pub const UNRECOGNIZED_TEXT: &str = "N/A";

/// Raw detector output for one box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    /// Detector confidence, 0.0..=1.0.
    pub confidence: f32,
}

/// A gated detection with its OCR result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Normalized plate text, `None` when OCR produced nothing usable.
    pub text: Option<String>,
}

impl FrameDetection {
    /// Text for display and relay: the plate or `UNRECOGNIZED_TEXT`.
    pub fn display_text(&self) -> &str {
        self.text.as_deref().unwrap_or(UNRECOGNIZED_TEXT)
    }
}
