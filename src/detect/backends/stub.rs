use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{BackendFactory, PlateDetector, PlateReader};
use crate::detect::inference::Inference;
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::ingest::rtsp::synthetic_plate_region;
use crate::CameraId;

/// Brightness above which the synthetic plate band counts as present.
const PLATE_BRIGHTNESS: u8 = 128;

/// Stub detector for `stub://` scenes.
///
/// Reports the synthetic plate band whenever its centre pixel is bright.
pub struct StubPlateDetector {
    confidence: f32,
}

impl StubPlateDetector {
    pub fn new(confidence: f32) -> Self {
        Self { confidence }
    }
}

impl PlateDetector for StubPlateDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let region = synthetic_plate_region(frame.width, frame.height);
        let cx = ((region.x1 + region.x2) / 2).max(0) as u32;
        let cy = ((region.y1 + region.y2) / 2).max(0) as u32;
        let bright = frame
            .pixel(cx, cy)
            .is_some_and(|[r, g, b]| r.max(g).max(b) >= PLATE_BRIGHTNESS);
        if !bright || region.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![RawDetection {
            bbox: region,
            confidence: self.confidence,
        }])
    }
}

/// Stub reader: derives a stable pseudo plate from the crop's pixel hash.
///
/// Identical crops always read the same, so a static synthetic scene
/// stabilizes like a parked vehicle would.
#[derive(Default)]
pub struct StubPlateReader;

impl PlateReader for StubPlateReader {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Option<String>> {
        if crop.pixels().is_empty() {
            return Ok(None);
        }
        let digest: [u8; 32] = Sha256::digest(crop.pixels()).into();
        Ok(Some(format!("SIM{}", hex::encode_upper(&digest[..2]))))
    }
}

/// Factory for the stub backend pair.
pub struct StubBackendFactory {
    pub confidence: f32,
}

impl Default for StubBackendFactory {
    fn default() -> Self {
        Self { confidence: 0.9 }
    }
}

impl BackendFactory for StubBackendFactory {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn create(&self, _camera_id: CameraId) -> Result<Inference> {
        Ok(Inference::new(
            Box::new(StubPlateDetector::new(self.confidence)),
            Box::new(StubPlateReader),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameSource, RtspConfig, RtspSource};

    fn stub_source() -> RtspSource {
        RtspSource::open(RtspConfig {
            url: "stub://stub-backend".to_string(),
            target_fps: 0,
            width: 96,
            height: 48,
        })
        .unwrap()
    }

    #[test]
    fn reads_the_same_plate_for_a_static_scene() {
        let mut source = stub_source();
        let mut inference = StubBackendFactory::default().create(1).unwrap();

        let first = inference.run(&source.read_frame().unwrap()).unwrap();
        let second = inference.run(&source.read_frame().unwrap()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        let text = first[0].text.clone().expect("stub plate text");
        assert!(text.starts_with("SIM"));
        assert_eq!(text.len(), 7);
    }

    #[test]
    fn empty_road_has_no_detections() {
        let mut source = stub_source();
        let mut detector = StubPlateDetector::new(0.9);
        let mut frame = source.read_frame().unwrap();
        while source.frames_read() < 50 {
            frame = source.read_frame().unwrap();
        }
        assert!(detector.detect(&frame).unwrap().is_empty());
    }
}
