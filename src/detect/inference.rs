use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::{PlateDetector, PlateReader};
use crate::detect::result::FrameDetection;
use crate::frame::Frame;

/// Detections scoring below this never reach OCR or stabilization.
pub const DEFAULT_CONFIDENCE_GATE: f32 = 0.70;

/// Padding character emitted by fixed-slot plate OCR models.
const OCR_PAD_CHAR: char = '_';

/// Normalize raw OCR output into a plate string.
///
/// Strips whitespace and slot padding, upper-cases, and rejects anything that
/// does not look like a plate. Returns `None` for unusable reads.
pub fn normalize_plate_text(raw: &str) -> Option<String> {
    static PLATE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = PLATE_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Z0-9-]{1,16}$").expect("plate pattern is valid")
    });

    let text = raw
        .trim()
        .trim_matches(OCR_PAD_CHAR)
        .trim()
        .to_uppercase();
    re.is_match(&text).then_some(text)
}

/// Detector + reader pair with the confidence gate applied between them.
pub struct Inference {
    detector: Box<dyn PlateDetector>,
    reader: Box<dyn PlateReader>,
    confidence_gate: f32,
}

impl Inference {
    pub fn new(detector: Box<dyn PlateDetector>, reader: Box<dyn PlateReader>) -> Self {
        Self {
            detector,
            reader,
            confidence_gate: DEFAULT_CONFIDENCE_GATE,
        }
    }

    pub fn with_confidence_gate(mut self, gate: f32) -> Self {
        self.confidence_gate = gate;
        self
    }

    pub fn confidence_gate(&self) -> f32 {
        self.confidence_gate
    }

    /// Backend names, e.g. `"stub/stub"`.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.detector.name(), self.reader.name())
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.detector.warm_up().context("detector warm-up")
    }

    /// Detect plates in `frame` and read every box that passes the gate.
    ///
    /// A detector failure fails the whole frame. An OCR failure only drops
    /// that box. Boxes that crop to nothing are skipped before OCR.
    pub fn run(&mut self, frame: &Frame) -> Result<Vec<FrameDetection>> {
        let raw = self
            .detector
            .detect(frame)
            .map_err(|e| anyhow!("{} detector failed: {}", self.detector.name(), e))?;

        let mut out = Vec::with_capacity(raw.len());
        for detection in raw {
            if detection.confidence < self.confidence_gate {
                continue;
            }
            let Some(bbox) = detection.bbox.clamp_to(frame.width, frame.height) else {
                continue;
            };
            let Some(crop) = frame.crop(&bbox) else {
                continue;
            };
            let text = match self.reader.recognize(&crop) {
                Ok(text) => text.as_deref().and_then(normalize_plate_text),
                Err(err) => {
                    log::warn!(
                        "{} reader failed on box {:?}: {}",
                        self.reader.name(),
                        bbox,
                        err
                    );
                    continue;
                }
            };
            out.push(FrameDetection {
                bbox,
                confidence: detection.confidence,
                text,
            });
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;
    use crate::frame::BoundingBox;
    use std::collections::VecDeque;

    struct FixedDetector(Vec<RawDetection>);

    impl PlateDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl PlateDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Err(anyhow!("model exploded"))
        }
    }

    /// Returns queued reads in order.
    struct QueuedReader {
        reads: VecDeque<Result<Option<String>>>,
    }

    impl PlateReader for QueuedReader {
        fn name(&self) -> &'static str {
            "queued"
        }

        fn recognize(&mut self, _crop: &Frame) -> Result<Option<String>> {
            self.reads.pop_front().unwrap_or(Ok(None))
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 40 * 20 * 3], 40, 20).unwrap()
    }

    fn det(x1: i32, confidence: f32) -> RawDetection {
        RawDetection {
            bbox: BoundingBox::new(x1, 2, x1 + 8, 10),
            confidence,
        }
    }

    #[test]
    fn normalizes_ocr_padding_and_case() {
        assert_eq!(normalize_plate_text(" abc123__ ").as_deref(), Some("ABC123"));
        assert_eq!(normalize_plate_text("KA-01-AB").as_deref(), Some("KA-01-AB"));
        assert_eq!(normalize_plate_text("____"), None);
        assert_eq!(normalize_plate_text("AB C"), None);
        assert_eq!(normalize_plate_text(""), None);
    }

    #[test]
    fn low_confidence_boxes_never_reach_ocr() {
        let detector = FixedDetector(vec![det(0, 0.69), det(10, 0.70), det(20, 0.95)]);
        let reader = QueuedReader {
            reads: VecDeque::from(vec![Ok(Some("ABC123".into())), Ok(Some("XYZ9".into()))]),
        };
        let mut inference = Inference::new(Box::new(detector), Box::new(reader));

        let detections = inference.run(&frame()).unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.confidence >= DEFAULT_CONFIDENCE_GATE));
        assert_eq!(detections[0].text.as_deref(), Some("ABC123"));
        assert_eq!(detections[1].text.as_deref(), Some("XYZ9"));
    }

    #[test]
    fn unreadable_plates_keep_a_visual_record() {
        let detector = FixedDetector(vec![det(0, 0.9)]);
        let reader = QueuedReader {
            reads: VecDeque::from(vec![Ok(Some("__".into()))]),
        };
        let mut inference = Inference::new(Box::new(detector), Box::new(reader));

        let detections = inference.run(&frame()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].text, None);
        assert_eq!(detections[0].display_text(), crate::detect::UNRECOGNIZED_TEXT);
    }

    #[test]
    fn ocr_errors_drop_only_that_box() {
        let detector = FixedDetector(vec![det(0, 0.9), det(20, 0.9)]);
        let reader = QueuedReader {
            reads: VecDeque::from(vec![Err(anyhow!("ocr crashed")), Ok(Some("B2".into()))]),
        };
        let mut inference = Inference::new(Box::new(detector), Box::new(reader));

        let detections = inference.run(&frame()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].text.as_deref(), Some("B2"));
    }

    #[test]
    fn empty_crops_are_skipped() {
        let detector = FixedDetector(vec![RawDetection {
            bbox: BoundingBox::new(50, 50, 60, 60),
            confidence: 0.99,
        }]);
        let reader = QueuedReader {
            reads: VecDeque::new(),
        };
        let mut inference = Inference::new(Box::new(detector), Box::new(reader));
        assert!(inference.run(&frame()).unwrap().is_empty());
    }

    #[test]
    fn detector_failure_fails_the_frame() {
        let reader = QueuedReader {
            reads: VecDeque::new(),
        };
        let mut inference = Inference::new(Box::new(FailingDetector), Box::new(reader));
        let err = inference.run(&frame()).unwrap_err();
        assert!(err.to_string().contains("failing detector failed"));
    }

    #[test]
    fn confidence_gate_is_tunable() {
        let detector = FixedDetector(vec![det(0, 0.5)]);
        let reader = QueuedReader {
            reads: VecDeque::from(vec![Ok(Some("LOW1".into()))]),
        };
        let mut inference =
            Inference::new(Box::new(detector), Box::new(reader)).with_confidence_gate(0.4);
        assert_eq!(inference.run(&frame()).unwrap().len(), 1);
    }
}
