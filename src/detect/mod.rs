//! Plate detection and OCR.
//!
//! Both models are opaque to the pipeline: a `PlateDetector` turns a frame into
//! scored boxes, a `PlateReader` turns a crop into text. `Inference` bundles one
//! of each with the confidence gate, and a `BackendFactory` builds a fresh
//! `Inference` for every camera pipeline so model state is never shared.

mod backend;
mod backends;
mod inference;
mod registry;
mod result;

pub use backend::{BackendFactory, PlateDetector, PlateReader};
pub use backends::{StubBackendFactory, StubPlateDetector, StubPlateReader};
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackendFactory, TractModelSettings};
pub use inference::{normalize_plate_text, Inference, DEFAULT_CONFIDENCE_GATE};
pub use registry::BackendRegistry;
pub use result::{FrameDetection, RawDetection, UNRECOGNIZED_TEXT};
