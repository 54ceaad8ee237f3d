#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, ImageBuffer, Rgb};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendFactory, PlateDetector, PlateReader};
use crate::detect::inference::Inference;
use crate::detect::result::RawDetection;
use crate::frame::{BoundingBox, Frame};
use crate::CameraId;

type Plan = TypedRunnableModel<TypedModel>;

/// Model files and tensor geometry for the ONNX backend.
#[derive(Clone, Debug)]
pub struct TractModelSettings {
    /// Plate detector: input `[1, 3, H, W]` RGB in 0..1, output rows of
    /// `(x1, y1, x2, y2, score)` in model input pixels.
    pub detector_model: PathBuf,
    pub detector_width: u32,
    pub detector_height: u32,
    /// Plate OCR: input `[1, H, W, 1]` grayscale in 0..255, output
    /// `[1, slots, alphabet]` character scores.
    pub ocr_model: PathBuf,
    pub ocr_width: u32,
    pub ocr_height: u32,
    /// Characters indexed by OCR output class; the last is usually the pad.
    pub alphabet: String,
}

impl Default for TractModelSettings {
    fn default() -> Self {
        Self {
            detector_model: PathBuf::from("models/plate-detector.onnx"),
            detector_width: 640,
            detector_height: 640,
            ocr_model: PathBuf::from("models/plate-ocr.onnx"),
            ocr_width: 128,
            ocr_height: 64,
            alphabet: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_".to_string(),
        }
    }
}

fn load_plan(path: &Path, shape: [usize; 4]) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(shape[0], shape[1], shape[2], shape[3])),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn resized_rgb(frame: &Frame, width: u32, height: u32) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(
        frame.width,
        frame.height,
        frame.pixels().to_vec(),
    )
    .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;
    if frame.width == width && frame.height == height {
        return Ok(image);
    }
    Ok(image::imageops::resize(&image, width, height, FilterType::Triangle))
}

// ----------------------------------------------------------------------------
// Detector
// ----------------------------------------------------------------------------

pub struct TractPlateDetector {
    plan: Plan,
    width: u32,
    height: u32,
}

impl TractPlateDetector {
    pub fn load(path: &Path, width: u32, height: u32) -> Result<Self> {
        let plan = load_plan(path, [1, 3, height as usize, width as usize])?;
        Ok(Self {
            plan,
            width,
            height,
        })
    }
}

impl PlateDetector for TractPlateDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let resized = resized_rgb(frame, self.width, self.height)?;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        let outputs = self
            .plan
            .run(tvec!(input.into_tensor().into()))
            .context("plate detector inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("detector produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("detector output tensor was not f32")?;
        let values: Vec<f32> = rows.iter().copied().collect();
        if values.len() % 5 != 0 {
            return Err(anyhow!(
                "detector output has {} values, expected rows of 5",
                values.len()
            ));
        }

        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;
        Ok(values
            .chunks_exact(5)
            .filter(|row| row[4].is_finite() && row[4] > 0.0)
            .map(|row| RawDetection {
                bbox: BoundingBox::from_f32(row[0] * sx, row[1] * sy, row[2] * sx, row[3] * sy),
                confidence: row[4].min(1.0),
            })
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

pub struct TractPlateReader {
    plan: Plan,
    width: u32,
    height: u32,
    alphabet: Vec<char>,
}

impl TractPlateReader {
    pub fn load(path: &Path, width: u32, height: u32, alphabet: &str) -> Result<Self> {
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() {
            return Err(anyhow!("OCR alphabet must not be empty"));
        }
        let plan = load_plan(path, [1, height as usize, width as usize, 1])?;
        Ok(Self {
            plan,
            width,
            height,
            alphabet,
        })
    }
}

impl PlateReader for TractPlateReader {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Option<String>> {
        let resized = resized_rgb(crop, self.width, self.height)?;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, self.width as usize, 1),
            |(_, y, x, _)| {
                let [r, g, b] = resized.get_pixel(x as u32, y as u32).0;
                0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
            },
        );
        let outputs = self
            .plan
            .run(tvec!(input.into_tensor().into()))
            .context("plate OCR inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("OCR model produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("OCR output tensor was not f32")?
            .iter()
            .copied()
            .collect();

        let classes = self.alphabet.len();
        if scores.is_empty() || scores.len() % classes != 0 {
            return Err(anyhow!(
                "OCR output has {} scores, not a multiple of alphabet size {}",
                scores.len(),
                classes
            ));
        }
        let text: String = scores
            .chunks_exact(classes)
            .filter_map(|slot| {
                slot.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(idx, _)| self.alphabet[idx])
            })
            .collect();
        Ok((!text.is_empty()).then_some(text))
    }
}

// ----------------------------------------------------------------------------
// Factory
// ----------------------------------------------------------------------------

/// Loads a fresh detector/reader pair per camera.
pub struct TractBackendFactory {
    settings: TractModelSettings,
}

impl TractBackendFactory {
    pub fn new(settings: TractModelSettings) -> Self {
        Self { settings }
    }
}

impl BackendFactory for TractBackendFactory {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn create(&self, camera_id: CameraId) -> Result<Inference> {
        let s = &self.settings;
        log::info!(
            "camera {}: loading detector {} and OCR {}",
            camera_id,
            s.detector_model.display(),
            s.ocr_model.display()
        );
        let detector = TractPlateDetector::load(&s.detector_model, s.detector_width, s.detector_height)?;
        let reader = TractPlateReader::load(&s.ocr_model, s.ocr_width, s.ocr_height, &s.alphabet)?;
        Ok(Inference::new(Box::new(detector), Box::new(reader)))
    }
}
