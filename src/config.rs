use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::annotate::DEFAULT_JPEG_QUALITY;
use crate::detect::DEFAULT_CONFIDENCE_GATE;
use crate::ingest::{DefaultSourceOpener, RtspConfig};
use crate::pipeline::{PipelineSettings, DEFAULT_FRAME_SKIP, DEFAULT_RECONNECT_BACKOFF};
use crate::stabilize::{
    StabilizerConfig, CANDIDATE_PATIENCE_FRAMES, PLATE_COOLDOWN, STABILIZATION_THRESHOLD,
};

const DEFAULT_DB_PATH: &str = "platewatch.db";
const DEFAULT_DETECTOR_MODEL: &str = "models/plate-detector.onnx";
const DEFAULT_OCR_MODEL: &str = "models/plate-ocr.onnx";

#[derive(Debug, Deserialize, Default)]
struct PlateWatchConfigFile {
    db_path: Option<String>,
    backend: Option<String>,
    pipeline: Option<PipelineConfigFile>,
    stabilization: Option<StabilizationConfigFile>,
    capture: Option<CaptureConfigFile>,
    models: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    frame_skip: Option<u64>,
    confidence_gate: Option<f32>,
    reconnect_backoff_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilizationConfigFile {
    threshold: Option<u32>,
    cooldown_secs: Option<u64>,
    patience_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    detector: Option<PathBuf>,
    ocr: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PlateWatchConfig {
    pub db_path: String,
    /// Inference backend name; `None` selects the registry default.
    pub backend: Option<String>,
    pub pipeline: PipelineSettings,
    pub capture: CaptureSettings,
    pub models: ModelSettings,
}

/// Output geometry requested from every source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl CaptureSettings {
    pub fn source_opener(&self) -> DefaultSourceOpener {
        DefaultSourceOpener {
            width: self.width,
            height: self.height,
            target_fps: self.target_fps,
        }
    }
}

/// Model files for the ONNX backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub detector: PathBuf,
    pub ocr: PathBuf,
}

impl PlateWatchConfig {
    /// Defaults, then the file named by `PLATEWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLATEWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `PLATEWATCH_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlateWatchConfigFile) -> Self {
        let pipeline_file = file.pipeline.unwrap_or_default();
        let stabilization = file.stabilization.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let capture_defaults = RtspConfig::default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            backend: file.backend,
            pipeline: PipelineSettings {
                frame_skip: pipeline_file.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
                confidence_gate: pipeline_file
                    .confidence_gate
                    .unwrap_or(DEFAULT_CONFIDENCE_GATE),
                stabilizer: StabilizerConfig {
                    threshold: stabilization.threshold.unwrap_or(STABILIZATION_THRESHOLD),
                    cooldown: stabilization
                        .cooldown_secs
                        .map(Duration::from_secs)
                        .unwrap_or(PLATE_COOLDOWN),
                    patience_frames: stabilization
                        .patience_frames
                        .unwrap_or(CANDIDATE_PATIENCE_FRAMES),
                },
                reconnect_backoff: pipeline_file
                    .reconnect_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF),
                jpeg_quality: pipeline_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            capture: CaptureSettings {
                width: capture.width.unwrap_or(capture_defaults.width),
                height: capture.height.unwrap_or(capture_defaults.height),
                target_fps: capture.target_fps.unwrap_or(capture_defaults.target_fps),
            },
            models: ModelSettings {
                detector: models
                    .detector
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTOR_MODEL)),
                ocr: models.ocr.unwrap_or_else(|| PathBuf::from(DEFAULT_OCR_MODEL)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PLATEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(backend) = std::env::var("PLATEWATCH_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = Some(backend.trim().to_string());
            }
        }
        if let Some(skip) = env_parse::<u64>("PLATEWATCH_FRAME_SKIP", "an integer")? {
            self.pipeline.frame_skip = skip;
        }
        if let Some(gate) = env_parse::<f32>("PLATEWATCH_CONFIDENCE_GATE", "a number")? {
            self.pipeline.confidence_gate = gate;
        }
        if let Some(threshold) =
            env_parse::<u32>("PLATEWATCH_STABILIZATION_THRESHOLD", "an integer")?
        {
            self.pipeline.stabilizer.threshold = threshold;
        }
        if let Some(secs) =
            env_parse::<u64>("PLATEWATCH_COOLDOWN_SECS", "an integer number of seconds")?
        {
            self.pipeline.stabilizer.cooldown = Duration::from_secs(secs);
        }
        if let Some(frames) = env_parse::<u64>("PLATEWATCH_PATIENCE_FRAMES", "an integer")? {
            self.pipeline.stabilizer.patience_frames = frames;
        }
        if let Some(ms) = env_parse::<u64>(
            "PLATEWATCH_RECONNECT_BACKOFF_MS",
            "an integer number of milliseconds",
        )? {
            self.pipeline.reconnect_backoff = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.pipeline.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be at least 1"));
        }
        let gate = self.pipeline.confidence_gate;
        if !(gate > 0.0 && gate <= 1.0) {
            return Err(anyhow!("confidence_gate must be in (0, 1], got {}", gate));
        }
        if self.pipeline.stabilizer.threshold == 0 {
            return Err(anyhow!("stabilization threshold must be at least 1"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PlateWatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse `key` if set and non-blank.
fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        _ => Ok(None),
    }
}
