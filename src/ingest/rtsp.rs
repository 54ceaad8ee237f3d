//! RTSP frame source.
//!
//! `RtspSource` ingests frames from IP cameras. It is responsible for:
//! - Connecting to camera streams (connection failures surface as `SourceError::Connect`)
//! - Decoding video frames into packed RGB8
//! - Reporting end of stream and mid-stream failures distinctly
//!
//! URLs starting with `stub://` select a deterministic synthetic scene used by
//! tests and demos. The scene alternates every 50 frames between an empty
//! road and a vehicle whose plate region is a bright, scene-specific pattern.

use std::time::{Duration, Instant};

use crate::frame::{Frame, RGB_CHANNELS};
use crate::ingest::{FrameSource, SourceError};

/// Frames per synthetic scene before the scene changes.
const SYNTHETIC_SCENE_FRAMES: u64 = 50;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Target frame rate. Synthetic sources pace themselves to it; 0 disables pacing.
    pub target_fps: u32,
    /// Output width for synthetic frames.
    pub width: u32,
    /// Output height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_gate".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic backend for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    /// Open and connect the stream described by `config`.
    pub fn open(config: RtspConfig) -> Result<Self, SourceError> {
        if config.url.starts_with("stub://") {
            let source = SyntheticRtspSource::new(config)?;
            log::info!("RtspSource: connected to {} (synthetic)", source.config.url);
            return Ok(Self {
                backend: RtspBackend::Synthetic(source),
            });
        }

        #[cfg(feature = "rtsp-gstreamer")]
        {
            let source = GstreamerRtspSource::open(config)?;
            Ok(Self {
                backend: RtspBackend::Gstreamer(source),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(SourceError::connect(
                &config.url,
                "RTSP requires the rtsp-gstreamer feature",
            ))
        }
    }

    pub fn url(&self) -> &str {
        match &self.backend {
            RtspBackend::Synthetic(source) => &source.config.url,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => &source.config.url,
        }
    }
}

impl FrameSource for RtspSource {
    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.read_frame(),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.frame_count,
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    frame_count: u64,
    /// End the stream after this many frames.
    frame_limit: Option<u64>,
    frame_interval: Option<Duration>,
    next_frame_at: Instant,
    scene_state: u64,
}

impl SyntheticRtspSource {
    fn new(mut config: RtspConfig) -> Result<Self, SourceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SourceError::connect(&config.url, "synthetic frame size is zero"));
        }
        let mut frame_limit = None;
        if let Some((_, query)) = config.url.split_once('?') {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                match key {
                    "frames" => {
                        let limit = value.parse::<u64>().map_err(|_| {
                            SourceError::connect(&config.url, "frames must be an integer")
                        })?;
                        frame_limit = Some(limit);
                    }
                    "fps" => {
                        config.target_fps = value.parse::<u32>().map_err(|_| {
                            SourceError::connect(&config.url, "fps must be an integer")
                        })?;
                    }
                    other => {
                        return Err(SourceError::connect(
                            &config.url,
                            format!("unknown stub option '{}'", other),
                        ))
                    }
                }
            }
        }
        let frame_interval = (config.target_fps > 0)
            .then(|| Duration::from_secs(1) / config.target_fps);
        Ok(Self {
            config,
            frame_count: 0,
            frame_limit,
            frame_interval,
            next_frame_at: Instant::now(),
            scene_state: 0,
        })
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(SourceError::EndOfStream);
        }
        if let Some(interval) = self.frame_interval {
            let now = Instant::now();
            if self.next_frame_at > now {
                std::thread::sleep(self.next_frame_at - now);
            }
            self.next_frame_at = Instant::now() + interval;
        }

        self.frame_count += 1;
        if self.frame_count % SYNTHETIC_SCENE_FRAMES == 0 {
            self.scene_state += 1;
        }
        let pixels = self.generate_synthetic_pixels();
        Frame::from_rgb(pixels, self.config.width, self.config.height)
            .map_err(|e| SourceError::Read(e.to_string()))
    }

    /// Even scenes show a vehicle: a bright plate band in the centre of the
    /// frame whose pattern depends only on the scene. Odd scenes are empty road.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let plate = synthetic_plate_region(self.config.width, self.config.height);
        let vehicle_present = self.scene_state % 2 == 0;

        let mut pixels = vec![0u8; width * height * RGB_CHANNELS];
        for y in 0..height {
            for x in 0..width {
                let in_plate = vehicle_present
                    && (x as i32) >= plate.x1
                    && (x as i32) < plate.x2
                    && (y as i32) >= plate.y1
                    && (y as i32) < plate.y2;
                let value = if in_plate {
                    160 + ((self.scene_state as usize * 37 + x) % 90) as u8
                } else {
                    ((x + y) % 64) as u8
                };
                let idx = (y * width + x) * RGB_CHANNELS;
                pixels[idx..idx + RGB_CHANNELS].fill(value);
            }
        }
        pixels
    }
}

/// Where synthetic scenes draw their plate. Shared with the stub detector.
pub(crate) fn synthetic_plate_region(width: u32, height: u32) -> crate::frame::BoundingBox {
    let w = width as i32;
    let h = height as i32;
    crate::frame::BoundingBox::new(w / 3, h * 5 / 12, w * 2 / 3, h * 7 / 12)
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` and bring it to Playing.
    fn open(config: RtspConfig) -> Result<Self, SourceError> {
        use gstreamer::prelude::*;

        let url = config.url.clone();
        gstreamer::init().map_err(|e| SourceError::connect(&url, e))?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| SourceError::connect(&url, e))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| SourceError::connect(&url, "RTSP pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| SourceError::connect(&url, "appsink element missing from pipeline"))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| SourceError::connect(&url, "appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| SourceError::connect(&url, e))?;
        let (change, _, _) = pipeline.state(gstreamer::ClockTime::from_seconds(5));
        if let Err(err) = change {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(SourceError::connect(&url, err));
        }
        log::info!("RtspSource: connected to {}", url);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
        })
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout_ms());
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Err(SourceError::EndOfStream);
            }
            return Err(SourceError::Read("RTSP stream stalled".to_string()));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height).map_err(|e| SourceError::Read(e.to_string()))
    }

    fn frame_timeout_ms(&self) -> u64 {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps as u64).saturating_mul(8)
        };
        base_ms.max(2_000)
    }

    fn poll_bus(&mut self) -> Result<(), SourceError> {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(SourceError::Read(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => return Err(SourceError::EndOfStream),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to release {}: {}", self.config.url, err);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32), SourceError> {
    let read_err = |msg: &str| SourceError::Read(msg.to_string());
    let buffer = sample.buffer().ok_or_else(|| read_err("RTSP sample missing buffer"))?;
    let caps = sample.caps().ok_or_else(|| read_err("RTSP sample missing caps"))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|_| read_err("RTSP caps are not raw video"))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * RGB_CHANNELS;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|_| read_err("RTSP buffer is not readable"))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let row_data = data
            .get(start..start + row_bytes)
            .ok_or_else(|| read_err("RTSP buffer row is out of bounds"))?;
        pixels.extend_from_slice(row_data);
    }
    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
