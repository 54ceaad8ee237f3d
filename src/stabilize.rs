//! Plate stabilization.
//!
//! Single-frame OCR is noisy, so a plate is only reported once the same text
//! has been read `threshold` times without a gap longer than the patience
//! window. A confirmed text is then suppressed for the cooldown period.
//!
//! Per plate text:
//!
//! ```text
//! ABSENT --read--> CANDIDATE --threshold reads--> CONFIRMED (cooldown) --expiry--> ABSENT
//!                      |
//!                      +--no read for > patience frames--> ABSENT
//! ```
//!
//! A text is never both a candidate and on cooldown. The stabilizer is owned by
//! one pipeline thread and takes the clock as an argument.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::detect::FrameDetection;
use crate::frame::BoundingBox;
use crate::CameraId;

/// Reads of one text needed to confirm it.
pub const STABILIZATION_THRESHOLD: u32 = 3;
/// Suppression window after a confirmation.
pub const PLATE_COOLDOWN: Duration = Duration::from_secs(15);
/// Frames a candidate may go unseen before it is dropped.
pub const CANDIDATE_PATIENCE_FRAMES: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabilizerConfig {
    pub threshold: u32,
    pub cooldown: Duration,
    pub patience_frames: u64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            threshold: STABILIZATION_THRESHOLD,
            cooldown: PLATE_COOLDOWN,
            patience_frames: CANDIDATE_PATIENCE_FRAMES,
        }
    }
}

/// A text seen at least once but not yet confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub count: u32,
    pub last_seen_frame: u64,
}

/// How the stabilizer treated one detection of the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateState {
    Candidate,
    /// This read completed the candidate; an event was emitted.
    Confirmed,
    Cooldown,
    /// OCR produced nothing usable. Never enters the state machine.
    Unrecognized,
}

/// A stabilized plate sighting, persisted and matched exactly once.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfirmedPlate {
    pub camera_id: CameraId,
    pub plate_text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_index: u64,
    /// Wall clock, epoch milliseconds.
    pub timestamp_ms: u64,
}

/// One detection of a frame annotated with its stabilization state.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub detection: FrameDetection,
    pub state: PlateState,
}

/// Everything the stabilizer decided for one processed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameOutcome {
    pub observations: Vec<Observation>,
    pub confirmed: Vec<ConfirmedPlate>,
    /// Candidates dropped for exceeding the patience window.
    pub pruned: Vec<String>,
}

pub struct Stabilizer {
    camera_id: CameraId,
    config: StabilizerConfig,
    candidates: HashMap<String, Candidate>,
    cooldowns: HashMap<String, Instant>,
}

impl Stabilizer {
    pub fn new(camera_id: CameraId, config: StabilizerConfig) -> Self {
        Self {
            camera_id,
            config,
            candidates: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    pub fn candidate(&self, text: &str) -> Option<Candidate> {
        self.candidates.get(text).copied()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.len()
    }

    pub fn is_cooling_down(&self, text: &str, now: Instant) -> bool {
        self.cooldowns
            .get(text)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.config.cooldown)
    }

    /// Run every detection of one processed frame through the state machine,
    /// then prune stale candidates.
    ///
    /// Call this with an empty slice when inference failed so pruning still
    /// advances with the frame counter.
    pub fn process_frame(
        &mut self,
        frame_index: u64,
        now: Instant,
        timestamp_ms: u64,
        detections: &[FrameDetection],
    ) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        for detection in detections {
            let state = match detection.text.as_deref() {
                None => PlateState::Unrecognized,
                Some(text) => {
                    let (state, confirmed) = self.observe(
                        text,
                        detection.confidence,
                        detection.bbox,
                        frame_index,
                        now,
                        timestamp_ms,
                    );
                    outcome.confirmed.extend(confirmed);
                    state
                }
            };
            outcome.observations.push(Observation {
                detection: detection.clone(),
                state,
            });
        }
        outcome.pruned = self.prune(frame_index, now);
        outcome
    }

    /// Feed a single recognized read.
    pub fn observe(
        &mut self,
        text: &str,
        confidence: f32,
        bbox: BoundingBox,
        frame_index: u64,
        now: Instant,
        timestamp_ms: u64,
    ) -> (PlateState, Option<ConfirmedPlate>) {
        if self.is_cooling_down(text, now) {
            return (PlateState::Cooldown, None);
        }
        self.cooldowns.remove(text);

        let candidate = self
            .candidates
            .entry(text.to_string())
            .or_insert(Candidate {
                count: 0,
                last_seen_frame: frame_index,
            });
        candidate.count += 1;
        candidate.last_seen_frame = frame_index;

        if candidate.count < self.config.threshold {
            return (PlateState::Candidate, None);
        }

        self.candidates.remove(text);
        self.cooldowns.insert(text.to_string(), now);
        log::debug!(
            "camera {}: confirmed {} at frame {} ({:.2})",
            self.camera_id,
            text,
            frame_index,
            confidence
        );
        let event = ConfirmedPlate {
            camera_id: self.camera_id,
            plate_text: text.to_string(),
            confidence,
            bbox,
            frame_index,
            timestamp_ms,
        };
        (PlateState::Confirmed, Some(event))
    }

    /// Drop candidates unseen for more than the patience window and forget
    /// expired cooldowns. Returns the dropped candidate texts.
    pub fn prune(&mut self, frame_index: u64, now: Instant) -> Vec<String> {
        let patience = self.config.patience_frames;
        let stale: Vec<String> = self
            .candidates
            .iter()
            .filter(|(_, c)| frame_index.saturating_sub(c.last_seen_frame) > patience)
            .map(|(text, _)| text.clone())
            .collect();
        for text in &stale {
            self.candidates.remove(text);
        }

        let cooldown = self.config.cooldown;
        self.cooldowns
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown);
        stale
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
