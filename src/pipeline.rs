//! Per-camera processing loop.
//!
//! One `pipeline-<camera>` thread per camera:
//!
//! 1. Builds a private `Inference` from the backend factory and opens the source.
//! 2. Reads every frame, running inference on every `frame_skip`-th one.
//! 3. Feeds detections through the camera's `Stabilizer`.
//! 4. For confirmed plates: looks up the owner, matches the watchlist,
//!    dispatches alerts and enqueues the batch for persistence.
//! 5. Publishes an annotated snapshot to the camera's live slot.
//!
//! A failed read releases the source, marks the camera offline, waits the
//! reconnect backoff and re-opens once. When the loop ends for any reason the
//! persistence queue is closed and drained, the camera is marked offline and
//! the live slot is replaced with an offline snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::annotate::{render_jpeg, DEFAULT_JPEG_QUALITY};
use crate::detect::{BackendFactory, Inference, DEFAULT_CONFIDENCE_GATE};
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceOpener};
use crate::live::{LiveDetection, LiveSlot, LiveSnapshot, LiveState, HEALTH_PLACEHOLDER};
use crate::persist::{DrainStats, PersistenceQueue};
use crate::stabilize::{ConfirmedPlate, FrameOutcome, Stabilizer, StabilizerConfig};
use crate::storage::Storage;
use crate::watchlist::{dispatch_alerts, match_confirmations, Notifier};
use crate::{now_ms, CameraId, CameraStatus};

/// Inference runs on every Nth frame read.
pub const DEFAULT_FRAME_SKIP: u64 = 3;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Granularity of stop checks while sleeping through a backoff.
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub frame_skip: u64,
    pub confidence_gate: f32,
    pub stabilizer: StabilizerConfig,
    pub reconnect_backoff: Duration,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_skip: DEFAULT_FRAME_SKIP,
            confidence_gate: DEFAULT_CONFIDENCE_GATE,
            stabilizer: StabilizerConfig::default(),
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Services shared by every pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub sources: Arc<dyn SourceOpener>,
    pub backend: Arc<dyn BackendFactory>,
    pub notifier: Arc<dyn Notifier>,
    pub live: Arc<LiveState>,
}

/// Why a pipeline loop ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitReason {
    #[default]
    Stopped,
    /// The backend could not build an inference pair.
    BackendFailed,
    /// The source could not be opened at start-up.
    ConnectFailed,
    /// A read failed and the single re-open attempt failed too.
    ReconnectFailed,
    /// The persistence thread could not be started.
    PersistenceFailed,
}

/// Counters returned when a pipeline thread exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub exit: ExitReason,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub inference_failures: u64,
    pub reconnects: u64,
    pub confirmed: u64,
    pub persisted: DrainStats,
}

pub struct CameraPipeline {
    camera_id: CameraId,
    uri: String,
    settings: PipelineSettings,
    collab: Collaborators,
    running: Arc<AtomicBool>,
    live_slot: Arc<LiveSlot>,
    status: Option<CameraStatus>,
}

impl CameraPipeline {
    /// Start the loop for `camera_id` on its own thread.
    pub fn spawn(
        camera_id: CameraId,
        uri: &str,
        settings: PipelineSettings,
        collab: Collaborators,
    ) -> Result<PipelineHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let pipeline = CameraPipeline {
            camera_id,
            uri: uri.to_string(),
            settings,
            live_slot: collab.live.slot(camera_id),
            collab,
            running: running.clone(),
            status: None,
        };
        let thread = thread::Builder::new()
            .name(format!("pipeline-{}", camera_id))
            .spawn(move || pipeline.run())
            .with_context(|| format!("failed to spawn pipeline for camera {}", camera_id))?;
        Ok(PipelineHandle {
            camera_id,
            uri: uri.to_string(),
            running,
            thread: Some(thread),
        })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(mut self) -> PipelineReport {
        let mut report = PipelineReport::default();
        log::info!("camera {}: pipeline starting on {}", self.camera_id, self.uri);

        report.exit = match PersistenceQueue::spawn(self.camera_id, self.collab.storage.clone()) {
            Ok((queue, drain)) => {
                let exit = self.read_loop(&queue, &mut report);
                drop(queue);
                report.persisted = drain.join().unwrap_or_else(|_| {
                    log::error!("camera {}: persistence thread panicked", self.camera_id);
                    DrainStats::default()
                });
                exit
            }
            Err(err) => {
                log::error!("camera {}: {:#}", self.camera_id, err);
                ExitReason::PersistenceFailed
            }
        };

        if self.status != Some(CameraStatus::Offline) {
            self.set_status(CameraStatus::Offline);
        }
        self.live_slot
            .publish(LiveSnapshot::offline(self.camera_id, report.frames_read, now_ms()));
        self.running.store(false, Ordering::SeqCst);
        log::info!(
            "camera {}: pipeline exited ({:?}, {} frames read, {} confirmed)",
            self.camera_id,
            report.exit,
            report.frames_read,
            report.confirmed
        );
        report
    }

    fn read_loop(&mut self, queue: &PersistenceQueue, report: &mut PipelineReport) -> ExitReason {
        let mut inference = match self.build_inference() {
            Ok(inference) => inference,
            Err(err) => {
                log::error!("camera {}: inference backend failed: {:#}", self.camera_id, err);
                return ExitReason::BackendFailed;
            }
        };

        let mut source = match self.collab.sources.open(&self.uri) {
            Ok(source) => source,
            Err(err) => {
                log::error!("camera {}: {}", self.camera_id, err);
                return ExitReason::ConnectFailed;
            }
        };
        self.set_status(CameraStatus::Online);

        let frame_skip = self.settings.frame_skip.max(1);
        let mut stabilizer = Stabilizer::new(self.camera_id, self.settings.stabilizer.clone());
        let mut frame_index = 0u64;

        while self.is_running() {
            let started = Instant::now();
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("camera {}: {}; reconnecting", self.camera_id, err);
                    drop(source);
                    match self.reconnect(frame_index) {
                        Ok(reopened) => {
                            report.reconnects += 1;
                            source = reopened;
                            continue;
                        }
                        Err(exit) => return exit,
                    }
                }
            };

            frame_index += 1;
            report.frames_read += 1;
            if frame_index % frame_skip != 0 {
                continue;
            }
            report.frames_processed += 1;
            self.process_frame(
                frame,
                frame_index,
                started,
                &mut inference,
                &mut stabilizer,
                queue,
                report,
            );
        }
        ExitReason::Stopped
    }

    fn build_inference(&self) -> Result<Inference> {
        let mut inference = self
            .collab
            .backend
            .create(self.camera_id)?
            .with_confidence_gate(self.settings.confidence_gate);
        inference.warm_up()?;
        log::info!(
            "camera {}: inference ready ({}, gate {:.2})",
            self.camera_id,
            inference.describe(),
            inference.confidence_gate()
        );
        Ok(inference)
    }

    /// Mark offline, clear the live view, wait out the backoff and try one
    /// re-open.
    fn reconnect(&mut self, frame_index: u64) -> Result<Box<dyn FrameSource>, ExitReason> {
        self.set_status(CameraStatus::Offline);
        self.live_slot
            .publish(LiveSnapshot::offline(self.camera_id, frame_index, now_ms()));
        if !self.sleep_while_running(self.settings.reconnect_backoff) {
            return Err(ExitReason::Stopped);
        }
        match self.collab.sources.open(&self.uri) {
            Ok(source) => {
                log::info!("camera {}: reconnected", self.camera_id);
                self.set_status(CameraStatus::Online);
                Ok(source)
            }
            Err(err) => {
                log::error!("camera {}: reconnect failed: {}", self.camera_id, err);
                Err(ExitReason::ReconnectFailed)
            }
        }
    }

    /// Returns false if the pipeline was stopped while sleeping.
    fn sleep_while_running(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL_SLICE.min(deadline - now));
        }
        false
    }

    fn set_status(&mut self, status: CameraStatus) {
        self.status = Some(status);
        if let Err(err) = self
            .collab
            .storage
            .update_camera_status(self.camera_id, status, now_ms())
        {
            log::warn!(
                "camera {}: failed to record status {}: {:#}",
                self.camera_id,
                status,
                err
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_frame(
        &self,
        frame: Frame,
        frame_index: u64,
        started: Instant,
        inference: &mut Inference,
        stabilizer: &mut Stabilizer,
        queue: &PersistenceQueue,
        report: &mut PipelineReport,
    ) {
        let detections = match inference.run(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                report.inference_failures += 1;
                log::warn!(
                    "camera {}: inference failed on frame {}: {:#}",
                    self.camera_id,
                    frame_index,
                    err
                );
                Vec::new()
            }
        };

        let timestamp_ms = now_ms();
        let FrameOutcome {
            observations,
            confirmed,
            pruned,
        } = stabilizer.process_frame(frame_index, Instant::now(), timestamp_ms, &detections);
        if !pruned.is_empty() {
            log::debug!("camera {}: dropped stale candidates {:?}", self.camera_id, pruned);
        }
        if !confirmed.is_empty() {
            report.confirmed += confirmed.len() as u64;
            self.handle_confirmations(confirmed, queue);
        }

        let live_detections: Vec<LiveDetection> = observations
            .into_iter()
            .map(|obs| LiveDetection {
                text: obs.detection.display_text().to_string(),
                confidence: obs.detection.confidence,
                bbox: obs.detection.bbox,
                state: obs.state,
            })
            .collect();
        let image_jpeg = render_jpeg(frame, &live_detections, self.settings.jpeg_quality)
            .unwrap_or_else(|err| {
                log::warn!("camera {}: annotation failed: {:#}", self.camera_id, err);
                Vec::new()
            });

        self.live_slot.publish(LiveSnapshot {
            camera_id: self.camera_id,
            image_jpeg,
            detections: live_detections,
            frame_index,
            timestamp_ms,
            status: CameraStatus::Online,
            health: HEALTH_PLACEHOLDER,
            latency_ms: started.elapsed().as_millis() as u64,
        });
    }

    fn handle_confirmations(&self, confirmed: Vec<ConfirmedPlate>, queue: &PersistenceQueue) {
        for plate in &confirmed {
            log::info!(
                "camera {}: plate {} confirmed at frame {} ({:.0}%)",
                self.camera_id,
                plate.plate_text,
                plate.frame_index,
                plate.confidence * 100.0
            );
        }

        let owner_id = match self.collab.storage.get_camera(self.camera_id) {
            Ok(Some(camera)) => camera.owner_id,
            Ok(None) => None,
            Err(err) => {
                log::error!(
                    "camera {}: camera lookup failed, dropping {} confirmation(s): {:#}",
                    self.camera_id,
                    confirmed.len(),
                    err
                );
                return;
            }
        };
        let Some(owner_id) = owner_id else {
            log::warn!(
                "camera {}: no owner on record, skipping {} confirmation(s)",
                self.camera_id,
                confirmed.len()
            );
            return;
        };

        match self.collab.storage.get_watchlist(owner_id) {
            Ok(watchlist) => {
                let intents = match_confirmations(&confirmed, &watchlist, owner_id);
                dispatch_alerts(self.collab.notifier.as_ref(), &intents);
            }
            Err(err) => log::error!(
                "camera {}: watchlist lookup for owner {} failed: {:#}",
                self.camera_id,
                owner_id,
                err
            ),
        }

        if let Err(err) = queue.enqueue(confirmed, owner_id) {
            log::error!("camera {}: {:#}", self.camera_id, err);
        }
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Owner's view of a running pipeline.
pub struct PipelineHandle {
    camera_id: CameraId,
    uri: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<PipelineReport>>,
}

impl PipelineHandle {
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// True until the loop has been asked to stop or has ended on its own.
    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the loop to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the loop and wait for it and its persistence thread to finish.
    pub fn stop(mut self) -> Result<PipelineReport> {
        self.signal_stop();
        self.join()
    }

    /// Wait for the loop to end on its own.
    pub fn wait(mut self) -> Result<PipelineReport> {
        self.join()
    }

    fn join(&mut self) -> Result<PipelineReport> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("camera {}: pipeline already joined", self.camera_id))?;
        thread
            .join()
            .map_err(|_| anyhow!("camera {}: pipeline thread panicked", self.camera_id))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{PlateDetector, PlateReader, RawDetection};
    use crate::frame::BoundingBox;
    use crate::ingest::SourceError;
    use crate::storage::{InMemoryStorage, WatchlistEntry};
    use crate::watchlist::AlertChannel;
    use crate::OwnerId;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Yields `frames` blank frames, then ends the stream.
    struct CountedSource {
        remaining: u64,
        read: u64,
    }

    impl FrameSource for CountedSource {
        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Read("camera unplugged".into()));
            }
            self.remaining -= 1;
            self.read += 1;
            Frame::from_rgb(vec![0u8; 32 * 16 * 3], 32, 16)
                .map_err(|err| SourceError::Read(err.to_string()))
        }

        fn frames_read(&self) -> u64 {
            self.read
        }
    }

    /// Each `open` pops the next scripted outcome: `Some(n)` opens a source
    /// with `n` frames, `None` (or an empty script) fails.
    struct ScriptedOpener {
        script: Mutex<VecDeque<Option<u64>>>,
        opens: Mutex<u32>,
    }

    impl ScriptedOpener {
        fn new(script: &[Option<u64>]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                opens: Mutex::new(0),
            })
        }

        fn opens(&self) -> u32 {
            *self.opens.lock().unwrap()
        }
    }

    impl SourceOpener for ScriptedOpener {
        fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
            *self.opens.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(frames) => Ok(Box::new(CountedSource {
                    remaining: frames,
                    read: 0,
                })),
                None => Err(SourceError::connect(uri, "connection refused")),
            }
        }
    }

    struct AlwaysPlate(&'static str);

    impl PlateDetector for AlwaysPlate {
        fn name(&self) -> &'static str {
            "always"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Ok(vec![RawDetection {
                bbox: BoundingBox::new(4, 4, 20, 12),
                confidence: 0.9,
            }])
        }
    }

    impl PlateReader for AlwaysPlate {
        fn name(&self) -> &'static str {
            "always"
        }

        fn recognize(&mut self, _crop: &Frame) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    struct PlateBackend(&'static str);

    impl BackendFactory for PlateBackend {
        fn name(&self) -> &'static str {
            "always"
        }

        fn create(&self, _camera_id: CameraId) -> Result<Inference> {
            Ok(Inference::new(
                Box::new(AlwaysPlate(self.0)),
                Box::new(AlwaysPlate(self.0)),
            ))
        }
    }

    struct BrokenBackend;

    impl BackendFactory for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn create(&self, _camera_id: CameraId) -> Result<Inference> {
            Err(anyhow!("model file missing"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(AlertChannel, String, OwnerId)>>,
    }

    impl Notifier for RecordingNotifier {
        fn send_alert(&self, channel: AlertChannel, plate_text: &str, owner_id: OwnerId) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((channel, plate_text.to_string(), owner_id));
            Ok(())
        }
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        opener: Arc<ScriptedOpener>,
        notifier: Arc<RecordingNotifier>,
        live: Arc<LiveState>,
        camera_id: CameraId,
    }

    impl Fixture {
        fn new(owner: Option<OwnerId>, script: &[Option<u64>]) -> Self {
            let storage = Arc::new(InMemoryStorage::new());
            let camera_id = storage.add_camera("gate", Some("test://gate"), owner);
            Self {
                storage,
                opener: ScriptedOpener::new(script),
                notifier: Arc::new(RecordingNotifier::default()),
                live: Arc::new(LiveState::new()),
                camera_id,
            }
        }

        fn collaborators(&self, backend: Arc<dyn BackendFactory>) -> Collaborators {
            Collaborators {
                storage: self.storage.clone(),
                sources: self.opener.clone(),
                backend,
                notifier: self.notifier.clone(),
                live: self.live.clone(),
            }
        }

        fn run(&self, backend: Arc<dyn BackendFactory>, settings: PipelineSettings) -> PipelineReport {
            CameraPipeline::spawn(self.camera_id, "test://gate", settings, self.collaborators(backend))
                .unwrap()
                .wait()
                .unwrap()
        }
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            reconnect_backoff: Duration::ZERO,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn samples_every_third_frame() {
        let fx = Fixture::new(Some(1), &[Some(10)]);
        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.frames_read, 10);
        assert_eq!(report.frames_processed, 3);
        assert_eq!(report.exit, ExitReason::ReconnectFailed);
    }

    #[test]
    fn confirmed_plates_are_matched_alerted_and_persisted_once() {
        let fx = Fixture::new(Some(1), &[Some(30)]);
        fx.storage.add_watchlist_entry(WatchlistEntry {
            owner_id: 1,
            plate_text: "ABC123".to_string(),
            description: Some("stolen".to_string()),
            notify_email: true,
            notify_sms: true,
        });

        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.frames_processed, 10);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.persisted.events_written, 1);

        let logs = fx.storage.plate_logs_for_camera(fx.camera_id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].plate_text, "ABC123");
        assert_eq!(logs[0].owner_id, 1);
        assert_eq!(logs[0].confidence, 90);

        let sent = fx.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, text, owner)| text == "ABC123" && *owner == 1));
    }

    #[test]
    fn camera_without_owner_persists_nothing() {
        let fx = Fixture::new(None, &[Some(9)]);
        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.persisted, DrainStats::default());
        assert!(fx.storage.plate_logs().is_empty());
        assert!(fx.notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn initial_connect_failure_marks_offline_without_retry() {
        let fx = Fixture::new(Some(1), &[None]);
        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.exit, ExitReason::ConnectFailed);
        assert_eq!(report.frames_read, 0);
        assert_eq!(fx.opener.opens(), 1);
        assert_eq!(fx.storage.status_history(fx.camera_id), vec![CameraStatus::Offline]);
    }

    #[test]
    fn backend_failure_marks_offline() {
        let fx = Fixture::new(Some(1), &[Some(10)]);
        let report = fx.run(Arc::new(BrokenBackend), fast_settings());
        assert_eq!(report.exit, ExitReason::BackendFailed);
        assert_eq!(fx.opener.opens(), 0);
        assert_eq!(fx.storage.status_history(fx.camera_id), vec![CameraStatus::Offline]);
    }

    #[test]
    fn read_failure_with_successful_reconnect_keeps_running() {
        let fx = Fixture::new(Some(1), &[Some(3), Some(3), None]);
        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.reconnects, 1);
        assert_eq!(report.frames_read, 6);
        assert_eq!(report.exit, ExitReason::ReconnectFailed);
        assert_eq!(
            fx.storage.status_history(fx.camera_id),
            vec![
                CameraStatus::Online,
                CameraStatus::Offline,
                CameraStatus::Online,
                CameraStatus::Offline
            ]
        );
    }

    #[test]
    fn failed_reconnect_drains_queue_before_exit() {
        let fx = Fixture::new(Some(1), &[Some(9), None]);
        let report = fx.run(Arc::new(PlateBackend("XYZ9")), fast_settings());
        assert_eq!(report.exit, ExitReason::ReconnectFailed);
        assert_eq!(report.persisted.events_written, 1);
        assert_eq!(fx.storage.plate_logs().len(), 1);

        let snapshot = fx.live.get(fx.camera_id).expect("offline snapshot");
        assert_eq!(snapshot.status, CameraStatus::Offline);
        assert!(snapshot.image_jpeg.is_empty());
        assert!(snapshot.detections.is_empty());
    }

    #[test]
    fn stop_interrupts_reconnect_backoff() {
        let fx = Fixture::new(Some(1), &[Some(0), Some(5)]);
        let settings = PipelineSettings {
            reconnect_backoff: Duration::from_secs(60),
            ..PipelineSettings::default()
        };
        let handle = CameraPipeline::spawn(
            fx.camera_id,
            "test://gate",
            settings,
            fx.collaborators(Arc::new(PlateBackend("ABC123"))),
        )
        .unwrap();
        while fx.storage.status_history(fx.camera_id).len() < 2 {
            thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        let report = handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.exit, ExitReason::Stopped);
        assert_eq!(fx.opener.opens(), 1);
    }

    #[test]
    fn live_view_is_cleared_while_reconnecting() {
        let fx = Fixture::new(Some(1), &[Some(9), Some(5)]);
        let settings = PipelineSettings {
            reconnect_backoff: Duration::from_secs(60),
            ..PipelineSettings::default()
        };
        let handle = CameraPipeline::spawn(
            fx.camera_id,
            "test://gate",
            settings,
            fx.collaborators(Arc::new(PlateBackend("ABC123"))),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let snapshot = loop {
            if let Some(s) = fx.live.get(fx.camera_id) {
                if s.status == CameraStatus::Offline {
                    break s;
                }
            }
            assert!(Instant::now() < deadline, "live view never went offline");
            thread::sleep(Duration::from_millis(5));
        };

        assert_eq!(
            fx.storage.status_history(fx.camera_id),
            vec![CameraStatus::Online, CameraStatus::Offline]
        );
        assert_eq!(snapshot.frame_index, 9);
        assert!(snapshot.image_jpeg.is_empty());
        assert!(snapshot.detections.is_empty());
        assert!(handle.is_alive());

        assert_eq!(handle.stop().unwrap().exit, ExitReason::Stopped);
    }

    #[test]
    fn failed_camera_lookup_drops_the_confirmations() {
        let fx = Fixture::new(Some(1), &[Some(9)]);
        fx.storage.add_watchlist_entry(WatchlistEntry {
            owner_id: 1,
            plate_text: "ABC123".to_string(),
            description: None,
            notify_email: true,
            notify_sms: false,
        });
        fx.storage.fail_next_camera_lookups(1);

        let report = fx.run(Arc::new(PlateBackend("ABC123")), fast_settings());
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.persisted, DrainStats::default());
        assert!(fx.storage.plate_logs().is_empty());
        assert!(fx.notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn published_snapshots_carry_detections_and_jpeg() {
        let fx = Fixture::new(Some(1), &[Some(3), None]);
        let settings = PipelineSettings {
            reconnect_backoff: Duration::from_secs(60),
            ..PipelineSettings::default()
        };
        let handle = CameraPipeline::spawn(
            fx.camera_id,
            "test://gate",
            settings,
            fx.collaborators(Arc::new(PlateBackend("ABC123"))),
        )
        .unwrap();
        let snapshot = loop {
            if let Some(s) = fx.live.get(fx.camera_id) {
                break s;
            }
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(snapshot.status, CameraStatus::Online);
        assert_eq!(snapshot.frame_index, 3);
        assert_eq!(snapshot.health, HEALTH_PLACEHOLDER);
        assert_eq!(&snapshot.image_jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(snapshot.detections.len(), 1);
        assert_eq!(snapshot.detections[0].text, "ABC123");
        handle.stop().unwrap();
    }
}
