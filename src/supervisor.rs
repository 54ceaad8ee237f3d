//! Lifecycle of all camera pipelines.
//!
//! The supervisor owns one `PipelineHandle` per camera behind a single mutex.
//! The lock is held for the whole of a start or stop, joins included, so two
//! callers can never race on the same camera.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::live::LiveState;
use crate::pipeline::{CameraPipeline, Collaborators, PipelineHandle, PipelineSettings};
use crate::CameraId;

pub struct Supervisor {
    collab: Collaborators,
    settings: PipelineSettings,
    pipelines: Mutex<HashMap<CameraId, PipelineHandle>>,
}

impl Supervisor {
    pub fn new(collab: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collab,
            settings,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn pipelines(&self) -> Result<MutexGuard<'_, HashMap<CameraId, PipelineHandle>>> {
        self.pipelines
            .lock()
            .map_err(|_| anyhow!("pipeline registry lock poisoned"))
    }

    pub fn live(&self) -> &Arc<LiveState> {
        &self.collab.live
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Launch a pipeline for `camera_id`. Returns false if one is already
    /// running; a pipeline that has ended on its own is replaced.
    pub fn start(&self, camera_id: CameraId, uri: &str) -> Result<bool> {
        let mut pipelines = self.pipelines()?;
        if let Some(existing) = pipelines.get(&camera_id) {
            if existing.is_alive() {
                log::info!("camera {}: pipeline already running", camera_id);
                return Ok(false);
            }
        }
        if let Some(dead) = pipelines.remove(&camera_id) {
            match dead.wait() {
                Ok(report) => log::info!(
                    "camera {}: replacing ended pipeline ({:?})",
                    camera_id,
                    report.exit
                ),
                Err(err) => log::warn!("camera {}: {:#}", camera_id, err),
            }
        }

        let handle = CameraPipeline::spawn(
            camera_id,
            uri,
            self.settings.clone(),
            self.collab.clone(),
        )?;
        pipelines.insert(camera_id, handle);
        Ok(true)
    }

    /// Stop and forget the pipeline for `camera_id`. Returns false for an
    /// unknown camera.
    pub fn stop(&self, camera_id: CameraId) -> Result<bool> {
        let mut pipelines = self.pipelines()?;
        let Some(handle) = pipelines.remove(&camera_id) else {
            log::warn!("camera {}: no pipeline to stop", camera_id);
            return Ok(false);
        };
        let result = handle.stop();
        self.collab.live.remove(camera_id);
        let report = result?;
        log::info!(
            "camera {}: stopped after {} frames ({} confirmed, {} persisted)",
            camera_id,
            report.frames_read,
            report.confirmed,
            report.persisted.events_written
        );
        Ok(true)
    }

    /// Stop every pipeline. Returns how many were stopped.
    pub fn stop_all(&self) -> Result<usize> {
        let mut pipelines = self.pipelines()?;
        let handles: Vec<PipelineHandle> = pipelines.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.signal_stop();
        }

        let mut stopped = 0;
        for handle in handles {
            let camera_id = handle.camera_id();
            match handle.stop() {
                Ok(_) => stopped += 1,
                Err(err) => log::error!("camera {}: {:#}", camera_id, err),
            }
            self.collab.live.remove(camera_id);
        }
        if stopped > 0 {
            log::info!("stopped {} pipeline(s)", stopped);
        }
        Ok(stopped)
    }

    /// Restart from storage: stop everything, then start a pipeline for every
    /// camera that has a source URI. Returns how many were started.
    pub fn initialize_persistent(&self) -> Result<usize> {
        self.stop_all()?;
        let cameras = self.collab.storage.list_cameras()?;
        let mut started = 0;
        for camera in cameras {
            let uri = match camera.source_uri.as_deref().map(str::trim) {
                Some(uri) if !uri.is_empty() => uri.to_string(),
                _ => {
                    log::warn!("camera {} ({}): no source URI, skipping", camera.id, camera.name);
                    continue;
                }
            };
            match self.start(camera.id, &uri) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(err) => log::error!("camera {}: failed to start: {:#}", camera.id, err),
            }
        }
        log::info!("initialized {} persistent pipeline(s)", started);
        Ok(started)
    }

    pub fn is_running(&self, camera_id: CameraId) -> bool {
        self.pipelines()
            .map(|p| p.get(&camera_id).is_some_and(PipelineHandle::is_alive))
            .unwrap_or(false)
    }

    /// Cameras with a registered pipeline, ascending.
    pub fn active_cameras(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self
            .pipelines()
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Err(err) = self.stop_all() {
            log::error!("supervisor shutdown: {:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
