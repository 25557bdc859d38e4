//! Session pipeline.
//!
//! One pipeline owns the whole session: the capture source, the detector
//! registry, the recorder, the event store and the timeline. Commands come
//! in from the UI boundary; frame processing runs on scheduler ticks. All
//! session state sits behind one mutex, and the scheduler is owned outside
//! it so a command can always join the tick loop before touching state.

pub mod analysis;
pub mod scheduler;

pub use analysis::{analyze, AnalysisOutcome, AnalysisParams, AnalysisReport, CancelToken};
pub use scheduler::{ManualScheduler, ManualTicker, ThreadScheduler, TickFlow, TickScheduler};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};

use crate::capture::{CaptureSource, FileSource, LiveSource};
use crate::config::ConsoleConfig;
use crate::detect::{Detection, DetectorConfig, DetectorRegistry, DetectorStrategy};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::record::Recorder;
use crate::store::{DetectionEvent, EventStore, TimelineIndex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Live,
    Playback { paused: bool },
    Analysis,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Live => "live",
            Mode::Playback { .. } => "playback",
            Mode::Analysis => "analysis",
        }
    }
}

/// UI boundary: the pipeline pushes, the frontend renders. Implementations
/// must not call back into the pipeline from these hooks; they run under the
/// session lock.
pub trait PipelineObserver: Send {
    fn on_frame(&self, _frame: &Frame) {}
    fn on_detections(&self, _frame_index: u64, _detections: &[Detection]) {}
    fn on_mode_changed(&self, _mode: Mode) {}
    fn on_error(&self, _error: &PipelineError) {}
}

struct SessionState {
    config: ConsoleConfig,
    mode: Mode,
    source: Option<Box<dyn CaptureSource>>,
    recorder: Option<Recorder>,
    registry: DetectorRegistry,
    store: EventStore,
    timeline: TimelineIndex,
    observers: Vec<Box<dyn PipelineObserver>>,
    /// Frames processed in the live session so far; also the index stamped
    /// on the next frame. Zero-based so live indices line up with container
    /// frames when the session's own recording is replayed.
    frame_counter: u64,
    session_start: DateTime<Utc>,
    events_since_flush: u32,
    last_file: Option<String>,
}

impl SessionState {
    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            debug!("mode {} -> {}", self.mode.name(), mode.name());
            self.mode = mode;
            for obs in &self.observers {
                obs.on_mode_changed(mode);
            }
        }
    }

    fn notify_error(&self, error: &PipelineError) {
        warn!("{}: {}", error.kind(), error);
        for obs in &self.observers {
            obs.on_error(error);
        }
    }

    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            sensitivity: self.config.detector.sensitivity,
            confidence_threshold: self.config.detector.confidence_threshold,
            annotate: true,
        }
    }

    fn tick(&mut self) -> TickFlow {
        match self.mode {
            Mode::Live => self.live_tick(),
            Mode::Playback { paused: false } => self.playback_tick(),
            _ => TickFlow::Stop,
        }
    }

    fn live_tick(&mut self) -> TickFlow {
        let Some(source) = self.source.as_mut() else {
            return TickFlow::Stop;
        };
        let mut frame = match source.read_next() {
            Ok(frame) => frame,
            Err(e) => {
                // A device that runs dry or fails a read is gone; wind the
                // session down rather than spin against it.
                self.notify_error(&e);
                self.finish_session();
                return TickFlow::Stop;
            }
        };

        let index = self.frame_counter;
        frame.set_index(index);

        let strategy = self.config.detector.strategy.clone();
        let cfg = self.detector_config();
        let output = match self.registry.detect(&strategy, &frame, &cfg) {
            Ok(output) => output,
            Err(e) => {
                self.notify_error(&PipelineError::DetectorFailure {
                    strategy,
                    message: format!("{:#}", e),
                });
                Default::default()
            }
        };

        // Recordings always get the raw frame, never the annotated copy.
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write(&frame) {
                self.notify_error(&e);
                self.recorder = None;
            }
        }

        if !output.detections.is_empty() {
            let mut label_counts: BTreeMap<String, u32> = BTreeMap::new();
            for det in &output.detections {
                *label_counts.entry(det.label.clone()).or_insert(0) += 1;
            }
            self.store.append(DetectionEvent {
                timestamp: Utc::now(),
                frame_index: index,
                label_counts,
            });
            self.events_since_flush += 1;
            if self.events_since_flush >= self.config.detector.flush_every {
                self.store.save_in_background();
                self.events_since_flush = 0;
            }
            for obs in &self.observers {
                obs.on_detections(index, &output.detections);
            }
        }

        let display = output.annotated.as_ref().unwrap_or(&frame);
        for obs in &self.observers {
            obs.on_frame(display);
        }
        self.frame_counter += 1;
        TickFlow::Continue
    }

    fn playback_tick(&mut self) -> TickFlow {
        let Some(source) = self.source.as_mut() else {
            return TickFlow::Stop;
        };
        let index = source.position();
        let mut frame = match source.read_next() {
            Ok(frame) => frame,
            Err(PipelineError::EndOfStream) => {
                // Clip exhausted. Not an error; the session just ends.
                self.source = None;
                self.set_mode(Mode::Idle);
                return TickFlow::Stop;
            }
            Err(e) => {
                self.notify_error(&e);
                self.source = None;
                self.set_mode(Mode::Idle);
                return TickFlow::Stop;
            }
        };
        frame.set_index(index);
        // Known detection frames are looked up, never re-detected; playback
        // replays the stored verdict for this index.
        if self.timeline.contains(index) {
            let marks = self
                .store
                .event_for_frame(index)
                .map(timeline_marks)
                .unwrap_or_default();
            for obs in &self.observers {
                obs.on_detections(index, &marks);
            }
        }
        for obs in &self.observers {
            obs.on_frame(&frame);
        }
        TickFlow::Continue
    }

    /// Tear down source and recorder, flush the store, return to Idle.
    fn finish_session(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            if let Err(e) = recorder.stop() {
                self.notify_error(&e);
            }
        }
        self.source = None;
        if let Err(e) = self.store.save() {
            self.notify_error(&e);
        }
        self.events_since_flush = 0;
        self.set_mode(Mode::Idle);
    }
}

pub struct SessionPipeline {
    inner: Arc<Mutex<SessionState>>,
    scheduler: Box<dyn TickScheduler>,
}

impl SessionPipeline {
    pub fn new(
        config: ConsoleConfig,
        scheduler: Box<dyn TickScheduler>,
    ) -> Result<Self, PipelineError> {
        let store = EventStore::open(&config.store_path)?;
        let registry = DetectorRegistry::with_defaults();
        if !registry.contains(&config.detector.strategy) {
            return Err(PipelineError::DetectorFailure {
                strategy: config.detector.strategy.clone(),
                message: "unknown strategy".to_string(),
            });
        }
        info!(
            "session pipeline ready ({} stored events)",
            store.len()
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(SessionState {
                config,
                mode: Mode::Idle,
                source: None,
                recorder: None,
                registry,
                store,
                timeline: TimelineIndex::default(),
                observers: Vec::new(),
                frame_counter: 0,
                session_start: Utc::now(),
                events_since_flush: 0,
                last_file: None,
            })),
            scheduler,
        })
    }

    pub fn with_thread_scheduler(config: ConsoleConfig) -> Result<Self, PipelineError> {
        Self::new(config, Box::new(ThreadScheduler::new()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, PipelineError> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::Persistence("session state poisoned".to_string()))
    }

    fn start_ticking(&mut self, interval: Duration) -> Result<(), PipelineError> {
        let inner = Arc::clone(&self.inner);
        self.scheduler
            .start(
                interval,
                Box::new(move || match inner.lock() {
                    Ok(mut state) => state.tick(),
                    Err(_) => TickFlow::Stop,
                }),
            )
            .map_err(|e| PipelineError::Open(format!("session loop: {:#}", e)))
    }

    pub fn add_observer(&self, observer: Box<dyn PipelineObserver>) -> Result<(), PipelineError> {
        self.lock()?.observers.push(observer);
        Ok(())
    }

    /// Add a detector strategy to this pipeline's registry.
    pub fn register_detector<F>(&self, name: &str, build: F) -> Result<(), PipelineError>
    where
        F: Fn() -> Box<dyn DetectorStrategy> + Send + 'static,
    {
        self.lock()?.registry.register(name, build);
        Ok(())
    }

    pub fn mode(&self) -> Result<Mode, PipelineError> {
        Ok(self.lock()?.mode)
    }

    /// Frames processed in the current live session.
    pub fn frames_seen(&self) -> Result<u64, PipelineError> {
        Ok(self.lock()?.frame_counter)
    }

    pub fn event_count(&self) -> Result<usize, PipelineError> {
        Ok(self.lock()?.store.len())
    }

    /// Detection frame indices for the open clip, ascending.
    pub fn timeline(&self) -> Result<Vec<u64>, PipelineError> {
        Ok(self.lock()?.timeline.indices().to_vec())
    }

    /// Begin a live session from a device URL. Valid from Idle only.
    pub fn start_live(&mut self, url: &str) -> Result<(), PipelineError> {
        let source = match LiveSource::open(url) {
            Ok(source) => source,
            Err(e) => {
                self.lock()?.notify_error(&e);
                return Err(e);
            }
        };
        self.start_live_from(Box::new(source))
    }

    /// Begin a live session from an already opened source. This is the seam
    /// for frontends that manage their own devices.
    pub fn start_live_from(&mut self, source: Box<dyn CaptureSource>) -> Result<(), PipelineError> {
        let interval;
        {
            let mut state = self.lock()?;
            if state.mode != Mode::Idle {
                return Err(PipelineError::InvalidMode {
                    command: "start_live",
                    mode: state.mode.name(),
                });
            }
            interval = tick_interval(state.config.target_fps as f64);
            info!("live session on {}", source.describe());
            state.source = Some(source);
            state.frame_counter = 0;
            state.session_start = Utc::now();
            state.set_mode(Mode::Live);
        }
        self.start_ticking(interval)
    }

    /// End the current session. Idempotent; a no-op when already Idle.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.scheduler.stop();
        let mut state = self.lock()?;
        if state.mode == Mode::Idle {
            return Ok(());
        }
        state.finish_session();
        Ok(())
    }

    /// Start recording the live feed. Returns the recording path.
    pub fn start_recording(&mut self) -> Result<PathBuf, PipelineError> {
        let mut state = self.lock()?;
        if state.mode != Mode::Live {
            return Err(PipelineError::InvalidMode {
                command: "start_recording",
                mode: state.mode.name(),
            });
        }
        if state.recorder.is_some() {
            return Err(PipelineError::Recorder(
                "recording already in progress".to_string(),
            ));
        }
        let (width, height, fps) = {
            let source = state.source.as_ref().ok_or_else(|| {
                PipelineError::Recorder("no live source".to_string())
            })?;
            let (w, h) = source.frame_size();
            (w, h, source.frame_rate())
        };
        let recorder = Recorder::start(
            &state.config.storage_dir,
            &state.config.recording_ext,
            width,
            height,
            fps,
        )?;
        let path = recorder.path().to_path_buf();
        state.recorder = Some(recorder);
        Ok(path)
    }

    /// Finish the active recording. Returns the finished file's path.
    pub fn stop_recording(&mut self) -> Result<PathBuf, PipelineError> {
        let mut state = self.lock()?;
        let mut recorder = state.recorder.take().ok_or_else(|| {
            PipelineError::Recorder("no recording in progress".to_string())
        })?;
        recorder.stop()
    }

    /// Open a clip for playback. Valid from Idle or Playback; the pipeline
    /// lands in paused Playback with the timeline rebuilt for this clip.
    pub fn open_file(&mut self, path: &str) -> Result<(), PipelineError> {
        {
            let state = self.lock()?;
            if state.mode == Mode::Live || state.mode == Mode::Analysis {
                return Err(PipelineError::InvalidMode {
                    command: "open_file",
                    mode: state.mode.name(),
                });
            }
        }
        self.scheduler.stop();
        let mut state = self.lock()?;
        let source = match FileSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                state.notify_error(&e);
                return Err(e);
            }
        };
        let frame_count = source.frame_count().unwrap_or(0);
        state.timeline = TimelineIndex::rebuild(state.store.events(), frame_count);
        info!(
            "opened {} ({} frames, {} timeline marks)",
            source.describe(),
            frame_count,
            state.timeline.len()
        );
        state.source = Some(Box::new(source));
        state.last_file = Some(path.to_string());
        state.set_mode(Mode::Playback { paused: true });
        Ok(())
    }

    /// Resume playback of the open clip.
    pub fn play(&mut self) -> Result<(), PipelineError> {
        let interval;
        {
            let mut state = self.lock()?;
            match state.mode {
                Mode::Playback { paused: true } => {}
                other => {
                    return Err(PipelineError::InvalidMode {
                        command: "play",
                        mode: other.name(),
                    })
                }
            }
            let source = state.source.as_ref().ok_or_else(|| {
                PipelineError::Open("no clip open".to_string())
            })?;
            interval = tick_interval(source.frame_rate());
            state.set_mode(Mode::Playback { paused: false });
        }
        self.start_ticking(interval)
    }

    /// Pause playback on the current frame.
    pub fn pause(&mut self) -> Result<(), PipelineError> {
        {
            let state = self.lock()?;
            if state.mode != (Mode::Playback { paused: false }) {
                return Err(PipelineError::InvalidMode {
                    command: "pause",
                    mode: state.mode.name(),
                });
            }
        }
        self.scheduler.stop();
        let mut state = self.lock()?;
        // The clip may have ended while we were stopping the loop.
        if state.mode == (Mode::Playback { paused: false }) {
            state.set_mode(Mode::Playback { paused: true });
        }
        Ok(())
    }

    /// Jump to a frame. Bounds are checked before any state changes; a
    /// rejected seek leaves the session exactly as it was. Landing on a
    /// detection frame resumes playback when configured to.
    pub fn seek(&mut self, index: u64) -> Result<(), PipelineError> {
        {
            let state = self.lock()?;
            match state.mode {
                Mode::Playback { .. } => {}
                other => {
                    return Err(PipelineError::InvalidMode {
                        command: "seek",
                        mode: other.name(),
                    })
                }
            }
            let frame_count = state
                .source
                .as_ref()
                .and_then(|s| s.frame_count())
                .unwrap_or(0);
            if index >= frame_count {
                let e = PipelineError::Seek(format!(
                    "frame {} out of range (0..{})",
                    index, frame_count
                ));
                state.notify_error(&e);
                return Err(e);
            }
        }
        self.scheduler.stop();

        let interval;
        let resume;
        {
            let mut state = self.lock()?;
            match state.mode {
                Mode::Playback { .. } => {}
                other => {
                    return Err(PipelineError::InvalidMode {
                        command: "seek",
                        mode: other.name(),
                    })
                }
            }
            resume = state.timeline.contains(index) && state.config.auto_resume_on_detection;
            let Some(source) = state.source.as_mut() else {
                return Err(PipelineError::Seek("no clip open".to_string()));
            };
            source.seek(index)?;
            interval = tick_interval(source.frame_rate());
            if resume {
                debug!("seek to detection frame {}, resuming", index);
                state.set_mode(Mode::Playback { paused: false });
            } else {
                // Single redraw of the target frame, staying paused on it.
                let mut frame = source.read_next()?;
                source.seek(index)?;
                frame.set_index(index);
                for obs in &state.observers {
                    obs.on_frame(&frame);
                }
                state.set_mode(Mode::Playback { paused: true });
            }
        }
        if resume {
            self.start_ticking(interval)?;
        }
        Ok(())
    }

    /// Switch the active detector strategy. Takes effect on the next tick.
    pub fn set_detector(&mut self, name: &str) -> Result<(), PipelineError> {
        let mut state = self.lock()?;
        if !state.registry.contains(name) {
            return Err(PipelineError::DetectorFailure {
                strategy: name.to_string(),
                message: "unknown strategy".to_string(),
            });
        }
        state.config.detector.strategy = name.to_string();
        Ok(())
    }

    /// Events recorded on `date`, in timestamp order.
    pub fn query_events(&self, date: NaiveDate) -> Result<Vec<DetectionEvent>, PipelineError> {
        Ok(self.lock()?.store.query_by_date(date))
    }

    /// Dates with at least one detection.
    pub fn detection_dates(&self) -> Result<BTreeSet<NaiveDate>, PipelineError> {
        Ok(self.lock()?.store.detection_dates())
    }

    /// Write a session report under the storage directory.
    pub fn export_detections(&self) -> Result<PathBuf, PipelineError> {
        let state = self.lock()?;
        let dir = state.config.storage_dir.join("exports");
        state.store.export_report(&dir, state.session_start)
    }

    /// Jump to the next detection frame after the current position.
    pub fn seek_next_detection(&mut self) -> Result<(), PipelineError> {
        let target = {
            let state = self.lock()?;
            match state.mode {
                Mode::Playback { .. } => {}
                other => {
                    return Err(PipelineError::InvalidMode {
                        command: "seek_next_detection",
                        mode: other.name(),
                    })
                }
            }
            let position = state.source.as_ref().map(|s| s.position()).unwrap_or(0);
            state.timeline.next_after(position).ok_or_else(|| {
                PipelineError::Seek(format!("no detection after frame {}", position))
            })?
        };
        self.seek(target)
    }

    /// Jump to the last detection frame before the current position.
    pub fn seek_prev_detection(&mut self) -> Result<(), PipelineError> {
        let target = {
            let state = self.lock()?;
            match state.mode {
                Mode::Playback { .. } => {}
                other => {
                    return Err(PipelineError::InvalidMode {
                        command: "seek_prev_detection",
                        mode: other.name(),
                    })
                }
            }
            let position = state.source.as_ref().map(|s| s.position()).unwrap_or(0);
            state.timeline.prev_before(position).ok_or_else(|| {
                PipelineError::Seek(format!("no detection before frame {}", position))
            })?
        };
        self.seek(target)
    }

    /// Run an offline analysis pass over the most recently opened clip. The
    /// pipeline holds Analysis for the duration and returns to Idle after.
    pub fn run_analysis(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, PipelineError> {
        {
            let state = self.lock()?;
            if state.mode == Mode::Live {
                return Err(PipelineError::InvalidMode {
                    command: "run_analysis",
                    mode: state.mode.name(),
                });
            }
        }
        self.scheduler.stop();

        let mut state = self.lock()?;
        let path = match state.last_file.clone() {
            Some(path) => path,
            None => {
                return Err(PipelineError::InvalidMode {
                    command: "run_analysis",
                    mode: state.mode.name(),
                })
            }
        };
        state.source = None;
        state.set_mode(Mode::Analysis);

        // Fresh handle so playback position never leaks into the pass.
        let mut source = match FileSource::open(&path) {
            Ok(source) => source,
            Err(e) => {
                state.notify_error(&e);
                state.set_mode(Mode::Idle);
                return Err(e);
            }
        };
        let params = AnalysisParams {
            strategy: state.config.detector.strategy.clone(),
            detector: DetectorConfig {
                annotate: false,
                ..state.detector_config()
            },
            stride: state.config.analysis.stride,
            motion_threshold: state.config.analysis.motion_threshold,
        };
        let result = analysis::analyze(&mut source, &mut state.registry, &params, cancel);
        if let Err(e) = &result {
            state.notify_error(e);
        }
        state.set_mode(Mode::Idle);
        result
    }
}

impl Drop for SessionPipeline {
    fn drop(&mut self) {
        self.scheduler.stop();
        if let Ok(mut state) = self.inner.lock() {
            if state.mode != Mode::Idle {
                state.finish_session();
            }
        }
    }
}

/// Detection marks replayed on a known detection frame, reconstructed from
/// the stored event's label counts. Geometry is not persisted, so each mark
/// covers the whole frame.
fn timeline_marks(event: &DetectionEvent) -> Vec<Detection> {
    let mut marks = Vec::new();
    for (label, &count) in &event.label_counts {
        for _ in 0..count {
            marks.push(Detection {
                label: label.clone(),
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
                confidence: 1.0,
            });
        }
    }
    marks
}

/// Tick interval for a target rate, floored at ~30Hz worth of latency so a
/// wild fps claim cannot spin the loop.
fn tick_interval(fps: f64) -> Duration {
    let millis = if fps > 0.0 { (1000.0 / fps) as u64 } else { 1000 };
    Duration::from_millis(millis.max(33))
}
