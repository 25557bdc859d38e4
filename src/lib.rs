//! vigil: a surveillance session pipeline.
//!
//! The pipeline runs one session at a time: a live device feed with optional
//! recording, seekable playback of a saved clip, or an offline analysis pass.
//! Detections flow into an append-only, date-indexed event store; a timeline
//! index over the open clip drives seek-to-detection navigation. Frontends
//! attach through [`session::PipelineObserver`] and drive the pipeline with
//! commands; they never touch frames, sources or storage directly.

pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod record;
pub mod session;
pub mod store;

pub use capture::{CaptureSource, FileSource, LiveSource};
pub use config::ConsoleConfig;
pub use detect::{Detection, DetectorConfig, DetectorRegistry, DetectorStrategy, ALL_OBJECTS};
pub use error::PipelineError;
pub use frame::Frame;
pub use record::Recorder;
pub use session::{
    AnalysisOutcome, AnalysisReport, CancelToken, Mode, PipelineObserver, SessionPipeline,
};
pub use store::{DetectionEvent, EventStore, TimelineIndex};
