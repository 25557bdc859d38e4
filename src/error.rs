//! Pipeline error taxonomy.
//!
//! Every failure the session pipeline can surface maps onto one of these
//! variants. `kind()` is the stable string carried by `error(kind, message)`
//! notifications, so observers can match on it without parsing messages.

use std::fmt;

#[derive(Clone, Debug)]
pub enum PipelineError {
    /// Device or file could not be opened. The pipeline stays Idle.
    Open(String),
    /// Reading the next frame failed mid-stream.
    Read(String),
    /// Seekable source ran out of frames. Normal terminal condition in
    /// Playback, an error in Live.
    EndOfStream,
    /// Seek target rejected (out of range, or source not seekable).
    Seek(String),
    /// Recorder failed to start or write. Recording aborts; the frame loop
    /// keeps running without it.
    Recorder(String),
    /// A detector strategy failed on one frame. Treated as zero detections.
    DetectorFailure { strategy: String, message: String },
    /// Event store load/save failure. In-memory state stays authoritative.
    Persistence(String),
    /// Command not valid in the current mode. No state change.
    InvalidMode {
        command: &'static str,
        mode: &'static str,
    },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Open(_) => "OpenError",
            PipelineError::Read(_) => "ReadError",
            PipelineError::EndOfStream => "EndOfStream",
            PipelineError::Seek(_) => "SeekError",
            PipelineError::Recorder(_) => "RecorderError",
            PipelineError::DetectorFailure { .. } => "DetectorFailure",
            PipelineError::Persistence(_) => "PersistenceError",
            PipelineError::InvalidMode { .. } => "InvalidModeError",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Open(msg) => write!(f, "open failed: {}", msg),
            PipelineError::Read(msg) => write!(f, "read failed: {}", msg),
            PipelineError::EndOfStream => write!(f, "end of stream"),
            PipelineError::Seek(msg) => write!(f, "seek rejected: {}", msg),
            PipelineError::Recorder(msg) => write!(f, "recorder: {}", msg),
            PipelineError::DetectorFailure { strategy, message } => {
                write!(f, "detector '{}' failed: {}", strategy, message)
            }
            PipelineError::Persistence(msg) => write!(f, "persistence: {}", msg),
            PipelineError::InvalidMode { command, mode } => {
                write!(f, "'{}' not valid in {} mode", command, mode)
            }
        }
    }
}

impl std::error::Error for PipelineError {}
