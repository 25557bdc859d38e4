//! Session recorder.
//!
//! Writes raw luma frames into a private container: one JSON header line,
//! then a little-endian u32 length prefix per frame. The file name carries a
//! local wall-clock stamp so recordings sort chronologically in a directory
//! listing.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;
use log::info;
use serde_json::json;

use crate::error::PipelineError;
use crate::frame::Frame;

/// Upper bound on the frame rate written into the header. Sources can claim
/// more; recordings never do.
const MAX_RECORD_FPS: f64 = 30.0;

pub struct Recorder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl Recorder {
    /// Create the output directory if needed and open a fresh recording.
    pub fn start(
        dir: &std::path::Path,
        ext: &str,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, PipelineError> {
        fs::create_dir_all(dir)
            .map_err(|e| PipelineError::Recorder(format!("{}: {}", dir.display(), e)))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("recording_{}.{}", stamp, ext));
        let file = File::create(&path)
            .map_err(|e| PipelineError::Recorder(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);

        let fps = fps.clamp(1.0, MAX_RECORD_FPS);
        let header = json!({
            "format": "vigil-recording",
            "version": 1,
            "width": width,
            "height": height,
            "fps": fps,
        });
        writer
            .write_all(header.to_string().as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| PipelineError::Recorder(format!("{}: {}", path.display(), e)))?;

        info!("recording started: {}", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            width,
            height,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one frame. Geometry must match the header; a source that
    /// changes resolution mid-recording is a hard error.
    pub fn write(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Recorder("recorder already stopped".to_string()))?;
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PipelineError::Recorder(format!(
                "frame geometry {}x{} does not match recording {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let len = frame.data().len() as u32;
        writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| writer.write_all(frame.data()))
            .map_err(|e| PipelineError::Recorder(format!("{}: {}", self.path.display(), e)))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flush and close. Any later `write` fails loudly instead of silently
    /// dropping frames.
    pub fn stop(&mut self) -> Result<PathBuf, PipelineError> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| PipelineError::Recorder("recorder already stopped".to_string()))?;
        writer
            .flush()
            .map_err(|e| PipelineError::Recorder(format!("{}: {}", self.path.display(), e)))?;
        info!(
            "recording stopped: {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureSource, FileSource};

    #[test]
    fn recorder_output_plays_back_through_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(dir.path(), "vr", 16, 16, 30.0).unwrap();
        for i in 0..5u8 {
            rec.write(&Frame::new(vec![i; 256], 16, 16)).unwrap();
        }
        let path = rec.stop().unwrap();

        let mut src = FileSource::open(path.to_str().unwrap()).unwrap();
        assert_eq!(src.frame_count(), Some(5));
        assert_eq!(src.frame_rate(), 30.0);
        for i in 0..5u8 {
            let f = src.read_next().unwrap();
            assert_eq!(f.data()[0], i);
        }
        assert!(matches!(src.read_next(), Err(PipelineError::EndOfStream)));
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(dir.path(), "vr", 16, 16, 30.0).unwrap();
        let err = rec.write(&Frame::new(vec![0; 64], 8, 8)).unwrap_err();
        assert!(matches!(err, PipelineError::Recorder(_)));
    }

    #[test]
    fn write_after_stop_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(dir.path(), "vr", 16, 16, 30.0).unwrap();
        rec.stop().unwrap();
        assert!(rec.write(&Frame::new(vec![0; 256], 16, 16)).is_err());
        assert!(rec.stop().is_err());
    }

    #[test]
    fn header_fps_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(dir.path(), "vr", 8, 8, 120.0).unwrap();
        rec.write(&Frame::new(vec![0; 64], 8, 8)).unwrap();
        let path = rec.stop().unwrap();
        let src = FileSource::open(path.to_str().unwrap()).unwrap();
        assert_eq!(src.frame_rate(), 30.0);
    }
}
