//! Live device source.
//!
//! Forward-only: no frame count, no seeking. The synthetic backend never
//! runs dry, which matches a camera that keeps producing until the session
//! stops it.

use super::{CaptureSource, StubSpec};
use crate::error::PipelineError;
use crate::frame::Frame;

pub struct LiveSource {
    spec: StubSpec,
    next: u64,
}

impl LiveSource {
    /// Open a live device by `stub://` URL. Fail-fast: a bad URL never
    /// produces a half-open source.
    pub fn open(url: &str) -> Result<Self, PipelineError> {
        let spec = StubSpec::parse(url)?;
        Ok(Self { spec, next: 0 })
    }
}

impl CaptureSource for LiveSource {
    fn describe(&self) -> String {
        format!("live device '{}'", self.spec.name)
    }

    fn read_next(&mut self) -> Result<Frame, PipelineError> {
        let frame = self.spec.render(self.next);
        self.next += 1;
        Ok(frame)
    }

    fn frame_rate(&self) -> f64 {
        self.spec.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.spec.width, self.spec.height)
    }

    fn position(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_source_is_forward_only() {
        let mut src = LiveSource::open("stub://cam0?w=16&h=16").unwrap();
        assert!(!src.is_seekable());
        assert_eq!(src.frame_count(), None);
        assert!(matches!(src.seek(0), Err(PipelineError::Seek(_))));
        src.read_next().unwrap();
        assert_eq!(src.position(), 1);
    }

    #[test]
    fn bad_device_url_is_an_open_error() {
        assert!(matches!(
            LiveSource::open("v4l2:///dev/video0"),
            Err(PipelineError::Open(_))
        ));
    }
}
