//! Capture sources.
//!
//! A capture source hands raw frames to the pipeline. Live devices are
//! forward-only; opened files are seekable with a known frame count. Both
//! are behind one trait so the tick loop never branches on the source kind
//! beyond what `is_seekable` exposes.
//!
//! Synthetic `stub://` sources stand in for real devices and decoders. They
//! generate deterministic frames, which keeps every downstream stage
//! testable without hardware.

mod file;
mod live;

pub use file::FileSource;
pub use live::LiveSource;

use crate::error::PipelineError;
use crate::frame::Frame;

pub trait CaptureSource: Send {
    /// Human-readable identity, for logs and observer notifications.
    fn describe(&self) -> String;

    /// Produce the next frame. `EndOfStream` from a seekable source is the
    /// normal terminal condition; any other error is a mid-stream failure.
    fn read_next(&mut self) -> Result<Frame, PipelineError>;

    fn is_seekable(&self) -> bool {
        false
    }

    /// Total frames, known only for seekable sources.
    fn frame_count(&self) -> Option<u64> {
        None
    }

    fn frame_rate(&self) -> f64;

    /// Pixel geometry of the frames this source produces.
    fn frame_size(&self) -> (u32, u32);

    /// Reposition so the next `read_next` returns frame `index`. Bounds are
    /// checked before any state changes.
    fn seek(&mut self, _index: u64) -> Result<(), PipelineError> {
        Err(PipelineError::Seek("source is not seekable".to_string()))
    }

    /// Index of the next frame `read_next` would return.
    fn position(&self) -> u64;
}

/// Largest accepted stub frame edge. Keeps `w * h` buffers well inside
/// addressable range no matter what the URL claims.
const MAX_STUB_DIM: u32 = 4096;

/// Parsed `stub://name?frames=N&fps=F&w=W&h=H` URL.
#[derive(Clone, Debug)]
pub(crate) struct StubSpec {
    pub name: String,
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl StubSpec {
    pub fn parse(url: &str) -> Result<Self, PipelineError> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| PipelineError::Open(format!("not a stub url: {}", url)))?;

        let (name, query) = match rest.split_once('?') {
            Some((n, q)) => (n, q),
            None => (rest, ""),
        };
        if name.is_empty() {
            return Err(PipelineError::Open("stub url missing a name".to_string()));
        }

        let mut spec = Self {
            name: name.to_string(),
            frames: 300,
            fps: 30.0,
            width: 64,
            height: 64,
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| PipelineError::Open(format!("malformed stub param '{}'", pair)))?;
            match key {
                "frames" => {
                    spec.frames = value
                        .parse()
                        .map_err(|_| bad_param(key, value))?;
                }
                "fps" => {
                    spec.fps = value
                        .parse()
                        .map_err(|_| bad_param(key, value))?;
                }
                "w" => {
                    spec.width = value
                        .parse()
                        .map_err(|_| bad_param(key, value))?;
                }
                "h" => {
                    spec.height = value
                        .parse()
                        .map_err(|_| bad_param(key, value))?;
                }
                _ => {
                    return Err(PipelineError::Open(format!(
                        "unknown stub param '{}'",
                        key
                    )))
                }
            }
        }
        if spec.fps <= 0.0 || spec.width == 0 || spec.height == 0 {
            return Err(PipelineError::Open(format!(
                "degenerate stub source: {}",
                url
            )));
        }
        if spec.width > MAX_STUB_DIM || spec.height > MAX_STUB_DIM {
            return Err(PipelineError::Open(format!(
                "stub frame {}x{} exceeds {}x{}",
                spec.width, spec.height, MAX_STUB_DIM, MAX_STUB_DIM
            )));
        }
        Ok(spec)
    }

    /// Deterministic frame `n` of this stream: a dark field with one bright
    /// square that drifts across the grid, so motion and blob strategies both
    /// have something to find.
    pub fn render(&self, n: u64) -> Frame {
        let mut data = vec![16u8; self.width as usize * self.height as usize];
        let block = (self.width / 4).max(1);
        let x0 = ((n % 4) as u32) * block;
        let y0 = (((n / 4) % 4) as u32) * (self.height / 4).max(1);
        for y in y0..(y0 + block).min(self.height) {
            for x in x0..(x0 + block).min(self.width) {
                data[y as usize * self.width as usize + x as usize] = 255;
            }
        }
        Frame::new(data, self.width, self.height)
    }
}

fn bad_param(key: &str, value: &str) -> PipelineError {
    PipelineError::Open(format!("bad stub param '{}={}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_url_parses_with_defaults() {
        let spec = StubSpec::parse("stub://cam0").unwrap();
        assert_eq!(spec.name, "cam0");
        assert_eq!(spec.frames, 300);
        assert_eq!(spec.fps, 30.0);
    }

    #[test]
    fn stub_url_parses_overrides() {
        let spec = StubSpec::parse("stub://clip?frames=90&fps=15&w=32&h=24").unwrap();
        assert_eq!(spec.frames, 90);
        assert_eq!(spec.fps, 15.0);
        assert_eq!(spec.width, 32);
        assert_eq!(spec.height, 24);
    }

    #[test]
    fn stub_url_rejects_garbage() {
        assert!(StubSpec::parse("rtsp://cam0").is_err());
        assert!(StubSpec::parse("stub://").is_err());
        assert!(StubSpec::parse("stub://c?frames=lots").is_err());
        assert!(StubSpec::parse("stub://c?zoom=2").is_err());
    }

    #[test]
    fn stub_url_rejects_oversized_frames() {
        assert!(StubSpec::parse("stub://c?w=65536&h=65536").is_err());
        assert!(StubSpec::parse("stub://c?w=4097").is_err());
        assert!(StubSpec::parse("stub://c?w=4096&h=4096").is_ok());
    }

    #[test]
    fn render_moves_the_bright_block() {
        let spec = StubSpec::parse("stub://c?w=64&h=64").unwrap();
        let a = spec.render(0);
        let b = spec.render(1);
        assert!(a.pixel_delta(&b) > 0.0);
        assert_eq!(a.content_hash(), spec.render(0).content_hash());
    }
}
