use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// One detected object. Box coordinates are normalized to [0,1] relative to
/// the frame, so display geometry stays decoupled from detection geometry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

impl Detection {
    /// Clamp geometry into [0,1] and confidence into [0,1].
    pub(crate) fn normalized(mut self) -> Self {
        self.x = self.x.clamp(0.0, 1.0);
        self.y = self.y.clamp(0.0, 1.0);
        self.w = self.w.clamp(0.0, 1.0 - self.x);
        self.h = self.h.clamp(0.0, 1.0 - self.y);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Per-strategy tuning shared by all strategies.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// 1 (least sensitive) ..= 10 (most sensitive).
    pub sensitivity: u8,
    /// Detections below this confidence are dropped by the registry.
    pub confidence_threshold: f32,
    /// When true the registry returns an annotated copy of the frame with
    /// box outlines drawn in. The source frame is never touched.
    pub annotate: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 5,
            confidence_threshold: 0.5,
            annotate: false,
        }
    }
}

/// Detection strategy trait.
///
/// Implementations must treat the frame as read-only. Per-frame state (the
/// previous frame's content, say) is fine; strategies are invoked strictly in
/// frame order by a single loop.
pub trait DetectorStrategy: Send {
    /// Strategy identifier, unique within a registry.
    fn name(&self) -> &'static str;

    /// Run detection on one frame. Errors are contained by the pipeline: a
    /// failing frame counts as zero detections and the loop continues.
    fn detect(&mut self, frame: &Frame, config: &DetectorConfig) -> Result<Vec<Detection>>;
}
