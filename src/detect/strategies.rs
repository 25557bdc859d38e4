//! Concrete detection strategies.
//!
//! None of these run a real model; they satisfy the strategy contract with
//! deterministic pixel statistics so the pipeline around them can be exercised
//! end to end. A real backend slots in by implementing `DetectorStrategy`.

use anyhow::{anyhow, Result};

use super::strategy::{Detection, DetectorConfig, DetectorStrategy};
use crate::frame::Frame;

const GRID: u32 = 4;

/// Motion detector: hashes the frame to skip unchanged content, then compares
/// per-cell mean luma against the previous frame and reports one box covering
/// the changed cells.
pub struct MotionDetector {
    last_hash: Option<[u8; 32]>,
    last_cells: Option<Vec<f32>>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self {
            last_hash: None,
            last_cells: None,
        }
    }

    fn cells(frame: &Frame) -> Vec<f32> {
        let cw = (frame.width() / GRID).max(1);
        let ch = (frame.height() / GRID).max(1);
        let mut out = Vec::with_capacity((GRID * GRID) as usize);
        for gy in 0..GRID {
            for gx in 0..GRID {
                out.push(frame.cell_mean(gx * cw, gy * ch, cw, ch));
            }
        }
        out
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorStrategy for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame, config: &DetectorConfig) -> Result<Vec<Detection>> {
        let hash = frame.content_hash();
        let cells = Self::cells(frame);

        let result = match (&self.last_hash, &self.last_cells) {
            (Some(prev_hash), Some(prev_cells)) if *prev_hash != hash => {
                // Higher sensitivity lowers the per-cell delta needed.
                let threshold = 26.0 - config.sensitivity as f32 * 2.0;
                let mut min_gx = GRID;
                let mut min_gy = GRID;
                let mut max_gx = 0u32;
                let mut max_gy = 0u32;
                let mut changed = 0u32;
                for (i, (cur, prev)) in cells.iter().zip(prev_cells.iter()).enumerate() {
                    if (cur - prev).abs() > threshold {
                        let gx = i as u32 % GRID;
                        let gy = i as u32 / GRID;
                        min_gx = min_gx.min(gx);
                        min_gy = min_gy.min(gy);
                        max_gx = max_gx.max(gx);
                        max_gy = max_gy.max(gy);
                        changed += 1;
                    }
                }
                if changed > 0 {
                    let step = 1.0 / GRID as f32;
                    vec![Detection {
                        label: "motion".to_string(),
                        x: min_gx as f32 * step,
                        y: min_gy as f32 * step,
                        w: (max_gx - min_gx + 1) as f32 * step,
                        h: (max_gy - min_gy + 1) as f32 * step,
                        confidence: (0.5 + changed as f32 / (GRID * GRID) as f32).min(1.0),
                    }]
                } else {
                    vec![]
                }
            }
            _ => vec![],
        };

        self.last_hash = Some(hash);
        self.last_cells = Some(cells);
        Ok(result)
    }
}

/// Brightness-blob detector: flags grid cells whose mean luma clears a
/// sensitivity-scaled threshold.
pub struct LumaBlobDetector {
    label: &'static str,
}

impl LumaBlobDetector {
    pub fn new() -> Self {
        Self { label: "object" }
    }
}

impl Default for LumaBlobDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorStrategy for LumaBlobDetector {
    fn name(&self) -> &'static str {
        "object"
    }

    fn detect(&mut self, frame: &Frame, config: &DetectorConfig) -> Result<Vec<Detection>> {
        let threshold = 250.0 - config.sensitivity as f32 * 5.0;
        let cw = (frame.width() / GRID).max(1);
        let ch = (frame.height() / GRID).max(1);
        let step = 1.0 / GRID as f32;

        let mut out = Vec::new();
        for gy in 0..GRID {
            for gx in 0..GRID {
                let mean = frame.cell_mean(gx * cw, gy * ch, cw, ch);
                if mean > threshold {
                    out.push(Detection {
                        label: self.label.to_string(),
                        x: gx as f32 * step,
                        y: gy as f32 * step,
                        w: step,
                        h: step,
                        confidence: (mean / 255.0).min(1.0),
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Test fixture: yields a scripted detection list on every frame, or fails on
/// demand to exercise the pipeline's failure containment.
pub struct FixedDetector {
    name: &'static str,
    detections: Vec<Detection>,
    fail: bool,
}

impl FixedDetector {
    pub fn yielding(name: &'static str, detections: Vec<Detection>) -> Self {
        Self {
            name,
            detections,
            fail: false,
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            detections: vec![],
            fail: true,
        }
    }

    /// Convenience: one centered detection with the given label.
    pub fn one(name: &'static str, label: &str) -> Self {
        Self::yielding(
            name,
            vec![Detection {
                label: label.to_string(),
                x: 0.25,
                y: 0.25,
                w: 0.5,
                h: 0.5,
                confidence: 0.9,
            }],
        )
    }
}

impl DetectorStrategy for FixedDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, _frame: &Frame, _config: &DetectorConfig) -> Result<Vec<Detection>> {
        if self.fail {
            return Err(anyhow!("scripted failure"));
        }
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> Frame {
        Frame::new(vec![value; 64 * 64], 64, 64)
    }

    #[test]
    fn motion_silent_on_first_frame() {
        let mut det = MotionDetector::new();
        let out = det.detect(&flat(10), &DetectorConfig::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn motion_reports_changed_frame_then_settles() {
        let mut det = MotionDetector::new();
        let cfg = DetectorConfig::default();
        det.detect(&flat(10), &cfg).unwrap();
        let moved = det.detect(&flat(200), &cfg).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].label, "motion");
        let settled = det.detect(&flat(200), &cfg).unwrap();
        assert!(settled.is_empty());
    }

    #[test]
    fn luma_blob_finds_bright_cells() {
        let mut det = LumaBlobDetector::new();
        let mut data = vec![0u8; 64 * 64];
        // Light up the top-left quadrant cell.
        for y in 0..16 {
            for x in 0..16 {
                data[y * 64 + x] = 255;
            }
        }
        let frame = Frame::new(data, 64, 64);
        let out = det.detect(&frame, &DetectorConfig::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].x, 0.0);
        assert_eq!(out[0].y, 0.0);
    }
}
