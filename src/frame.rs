//! Frame container.
//!
//! A `Frame` is a single-channel (luma) pixel buffer plus the sequence number
//! the pipeline assigned to it. Sources produce frames without an index; the
//! pipeline stamps `frame_index` so monotonicity is owned in exactly one
//! place. Detectors only ever read a frame; annotation happens on a copy.

use sha2::{Digest, Sha256};

use crate::detect::Detection;

#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: u64,
}

impl Frame {
    /// Create a frame from raw luma bytes. Called by capture sources; the
    /// index is assigned later by the pipeline.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            data,
            width,
            height,
            index: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    /// Content hash of the pixel data. Cheap change detection for the motion
    /// strategy.
    pub fn content_hash(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }

    /// Mean luma over the whole frame.
    pub fn mean_luma(&self) -> f32 {
        self.cell_mean(0, 0, self.width, self.height)
    }

    /// Mean luma over a rectangular cell given in pixel coordinates. The cell
    /// is clamped to the frame.
    pub fn cell_mean(&self, x0: u32, y0: u32, w: u32, h: u32) -> f32 {
        let x1 = (x0 + w).min(self.width);
        let y1 = (y0 + h).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return 0.0;
        }
        let mut sum = 0u64;
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            for x in x0..x1 {
                sum += self.data[row + x as usize] as u64;
            }
        }
        sum as f32 / ((x1 - x0) * (y1 - y0)) as f32
    }

    /// Mean absolute per-pixel difference against another frame of the same
    /// geometry, in luma units (0..255). Used for analysis motion segments.
    pub fn pixel_delta(&self, other: &Frame) -> f32 {
        if self.data.len() != other.data.len() || self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        sum as f32 / self.data.len() as f32
    }

    /// Draw a detection box outline into this frame. Only ever called on a
    /// copy by the registry's annotation path; raw frames handed to the
    /// recorder stay untouched.
    pub fn draw_box(&mut self, det: &Detection) {
        let x0 = ((det.x * self.width as f32) as i64).clamp(0, self.width as i64 - 1) as u32;
        let y0 = ((det.y * self.height as f32) as i64).clamp(0, self.height as i64 - 1) as u32;
        let x1 = (((det.x + det.w) * self.width as f32) as i64)
            .clamp(x0 as i64, self.width as i64 - 1) as u32;
        let y1 = (((det.y + det.h) * self.height as f32) as i64)
            .clamp(y0 as i64, self.height as i64 - 1) as u32;

        for x in x0..=x1 {
            self.put(x, y0, 255);
            self.put(x, y1, 255);
        }
        for y in y0..=y1 {
            self.put(x0, y, 255);
            self.put(x1, y, 255);
        }
    }

    fn put(&mut self, x: u32, y: u32, value: u8) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8, w: u32, h: u32) -> Frame {
        Frame::new(vec![value; (w * h) as usize], w, h)
    }

    #[test]
    fn pixel_delta_measures_mean_difference() {
        let a = flat(10, 8, 8);
        let b = flat(30, 8, 8);
        assert_eq!(a.pixel_delta(&b), 20.0);
        assert_eq!(a.pixel_delta(&a), 0.0);
    }

    #[test]
    fn cell_mean_clamps_to_frame() {
        let f = flat(100, 4, 4);
        assert_eq!(f.mean_luma(), 100.0);
        assert_eq!(f.cell_mean(0, 0, 4, 4), 100.0);
        assert_eq!(f.cell_mean(2, 2, 10, 10), 100.0);
        assert_eq!(f.cell_mean(4, 4, 2, 2), 0.0);
    }

    #[test]
    fn draw_box_marks_copy_not_source() {
        let src = flat(0, 16, 16);
        let mut copy = src.clone();
        copy.draw_box(&Detection {
            label: "object".into(),
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence: 0.9,
        });
        assert!(src.data().iter().all(|&p| p == 0));
        assert!(copy.data().iter().any(|&p| p == 255));
    }

    #[test]
    fn draw_box_tolerates_out_of_range_geometry() {
        let mut f = flat(0, 8, 8);
        f.draw_box(&Detection {
            label: "object".into(),
            x: 0.9,
            y: 0.9,
            w: 0.5,
            h: 0.5,
            confidence: 1.0,
        });
        // No panic; edge pixels touched at most.
        assert_eq!(f.width(), 8);
    }
}
