//! Detector registry.
//!
//! Strategies are registered in a declared order and constructed lazily on
//! first use. The compound `all-objects` strategy is the concatenation of
//! every registered strategy's output in registration order, which keeps
//! compound results reproducible.

use anyhow::{anyhow, Result};

use super::strategies::{LumaBlobDetector, MotionDetector};
use super::strategy::{Detection, DetectorConfig, DetectorStrategy};
use crate::frame::Frame;

/// Name of the compound strategy that unions every registered strategy.
pub const ALL_OBJECTS: &str = "all-objects";

type StrategyBuilder = Box<dyn Fn() -> Box<dyn DetectorStrategy> + Send>;

struct Registered {
    name: String,
    build: StrategyBuilder,
    instance: Option<Box<dyn DetectorStrategy>>,
}

#[derive(Debug, Default, Clone)]
pub struct DetectorOutput {
    pub detections: Vec<Detection>,
    /// Present only when `config.annotate` was set and the frame yielded
    /// detections. Always a copy; the input frame is never mutated.
    pub annotated: Option<Frame>,
}

pub struct DetectorRegistry {
    strategies: Vec<Registered>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry with the built-in strategies, in their declared compound
    /// order: motion first, then the object blob detector.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("motion", || Box::new(MotionDetector::new()));
        registry.register("object", || Box::new(LumaBlobDetector::new()));
        registry
    }

    /// Register a strategy under `name`. The builder runs on first use, so
    /// heavyweight strategies cost nothing until selected.
    pub fn register<F>(&mut self, name: &str, build: F)
    where
        F: Fn() -> Box<dyn DetectorStrategy> + Send + 'static,
    {
        self.strategies.push(Registered {
            name: name.to_string(),
            build: Box::new(build),
            instance: None,
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        name == ALL_OBJECTS || self.strategies.iter().any(|s| s.name == name)
    }

    /// Registered strategy names in declared order, compound last.
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.strategies.iter().map(|s| s.name.clone()).collect();
        out.push(ALL_OBJECTS.to_string());
        out
    }

    /// Run the named strategy (or the compound union) over one frame.
    ///
    /// Output boxes are normalized and filtered by the confidence threshold.
    /// When `config.annotate` is set and anything was detected, an annotated
    /// copy of the frame is returned alongside.
    pub fn detect(
        &mut self,
        name: &str,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> Result<DetectorOutput> {
        let mut detections = Vec::new();

        if name == ALL_OBJECTS {
            for i in 0..self.strategies.len() {
                detections.extend(self.run_at(i, frame, config)?);
            }
        } else {
            let idx = self
                .strategies
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| anyhow!("unknown detector strategy '{}'", name))?;
            detections = self.run_at(idx, frame, config)?;
        }

        let detections: Vec<Detection> = detections
            .into_iter()
            .map(Detection::normalized)
            .filter(|d| d.confidence >= config.confidence_threshold)
            .collect();

        let annotated = if config.annotate && !detections.is_empty() {
            let mut copy = frame.clone();
            for det in &detections {
                copy.draw_box(det);
            }
            Some(copy)
        } else {
            None
        };

        Ok(DetectorOutput {
            detections,
            annotated,
        })
    }

    fn run_at(
        &mut self,
        idx: usize,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> Result<Vec<Detection>> {
        let entry = &mut self.strategies[idx];
        let instance = entry.instance.get_or_insert_with(|| (entry.build)());
        instance.detect(frame, config)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
