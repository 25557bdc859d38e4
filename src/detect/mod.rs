mod registry;
mod strategies;
mod strategy;

pub use registry::{DetectorOutput, DetectorRegistry, ALL_OBJECTS};
pub use strategies::{FixedDetector, LumaBlobDetector, MotionDetector};
pub use strategy::{Detection, DetectorConfig, DetectorStrategy};
