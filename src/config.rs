use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_STORAGE_DIR: &str = "recordings";
const DEFAULT_STORE_PATH: &str = "detections.json";
const DEFAULT_RECORDING_EXT: &str = "vr";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_DETECTOR: &str = "motion";
const DEFAULT_SENSITIVITY: u8 = 5;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_ANALYSIS_STRIDE: u64 = 10;
const DEFAULT_MOTION_THRESHOLD: f32 = 12.0;
const DEFAULT_FLUSH_EVERY: u32 = 10;

#[derive(Debug, Deserialize, Default)]
struct ConsoleConfigFile {
    storage_dir: Option<PathBuf>,
    store_path: Option<PathBuf>,
    recording_ext: Option<String>,
    target_fps: Option<u32>,
    detector: Option<DetectorConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    auto_resume_on_detection: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    strategy: Option<String>,
    sensitivity: Option<u8>,
    confidence_threshold: Option<f32>,
    flush_every: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    stride: Option<u64>,
    motion_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Directory recordings and exported reports land in.
    pub storage_dir: PathBuf,
    /// Path of the detection event document.
    pub store_path: PathBuf,
    pub recording_ext: String,
    pub target_fps: u32,
    pub detector: DetectorSettings,
    pub analysis: AnalysisSettings,
    /// When a seek lands on a detection frame, resume playback instead of
    /// pausing on it.
    pub auto_resume_on_detection: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub strategy: String,
    pub sensitivity: u8,
    pub confidence_threshold: f32,
    /// Flush the event store after this many new events.
    pub flush_every: u32,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub stride: u64,
    pub motion_threshold: f32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            recording_ext: DEFAULT_RECORDING_EXT.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            detector: DetectorSettings {
                strategy: DEFAULT_DETECTOR.to_string(),
                sensitivity: DEFAULT_SENSITIVITY,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                flush_every: DEFAULT_FLUSH_EVERY,
            },
            analysis: AnalysisSettings {
                stride: DEFAULT_ANALYSIS_STRIDE,
                motion_threshold: DEFAULT_MOTION_THRESHOLD,
            },
            auto_resume_on_detection: true,
        }
    }
}

impl ConsoleConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConsoleConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            storage_dir: file.storage_dir.unwrap_or(defaults.storage_dir),
            store_path: file.store_path.unwrap_or(defaults.store_path),
            recording_ext: file.recording_ext.unwrap_or(defaults.recording_ext),
            target_fps: file.target_fps.unwrap_or(defaults.target_fps),
            detector: DetectorSettings {
                strategy: file
                    .detector
                    .as_ref()
                    .and_then(|d| d.strategy.clone())
                    .unwrap_or(defaults.detector.strategy),
                sensitivity: file
                    .detector
                    .as_ref()
                    .and_then(|d| d.sensitivity)
                    .unwrap_or(defaults.detector.sensitivity),
                confidence_threshold: file
                    .detector
                    .as_ref()
                    .and_then(|d| d.confidence_threshold)
                    .unwrap_or(defaults.detector.confidence_threshold),
                flush_every: file
                    .detector
                    .as_ref()
                    .and_then(|d| d.flush_every)
                    .unwrap_or(defaults.detector.flush_every),
            },
            analysis: AnalysisSettings {
                stride: file
                    .analysis
                    .as_ref()
                    .and_then(|a| a.stride)
                    .unwrap_or(defaults.analysis.stride),
                motion_threshold: file
                    .analysis
                    .as_ref()
                    .and_then(|a| a.motion_threshold)
                    .unwrap_or(defaults.analysis.motion_threshold),
            },
            auto_resume_on_detection: file
                .auto_resume_on_detection
                .unwrap_or(defaults.auto_resume_on_detection),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("VIGIL_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                self.storage_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("VIGIL_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store_path = PathBuf::from(path);
            }
        }
        if let Ok(detector) = std::env::var("VIGIL_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detector.strategy = detector;
            }
        }
        if let Ok(fps) = std::env::var("VIGIL_TARGET_FPS") {
            self.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("VIGIL_TARGET_FPS must be an integer"))?;
        }
        if let Ok(sensitivity) = std::env::var("VIGIL_SENSITIVITY") {
            self.detector.sensitivity = sensitivity
                .parse()
                .map_err(|_| anyhow!("VIGIL_SENSITIVITY must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if !(1..=10).contains(&self.detector.sensitivity) {
            return Err(anyhow!("detector sensitivity must be in 1..=10"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be in 0.0..=1.0"));
        }
        if self.detector.flush_every == 0 {
            return Err(anyhow!("flush_every must be greater than zero"));
        }
        if self.analysis.stride == 0 {
            return Err(anyhow!("analysis stride must be greater than zero"));
        }
        if self.recording_ext.trim().is_empty() {
            return Err(anyhow!("recording_ext must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConsoleConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
