use std::sync::Mutex;

use tempfile::NamedTempFile;

use vigil::config::ConsoleConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_STORAGE_DIR",
        "VIGIL_STORE_PATH",
        "VIGIL_DETECTOR",
        "VIGIL_TARGET_FPS",
        "VIGIL_SENSITIVITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ConsoleConfig::load().expect("load config");
    assert_eq!(cfg.storage_dir.to_str(), Some("recordings"));
    assert_eq!(cfg.store_path.to_str(), Some("detections.json"));
    assert_eq!(cfg.recording_ext, "vr");
    assert_eq!(cfg.target_fps, 30);
    assert_eq!(cfg.detector.strategy, "motion");
    assert_eq!(cfg.detector.sensitivity, 5);
    assert_eq!(cfg.detector.flush_every, 10);
    assert_eq!(cfg.analysis.stride, 10);
    assert!(cfg.auto_resume_on_detection);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "storage_dir": "/var/lib/vigil/recordings",
        "store_path": "/var/lib/vigil/detections.json",
        "target_fps": 15,
        "detector": {
            "strategy": "object",
            "sensitivity": 8,
            "confidence_threshold": 0.7,
            "flush_every": 5
        },
        "analysis": {
            "stride": 25,
            "motion_threshold": 20.0
        },
        "auto_resume_on_detection": false
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_DETECTOR", "all-objects");
    std::env::set_var("VIGIL_TARGET_FPS", "20");

    let cfg = ConsoleConfig::load().expect("load config");
    assert_eq!(cfg.storage_dir.to_str(), Some("/var/lib/vigil/recordings"));
    assert_eq!(cfg.detector.strategy, "all-objects");
    assert_eq!(cfg.target_fps, 20);
    assert_eq!(cfg.detector.sensitivity, 8);
    assert_eq!(cfg.detector.confidence_threshold, 0.7);
    assert_eq!(cfg.detector.flush_every, 5);
    assert_eq!(cfg.analysis.stride, 25);
    assert!(!cfg.auto_resume_on_detection);

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_SENSITIVITY", "11");
    assert!(ConsoleConfig::load().is_err());

    std::env::set_var("VIGIL_SENSITIVITY", "5");
    std::env::set_var("VIGIL_TARGET_FPS", "0");
    assert!(ConsoleConfig::load().is_err());

    std::env::set_var("VIGIL_TARGET_FPS", "not-a-number");
    assert!(ConsoleConfig::load().is_err());

    clear_env();
}
