use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{CaptureConfig, MonitorConfig};
use crate::shared::paths::ensure_dir;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub segment_duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    /// How far back the live playlist reaches.
    pub live_window_secs: u64,
    /// Upper bound on the segment directory, in bytes. 0 disables retention.
    pub segment_dir_max_size: u64,
    pub listen_addr: String,
    pub drain_interval_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            segment_duration_ms: 5_000,
            width: 640,
            height: 480,
            bit_rate: 4_000_000,
            live_window_secs: 10,
            segment_dir_max_size: 1024 * 1024 * 1024,
            listen_addr: "0.0.0.0:8080".to_string(),
            drain_interval_ms: 1_000,
        }
    }
}

impl CameraSettings {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_millis(self.segment_duration_ms)
    }

    pub fn live_window(&self) -> Duration {
        Duration::from_secs(self.live_window_secs)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            segment_duration: self.segment_duration(),
            width: self.width,
            height: self.height,
            bit_rate: self.bit_rate,
        }
    }

    pub fn monitor_config(&self, work_dir: impl Into<PathBuf>) -> MonitorConfig {
        MonitorConfig {
            work_dir: work_dir.into(),
            capture: self.capture_config(),
            drain_interval: Duration::from_millis(self.drain_interval_ms),
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn get_settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

/// Loads `settings.json` from `root`. A missing file yields the defaults
/// silently, an unreadable or malformed one yields them with a warning.
pub fn load_settings(root: &Path) -> CameraSettings {
    let path = get_settings_path(root);

    if !path.exists() {
        return CameraSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "system", "[SETTINGS] Ignoring {:?}: {}", path, e);
            CameraSettings::default()
        }
    }
}

fn load_settings_from_file(path: &Path) -> Result<CameraSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings(root: &Path, settings: &CameraSettings) -> Result<(), SettingsError> {
    ensure_dir(root)?;

    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(get_settings_path(root), contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();

        let settings = load_settings(tmp.path());

        assert_eq!(settings, CameraSettings::default());
        assert_eq!(settings.segment_duration(), Duration::from_secs(5));
        assert_eq!(settings.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            get_settings_path(tmp.path()),
            r#"{ "segmentDurationMs": 2000, "liveWindowSecs": 30 }"#,
        )
        .unwrap();

        let settings = load_settings(tmp.path());

        assert_eq!(settings.segment_duration_ms, 2_000);
        assert_eq!(settings.live_window_secs, 30);
        assert_eq!(settings.width, 640);
        assert_eq!(settings.segment_dir_max_size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(get_settings_path(tmp.path()), "{ not json").unwrap();

        assert_eq!(load_settings(tmp.path()), CameraSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested");
        let settings = CameraSettings {
            width: 1280,
            height: 720,
            ..CameraSettings::default()
        };

        save_settings(&root, &settings).unwrap();

        let raw = std::fs::read_to_string(get_settings_path(&root)).unwrap();
        assert!(raw.contains("\"segmentDirMaxSize\""));
        assert_eq!(load_settings(&root), settings);
    }

    #[test]
    fn test_monitor_config_conversion() {
        let settings = CameraSettings {
            segment_duration_ms: 3_000,
            drain_interval_ms: 250,
            ..CameraSettings::default()
        };

        let config = settings.monitor_config("/tmp/recorder");

        assert_eq!(config.work_dir, PathBuf::from("/tmp/recorder"));
        assert_eq!(config.capture.segment_duration, Duration::from_secs(3));
        assert_eq!(config.drain_interval, Duration::from_millis(250));
    }
}
