//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::trigger::TriggerConfiguration;

/// Timing constants for triggers and the recording session, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Hard limit on a single recording
    pub max_recording_ms: u64,
    /// Maximum gap between the two taps of a double-tap
    pub double_tap_window_ms: u64,
    /// How long an auxiliary mouse button must be held to start recording
    pub hold_confirm_ms: u64,
    /// Delay before a completed or failed session returns to idle
    pub auto_reset_ms: u64,
    /// Elapsed-time refresh period while recording
    pub duration_tick_ms: u64,
    /// Audio level sampling period while recording in a hold mode
    pub level_tick_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            max_recording_ms: 60_000,
            double_tap_window_ms: 400,
            hold_confirm_ms: 1_000,
            auto_reset_ms: 3_000,
            duration_tick_ms: 100,
            level_tick_ms: 50,
        }
    }
}

impl Timings {
    pub fn max_recording(&self) -> Duration {
        Duration::from_millis(self.max_recording_ms)
    }

    pub fn double_tap_window(&self) -> Duration {
        Duration::from_millis(self.double_tap_window_ms)
    }

    pub fn hold_confirm(&self) -> Duration {
        Duration::from_millis(self.hold_confirm_ms)
    }

    pub fn auto_reset(&self) -> Duration {
        Duration::from_millis(self.auto_reset_ms)
    }

    // Periodic ticks must never be zero, tokio intervals panic on it
    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms.max(1))
    }

    pub fn level_tick(&self) -> Duration {
        Duration::from_millis(self.level_tick_ms.max(1))
    }
}

/// User settings handed in from the settings store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub record: TriggerConfiguration,
    pub auxiliary: TriggerConfiguration,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            record: TriggerConfiguration::default_record(),
            auxiliary: TriggerConfiguration::default_auxiliary(),
            timings: Timings::default(),
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid settings in {}", path.display()))
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Trigger and timing settings file
    pub settings_path: PathBuf,

    /// Settings read from `settings_path`
    pub settings: Settings,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("VOXTYPE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("voxtype")
            }
        };
        Self::from_data_dir(data_dir)
    }

    /// Derive all paths from `data_dir` and read its settings file
    pub fn from_data_dir(data_dir: PathBuf) -> Result<Self> {
        let socket_path = data_dir.join("daemon.sock");
        let settings_path = data_dir.join("settings.json");
        let settings = Settings::load(&settings_path)?;
        info!(path = ?settings_path, "settings loaded");

        Ok(Self {
            socket_path,
            data_dir,
            settings_path,
            settings,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerMode;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxtype-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_config_paths() {
        let dir = scratch_dir("paths");
        let config = Config::from_data_dir(dir.clone()).unwrap();
        assert_eq!(config.socket_path, dir.join("daemon.sock"));
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_settings_partial_file() {
        let dir = scratch_dir("partial");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("settings.json"),
            r#"{"record":{"mode":"double_tap_toggle","key_code":54},"timings":{"max_recording_ms":30000}}"#,
        )
        .unwrap();

        let config = Config::from_data_dir(dir.clone()).unwrap();
        assert_eq!(config.settings.record.mode, TriggerMode::DoubleTapToggle);
        assert_eq!(config.settings.timings.max_recording(), Duration::from_secs(30));
        assert_eq!(config.settings.timings.double_tap_window_ms, 400);
        assert_eq!(config.settings.auxiliary, TriggerConfiguration::default_auxiliary());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_settings_malformed_file_is_error() {
        let dir = scratch_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.json"), "{not json").unwrap();

        assert!(Config::from_data_dir(dir.clone()).is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.max_recording(), Duration::from_secs(60));
        assert_eq!(timings.double_tap_window(), Duration::from_millis(400));
        assert_eq!(timings.hold_confirm(), Duration::from_secs(1));
        assert_eq!(timings.auto_reset(), Duration::from_secs(3));
        assert_eq!(timings.duration_tick(), Duration::from_millis(100));
        assert_eq!(timings.level_tick(), Duration::from_millis(50));
    }
}
