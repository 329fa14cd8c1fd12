// Configuration management for SwingCam

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capture width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Capture height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Capture frame rate (frames/sec); also paces the preview workers
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Pre-roll ring buffer duration in seconds. A record trigger captures
    /// this much footage from before the trigger.
    #[serde(default = "default_ring_buffer_secs")]
    pub ring_buffer_secs: u32,

    /// Delay between the record trigger and the splice, in seconds. Must not
    /// exceed `ring_buffer_secs` or pre-roll would be incomplete; it is
    /// clamped at engine start.
    #[serde(default = "default_armed_delay_secs")]
    pub armed_delay_secs: u32,

    /// Mirror the image horizontally (for a display facing the player)
    #[serde(default)]
    pub flip_horizontal: bool,

    /// Directory where recorded clips are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Camera device index (/dev/videoN on Linux)
    #[serde(default)]
    pub device_index: u32,
}

/// Hard ceiling on the ring buffer duration; encoded frames are small but a
/// long window at high resolution still adds up.
pub const MAX_RING_BUFFER_SECS: u32 = 30;

impl Default for Config {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
            ring_buffer_secs: default_ring_buffer_secs(),
            armed_delay_secs: default_armed_delay_secs(),
            flip_horizontal: false,
            output_dir: default_output_dir(),
            device_index: 0,
        }
    }
}

impl Config {
    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(config) => return config.clamped(),
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Armed delay bounded by the ring duration, so the footage between
    /// trigger and splice always fits in the buffer (best-effort pre-roll).
    pub fn effective_armed_delay_secs(&self) -> u32 {
        self.armed_delay_secs.min(self.ring_buffer_secs)
    }

    fn clamped(mut self) -> Self {
        if self.ring_buffer_secs > MAX_RING_BUFFER_SECS {
            log::warn!(
                "ring_buffer_secs {} exceeds maximum, clamping to {}",
                self.ring_buffer_secs,
                MAX_RING_BUFFER_SECS
            );
            self.ring_buffer_secs = MAX_RING_BUFFER_SECS;
        }
        self
    }
}

/// Default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("swingcam")
        .join("config.toml")
}

/// Default directory for recorded clips
fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Swings")
}

fn default_width() -> u32 {
    1024
}

fn default_height() -> u32 {
    768
}

fn default_frame_rate() -> u32 {
    10
}

fn default_ring_buffer_secs() -> u32 {
    5
}

fn default_armed_delay_secs() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 768);
        assert_eq!(config.frame_rate, 10);
        assert_eq!(config.ring_buffer_secs, 5);
        assert_eq!(config.armed_delay_secs, 1);
        assert!(!config.flip_horizontal);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.frame_rate = 30;
        config.flip_horizontal = true;
        config.output_dir = PathBuf::from("/tmp/swings");
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(&path);
        assert_eq!(loaded.frame_rate, 30);
        assert!(loaded.flip_horizontal);
        assert_eq!(loaded.output_dir, PathBuf::from("/tmp/swings"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("nope.toml"));
        assert_eq!(config.ring_buffer_secs, 5);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "frame_rate = 24\n").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config.frame_rate, 24);
        assert_eq!(config.width, 1024);
    }

    #[test]
    fn armed_delay_clamped_to_ring_duration() {
        let mut config = Config::default();
        config.ring_buffer_secs = 3;
        config.armed_delay_secs = 10;
        assert_eq!(config.effective_armed_delay_secs(), 3);

        config.armed_delay_secs = 2;
        assert_eq!(config.effective_armed_delay_secs(), 2);
    }

    #[test]
    fn oversized_ring_duration_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ring_buffer_secs = 900\n").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config.ring_buffer_secs, MAX_RING_BUFFER_SECS);
    }
}
