//! Capture configuration.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::format::VideoTarget;
use crate::{CaptureResult, MAX_DIMENSION, MAX_FPS};

/// Which OS source a session captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSelector {
    /// A display output, by adapter output index.
    Display { index: u32 },

    /// A top-level window, by raw window handle.
    Window { handle: u64 },

    /// The default render device's mix (loopback).
    SystemAudio,
}

/// Configuration passed to `CaptureSession::initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture target.
    pub source: SourceSelector,

    /// Output width in pixels. Ignored for audio.
    pub width: u32,

    /// Output height in pixels. Ignored for audio.
    pub height: u32,

    /// Target frames per second. Only the display capturer paces itself.
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceSelector::Display { index: 0 },
            width: 1920,
            height: 1080,
            fps: 30,
        }
    }
}

impl CaptureConfig {
    /// Configuration for system audio loopback.
    pub fn system_audio() -> Self {
        Self {
            source: SourceSelector::SystemAudio,
            ..Self::default()
        }
    }

    /// The NV12 output this configuration asks for.
    pub fn video_target(&self) -> VideoTarget {
        VideoTarget::new(self.width, self.height)
    }

    /// Check the output geometry and frame rate.
    ///
    /// NV12 subsamples chroma 2x2, so both dimensions must be even.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.source == SourceSelector::SystemAudio {
            return Ok(());
        }

        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(CaptureError::InvalidConfig(format!(
                    "{name} must be 1-{MAX_DIMENSION}, got {value}"
                )));
            }
            if value % 2 != 0 {
                return Err(CaptureError::InvalidConfig(format!(
                    "{name} must be even for NV12 output, got {value}"
                )));
            }
        }

        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CaptureError::InvalidConfig(format!(
                "fps must be 1-{MAX_FPS}, got {}",
                self.fps
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_dimensions() {
        let config = CaptureConfig {
            width: 8192,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::InvalidConfig(_))
        ));

        let config = CaptureConfig {
            height: 0,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_video_target_follows_requested_size() {
        let config = CaptureConfig {
            width: 1280,
            height: 720,
            ..Default::default()
        };
        let target = config.video_target();
        assert_eq!(target, VideoTarget::new(1280, 720));
        assert_eq!(target.frame_size(), 1280 * 720 * 3 / 2);
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let config = CaptureConfig {
            width: 1281,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_fps_out_of_range() {
        for fps in [0, 121] {
            let config = CaptureConfig {
                fps,
                ..CaptureConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_audio_config_skips_geometry_checks() {
        let config = CaptureConfig {
            width: 0,
            fps: 0,
            ..CaptureConfig::system_audio()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selector_deserializes_from_tagged_json() {
        let json = r#"{"source":{"type":"window","handle":4242},"width":1280,"height":720}"#;
        let config: CaptureConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.source, SourceSelector::Window { handle: 4242 });
        assert_eq!(config.fps, 30);
    }
}
