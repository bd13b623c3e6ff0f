//! Command-line arguments.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use screenfeed_core::{CaptureConfig, SourceSelector};

/// Stream a display or window as raw NV12 frames on stdout and, with
/// `--audio`, system audio as MCAP packets on stderr.
#[derive(Debug, Parser)]
#[command(name = "screenfeed", version)]
pub struct Args {
    /// Display index to capture
    #[arg(long, value_name = "INDEX", conflicts_with = "window")]
    pub display: Option<u32>,

    /// Window handle to capture, decimal or 0x-prefixed hex
    #[arg(long, value_name = "HWND", value_parser = parse_handle)]
    pub window: Option<u64>,

    /// Output width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Also capture system audio
    #[arg(long)]
    pub audio: bool,

    /// JSON capture configuration; flags override its fields
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs here. With --audio and no log file, logging is off so
    /// stderr carries only audio packets.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// The validated video capture configuration.
    pub fn capture_config(&self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid capture configuration in {}", path.display()))?
            }
            None => CaptureConfig::default(),
        };

        if let Some(handle) = self.window {
            config.source = SourceSelector::Window { handle };
        } else if let Some(index) = self.display {
            config.source = SourceSelector::Display { index };
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }

        if config.source == SourceSelector::SystemAudio {
            anyhow::bail!("the video source must be a display or a window; use --audio for system audio");
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_handle(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid window handle '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("screenfeed").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(!args.audio);

        let config = args.capture_config().unwrap();
        assert_eq!(config.source, SourceSelector::Display { index: 0 });
        assert_eq!((config.width, config.height, config.fps), (1920, 1080, 30));
    }

    #[test]
    fn test_flags_override() {
        let config = parse(&["--display", "2", "--width", "1280", "--height", "720", "--fps", "60"])
            .capture_config()
            .unwrap();
        assert_eq!(config.source, SourceSelector::Display { index: 2 });
        assert_eq!((config.width, config.height, config.fps), (1280, 720, 60));
    }

    #[test]
    fn test_window_handle_formats() {
        let config = parse(&["--window", "0x1A2B"]).capture_config().unwrap();
        assert_eq!(config.source, SourceSelector::Window { handle: 0x1A2B });

        let config = parse(&["--window", "12345678", "--audio"]).capture_config().unwrap();
        assert_eq!(config.source, SourceSelector::Window { handle: 12_345_678 });

        assert!(Args::try_parse_from(["screenfeed", "--window", "zz"]).is_err());
    }

    #[test]
    fn test_display_and_window_conflict() {
        assert!(Args::try_parse_from(["screenfeed", "--display", "0", "--window", "1"]).is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(parse(&["--width", "0"]).capture_config().is_err());
        assert!(parse(&["--width", "5000"]).capture_config().is_err());
        assert!(parse(&["--height", "721"]).capture_config().is_err());
        assert!(parse(&["--fps", "121"]).capture_config().is_err());
    }

    #[test]
    fn test_config_file_with_flag_override() {
        let path = std::env::temp_dir().join(format!(
            "screenfeed-args-test-{}.json",
            std::process::id()
        ));
        fs::write(
            &path,
            r#"{"source":{"type":"window","handle":4660},"width":800,"height":600,"fps":24}"#,
        )
        .unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--fps", "10"]);
        let config = args.capture_config().unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.source, SourceSelector::Window { handle: 4660 });
        assert_eq!((config.width, config.height, config.fps), (800, 600, 10));
    }

    #[test]
    fn test_missing_config_file() {
        let args = parse(&["--config", "/nonexistent/screenfeed.json"]);
        assert!(args.capture_config().is_err());
    }
}
