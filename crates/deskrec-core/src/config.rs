use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RecorderError;
use crate::types::TimeBase;

/// Recorder settings. The binary runs with [`RecorderConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    #[serde(alias = "outputPath")]
    pub output_path: PathBuf,
    pub fps: u32,
    #[serde(alias = "bitrateBps")]
    pub bitrate_bps: u64,
    /// Thickness of the red annotation border drawn over each frame.
    #[serde(alias = "borderPx")]
    pub border_px: u32,
    #[serde(alias = "drawCursor")]
    pub draw_cursor: bool,
    /// Consecutive per-frame failures tolerated before the loop stops (0 = never).
    #[serde(alias = "maxConsecutiveFailures")]
    pub max_consecutive_failures: u32,
    #[serde(alias = "flushTimeoutMs")]
    pub flush_timeout_ms: u64,
    #[serde(alias = "finalizeTimeoutMs")]
    pub finalize_timeout_ms: u64,
}

pub const MAX_FPS: u32 = 240;

/// Encoders take their target in kbit/s; anything lower rounds to zero.
pub const MIN_BITRATE_BPS: u64 = 1_000;

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("output.mp4"),
            fps: 30,
            bitrate_bps: 4_000_000,
            border_px: 8,
            draw_cursor: true,
            max_consecutive_failures: 30,
            flush_timeout_ms: 5_000,
            finalize_timeout_ms: 10_000,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        let invalid = |reason: String| Err(RecorderError::ConfigurationInvalid { reason });
        if self.fps == 0 || self.fps > MAX_FPS {
            return invalid(format!("fps must be in 1..={MAX_FPS}, got {}", self.fps));
        }
        if self.bitrate_bps < MIN_BITRATE_BPS {
            return invalid(format!(
                "bitrate_bps must be at least {MIN_BITRATE_BPS}, got {}",
                self.bitrate_bps
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return invalid("output_path is empty".into());
        }
        Ok(())
    }

    /// Fixed pacing interval between frame deadlines.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps.max(1) as u64)
    }

    pub fn encoder_time_base(&self) -> TimeBase {
        TimeBase::per_frame(self.fps.max(1))
    }

    pub fn bitrate_kbps(&self) -> u32 {
        (self.bitrate_bps / 1000).min(u32::MAX as u64) as u32
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recorder_constants() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.output_path, PathBuf::from("output.mp4"));
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.bitrate_kbps(), 4000);
        assert_eq!(cfg.frame_interval(), Duration::from_nanos(33_333_333));
        assert_eq!(cfg.encoder_time_base(), TimeBase::new(1, 30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_fps = RecorderConfig { fps: 0, ..Default::default() };
        assert!(matches!(
            zero_fps.validate(),
            Err(RecorderError::ConfigurationInvalid { .. })
        ));

        let too_fast = RecorderConfig { fps: MAX_FPS + 1, ..Default::default() };
        assert!(too_fast.validate().is_err());

        let no_bitrate = RecorderConfig { bitrate_bps: 0, ..Default::default() };
        assert!(no_bitrate.validate().is_err());

        let no_path = RecorderConfig { output_path: PathBuf::new(), ..Default::default() };
        assert!(no_path.validate().is_err());
    }

    #[test]
    fn rejects_bitrate_below_one_kbps() {
        let sub_kbps = RecorderConfig { bitrate_bps: 999, ..Default::default() };
        assert_eq!(sub_kbps.bitrate_kbps(), 0);
        assert!(matches!(
            sub_kbps.validate(),
            Err(RecorderError::ConfigurationInvalid { .. })
        ));

        let one_kbps = RecorderConfig { bitrate_bps: MIN_BITRATE_BPS, ..Default::default() };
        assert!(one_kbps.validate().is_ok());
        assert_eq!(one_kbps.bitrate_kbps(), 1);
    }

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{
            "outputPath": "capture.mp4",
            "fps": 60,
            "bitrateBps": 8000000,
            "borderPx": 0,
            "drawCursor": false
        }"#;

        let cfg: RecorderConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.output_path, PathBuf::from("capture.mp4"));
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.bitrate_bps, 8_000_000);
        assert_eq!(cfg.border_px, 0);
        assert!(!cfg.draw_cursor);
        assert_eq!(cfg.max_consecutive_failures, 30, "missing fields keep defaults");
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let json = r#"{
            "fps": 24,
            "max_consecutive_failures": 0,
            "flush_timeout_ms": 250
        }"#;

        let cfg: RecorderConfig = serde_json::from_str(json).expect("valid snake_case config");
        assert_eq!(cfg.fps, 24);
        assert_eq!(cfg.max_consecutive_failures, 0);
        assert_eq!(cfg.flush_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.output_path, PathBuf::from("output.mp4"));
    }
}
