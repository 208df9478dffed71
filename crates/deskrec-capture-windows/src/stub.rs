//! Non-Windows stub for ScreenCapturer (CI + cross-compilation).

use deskrec_core::{CaptureError, FrameBuffer, Resolution};

use super::{CaptureConfig, FrameSource};

pub struct ScreenCapturer {
    resolution: Resolution,
}

impl ScreenCapturer {
    pub fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        tracing::warn!(
            "[GdiCapture] stub (non-Windows) border={}px cursor={}",
            config.border_px, config.draw_cursor
        );
        Err(CaptureError::Unsupported { platform: std::env::consts::OS })
    }
}

impl FrameSource for ScreenCapturer {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn capture_into(&mut self, _buffer: &mut FrameBuffer) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported { platform: std::env::consts::OS })
    }
}
