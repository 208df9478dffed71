//! deskrec-capture-windows: primary display capture via Win32 GDI.
//!
//! On non-Windows targets a stub is compiled that fails at open, so the
//! workspace still builds and tests on CI.
//!
//! # Windows pipeline (per frame)
//!
//! ```text
//! GetDC(screen) ──► CreateCompatibleDC + CreateCompatibleBitmap
//!   │  BitBlt(SRCCOPY)
//!   ▼
//! memory DC ──► FrameRect × border_px   (red annotation border)
//!           ──► DrawIconEx(cursor)       (position − hotspot)
//!   │  GetDIBits(32bpp, top-down)
//!   ▼
//! FrameBuffer (BGRx, grow-only)
//! ```
//!
//! Every GDI handle is owned by a scoped guard, so nothing leaks when a call
//! fails halfway through a frame.

use deskrec_core::{CaptureError, FrameBuffer, Resolution};

/// Configuration for the primary display capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Border thickness in pixels (0 disables the annotation).
    pub border_px:   u32,
    pub draw_cursor: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { border_px: 8, draw_cursor: true }
    }
}

/// Anything that can fill a [`FrameBuffer`] with one BGRx frame.
pub trait FrameSource {
    /// Frame size, fixed for the lifetime of the source.
    fn resolution(&self) -> Resolution;

    /// Snapshot the current contents into `buffer`, growing it if needed.
    fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<(), CaptureError>;
}

pub mod synthetic;
pub use synthetic::TestPatternSource;

mod exit_key;
pub use exit_key::ExitKey;

// ── Platform split ─────────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod gdi;
#[cfg(target_os = "windows")]
pub use gdi::ScreenCapturer;

#[cfg(not(target_os = "windows"))]
mod stub;
#[cfg(not(target_os = "windows"))]
pub use stub::ScreenCapturer;
