//! Synthetic frame source: scrolling colour bars with the same border and
//! cursor annotations the GDI capturer draws. Runs on every platform.

use deskrec_core::{CaptureError, FrameBuffer, Resolution, BYTES_PER_PIXEL};

use super::{CaptureConfig, FrameSource};

/// BGRx colour bars (white, yellow, cyan, green, magenta, red, blue, black).
const BARS: [[u8; 4]; 8] = [
    [235, 235, 235, 255],
    [16, 235, 235, 255],
    [235, 235, 16, 255],
    [16, 235, 16, 255],
    [235, 16, 235, 255],
    [16, 16, 235, 255],
    [235, 16, 16, 255],
    [16, 16, 16, 255],
];

pub const BORDER_BGRX: [u8; 4] = [0, 0, 255, 255];
pub const CURSOR_BGRX: [u8; 4] = [255, 255, 255, 255];
const CURSOR_SIZE: u32 = 12;
const SCROLL_PX_PER_FRAME: u64 = 4;

pub struct TestPatternSource {
    resolution: Resolution,
    config:     CaptureConfig,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(resolution: Resolution, config: CaptureConfig) -> Self {
        Self { resolution, config, frame_index: 0 }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_index
    }

    /// Top-left corner of the fake cursor for the current frame.
    pub fn cursor_position(&self) -> (u32, u32) {
        let span_x = self.resolution.width.saturating_sub(CURSOR_SIZE).max(1) as u64;
        let span_y = self.resolution.height.saturating_sub(CURSOR_SIZE).max(1) as u64;
        let step = self.frame_index * 3;
        ((step % span_x) as u32, (step % span_y) as u32)
    }

    fn draw_bars(&self, pixels: &mut [u8]) {
        let width = self.resolution.width as u64;
        let bar_width = (width / BARS.len() as u64).max(1);
        let offset = self.frame_index * SCROLL_PX_PER_FRAME;
        let stride = self.resolution.width as usize * BYTES_PER_PIXEL;

        for row in pixels.chunks_exact_mut(stride) {
            for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                let bar = ((x as u64 + offset) / bar_width) as usize % BARS.len();
                px.copy_from_slice(&BARS[bar]);
            }
        }
    }

    fn draw_border(&self, pixels: &mut [u8]) {
        let Resolution { width, height } = self.resolution;
        let t = self.config.border_px.min(width / 2).min(height / 2);
        if t == 0 {
            return;
        }
        fill_rect(pixels, width, (0, 0), (width, t), BORDER_BGRX);
        fill_rect(pixels, width, (0, height - t), (width, height), BORDER_BGRX);
        fill_rect(pixels, width, (0, t), (t, height - t), BORDER_BGRX);
        fill_rect(pixels, width, (width - t, t), (width, height - t), BORDER_BGRX);
    }

    fn draw_cursor(&self, pixels: &mut [u8]) {
        let Resolution { width, height } = self.resolution;
        let (x, y) = self.cursor_position();
        let right = (x + CURSOR_SIZE).min(width);
        let bottom = (y + CURSOR_SIZE).min(height);
        fill_rect(pixels, width, (x, y), (right, bottom), CURSOR_BGRX);
    }
}

impl FrameSource for TestPatternSource {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<(), CaptureError> {
        if self.resolution.is_empty() {
            return Err(CaptureError::DisplayUnavailable);
        }
        let pixels = buffer.prepare(self.resolution);
        self.draw_bars(pixels);
        self.draw_border(pixels);
        if self.config.draw_cursor {
            self.draw_cursor(pixels);
        }
        self.frame_index += 1;
        Ok(())
    }
}

/// Fill the half-open rectangle `[x0, x1) × [y0, y1)`.
fn fill_rect(pixels: &mut [u8], width: u32, (x0, y0): (u32, u32), (x1, y1): (u32, u32), bgrx: [u8; 4]) {
    let stride = width as usize * BYTES_PER_PIXEL;
    for y in y0..y1 {
        let row = &mut pixels[y as usize * stride..(y as usize + 1) * stride];
        for px in row[x0 as usize * BYTES_PER_PIXEL..x1 as usize * BYTES_PER_PIXEL]
            .chunks_exact_mut(BYTES_PER_PIXEL)
        {
            px.copy_from_slice(&bgrx);
        }
    }
}
