use bytes::Bytes;
use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Capture / encode resolution in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const FHD: Self = Self { width: 1920, height: 1080 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Bytes needed for one frame at 4 bytes per pixel.
    pub fn frame_bytes(&self) -> usize {
        self.total_pixels() as usize * BYTES_PER_PIXEL
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - TimeBase

/// Unit fraction in which a stream's timestamps are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeBase {
    num: u32,
    den: u32,
}

impl TimeBase {
    /// GStreamer clock time.
    pub const NANOS: Self = Self::new(1, 1_000_000_000);
    /// MPEG 90 kHz clock, used for the container stream.
    pub const MPEG_90KHZ: Self = Self::new(1, 90_000);

    pub const fn new(num: u32, den: u32) -> Self {
        assert!(num != 0 && den != 0, "time base terms must be non-zero");
        Self { num, den }
    }

    /// `1/fps`: one tick per frame.
    pub const fn per_frame(fps: u32) -> Self {
        Self::new(1, fps)
    }

    /// Convert `ts` from this time base to `to`, rounding to nearest
    /// (halves away from zero).
    pub fn rescale(self, ts: i64, to: TimeBase) -> i64 {
        let num = ts as i128 * self.num as i128 * to.den as i128;
        let den = self.den as i128 * to.num as i128;
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// MARK: - FrameBuffer

pub const BYTES_PER_PIXEL: usize = 4;

/// Raw pixel memory for one captured screen image (BGRx, top-down rows,
/// stride = width × 4).
///
/// Grow-only: [`FrameBuffer::prepare`] resizes the backing storage when it is
/// smaller than the requested frame and never shrinks it, so a steady-state
/// capture loop performs no allocations.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    resolution: Option<Resolution>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self { data: vec![0; bytes], resolution: None }
    }

    /// Make room for one frame at `resolution` and return exactly that many
    /// bytes for the capture step to fill.
    pub fn prepare(&mut self, resolution: Resolution) -> &mut [u8] {
        let needed = resolution.frame_bytes();
        if self.data.len() < needed {
            tracing::debug!(
                "FrameBuffer grow {} → {} bytes ({})",
                self.data.len(), needed, resolution
            );
            self.data.resize(needed, 0);
        }
        self.resolution = Some(resolution);
        &mut self.data[..needed]
    }

    /// Pixels of the most recently prepared frame.
    pub fn frame(&self) -> &[u8] {
        match self.resolution {
            Some(resolution) => &self.data[..resolution.frame_bytes()],
            None => &[],
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Size of the backing storage.
    pub fn allocated(&self) -> usize {
        self.data.len()
    }
}

// MARK: - StreamInfo

/// Output stream a packet is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: TimeBase,
}

// MARK: - EncodedPacket

/// One H.264 access unit (Annex-B byte-stream) emitted by the encoder.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: i64,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_keyframe: bool,
    pub stream_index: usize,
    /// Time base `pts`, `dts` and `duration` are expressed in.
    pub time_base: TimeBase,
}

impl EncodedPacket {
    /// Rescale every timestamp into `to` and retag the packet.
    pub fn rescale_ts(&mut self, to: TimeBase) {
        let from = self.time_base;
        self.pts = from.rescale(self.pts, to);
        self.dts = self.dts.map(|dts| from.rescale(dts, to));
        self.duration = from.rescale(self.duration, to);
        self.time_base = to;
    }
}
