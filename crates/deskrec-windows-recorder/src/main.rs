//! deskrec: record the primary display to an H.264 MP4 until Escape.
//!
//! # Architecture
//!
//! ```text
//! GDI BitBlt (primary display, BGRx)
//!   + red border, + cursor
//!   │
//!   ▼
//! VideoConverter  BGRx → I420 / NV12 (whatever the encoder's sink takes)
//!   │
//!   ▼
//! GStreamer encode (mfh264enc / nvh264enc / x264enc / openh264enc)
//!   │  packets, time base 1/fps
//!   ▼
//! rescale → 1/90000 ─► mp4mux ─► output.mp4
//! ```
//!
//! Settings are the [`RecorderConfig`] defaults: `output.mp4`, 30 fps,
//! 4 Mbit/s. Logging follows `RUST_LOG` (default `info`).
//!
//! Exit status is non-zero only when setup fails. Once recording has started,
//! flush and finalize errors are logged and the process still exits 0.

use anyhow::{Context, Result};
use deskrec_capture_windows::{CaptureConfig, ExitKey, FrameSource, ScreenCapturer};
use deskrec_core::RecorderConfig;
use gstreamer as gst;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deskrec_windows_recorder::{
    EncoderChoice, FrameConverter, GstEncoder, Mp4Muxer, Recorder, Recording, VideoEncoder,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("deskrec v{}", env!("CARGO_PKG_VERSION"));

    let config = RecorderConfig::default();
    config.validate().context("Invalid recorder configuration")?;
    info!("Config: {}", serde_json::to_string(&config)?);

    gst::init().context("GStreamer init failed")?;

    // ── Setup (any failure here is fatal) ─────────────────────────────────────

    let capturer = ScreenCapturer::open(CaptureConfig {
        border_px:   config.border_px,
        draw_cursor: config.draw_cursor,
    })
    .context("Failed to open the primary display")?;
    let resolution = capturer.resolution();

    let choice = EncoderChoice::detect().context("No usable H.264 encoder")?;
    let converter = FrameConverter::new(resolution, config.fps, choice.input_format)
        .with_context(|| format!("Failed to create BGRx → {:?} converter", choice.input_format))?;

    let encoder = GstEncoder::new(
        choice,
        converter.output_info(),
        config.fps,
        config.bitrate_kbps(),
        config.flush_timeout(),
    )
    .context("Failed to start H.264 encoder")?;
    info!(
        "Encoder {} time base {}",
        encoder.element_name(),
        encoder.time_base()
    );

    let muxer = Mp4Muxer::create(&config.output_path, resolution, config.fps, config.finalize_timeout())
        .with_context(|| format!("Failed to open {}", config.output_path.display()))?;

    let recorder = Recorder::new(capturer, converter, encoder, muxer, &config)
        .context("Failed to allocate frame buffers")?;

    // ── Record ────────────────────────────────────────────────────────────────

    info!("Recording {} to {} (press Escape to stop)", resolution, config.output_path.display());
    let Recording { stats, outcome } = recorder.run(&mut ExitKey::escape());

    match outcome {
        Ok(summary) => info!(
            "Saved {} ({} packets, {} bytes)",
            summary.path.display(),
            summary.packets,
            summary.bytes
        ),
        Err(e) => error!("Recording did not finish cleanly: {e}"),
    }
    info!("Stats: {}", serde_json::to_string(&stats)?);

    Ok(())
}
