//! MP4 output via GStreamer `mp4mux`.
//!
//! Pipeline:
//! ```text
//! appsrc (video/x-h264, byte-stream, au, blocking once 8 MiB is queued)
//!   → h264parse        (Annex-B → avcC for the container)
//!   → mp4mux
//!   → filesink location=<path>
//! ```
//!
//! Packets arrive already rescaled to [`Mp4Muxer::stream`]'s time base and
//! are appended in arrival order. `finish` sends EOS and waits for the
//! trailer (`moov`) to be written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use deskrec_core::{EncodedPacket, MuxError, Resolution, StreamInfo, TimeBase};
use gstreamer::{self as gst, prelude::*};
use gstreamer_app::AppSrc;
use serde::Serialize;

/// Packet consumer at the end of the capture loop.
pub trait PacketSink {
    /// Stream that packets must be rescaled to and tagged with.
    fn stream(&self) -> StreamInfo;

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<(), MuxError>;

    /// Write the container trailer and close the output.
    fn finish(self) -> Result<ContainerSummary, MuxError>;
}

/// What ended up in the output file.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub path:     PathBuf,
    pub packets:  u64,
    pub bytes:    u64,
    /// Presentation span in stream ticks.
    pub duration: i64,
    pub empty:    bool,
}

/// Encoded bytes queued in the mux appsrc before `write_packet` blocks.
const MUX_QUEUE_BYTES: u64 = 8 * 1024 * 1024;

// ── Mp4Muxer ──────────────────────────────────────────────────────────────────

pub struct Mp4Muxer {
    pipeline: gst::Pipeline,
    appsrc:   AppSrc,
    bus:      gst::Bus,
    path:     PathBuf,
    stream:   StreamInfo,
    finalize_timeout: Duration,
    packets:  u64,
    bytes:    u64,
    end_pts:  i64,
    finished: bool,
    /// First pipeline error seen; later writes fail fast with it.
    failed:   Option<String>,
}

impl Mp4Muxer {
    /// Open `path` for writing and start the mux pipeline.
    ///
    /// Must be called after `gst::init()`.
    pub fn create(
        path: &Path,
        resolution: Resolution,
        fps: u32,
        finalize_timeout: Duration,
    ) -> Result<Self, MuxError> {
        let open_err = |reason: String| MuxError::Open { path: path.to_owned(), reason };
        let location = path
            .to_str()
            .ok_or_else(|| open_err("path is not valid UTF-8".into()))?;

        let desc = format!(
            "appsrc name=src format=time is-live=false block=true max-bytes={MUX_QUEUE_BYTES} \
             ! h264parse \
             ! mp4mux name=mux \
             ! filesink name=sink"
        );
        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| MuxError::Pipeline(format!("parse: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| MuxError::Pipeline("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| MuxError::Pipeline("No appsrc".into()))?;
        let filesink = pipeline
            .by_name("sink")
            .ok_or_else(|| MuxError::Pipeline("No filesink".into()))?;
        filesink.set_property("location", location);

        let bus = pipeline
            .bus()
            .ok_or_else(|| MuxError::Pipeline("No bus".into()))?;

        let caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .field("width", resolution.width as i32)
            .field("height", resolution.height as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let reason = pop_error(&bus).unwrap_or_else(|| e.to_string());
            let _ = pipeline.set_state(gst::State::Null);
            return Err(open_err(reason));
        }

        tracing::info!("[Mp4Muxer] Writing {} ({} @{}fps)", path.display(), resolution, fps);

        Ok(Self {
            pipeline,
            appsrc,
            bus,
            path: path.to_owned(),
            stream: StreamInfo { index: 0, time_base: TimeBase::MPEG_90KHZ },
            finalize_timeout,
            packets: 0,
            bytes: 0,
            end_pts: 0,
            finished: false,
            failed: None,
        })
    }

    fn ticks_to_clock(&self, ticks: i64) -> Option<gst::ClockTime> {
        let ns = self.stream.time_base.rescale(ticks, TimeBase::NANOS);
        u64::try_from(ns).ok().map(gst::ClockTime::from_nseconds)
    }

    fn wait_for_eos(&self) -> Result<(), MuxError> {
        let timeout_ms = self.finalize_timeout.as_millis() as u64;
        let msg = self
            .bus
            .timed_pop_filtered(
                gst::ClockTime::from_mseconds(timeout_ms),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            )
            .ok_or(MuxError::Timeout { ms: timeout_ms })?;

        match msg.view() {
            gst::MessageView::Eos(..) => Ok(()),
            gst::MessageView::Error(err) => Err(MuxError::FinalizeFailed {
                reason: format!("{} ({:?})", err.error(), err.debug()),
            }),
            _ => Ok(()),
        }
    }

    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            path:     self.path.clone(),
            packets:  self.packets,
            bytes:    self.bytes,
            duration: self.end_pts,
            empty:    self.packets == 0,
        }
    }
}

impl PacketSink for Mp4Muxer {
    fn stream(&self) -> StreamInfo {
        self.stream
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<(), MuxError> {
        if packet.stream_index != self.stream.index || packet.time_base != self.stream.time_base {
            return Err(MuxError::WriteFailed {
                reason: format!(
                    "packet tagged stream {} @{}, expected stream {} @{}",
                    packet.stream_index, packet.time_base, self.stream.index, self.stream.time_base
                ),
            });
        }
        if self.failed.is_none() {
            self.failed = pop_error(&self.bus);
        }
        if let Some(reason) = &self.failed {
            return Err(MuxError::Pipeline(reason.clone()));
        }

        let mut buffer = gst::Buffer::from_slice(packet.data.clone());
        {
            let buf_mut = buffer.make_mut();
            buf_mut.set_pts(self.ticks_to_clock(packet.pts));
            buf_mut.set_dts(self.ticks_to_clock(packet.dts.unwrap_or(packet.pts)));
            buf_mut.set_duration(self.ticks_to_clock(packet.duration));
            if !packet.is_keyframe {
                buf_mut.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| MuxError::WriteFailed { reason: format!("push_buffer: {e:?}") })?;

        self.packets += 1;
        self.bytes += packet.data.len() as u64;
        self.end_pts = self.end_pts.max(packet.pts + packet.duration);
        Ok(())
    }

    fn finish(mut self) -> Result<ContainerSummary, MuxError> {
        self.finished = true;

        if self.packets == 0 {
            // mp4mux never writes a header without data; stop the pipeline
            // and leave a valid empty movie behind instead.
            let _ = self.pipeline.set_state(gst::State::Null);
            std::fs::write(&self.path, empty_movie())?;
            tracing::info!("[Mp4Muxer] No packets; wrote empty movie to {}", self.path.display());
            return Ok(self.summary());
        }

        if let Some(reason) = self.failed.take().or_else(|| pop_error(&self.bus)) {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(MuxError::FinalizeFailed { reason });
        }

        self.appsrc
            .end_of_stream()
            .map_err(|e| MuxError::FinalizeFailed { reason: format!("end_of_stream: {e:?}") })?;
        let result = self.wait_for_eos();
        let _ = self.pipeline.set_state(gst::State::Null);
        result?;

        tracing::info!(
            "[Mp4Muxer] Finalized {} ({} packets, {} bytes)",
            self.path.display(), self.packets, self.bytes
        );
        Ok(self.summary())
    }
}

impl Drop for Mp4Muxer {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("[Mp4Muxer] Dropped without finish; {} may be truncated", self.path.display());
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn pop_error(bus: &gst::Bus) -> Option<String> {
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
        _ => None,
    }
}

// ── Empty movie ───────────────────────────────────────────────────────────────

const MOVIE_TIMESCALE: u32 = 1000;

/// Smallest structurally valid MP4: `ftyp` + `moov` holding only a
/// zero-duration `mvhd`.
fn empty_movie() -> bytes::Bytes {
    let mut out = BytesMut::with_capacity(140);

    // ftyp
    let brands: [&[u8; 4]; 4] = [b"isom", b"iso2", b"avc1", b"mp41"];
    out.put_u32(8 + 8 + 4 * brands.len() as u32);
    out.put_slice(b"ftyp");
    out.put_slice(b"isom");
    out.put_u32(0x200);
    for brand in brands {
        out.put_slice(brand);
    }

    // moov > mvhd (version 0)
    let mvhd_len: u32 = 8 + 4 + 96;
    out.put_u32(8 + mvhd_len);
    out.put_slice(b"moov");
    out.put_u32(mvhd_len);
    out.put_slice(b"mvhd");
    out.put_u32(0); // version + flags
    out.put_u32(0); // creation_time
    out.put_u32(0); // modification_time
    out.put_u32(MOVIE_TIMESCALE);
    out.put_u32(0); // duration
    out.put_u32(0x0001_0000); // rate 1.0
    out.put_u16(0x0100); // volume 1.0
    out.put_u16(0);
    out.put_u64(0);
    for m in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        out.put_u32(m);
    }
    for _ in 0..6 {
        out.put_u32(0); // pre_defined
    }
    out.put_u32(1); // next_track_ID

    out.freeze()
}
