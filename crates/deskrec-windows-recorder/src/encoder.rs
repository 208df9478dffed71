//! GStreamer H.264 encoder for deskrec.
//!
//! Encoder priority (first installed factory whose sink pad takes I420 or
//! NV12 wins; the converter then produces that format):
//! 1. `mfh264enc`   Windows Media Foundation (hardware or software)
//! 2. `nvh264enc`   NVIDIA NVENC
//! 3. `x264enc`     software
//! 4. `openh264enc` software (Cisco OpenH264)
//!
//! Pipeline:
//! ```text
//! appsrc (I420 or NV12, format=time, block=true, max-bytes=2 frames)
//!   → <encoder> bitrate=…
//!   → video/x-h264,stream-format=byte-stream,alignment=au
//!   → h264parse config-interval=-1
//!   → appsink (one access unit per sample)
//! ```
//!
//! The loop talks to it through [`VideoEncoder`]: send one frame, then
//! receive packets until none is ready. GStreamer may hold frames back, so a
//! send can yield zero, one or several packets.

use std::time::Duration;

use bytes::Bytes;
use deskrec_core::{EncodedPacket, EncoderError, TimeBase};
use gstreamer::{self as gst, prelude::*};
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video as gst_video;

use crate::convert::PlanarFrame;

/// Send/receive encoder model used by the capture loop.
pub trait VideoEncoder {
    /// Time base of frame and packet timestamps (`1/fps`).
    fn time_base(&self) -> TimeBase;

    /// Submit one frame; its pts is taken from [`PlanarFrame::pts`].
    fn send_frame(&mut self, frame: &PlanarFrame) -> Result<(), EncoderError>;

    /// Next ready packet. `Ok(None)` means "nothing ready right now" before
    /// [`send_eof`](Self::send_eof), and "fully drained" after it.
    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>, EncoderError>;

    /// Signal end of input so buffered frames are flushed out.
    fn send_eof(&mut self) -> Result<(), EncoderError>;
}

// ── Encoder selection ─────────────────────────────────────────────────────────

const ENCODER_CANDIDATES: &[&str] = &["mfh264enc", "nvh264enc", "x264enc", "openh264enc"];

/// Raw formats the loop can feed an encoder directly, most preferred first.
/// Hardware Media Foundation and NVENC encoders typically take NV12 only.
const PLANAR_FORMATS: &[gst_video::VideoFormat] =
    &[gst_video::VideoFormat::I420, gst_video::VideoFormat::Nv12];

/// Frames queued in the encoder's appsrc before `send_frame` blocks.
const QUEUED_FRAMES: u64 = 2;

/// The H.264 element to use and the planar format its sink pad accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderChoice {
    pub element:      &'static str,
    pub input_format: gst_video::VideoFormat,
}

impl EncoderChoice {
    /// First candidate that is installed and takes I420 or NV12.
    ///
    /// Must be called after `gst::init()`.
    pub fn detect() -> Result<Self, EncoderError> {
        for &element in ENCODER_CANDIDATES {
            let Some(factory) = gst::ElementFactory::find(element) else {
                tracing::debug!("[GstEncoder] Encoder '{}' not found, trying next", element);
                continue;
            };
            match sink_caps(&factory).and_then(|caps| planar_format(&caps)) {
                Some(input_format) => {
                    tracing::info!("[GstEncoder] Using encoder: {} ({:?} input)", element, input_format);
                    return Ok(Self { element, input_format });
                }
                None => tracing::debug!(
                    "[GstEncoder] Encoder '{}' takes neither I420 nor NV12, trying next",
                    element
                ),
            }
        }
        Err(EncoderError::NoEncoder)
    }
}

fn sink_caps(factory: &gst::ElementFactory) -> Option<gst::Caps> {
    factory
        .static_pad_templates()
        .iter()
        .find(|template| template.direction() == gst::PadDirection::Sink)
        .map(|template| template.caps())
}

/// Preferred entry of [`PLANAR_FORMATS`] offered by `caps`. Raw caps without
/// a format restriction (or ANY caps) get the first preference.
fn planar_format(caps: &gst::CapsRef) -> Option<gst_video::VideoFormat> {
    if caps.is_any() {
        return PLANAR_FORMATS.first().copied();
    }

    let mut offered: Vec<String> = Vec::new();
    for structure in caps.iter().filter(|s| s.has_name("video/x-raw")) {
        let Ok(value) = structure.value("format") else {
            return PLANAR_FORMATS.first().copied();
        };
        if let Ok(name) = value.get::<String>() {
            offered.push(name);
        } else if let Ok(list) = value.get::<gst::List>() {
            offered.extend(list.iter().filter_map(|v| v.get::<String>().ok()));
        }
    }

    PLANAR_FORMATS
        .iter()
        .copied()
        .find(|format| offered.contains(&format.to_string()))
}

/// Element properties for a bitrate target and a keyframe every `gop` frames.
fn encoder_properties(element: &str, bitrate_kbps: u32, gop: u32) -> String {
    match element {
        "mfh264enc" => format!("bitrate={bitrate_kbps} gop-size={gop}"),
        "nvh264enc" => format!("bitrate={bitrate_kbps} gop-size={gop} rc-mode=cbr"),
        "x264enc" => format!(
            "bitrate={bitrate_kbps} key-int-max={gop} speed-preset=veryfast tune=zerolatency"
        ),
        "openh264enc" => format!("bitrate={} gop-size={gop}", bitrate_kbps.saturating_mul(1000)),
        _ => format!("bitrate={bitrate_kbps}"),
    }
}

/// `gst-launch` description of the encode pipeline. The appsrc blocks once
/// `queue_bytes` of raw frames are waiting, so a slow encoder throttles the
/// capture loop instead of growing the queue.
fn launch_description(element: &str, props: &str, queue_bytes: u64) -> String {
    format!(
        "appsrc name=src format=time is-live=false block=true max-bytes={queue_bytes} \
         ! {element} {props} \
         ! video/x-h264,stream-format=byte-stream,alignment=au \
         ! h264parse config-interval=-1 \
         ! appsink name=sink sync=false max-buffers=0 drop=false emit-signals=false"
    )
}

// ── GstEncoder ────────────────────────────────────────────────────────────────

/// GStreamer H.264 encode pipeline.
pub struct GstEncoder {
    pipeline:      gst::Pipeline,
    appsrc:        AppSrc,
    appsink:       AppSink,
    bus:           gst::Bus,
    element:       &'static str,
    time_base:     TimeBase,
    flush_timeout: Duration,
    eos_sent:      bool,
    /// First pipeline error seen on the bus. Once set, the pipeline is dead
    /// and every call reports it instead of pushing into a stalled appsrc.
    failed:        Option<String>,
    /// Fallback pts for samples that arrive without one.
    emitted:       i64,
}

impl GstEncoder {
    /// Create and start the encode pipeline for frames described by `info`,
    /// which must be in `choice.input_format`.
    ///
    /// Must be called after `gst::init()`.
    pub fn new(
        choice: EncoderChoice,
        info: &gst_video::VideoInfo,
        fps: u32,
        bitrate_kbps: u32,
        flush_timeout: Duration,
    ) -> Result<Self, EncoderError> {
        if fps == 0 {
            return Err(EncoderError::Pipeline("fps must be non-zero".into()));
        }
        if info.format() != choice.input_format {
            return Err(EncoderError::Pipeline(format!(
                "{} expects {:?} frames, got {:?}",
                choice.element, choice.input_format, info.format()
            )));
        }

        let element = choice.element;
        let props = encoder_properties(element, bitrate_kbps, fps.saturating_mul(2));
        let queue_bytes = (info.size() as u64).saturating_mul(QUEUED_FRAMES);
        let desc = launch_description(element, &props, queue_bytes);
        tracing::debug!("[GstEncoder] Pipeline: {}", desc);

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| EncoderError::Pipeline(format!("parse: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EncoderError::Pipeline("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| EncoderError::Pipeline("No appsrc".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| EncoderError::Pipeline("No appsink".into()))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| EncoderError::Pipeline("No bus".into()))?;

        let caps = info
            .to_caps()
            .map_err(|e| EncoderError::Pipeline(format!("input caps: {e}")))?;
        appsrc.set_caps(Some(&caps));

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Pipeline(format!("Pipeline → Playing: {e}")))?;

        tracing::info!(
            "[GstEncoder] Pipeline running: {}×{} @{}fps {}kbps ({})",
            info.width(), info.height(), fps, bitrate_kbps, element
        );

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            bus,
            element,
            time_base: TimeBase::per_frame(fps),
            flush_timeout,
            eos_sent: false,
            failed: None,
            emitted: 0,
        })
    }

    pub fn element_name(&self) -> &str {
        self.element
    }

    /// Surface an error the pipeline posted, now or on any earlier check.
    fn check_bus(&mut self) -> Result<(), EncoderError> {
        if self.failed.is_none() {
            if let Some(msg) = self.bus.pop_filtered(&[gst::MessageType::Error]) {
                if let gst::MessageView::Error(err) = msg.view() {
                    let reason = format!("{} ({:?})", err.error(), err.debug());
                    tracing::error!("[GstEncoder] {} pipeline failed: {}", self.element, reason);
                    self.failed = Some(reason);
                }
            }
        }
        match &self.failed {
            Some(reason) => Err(EncoderError::Pipeline(reason.clone())),
            None => Ok(()),
        }
    }

    fn packet_from_sample(&mut self, sample: gst::Sample) -> Result<EncodedPacket, EncoderError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| EncoderError::Pipeline("sample without buffer".into()))?;

        let to_ticks = |t: gst::ClockTime| TimeBase::NANOS.rescale(t.nseconds() as i64, self.time_base);
        let pts = buffer.pts().map(to_ticks).unwrap_or(self.emitted);
        let dts = buffer.dts().map(to_ticks);
        let duration = buffer.duration().map(to_ticks).unwrap_or(1);
        let is_keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);

        let map = buffer
            .map_readable()
            .map_err(|_| EncoderError::Pipeline("read map failed".into()))?;
        let data = Bytes::copy_from_slice(map.as_slice());

        self.emitted += 1;
        Ok(EncodedPacket {
            data,
            pts,
            dts,
            duration,
            is_keyframe,
            stream_index: 0,
            time_base: self.time_base,
        })
    }
}

impl VideoEncoder for GstEncoder {
    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn send_frame(&mut self, frame: &PlanarFrame) -> Result<(), EncoderError> {
        if self.eos_sent {
            return Err(EncoderError::EndOfStream);
        }
        self.check_bus()?;

        let start = self.time_base.rescale(frame.pts(), TimeBase::NANOS);
        let end = self.time_base.rescale(frame.pts() + 1, TimeBase::NANOS);

        let mut buffer = frame.buffer().copy();
        {
            let buf_mut = buffer.make_mut();
            buf_mut.set_pts(gst::ClockTime::from_nseconds(start as u64));
            buf_mut.set_duration(gst::ClockTime::from_nseconds((end - start) as u64));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::SubmitFailed { reason: format!("push_buffer: {e:?}") })?;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>, EncoderError> {
        if self.failed.is_some() {
            return self.check_bus().map(|()| None);
        }
        let sample = if self.eos_sent {
            let timeout = gst::ClockTime::from_mseconds(self.flush_timeout.as_millis() as u64);
            match self.appsink.try_pull_sample(timeout) {
                Some(sample) => sample,
                None if self.appsink.is_eos() => return Ok(None),
                None => {
                    self.check_bus()?;
                    return Err(EncoderError::Timeout { ms: self.flush_timeout.as_millis() as u64 });
                }
            }
        } else {
            match self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
                Some(sample) => sample,
                None => {
                    self.check_bus()?;
                    return Ok(None);
                }
            }
        };
        self.packet_from_sample(sample).map(Some)
    }

    fn send_eof(&mut self) -> Result<(), EncoderError> {
        if self.eos_sent {
            return Ok(());
        }
        self.eos_sent = true;
        self.appsrc
            .end_of_stream()
            .map_err(|e| EncoderError::SubmitFailed { reason: format!("end_of_stream: {e:?}") })?;
        tracing::debug!("[GstEncoder] EOS sent, draining {}", self.element);
        Ok(())
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// True when every named element factory is registered.
#[cfg(test)]
pub(crate) fn has_elements(names: &[&str]) -> bool {
    gst::init().is_ok() && names.iter().all(|name| gst::ElementFactory::find(name).is_some())
}

#[cfg(test)]
pub(crate) fn has_h264_encoder() -> bool {
    gst::init().is_ok() && EncoderChoice::detect().is_ok()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::convert::FrameConverter;
    use deskrec_capture_windows::{CaptureConfig, FrameSource, TestPatternSource};
    use deskrec_core::{FrameBuffer, Resolution};
    use gst_video::VideoFormat;

    fn caps(desc: &str) -> gst::Caps {
        gst::init().unwrap();
        gst::Caps::from_str(desc).unwrap()
    }

    #[test]
    fn properties_use_element_specific_units() {
        assert!(encoder_properties("x264enc", 4000, 60).contains("bitrate=4000"));
        assert!(encoder_properties("x264enc", 4000, 60).contains("key-int-max=60"));
        assert!(encoder_properties("openh264enc", 4000, 60).contains("bitrate=4000000"));
        assert!(encoder_properties("nvh264enc", 4000, 60).contains("gop-size=60"));
    }

    #[test]
    fn nv12_only_encoders_get_nv12() {
        let mf = caps(
            "video/x-raw, format=(string)NV12, width=(int)[ 64, 8192 ]; \
             video/x-raw(memory:D3D11Memory), format=(string)NV12",
        );
        assert_eq!(planar_format(&mf), Some(VideoFormat::Nv12));
    }

    #[test]
    fn i420_preferred_when_both_are_offered() {
        let x264 = caps("video/x-raw, format=(string){ Y444, NV12, I420 }");
        assert_eq!(planar_format(&x264), Some(VideoFormat::I420));
    }

    #[test]
    fn unrestricted_raw_caps_take_i420() {
        assert_eq!(planar_format(&caps("video/x-raw")), Some(VideoFormat::I420));
        assert_eq!(planar_format(&gst::Caps::new_any()), Some(VideoFormat::I420));
    }

    #[test]
    fn unusable_formats_are_rejected() {
        assert_eq!(planar_format(&caps("video/x-raw, format=(string){ P010_10LE, Y444 }")), None);
        assert_eq!(planar_format(&caps("video/x-h264")), None);
    }

    #[test]
    fn detected_encoder_takes_a_planar_format() {
        if !has_h264_encoder() {
            eprintln!("skipping: no GStreamer H.264 encoder available");
            return;
        }
        let choice = EncoderChoice::detect().unwrap();
        assert!(ENCODER_CANDIDATES.contains(&choice.element));
        assert!(PLANAR_FORMATS.contains(&choice.input_format));
    }

    #[test]
    fn appsrc_applies_backpressure() {
        let desc = launch_description("x264enc", "bitrate=4000", 6_220_800);
        assert!(desc.contains("block=true"));
        assert!(desc.contains("max-bytes=6220800"));
    }

    #[test]
    fn zero_fps_is_an_error_not_a_panic() {
        gst::init().unwrap();
        let info = gst_video::VideoInfo::builder(VideoFormat::I420, 64, 48).build().unwrap();
        let choice = EncoderChoice { element: "x264enc", input_format: VideoFormat::I420 };
        let err = GstEncoder::new(choice, &info, 0, 1000, Duration::from_secs(1))
            .err()
            .expect("fps 0 must be rejected");
        assert!(matches!(err, EncoderError::Pipeline(_)));
    }

    #[test]
    fn frames_must_match_the_chosen_format() {
        gst::init().unwrap();
        let info = gst_video::VideoInfo::builder(VideoFormat::I420, 64, 48).build().unwrap();
        let choice = EncoderChoice { element: "mfh264enc", input_format: VideoFormat::Nv12 };
        let err = GstEncoder::new(choice, &info, 30, 1000, Duration::from_secs(1))
            .err()
            .expect("I420 frames for an NV12 encoder must be rejected");
        assert!(matches!(err, EncoderError::Pipeline(_)));
    }

    #[test]
    fn negotiation_failure_sticks_and_never_blocks() {
        if !has_elements(&["x264enc", "h264parse", "appsrc", "appsink"]) {
            eprintln!("skipping: x264enc not available");
            return;
        }
        // x264enc has no BGRx sink caps, so the first buffer fails negotiation.
        let resolution = Resolution::new(64, 48);
        let converter = FrameConverter::new(resolution, 30, VideoFormat::Bgrx).unwrap();
        let frame = converter.new_frame().unwrap();
        let choice = EncoderChoice { element: "x264enc", input_format: VideoFormat::Bgrx };
        let mut encoder =
            GstEncoder::new(choice, converter.output_info(), 30, 1000, Duration::from_secs(1)).unwrap();

        let mut results = Vec::new();
        for _ in 0..20 {
            results.push(encoder.send_frame(&frame).is_ok());
            std::thread::sleep(Duration::from_millis(20));
        }
        let first_err = results.iter().position(|ok| !ok).expect("pipeline error must surface");
        assert!(results[first_err..].iter().all(|ok| !ok), "error must stick: {results:?}");
        assert!(encoder.receive_packet().is_err());

        let _ = encoder.send_eof();
        assert!(matches!(encoder.receive_packet(), Err(EncoderError::Pipeline(_))));
    }

    #[test]
    fn drains_every_submitted_frame() {
        if !has_h264_encoder() || !has_elements(&["h264parse", "appsrc", "appsink"]) {
            eprintln!("skipping: no GStreamer H.264 encoder available");
            return;
        }
        let choice = EncoderChoice::detect().unwrap();
        let resolution = Resolution::new(320, 240);
        let mut source = TestPatternSource::new(resolution, CaptureConfig::default());
        let mut converter = FrameConverter::new(resolution, 30, choice.input_format).unwrap();
        let mut frame = converter.new_frame().unwrap();
        let mut encoder =
            GstEncoder::new(choice, converter.output_info(), 30, 1000, Duration::from_secs(10)).unwrap();
        let mut buffer = FrameBuffer::new();

        assert!(encoder.appsrc.property::<bool>("block"));
        assert_eq!(
            encoder.appsrc.property::<u64>("max-bytes"),
            converter.output_info().size() as u64 * QUEUED_FRAMES
        );

        let mut packets = Vec::new();
        for pts in 0..20 {
            source.capture_into(&mut buffer).unwrap();
            converter.convert(&buffer, &mut frame).unwrap();
            frame.set_pts(pts);
            encoder.send_frame(&frame).unwrap();
            while let Some(packet) = encoder.receive_packet().unwrap() {
                packets.push(packet);
            }
        }
        encoder.send_eof().unwrap();
        while let Some(packet) = encoder.receive_packet().unwrap() {
            packets.push(packet);
        }

        assert_eq!(packets.len(), 20);
        assert!(packets[0].is_keyframe, "stream must open on a keyframe");
        assert!(packets.iter().all(|p| p.time_base == TimeBase::per_frame(30)));
        let mut pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
        pts.sort_unstable();
        assert_eq!(pts, (0..20).collect::<Vec<_>>());
        assert!(matches!(encoder.send_frame(&frame), Err(EncoderError::EndOfStream)));
    }
}
