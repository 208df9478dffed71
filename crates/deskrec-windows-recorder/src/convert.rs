//! BGRx → planar (I420 or NV12) colour-space conversion via GStreamer's
//! `VideoConverter`.
//!
//! The planar format is whatever the selected encoder takes on its sink pad.
//! Same size in and out, fixed bilinear resampling for luma and chroma, no
//! letterboxing or cropping.

use deskrec_core::{EncoderError, FrameBuffer, Resolution};
use gstreamer as gst;
use gstreamer_video as gst_video;

fn video_info(
    format: gst_video::VideoFormat,
    resolution: Resolution,
    fps: u32,
) -> Result<gst_video::VideoInfo, EncoderError> {
    gst_video::VideoInfo::builder(format, resolution.width, resolution.height)
        .fps(gst::Fraction::new(fps as i32, 1))
        .build()
        .map_err(|e| EncoderError::Pipeline(format!("VideoInfo {format:?} {resolution}: {e}")))
}

// ── PlanarFrame ───────────────────────────────────────────────────────────────

/// The encoder-side frame: one planar buffer owned by the capture loop and
/// repopulated every iteration.
///
/// Handing it to the encoder takes a shallow copy; the next conversion maps
/// it writable, which copies the memory first if the encoder still holds it.
pub struct PlanarFrame {
    buffer: gst::Buffer,
    pts:    i64,
}

impl PlanarFrame {
    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn buffer(&self) -> &gst::BufferRef {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.size()
    }
}

// ── FrameConverter ────────────────────────────────────────────────────────────

pub struct FrameConverter {
    converter: gst_video::VideoConverter,
    in_info:   gst_video::VideoInfo,
    out_info:  gst_video::VideoInfo,
    /// Reused GStreamer copy of the captured pixels.
    staging:   gst::Buffer,
}

impl FrameConverter {
    /// Build a converter from captured BGRx to `format` at `resolution`.
    /// Requires `gst::init()`.
    pub fn new(
        resolution: Resolution,
        fps: u32,
        format: gst_video::VideoFormat,
    ) -> Result<Self, EncoderError> {
        let in_info = video_info(gst_video::VideoFormat::Bgrx, resolution, fps)?;
        let out_info = video_info(format, resolution, fps)?;

        let mut config = gst_video::VideoConverterConfig::new();
        config.set_resampler_method(gst_video::VideoResamplerMethod::Linear);
        config.set_chroma_resampler_method(gst_video::VideoResamplerMethod::Linear);

        let converter = gst_video::VideoConverter::new(&in_info, &out_info, Some(config))
            .map_err(|e| EncoderError::Pipeline(format!("VideoConverter: {e}")))?;
        let staging = gst::Buffer::with_size(in_info.size())
            .map_err(|e| EncoderError::Pipeline(format!("staging buffer: {e}")))?;

        tracing::debug!(
            "[FrameConverter] {} BGRx({}B) → {:?}({}B)",
            resolution, in_info.size(), format, out_info.size()
        );
        Ok(Self { converter, in_info, out_info, staging })
    }

    pub fn output_info(&self) -> &gst_video::VideoInfo {
        &self.out_info
    }

    /// Allocate the single planar frame the loop reuses.
    pub fn new_frame(&self) -> Result<PlanarFrame, EncoderError> {
        let buffer = gst::Buffer::with_size(self.out_info.size())
            .map_err(|e| EncoderError::Pipeline(format!("planar buffer: {e}")))?;
        Ok(PlanarFrame { buffer, pts: 0 })
    }

    /// Convert the captured frame in `src` into `dst`. The pts of `dst` is left alone.
    pub fn convert(&mut self, src: &FrameBuffer, dst: &mut PlanarFrame) -> Result<(), EncoderError> {
        let pixels = src.frame();
        if pixels.len() != self.in_info.size() {
            return Err(EncoderError::Layout { expected: self.in_info.size(), actual: pixels.len() });
        }
        if dst.len() != self.out_info.size() {
            return Err(EncoderError::Layout { expected: self.out_info.size(), actual: dst.len() });
        }

        self.staging
            .make_mut()
            .copy_from_slice(0, pixels)
            .map_err(|copied| EncoderError::ConversionFailed {
                reason: format!("staging copy stopped after {copied} bytes"),
            })?;

        let in_frame = gst_video::VideoFrameRef::from_buffer_ref_readable(&self.staging, &self.in_info)
            .map_err(|e| EncoderError::ConversionFailed { reason: format!("map source: {e}") })?;
        let mut out_frame =
            gst_video::VideoFrameRef::from_buffer_ref_writable(dst.buffer.make_mut(), &self.out_info)
                .map_err(|e| EncoderError::ConversionFailed { reason: format!("map target: {e}") })?;

        self.converter.frame_ref(&in_frame, &mut out_frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrec_core::BYTES_PER_PIXEL;
    use gst_video::prelude::*;
    use gst_video::VideoFormat;

    fn solid(resolution: Resolution, bgrx: [u8; 4]) -> FrameBuffer {
        let mut buffer = FrameBuffer::new();
        for px in buffer.prepare(resolution).chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&bgrx);
        }
        buffer
    }

    /// (min, max) of each I420 plane.
    fn plane_ranges(converter: &FrameConverter, frame: &PlanarFrame) -> Vec<(u8, u8)> {
        let info = converter.output_info();
        let view = gst_video::VideoFrameRef::from_buffer_ref_readable(frame.buffer(), info).unwrap();
        (0..3)
            .map(|plane| {
                let data = view.plane_data(plane).unwrap();
                let stride = view.plane_stride()[plane as usize] as usize;
                let comp_width = info.comp_width(plane as u8) as usize;
                let comp_height = info.comp_height(plane as u8) as usize;
                let mut range = (u8::MAX, u8::MIN);
                for row in data.chunks(stride).take(comp_height) {
                    for &v in &row[..comp_width] {
                        range = (range.0.min(v), range.1.max(v));
                    }
                }
                range
            })
            .collect()
    }

    fn assert_near(range: (u8, u8), expected: u8) {
        let ok = |v: u8| (v as i16 - expected as i16).abs() <= 2;
        assert!(ok(range.0) && ok(range.1), "{range:?} not within ±2 of {expected}");
    }

    #[test]
    fn converts_white_and_black_to_video_range() {
        gst::init().unwrap();
        let resolution = Resolution::new(64, 48);
        let mut converter = FrameConverter::new(resolution, 30, VideoFormat::I420).unwrap();
        let mut frame = converter.new_frame().unwrap();

        converter.convert(&solid(resolution, [255, 255, 255, 0]), &mut frame).unwrap();
        let ranges = plane_ranges(&converter, &frame);
        assert_near(ranges[0], 235);
        assert_near(ranges[1], 128);
        assert_near(ranges[2], 128);

        converter.convert(&solid(resolution, [0, 0, 0, 0]), &mut frame).unwrap();
        let ranges = plane_ranges(&converter, &frame);
        assert_near(ranges[0], 16);
        assert_near(ranges[1], 128);
        assert_near(ranges[2], 128);
    }

    #[test]
    fn reuses_frame_while_encoder_holds_a_copy() {
        gst::init().unwrap();
        let resolution = Resolution::new(32, 32);
        let mut converter = FrameConverter::new(resolution, 30, VideoFormat::I420).unwrap();
        let mut frame = converter.new_frame().unwrap();

        converter.convert(&solid(resolution, [0, 0, 0, 0]), &mut frame).unwrap();
        let held = frame.buffer().copy();

        converter.convert(&solid(resolution, [255, 255, 255, 0]), &mut frame).unwrap();
        assert_near(plane_ranges(&converter, &frame)[0], 235);

        let info = converter.output_info();
        let view = gst_video::VideoFrameRef::from_buffer_ref_readable(&held, info).unwrap();
        let first = view.plane_data(0).unwrap()[0];
        assert!((first as i16 - 16).abs() <= 2, "held copy was overwritten: {first}");
    }

    #[test]
    fn converts_to_nv12_for_encoders_that_need_it() {
        gst::init().unwrap();
        let resolution = Resolution::new(64, 48);
        let mut converter = FrameConverter::new(resolution, 30, VideoFormat::Nv12).unwrap();
        let mut frame = converter.new_frame().unwrap();
        assert_eq!(converter.output_info().format(), VideoFormat::Nv12);

        converter.convert(&solid(resolution, [255, 255, 255, 0]), &mut frame).unwrap();
        let view =
            gst_video::VideoFrameRef::from_buffer_ref_readable(frame.buffer(), converter.output_info())
                .unwrap();
        assert_eq!(view.n_planes(), 2);

        let luma = &view.plane_data(0).unwrap()[..64];
        assert!(luma.iter().all(|&y| (y as i16 - 235).abs() <= 2), "luma {luma:?}");
        // Interleaved U/V, one pair per 2×2 block.
        let chroma = &view.plane_data(1).unwrap()[..64];
        assert!(chroma.iter().all(|&c| (c as i16 - 128).abs() <= 2), "chroma {chroma:?}");
    }

    #[test]
    fn rejects_mismatched_source_size() {
        gst::init().unwrap();
        let mut converter = FrameConverter::new(Resolution::new(64, 48), 30, VideoFormat::I420).unwrap();
        let mut frame = converter.new_frame().unwrap();
        let small = solid(Resolution::new(32, 24), [0, 0, 0, 0]);

        let err = converter.convert(&small, &mut frame).unwrap_err();
        assert!(matches!(err, EncoderError::Layout { expected, actual }
            if expected == 64 * 48 * 4 && actual == 32 * 24 * 4));
    }
}
