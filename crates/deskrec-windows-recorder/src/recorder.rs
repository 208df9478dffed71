//! `Recorder`: the capture → convert → encode → mux loop.
//!
//! Each iteration, in order:
//! 1. capture into the reused [`FrameBuffer`] (border + cursor already drawn)
//! 2. convert BGRx → the encoder's planar format into the reused [`PlanarFrame`]
//! 3. stamp the next pts (0, 1, 2, …; only frames the encoder accepted count)
//! 4. submit, then drain every packet the encoder has ready
//! 5. rescale each packet to the stream time base, tag it, append it
//! 6. sleep until `start + n·interval`
//!
//! On exit: EOF to the encoder, drain the rest through the same path, then
//! finalize the container. Capture, convert and submit failures skip the
//! frame; a run of `max_consecutive_failures` of them (or of encoder errors
//! while draining) ends the recording early, still finalized. A packet the
//! container refuses is counted as dropped and does not fail the frame.

use std::time::Duration;

use deskrec_capture_windows::FrameSource;
use deskrec_core::{FrameBuffer, MuxError, RecorderConfig, RecorderError, StreamInfo};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::convert::{FrameConverter, PlanarFrame};
use crate::encoder::VideoEncoder;
use crate::exit::ExitCondition;
use crate::muxer::{ContainerSummary, PacketSink};
use crate::pacing::FrameClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ExitRequested,
    TooManyFailures,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordingStats {
    pub frames_captured:        u64,
    pub frames_encoded:         u64,
    /// Frames that never reached the encoder (capture, convert or submit failed).
    pub frames_skipped:         u64,
    pub frames_late:            u64,
    pub packets_during_capture: u64,
    pub packets_during_flush:   u64,
    pub packets_written:        u64,
    pub packets_dropped:        u64,
    pub bytes_written:          u64,
    pub stop_reason:            Option<StopReason>,
    pub container:              Option<ContainerSummary>,
}

/// Result of a full run: statistics are always available, the outcome says
/// whether flush and finalize succeeded.
pub struct Recording {
    pub stats:   RecordingStats,
    pub outcome: Result<ContainerSummary, RecorderError>,
}

#[derive(Clone, Copy)]
enum Phase {
    Capture,
    Flush,
}

pub struct Recorder<S, E, M> {
    source:    S,
    converter: FrameConverter,
    encoder:   E,
    muxer:     M,
    stream:    StreamInfo,
    buffer:    FrameBuffer,
    frame:     PlanarFrame,
    interval:  Duration,
    max_consecutive_failures: u32,
    next_pts:  i64,
    stats:     RecordingStats,
}

impl<S, E, M> Recorder<S, E, M>
where
    S: FrameSource,
    E: VideoEncoder,
    M: PacketSink,
{
    /// Wire the stages together and allocate the per-loop buffers once.
    pub fn new(
        source: S,
        converter: FrameConverter,
        encoder: E,
        muxer: M,
        config: &RecorderConfig,
    ) -> Result<Self, RecorderError> {
        config.validate()?;
        let frame = converter.new_frame()?;
        let buffer = FrameBuffer::with_capacity(source.resolution().frame_bytes());
        let stream = muxer.stream();

        debug!(
            "[Recorder] {} encoder tb {} → stream #{} tb {}",
            source.resolution(), encoder.time_base(), stream.index, stream.time_base
        );

        Ok(Self {
            source,
            converter,
            encoder,
            muxer,
            stream,
            buffer,
            frame,
            interval: config.frame_interval(),
            max_consecutive_failures: config.max_consecutive_failures,
            next_pts: 0,
            stats: RecordingStats::default(),
        })
    }

    /// Record until `exit` fires, then flush and finalize.
    pub fn run<X: ExitCondition>(mut self, exit: &mut X) -> Recording {
        info!("[Recorder] Recording {} every {:?}", self.source.resolution(), self.interval);

        let mut clock = FrameClock::start_now(self.interval);
        let mut consecutive_failures = 0u32;

        let stop_reason = loop {
            if exit.should_exit() {
                break StopReason::ExitRequested;
            }

            match self.record_frame() {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!("[Recorder] Frame {} failed: {e}", clock.frame());
                    if self.max_consecutive_failures > 0
                        && consecutive_failures >= self.max_consecutive_failures
                    {
                        error!("[Recorder] {consecutive_failures} consecutive frame failures, stopping");
                        break StopReason::TooManyFailures;
                    }
                }
            }

            let pacing = clock.wait();
            if pacing.lag > self.interval {
                self.stats.frames_late += 1;
                debug!("[Recorder] {:?} behind schedule at frame {}", pacing.lag, clock.frame());
            }
        };

        self.finish(stop_reason)
    }

    fn record_frame(&mut self) -> Result<(), RecorderError> {
        if let Err(e) = self.submit_frame() {
            self.stats.frames_skipped += 1;
            return Err(e);
        }
        // Refused packets are already counted in `packets_dropped`.
        let _refused = self.drain(Phase::Capture)?;
        Ok(())
    }

    fn submit_frame(&mut self) -> Result<(), RecorderError> {
        self.source.capture_into(&mut self.buffer)?;
        self.stats.frames_captured += 1;

        self.converter.convert(&self.buffer, &mut self.frame)?;

        self.frame.set_pts(self.next_pts);
        self.encoder.send_frame(&self.frame)?;
        self.next_pts += 1;
        self.stats.frames_encoded += 1;
        Ok(())
    }

    /// Move every ready packet from the encoder into the container. Keeps
    /// draining past a refused write so later packets are not lost, and
    /// returns the first refusal. `Err` is reserved for encoder failures.
    fn drain(&mut self, phase: Phase) -> Result<Option<MuxError>, RecorderError> {
        let mut first_error = None;

        while let Some(mut packet) = self.encoder.receive_packet()? {
            packet.rescale_ts(self.stream.time_base);
            packet.stream_index = self.stream.index;

            match self.muxer.write_packet(&packet) {
                Ok(()) => {
                    match phase {
                        Phase::Capture => self.stats.packets_during_capture += 1,
                        Phase::Flush => self.stats.packets_during_flush += 1,
                    }
                    self.stats.packets_written += 1;
                    self.stats.bytes_written += packet.data.len() as u64;
                }
                Err(e) => {
                    self.stats.packets_dropped += 1;
                    warn!("[Recorder] Packet pts={} dropped: {e}", packet.pts);
                    first_error.get_or_insert(e);
                }
            }
        }

        Ok(first_error)
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        self.encoder.send_eof()?;
        match self.drain(Phase::Flush)? {
            Some(refused) => Err(refused.into()),
            None => Ok(()),
        }
    }

    fn finish(mut self, stop_reason: StopReason) -> Recording {
        self.stats.stop_reason = Some(stop_reason);

        let flushed = self.flush();
        if let Err(e) = &flushed {
            error!("[Recorder] Encoder flush failed: {e}");
        }

        let Self { muxer, mut stats, .. } = self;
        let outcome = match muxer.finish() {
            Ok(summary) => {
                stats.container = Some(summary.clone());
                flushed.map(|()| summary)
            }
            Err(e) => {
                error!("[Recorder] Container finalize failed: {e}");
                Err(e.into())
            }
        };

        info!(
            "[Recorder] Stopped ({:?}): {} frames encoded, {} packets written ({} during flush)",
            stop_reason, stats.frames_encoded, stats.packets_written, stats.packets_during_flush
        );
        Recording { stats, outcome }
    }
}
