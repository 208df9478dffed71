//! deskrec-windows-recorder: the recording pipeline behind the `deskrec`
//! binary, usable with any [`FrameSource`](deskrec_capture_windows::FrameSource)
//! and [`ExitCondition`].

pub mod convert;
pub mod encoder;
pub mod exit;
pub mod muxer;
pub mod pacing;
pub mod recorder;

pub use convert::{FrameConverter, PlanarFrame};
pub use encoder::{EncoderChoice, GstEncoder, VideoEncoder};
pub use exit::{ExitCondition, FrameLimit, StopFlag};
pub use muxer::{ContainerSummary, Mp4Muxer, PacketSink};
pub use pacing::{FrameClock, Pacing};
pub use recorder::{Recorder, RecordingStats, Recording, StopReason};
