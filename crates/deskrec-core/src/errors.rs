use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Primary display size unavailable")]
    DisplayUnavailable,

    #[error("Screen capture is not supported on {platform}")]
    Unsupported { platform: &'static str },

    #[error("GDI call {call} failed")]
    Gdi { call: &'static str },

    #[error("Win32 call {call} failed: {reason}")]
    Win32 { call: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("No H.264 encoder element available")]
    NoEncoder,

    #[error("GStreamer pipeline error: {0}")]
    Pipeline(String),

    #[error("Frame layout mismatch: expected {expected} bytes, got {actual}")]
    Layout { expected: usize, actual: usize },

    #[error("Failed to convert frame: {reason}")]
    ConversionFailed { reason: String },

    #[error("Failed to submit frame: {reason}")]
    SubmitFailed { reason: String },

    #[error("Frame submitted after end of stream")]
    EndOfStream,

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },
}

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("GStreamer pipeline error: {0}")]
    Pipeline(String),

    #[error("Failed to write packet: {reason}")]
    WriteFailed { reason: String },

    #[error("Failed to finalize container: {reason}")]
    FinalizeFailed { reason: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
