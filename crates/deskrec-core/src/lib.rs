pub mod config;
pub mod errors;
pub mod types;

pub use config::RecorderConfig;
pub use errors::{CaptureError, EncoderError, MuxError, RecorderError};
pub use types::*;
