// Capture core: camera device, pre-roll ring buffer, mode coordination,
// per-mode workers and the frame hand-off queue.

pub mod clip;
pub mod controller;
pub mod device;
pub mod engine;
pub mod frame;
pub mod ring;
pub(crate) mod worker;

pub use clip::{ClipInfo, ClipWriter};
pub use controller::ModeController;
pub use device::{enumerate_cameras, CameraDevice, GstCamera};
pub use engine::CaptureEngine;
pub use frame::{Frame, FrameOrigin, FrameQueue};
pub use ring::{EncodedChunk, RingBuffer, SharedRingBuffer};

use std::path::PathBuf;
use std::time::Duration;

/// Error type for capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("still capture timed out after {0:?}")]
    CaptureTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Current operating mode. Exactly one is active at any instant; the
/// ModeController is the single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live preview frames only
    Preview,
    /// Record trigger received, counting down the armed delay
    Armed,
    /// Splice open, encoded stream appending to the clip file
    Recording,
}

/// Notifications surfaced to the operator / presentation layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Splice opened; `preroll` is the buffered duration captured into the file
    RecordingStarted { path: PathBuf, preroll: Duration },
    /// Clip finalized and closed
    RecordingFinished(ClipInfo),
    /// Recording session aborted (splice or finalize failure); any partial
    /// file is retained on disk
    RecordingFailed { reason: String },
}
