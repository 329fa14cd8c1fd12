// SwingCam - instant-replay camera capture core
//
// A single camera feeds two consumers: a live preview and an on-demand
// "save the last few seconds plus what follows" recording. The sensor runs
// continuously into a pre-roll ring buffer; a record trigger arms a short
// countdown, then splices buffered-plus-live footage into a clip file while
// preview continues uninterrupted.

pub mod capture;
pub mod config;

pub use capture::{
    enumerate_cameras, CameraDevice, CaptureEngine, CaptureError, ClipInfo, EngineEvent, Frame,
    FrameOrigin, GstCamera, Mode,
};
pub use config::Config;
