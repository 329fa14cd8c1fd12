// Capture engine: composition root for the device, ring buffer, mode
// controller, workers and frame queue. This is the whole surface the
// presentation layer sees.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use super::controller::ModeController;
use super::device::{CameraDevice, KEYFRAME_INTERVAL_SECS};
use super::frame::{Frame, FrameQueue};
use super::ring::{RingBuffer, SharedRingBuffer};
use super::worker::{self, WorkerContext};
use super::{EngineEvent, Mode, Result};
use crate::config::Config;

/// Rough encoded stream rate used to cap ring buffer memory. The encoder is
/// configured at 4 Mbit/s; this leaves headroom for bursty scenes.
const ENCODED_BYTES_PER_SEC: usize = 2 * 1024 * 1024;

/// The frame-acquisition and mode-coordination pipeline.
///
/// Owns the camera, the pre-roll ring buffer, the three capture workers and
/// the frame queue. Constructed with any `CameraDevice`; production code
/// passes a `GstCamera`, tests pass a mock.
pub struct CaptureEngine {
    controller: Arc<ModeController>,
    queue: Arc<FrameQueue>,
    ring: SharedRingBuffer,
    device: Arc<dyn CameraDevice>,
    events_rx: Receiver<EngineEvent>,
    /// Taken exactly once by `shutdown`
    workers: Option<Vec<JoinHandle<()>>>,
}

impl CaptureEngine {
    /// Bring the pipeline up: output directory, ring buffer, continuous
    /// encode, workers. Fails fast when the device cannot start - that is
    /// fatal at startup and surfaced to the operator, with no retry.
    pub fn start(config: &Config, device: Arc<dyn CameraDevice>) -> Result<Self> {
        std::fs::create_dir_all(&config.output_dir)?;

        let armed_delay_secs = config.effective_armed_delay_secs();
        if armed_delay_secs != config.armed_delay_secs {
            log::warn!(
                "armed delay {}s exceeds ring buffer {}s; clamped to {}s so pre-roll stays complete",
                config.armed_delay_secs,
                config.ring_buffer_secs,
                armed_delay_secs
            );
        }

        let ring: SharedRingBuffer = Arc::new(Mutex::new(RingBuffer::new(
            config.ring_buffer_secs,
            ENCODED_BYTES_PER_SEC,
            KEYFRAME_INTERVAL_SECS,
        )));
        device.start_continuous_encode(ring.clone())?;

        let frame_interval = Duration::from_secs_f64(1.0 / config.frame_rate.max(1) as f64);
        // Two seconds of frames; a consumer further behind than that is
        // better served by dropped frames than by growing memory
        let queue = Arc::new(FrameQueue::new((config.frame_rate as usize * 2).max(8)));
        let controller = Arc::new(ModeController::new());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let workers = worker::spawn_all(WorkerContext {
            controller: controller.clone(),
            device: device.clone(),
            ring: ring.clone(),
            queue: queue.clone(),
            events: events_tx,
            frame_interval,
            still_timeout: (frame_interval * 2).max(Duration::from_millis(250)),
            armed_delay: Duration::from_secs(armed_delay_secs as u64),
            output_dir: config.output_dir.clone(),
        });

        log::info!(
            "capture engine started ({}s pre-roll, {}s armed delay, {} fps)",
            config.ring_buffer_secs,
            armed_delay_secs,
            config.frame_rate
        );

        Ok(Self {
            controller,
            queue,
            ring,
            device,
            events_rx,
            workers: Some(workers),
        })
    }

    /// Record trigger from the UI. Returns false when ignored (already
    /// armed/recording, or shut down).
    pub fn start_recording(&self) -> bool {
        self.controller.trigger_record()
    }

    /// Stop trigger from the UI. Returns false when ignored (not recording).
    pub fn stop_recording(&self) -> bool {
        self.controller.trigger_stop()
    }

    pub fn current_mode(&self) -> Mode {
        self.controller.current_mode()
    }

    /// Pull interface for the rendering consumer; `None` is the normal
    /// nothing-new-yet answer.
    pub fn next_frame(&self) -> Option<Frame> {
        self.queue.pop()
    }

    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    /// Operator notification channel (recording started / finished / failed).
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events_rx
    }

    /// Wall-clock span currently held in the pre-roll buffer.
    pub fn buffered_preroll(&self) -> Duration {
        self.ring.lock().buffered_duration()
    }

    /// Graceful unwind: workers told to exit and joined (the recording
    /// worker finalizes any in-flight clip on its way out), then the encoder
    /// is stopped and the device closed. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        log::info!("capture engine shutting down");
        self.controller.shutdown();
        for handle in workers {
            if handle.join().is_err() {
                log::error!("capture worker panicked during shutdown");
            }
        }
        if let Err(e) = self.device.stop_continuous_encode() {
            log::warn!("stopping continuous encode failed: {e}");
        }
        if let Err(e) = self.device.close() {
            log::warn!("closing camera failed: {e}");
        }
        self.queue.clear();
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
