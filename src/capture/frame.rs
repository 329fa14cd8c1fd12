// Decoded frames and the producer-to-consumer hand-off queue

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Which worker produced a frame. Only one mode produces at a time, so the
/// tag is informational for the consumer (e.g. tinting an armed countdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameOrigin {
    Preview,
    Armed,
}

/// A decoded RGB image handed from a capture worker to the consumer.
/// Immutable once produced; the pixel data is shared so cloning out of the
/// device's latest-frame cell is cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Whether the source applied a horizontal flip
    pub flipped: bool,
    pub origin: FrameOrigin,
    /// Wall-clock time when the sensor delivered the frame
    pub captured_at: Instant,
}

struct QueueInner {
    frames: VecDeque<Frame>,
    capacity: usize,
    /// Total frames dropped to the ceiling since creation
    dropped: u64,
    /// Whether the current overflow episode has been logged
    overflow_logged: bool,
}

/// Ordered hand-off of frames to the single rendering consumer.
///
/// `push` never blocks: when the ceiling is hit the oldest frame is dropped,
/// which keeps a slow consumer from growing memory while the producer stays
/// paced at the camera frame rate. `pop` returning `None` is a normal,
/// expected condition, not an error.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity.min(64)),
                capacity: capacity.max(1),
                dropped: 0,
                overflow_logged: false,
            }),
        }
    }

    /// Enqueue a frame, evicting the oldest one when the ceiling is reached.
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= inner.capacity {
            inner.frames.pop_front();
            inner.dropped += 1;
            if !inner.overflow_logged {
                log::warn!(
                    "frame queue full ({} frames); consumer is falling behind, dropping oldest",
                    inner.capacity
                );
                inner.overflow_logged = true;
            }
        }
        inner.frames.push_back(frame);
    }

    /// Dequeue the next frame in producer order, if any.
    pub fn pop(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        let frame = inner.frames.pop_front();
        if inner.frames.is_empty() {
            // Queue drained: the next overflow is a new episode
            inner.overflow_logged = false;
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    /// Total frames dropped to the ceiling since creation
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}
