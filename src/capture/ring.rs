// Pre-roll ring buffer for the encoded stream
//
// Continuously fed by the camera's background encoder while the device is
// open. Retains the most recent N seconds regardless of mode; content is only
// ever read at the moment a splice is requested. On splice, buffered chunks
// are written to a new clip file and subsequent pushes are routed to that
// same file until the splice is stopped.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::clip::{ClipInfo, ClipWriter};
use super::{CaptureError, Result};

/// One encoded piece of the stream (for H.264, an access unit).
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
    /// Duration in nanoseconds
    pub duration: u64,
    /// Wall-clock time when the encoder emitted the chunk (used for trimming)
    pub wall_time: Instant,
    /// Delta/inter frame flag; the buffer must always start at a keyframe or
    /// the spliced file opens with undecodable frames
    pub is_delta_unit: bool,
}

pub type SharedRingBuffer = Arc<Mutex<RingBuffer>>;

/// Fixed-duration circular store of encoded video.
pub struct RingBuffer {
    chunks: VecDeque<EncodedChunk>,
    /// Configured pre-roll window
    max_duration: Duration,
    /// Extra retention beyond `max_duration` so the keyframe-alignment pass
    /// below never eats into the requested window. With keyframes every 2s
    /// and a 5s window we retain ~7s by time, then strip to the first
    /// keyframe, leaving >= 5s of usable pre-roll.
    keyframe_headroom: Duration,
    /// Byte cap guarding against encoders that outrun the estimate
    max_bytes: usize,
    current_bytes: usize,
    /// When Some, pushes are routed to the clip instead of the buffer
    active_clip: Option<ClipWriter>,
}

impl RingBuffer {
    /// `bytes_per_sec` is an estimate of the encoded stream rate used to cap
    /// memory; `keyframe_interval_secs` must match the encoder's keyframe
    /// spacing.
    pub fn new(max_secs: u32, bytes_per_sec: usize, keyframe_interval_secs: u32) -> Self {
        let keyframe_headroom = Duration::from_secs(keyframe_interval_secs as u64);
        let total_secs = max_secs as u64 + keyframe_interval_secs as u64;
        Self {
            chunks: VecDeque::new(),
            max_duration: Duration::from_secs(max_secs as u64),
            keyframe_headroom,
            max_bytes: bytes_per_sec * total_secs as usize,
            current_bytes: 0,
            active_clip: None,
        }
    }

    /// Append a chunk. Routes to the active clip while a splice is open,
    /// otherwise into the ring with the oldest data evicted as needed.
    pub fn push(&mut self, chunk: EncodedChunk) {
        if let Some(clip) = self.active_clip.as_mut() {
            clip.write_chunk(&chunk);
            return;
        }
        self.current_bytes += chunk.data.len();
        self.chunks.push_back(chunk);
        self.trim();
    }

    fn trim(&mut self) {
        let retention = self.max_duration + self.keyframe_headroom;
        let Some(cutoff) = Instant::now().checked_sub(retention) else {
            return;
        };

        // Trim by time and by the byte cap
        while let Some(front) = self.chunks.front() {
            if front.wall_time < cutoff || self.current_bytes > self.max_bytes {
                if let Some(removed) = self.chunks.pop_front() {
                    self.current_bytes = self.current_bytes.saturating_sub(removed.data.len());
                }
            } else {
                break;
            }
        }

        // The time-based trim may leave a delta frame at the front, which
        // can't be decoded without its reference keyframe. Strip to the next
        // keyframe so a splice always opens on a clean GOP.
        while let Some(front) = self.chunks.front() {
            if front.is_delta_unit {
                if let Some(removed) = self.chunks.pop_front() {
                    self.current_bytes = self.current_bytes.saturating_sub(removed.data.len());
                }
            } else {
                break;
            }
        }
    }

    /// Open a clip at `path`, write the current buffer contents to it, and
    /// direct subsequent pushes to the same file until `stop_splice`.
    ///
    /// Returns the pre-roll duration captured into the file (time from the
    /// oldest buffered chunk to now). Pre-roll is best-effort: it is bounded
    /// by the configured buffer duration, so a splice requested late simply
    /// captures less.
    ///
    /// On failure the buffer is left untouched so a retriggered recording
    /// still has its pre-roll.
    pub fn splice(&mut self, path: &Path) -> Result<Duration> {
        if self.active_clip.is_some() {
            return Err(CaptureError::Pipeline(
                "splice already active; one recording at a time".to_string(),
            ));
        }

        let mut clip = ClipWriter::create(path)?;

        let preroll = self
            .chunks
            .front()
            .map(|c| c.wall_time.elapsed())
            .unwrap_or(Duration::ZERO);

        let buffered: Vec<EncodedChunk> = self.chunks.drain(..).collect();
        self.current_bytes = 0;
        log::info!(
            "splice opened: {} ({} buffered chunks, {:.1}s pre-roll)",
            path.display(),
            buffered.len(),
            preroll.as_secs_f64()
        );
        for chunk in &buffered {
            clip.write_chunk(chunk);
        }

        self.active_clip = Some(clip);
        Ok(preroll)
    }

    /// Finalize the active clip, if any, and resume buffering. Returns `None`
    /// when no splice is active, which makes teardown safe to run twice.
    pub fn stop_splice(&mut self) -> Option<Result<ClipInfo>> {
        let clip = self.active_clip.take()?;
        Some(clip.finish().map_err(CaptureError::Io))
    }

    pub fn is_splicing(&self) -> bool {
        self.active_clip.is_some()
    }

    /// Wall-clock span of buffered content
    pub fn buffered_duration(&self) -> Duration {
        match (self.chunks.front(), self.chunks.back()) {
            (Some(first), Some(last)) => last.wall_time.duration_since(first.wall_time),
            _ => Duration::ZERO,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_at(payload: &[u8], age: Duration, keyframe: bool) -> EncodedChunk {
        EncodedChunk {
            data: payload.to_vec(),
            pts: 0,
            duration: 33_000_000,
            wall_time: Instant::now().checked_sub(age).unwrap(),
            is_delta_unit: !keyframe,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn evicts_chunks_older_than_retention() {
        // 5s window + 2s keyframe headroom = 7s retention
        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        ring.push(chunk_at(b"old", secs(10), true));
        ring.push(chunk_at(b"kept", secs(3), true));
        ring.push(chunk_at(b"fresh", secs(0), true));
        assert_eq!(ring.chunk_count(), 2);
    }

    #[test]
    fn strips_leading_delta_frames_after_trim() {
        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        ring.push(chunk_at(b"stale-key", secs(10), true));
        ring.push(chunk_at(b"orphan-delta", secs(4), false));
        ring.push(chunk_at(b"orphan-delta", secs(4), false));
        ring.push(chunk_at(b"keyframe", secs(3), true));
        ring.push(chunk_at(b"delta", secs(2), false));
        // Stale keyframe evicted by time, then the orphaned deltas stripped
        assert_eq!(ring.chunk_count(), 2);
    }

    #[test]
    fn byte_cap_bounds_memory() {
        // 1 byte/sec estimate: cap = 1 * (1 + 2) = 3 bytes
        let mut ring = RingBuffer::new(1, 1, 2);
        for _ in 0..10 {
            ring.push(chunk_at(b"xx", secs(0), true));
        }
        assert!(ring.chunk_count() <= 2);
    }

    #[test]
    fn splice_writes_preroll_then_routes_live_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h264");

        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        ring.push(chunk_at(b"pre1-", secs(2), true));
        ring.push(chunk_at(b"pre2-", secs(1), false));

        let preroll = ring.splice(&path).unwrap();
        assert!(preroll >= secs(2));
        assert!(ring.is_splicing());
        assert_eq!(ring.chunk_count(), 0);

        // Live chunks append to the same file, not the buffer
        ring.push(chunk_at(b"live1-", secs(0), false));
        ring.push(chunk_at(b"live2", secs(0), false));
        assert_eq!(ring.chunk_count(), 0);

        let info = ring.stop_splice().unwrap().unwrap();
        assert!(!ring.is_splicing());
        assert_eq!(info.chunks_written, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"pre1-pre2-live1-live2");
    }

    #[test]
    fn preroll_content_has_no_gap_or_duplication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h264");

        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        for (i, age) in [4u64, 3, 2, 1].iter().enumerate() {
            ring.push(chunk_at(format!("{i}").as_bytes(), secs(*age), true));
        }
        ring.splice(&path).unwrap();
        ring.stop_splice().unwrap().unwrap();

        // Exactly the buffered window, in order, once
        assert_eq!(std::fs::read(&path).unwrap(), b"0123");
    }

    #[test]
    fn splice_on_unwritable_path_preserves_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out.h264");

        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        ring.push(chunk_at(b"kept", secs(1), true));

        let err = ring.splice(&path).unwrap_err();
        assert!(matches!(err, CaptureError::Io(_)));
        assert!(!ring.is_splicing());
        assert_eq!(ring.chunk_count(), 1);
    }

    #[test]
    fn second_splice_while_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        ring.push(chunk_at(b"x", secs(0), true));

        ring.splice(&dir.path().join("a.h264")).unwrap();
        let err = ring.splice(&dir.path().join("b.h264")).unwrap_err();
        assert!(matches!(err, CaptureError::Pipeline(_)));
        ring.stop_splice().unwrap().unwrap();
    }

    #[test]
    fn stop_splice_without_active_clip_is_none() {
        let mut ring = RingBuffer::new(5, 1024 * 1024, 2);
        assert!(ring.stop_splice().is_none());
        // And again, for the double-shutdown path
        assert!(ring.stop_splice().is_none());
    }
}
