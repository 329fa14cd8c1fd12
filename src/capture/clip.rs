// Incremental clip file writer
//
// Writes the camera's native encoded stream (Annex-B H.264) straight to disk,
// one chunk at a time: first the drained pre-roll, then live chunks as the
// encoder produces them. No container, no metadata sidecar - the file is the
// elementary stream, playable as-is.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::ring::EncodedChunk;

/// Summary of a finalized clip
#[derive(Debug, Clone)]
pub struct ClipInfo {
    pub path: PathBuf,
    /// Content duration derived from the chunk PTS span
    pub duration: Duration,
    pub size_bytes: u64,
    pub chunks_written: u64,
}

/// Streaming writer for one recording session.
///
/// Per-chunk write errors are absorbed and counted (logged on first
/// occurrence, summarized at finish) so a transient disk hiccup mid-recording
/// never tears down the capture pipeline; only open and finalize errors
/// propagate. A partial file is always left on disk rather than deleted.
pub struct ClipWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    /// PTS of the first chunk written, used to normalize the duration span
    pts_offset: Option<u64>,
    /// End of the last written chunk (PTS + duration, nanoseconds, normalized)
    last_pts_end_ns: u64,
    chunks_written: u64,
    write_errors: u32,
    last_flush: Instant,
}

impl ClipWriter {
    /// Create the output file. Fails with an IO error if the path is not
    /// writable; the caller decides what that means for the session.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        log::info!("clip opened: {}", path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            pts_offset: None,
            last_pts_end_ns: 0,
            chunks_written: 0,
            write_errors: 0,
            last_flush: Instant::now(),
        })
    }

    /// Append one encoded chunk. Errors are absorbed; see the type docs.
    pub fn write_chunk(&mut self, chunk: &EncodedChunk) {
        let offset = *self.pts_offset.get_or_insert(chunk.pts);
        let normalized_pts = chunk.pts.saturating_sub(offset);

        if let Err(e) = self.writer.write_all(&chunk.data) {
            self.write_errors += 1;
            if self.write_errors == 1 {
                log::error!("clip write error for {}: {}", self.path.display(), e);
            }
            return;
        }

        let pts_end = normalized_pts + chunk.duration;
        if pts_end > self.last_pts_end_ns {
            self.last_pts_end_ns = pts_end;
        }
        self.chunks_written += 1;

        // Flush periodically (every 100ms) to balance crash safety and I/O overhead
        if self.last_flush.elapsed() >= Duration::from_millis(100) {
            let _ = self.writer.flush();
            self.last_flush = Instant::now();
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalize the clip: flush, close and report what was written.
    pub fn finish(mut self) -> std::io::Result<ClipInfo> {
        self.writer.flush()?;

        if self.write_errors > 0 {
            log::warn!(
                "clip {} had {} write errors; file may be incomplete",
                self.path.display(),
                self.write_errors
            );
        }

        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let info = ClipInfo {
            path: self.path,
            duration: Duration::from_nanos(self.last_pts_end_ns),
            size_bytes,
            chunks_written: self.chunks_written,
        };
        log::info!(
            "clip finalized: {} ({:.1}s, {} bytes, {} chunks)",
            info.path.display(),
            info.duration.as_secs_f64(),
            info.size_bytes,
            info.chunks_written
        );
        Ok(info)
    }
}
