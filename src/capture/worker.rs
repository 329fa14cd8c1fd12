// Per-mode capture worker loops
//
// One thread per mode. A worker parks on the controller while its mode is
// inactive; while active it paces at the configured frame rate, grabs a
// still, tags it and pushes it to the frame queue. The armed worker also
// drives the Armed -> Recording transition: it opens the splice BEFORE
// advancing the mode so no encoded bytes fall between pre-roll and live
// data. The recording worker blocks for the whole session and runs splice
// teardown on its way out, including the shutdown path; teardown leaves the
// splice alone when a successor session already owns it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::controller::{ModeController, PaceOutcome};
use super::device::CameraDevice;
use super::frame::{FrameOrigin, FrameQueue};
use super::ring::{RingBuffer, SharedRingBuffer};
use super::{EngineEvent, Mode};

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub controller: Arc<ModeController>,
    pub device: Arc<dyn CameraDevice>,
    pub ring: SharedRingBuffer,
    pub queue: Arc<FrameQueue>,
    pub events: Sender<EngineEvent>,
    /// Fixed inter-frame pacing interval (1 / frame rate)
    pub frame_interval: Duration,
    /// How long a single still grab may wait for a fresh sensor frame
    pub still_timeout: Duration,
    /// Delay between the record trigger and the splice (clamped to the ring
    /// duration by the engine)
    pub armed_delay: Duration,
    pub output_dir: PathBuf,
}

pub(crate) fn spawn_all(ctx: WorkerContext) -> Vec<JoinHandle<()>> {
    let preview = {
        let ctx = ctx.clone();
        std::thread::spawn(move || preview_loop(ctx))
    };
    let armed = {
        let ctx = ctx.clone();
        std::thread::spawn(move || armed_loop(ctx))
    };
    let recording = std::thread::spawn(move || recording_loop(ctx));
    vec![preview, armed, recording]
}

fn preview_loop(ctx: WorkerContext) {
    loop {
        if !ctx.controller.wait_for_mode(Mode::Preview) {
            break;
        }
        match ctx.controller.paced_wait(Mode::Preview, ctx.frame_interval) {
            PaceOutcome::Shutdown => break,
            PaceOutcome::Superseded => continue,
            PaceOutcome::Elapsed => {}
        }
        capture_into_queue(&ctx, FrameOrigin::Preview);
    }
    log::debug!("preview worker exited");
}

fn armed_loop(ctx: WorkerContext) {
    loop {
        if !ctx.controller.wait_for_mode(Mode::Armed) {
            break;
        }

        let elapsed = ctx.controller.armed_elapsed().unwrap_or_default();
        if elapsed >= ctx.armed_delay {
            begin_recording(&ctx);
            continue;
        }

        // Pace at the frame rate, but never sleep past the delay deadline
        let remaining = ctx.armed_delay - elapsed;
        match ctx
            .controller
            .paced_wait(Mode::Armed, remaining.min(ctx.frame_interval))
        {
            PaceOutcome::Shutdown => break,
            PaceOutcome::Superseded => continue,
            PaceOutcome::Elapsed => {}
        }
        if ctx.controller.armed_elapsed().unwrap_or_default() >= ctx.armed_delay {
            begin_recording(&ctx);
            continue;
        }
        capture_into_queue(&ctx, FrameOrigin::Armed);
    }
    log::debug!("armed worker exited");
}

fn recording_loop(ctx: WorkerContext) {
    loop {
        if ctx.controller.wait_for_mode(Mode::Recording) {
            // Suspend for the duration of the session; wakes on the stop
            // trigger, a session abort or shutdown
            ctx.controller.wait_while_mode(Mode::Recording);
        }
        // Teardown also runs when the wait was cut short by shutdown, so an
        // in-flight clip is still finalized
        finalize_session(&ctx);
        if ctx.controller.is_shutdown() {
            break;
        }
    }
    log::debug!("recording worker exited");
}

/// Grab one still and hand it to the consumer queue. Capture failures are
/// absorbed here: the frame is simply missing this tick and the worker
/// carries on, they never reach the controller.
fn capture_into_queue(ctx: &WorkerContext, origin: FrameOrigin) {
    match ctx.device.capture_still(ctx.still_timeout) {
        Ok(mut frame) => {
            frame.origin = origin;
            ctx.queue.push(frame);
        }
        Err(e) => log::debug!("{origin:?} frame dropped: {e}"),
    }
}

/// Open the splice and advance to Recording. On splice failure the session
/// aborts back to Preview with the partial state intact and the operator
/// notified; the ring keeps its buffered pre-roll for a retrigger.
///
/// The ring lock is held across the whole sequence so the previous session's
/// teardown and the new splice cannot interleave.
fn begin_recording(ctx: &WorkerContext) {
    let path = next_clip_path(&ctx.output_dir);
    let mut ring = ctx.ring.lock();

    // A fast stop/start can re-arm before the recording worker has torn
    // down the previous session; close out its clip here so it is not lost
    // and the new splice can open.
    finalize_clip(ctx, &mut ring);

    match ring.splice(&path) {
        Ok(preroll) => {
            if ctx.controller.advance_to_recording() {
                let _ = ctx
                    .events
                    .send(EngineEvent::RecordingStarted { path, preroll });
            } else {
                // Shutdown raced the transition; nothing else will own the
                // freshly opened clip, so finalize it right here.
                finalize_clip(ctx, &mut ring);
            }
        }
        Err(e) => {
            log::error!("could not open recording clip {}: {}", path.display(), e);
            let _ = ctx.events.send(EngineEvent::RecordingFailed {
                reason: e.to_string(),
            });
            ctx.controller.abort_to_preview();
        }
    }
}

/// Session teardown run by the recording worker. When the mode has already
/// re-entered Recording the active splice belongs to the successor session
/// (the armed worker finalized the stale one) and must be left alone.
fn finalize_session(ctx: &WorkerContext) {
    let mut ring = ctx.ring.lock();
    if ctx.controller.current_mode() == Mode::Recording && !ctx.controller.is_shutdown() {
        return;
    }
    finalize_clip(ctx, &mut ring);
}

/// Stop the active splice, if any, and report the outcome. Idempotent: a
/// second call finds no active clip and emits nothing.
fn finalize_clip(ctx: &WorkerContext, ring: &mut RingBuffer) {
    match ring.stop_splice() {
        Some(Ok(info)) => {
            let _ = ctx.events.send(EngineEvent::RecordingFinished(info));
        }
        Some(Err(e)) => {
            log::error!("failed to finalize clip: {e}");
            let _ = ctx.events.send(EngineEvent::RecordingFailed {
                reason: e.to_string(),
            });
        }
        None => {}
    }
}

/// Timestamped clip path, e.g. `swings/23-08-2026-14-03-07.h264`.
fn next_clip_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%d-%m-%Y-%H-%M-%S").to_string();
    unique_clip_path(dir, &stamp)
}

/// Probe for a free filename; a fast stop/start within one second gets a
/// `-N` suffix instead of overwriting the previous clip.
fn unique_clip_path(dir: &Path, stem: &str) -> PathBuf {
    let base = dir.join(format!("{stem}.h264"));
    if !base.exists() {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}-{n}.h264"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
