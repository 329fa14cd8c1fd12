// Mode state machine
//
// One enumerated mode value behind a single lock + condvar, arbitrating the
// Preview / Armed / Recording workers. Triggers received in the wrong state
// are ignored rather than queued or erroring, which keeps the controller
// idempotent under operator double-clicks. A global shutdown flag is observed
// at every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::Mode;

struct State {
    mode: Mode,
    /// Set on the record trigger; the armed worker measures its delay from here
    armed_at: Option<Instant>,
}

/// Outcome of a paced (frame-interval) wait.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PaceOutcome {
    /// Interval elapsed with the mode still active: capture a frame
    Elapsed,
    /// Mode changed mid-wait: go back to parking
    Superseded,
    Shutdown,
}

/// Single source of truth for the current operating mode.
pub struct ModeController {
    state: Mutex<State>,
    cond: Condvar,
    shutdown: AtomicBool,
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                mode: Mode::Preview,
                armed_at: None,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn current_mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Record trigger: `Preview -> Armed`. Returns false (and changes
    /// nothing) in any other state.
    pub fn trigger_record(&self) -> bool {
        let mut state = self.state.lock();
        if state.mode != Mode::Preview || self.is_shutdown() {
            return false;
        }
        state.mode = Mode::Armed;
        state.armed_at = Some(Instant::now());
        log::info!("mode: preview -> armed");
        self.cond.notify_all();
        true
    }

    /// Stop trigger: `Recording -> Preview`. A stop in any other state is a
    /// no-op, e.g. a stray stop while still previewing.
    pub fn trigger_stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.mode != Mode::Recording {
            return false;
        }
        state.mode = Mode::Preview;
        log::info!("mode: recording -> preview");
        self.cond.notify_all();
        true
    }

    /// `Armed -> Recording`, driven by the armed worker once the delay has
    /// elapsed and the splice is open. Returns false if the mode moved on
    /// (e.g. shutdown raced the transition).
    pub(crate) fn advance_to_recording(&self) -> bool {
        let mut state = self.state.lock();
        if state.mode != Mode::Armed || self.is_shutdown() {
            return false;
        }
        state.mode = Mode::Recording;
        state.armed_at = None;
        log::info!("mode: armed -> recording");
        self.cond.notify_all();
        true
    }

    /// Failure path: force the mode back to Preview from Armed or Recording.
    pub(crate) fn abort_to_preview(&self) {
        let mut state = self.state.lock();
        if state.mode != Mode::Preview {
            log::warn!("mode: {:?} -> preview (session aborted)", state.mode);
            state.mode = Mode::Preview;
            state.armed_at = None;
            self.cond.notify_all();
        }
    }

    /// Time since the record trigger, while armed.
    pub(crate) fn armed_elapsed(&self) -> Option<Duration> {
        self.state.lock().armed_at.map(|t| t.elapsed())
    }

    /// Tell all workers to exit. Safe to call more than once.
    pub fn shutdown(&self) {
        let _state = self.state.lock();
        self.shutdown.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// Park until `mode` becomes active. Returns false on shutdown.
    pub(crate) fn wait_for_mode(&self, mode: Mode) -> bool {
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return false;
            }
            if state.mode == mode {
                return true;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Block while `mode` stays active; returns when the mode changes or on
    /// shutdown. This is the recording worker's suspension for the duration
    /// of a session.
    pub(crate) fn wait_while_mode(&self, mode: Mode) {
        let mut state = self.state.lock();
        while state.mode == mode && !self.is_shutdown() {
            self.cond.wait(&mut state);
        }
    }

    /// Sleep for the pacing interval, waking early if the mode changes or
    /// shutdown is requested.
    pub(crate) fn paced_wait(&self, mode: Mode, interval: Duration) -> PaceOutcome {
        let deadline = Instant::now() + interval;
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return PaceOutcome::Shutdown;
            }
            if state.mode != mode {
                return PaceOutcome::Superseded;
            }
            let now = Instant::now();
            if now >= deadline {
                return PaceOutcome::Elapsed;
            }
            self.cond.wait_for(&mut state, deadline - now);
        }
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_in_preview() {
        let ctl = ModeController::new();
        assert_eq!(ctl.current_mode(), Mode::Preview);
    }

    #[test]
    fn record_trigger_arms_from_preview_only() {
        let ctl = ModeController::new();
        assert!(ctl.trigger_record());
        assert_eq!(ctl.current_mode(), Mode::Armed);
        // Double-click: second trigger ignored
        assert!(!ctl.trigger_record());
        assert_eq!(ctl.current_mode(), Mode::Armed);
    }

    #[test]
    fn stop_trigger_in_preview_is_a_noop() {
        let ctl = ModeController::new();
        assert!(!ctl.trigger_stop());
        assert_eq!(ctl.current_mode(), Mode::Preview);
    }

    #[test]
    fn stop_trigger_during_armed_delay_is_ignored() {
        let ctl = ModeController::new();
        ctl.trigger_record();
        assert!(!ctl.trigger_stop());
        assert_eq!(ctl.current_mode(), Mode::Armed);
    }

    #[test]
    fn full_trigger_cycle() {
        let ctl = ModeController::new();
        assert!(ctl.trigger_record());
        assert!(ctl.armed_elapsed().is_some());
        assert!(ctl.advance_to_recording());
        assert_eq!(ctl.current_mode(), Mode::Recording);
        assert!(ctl.armed_elapsed().is_none());
        assert!(ctl.trigger_stop());
        assert_eq!(ctl.current_mode(), Mode::Preview);
    }

    #[test]
    fn advance_requires_armed() {
        let ctl = ModeController::new();
        assert!(!ctl.advance_to_recording());
        assert_eq!(ctl.current_mode(), Mode::Preview);
    }

    #[test]
    fn shutdown_wakes_parked_waiters() {
        let ctl = Arc::new(ModeController::new());
        let waiter = {
            let ctl = ctl.clone();
            std::thread::spawn(move || ctl.wait_for_mode(Mode::Recording))
        };
        std::thread::sleep(Duration::from_millis(50));
        ctl.shutdown();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn paced_wait_returns_superseded_on_mode_change() {
        let ctl = Arc::new(ModeController::new());
        let waiter = {
            let ctl = ctl.clone();
            std::thread::spawn(move || ctl.paced_wait(Mode::Preview, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(50));
        ctl.trigger_record();
        assert_eq!(waiter.join().unwrap(), PaceOutcome::Superseded);
    }

    #[test]
    fn paced_wait_elapses_while_mode_holds() {
        let ctl = ModeController::new();
        let outcome = ctl.paced_wait(Mode::Preview, Duration::from_millis(10));
        assert_eq!(outcome, PaceOutcome::Elapsed);
    }

    #[test]
    fn triggers_ignored_after_shutdown() {
        let ctl = ModeController::new();
        ctl.shutdown();
        assert!(!ctl.trigger_record());
        assert_eq!(ctl.current_mode(), Mode::Preview);
    }
}
