/*
 * Per-window lifecycle state machine. Transitions only move forward:
 *
 *   Created -> Running -> Closing -> Closed
 *   Created ----------->  Closing
 *
 * `Closing` is the re-entrancy gate for the close protocol: whoever wins the
 * transition into it runs the protocol, every later request is refused. A
 * `Closed` tracker is never revived; a fresh window gets a fresh tracker.
 *
 * The tracker is single-threaded (`Cell`) because every transition happens on
 * the thread that owns the host UI loop.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::types::WindowId;

use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Running,
    Closing,
    Closed,
}

impl LifecycleState {
    fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Created, LifecycleState::Running)
                | (LifecycleState::Created, LifecycleState::Closing)
                | (LifecycleState::Running, LifecycleState::Closing)
                | (LifecycleState::Closing, LifecycleState::Closed)
        )
    }
}

#[derive(Debug)]
pub struct LifecycleTracker {
    window_id: WindowId,
    state: Cell<LifecycleState>,
}

impl LifecycleTracker {
    pub fn new(window_id: WindowId) -> Self {
        Self {
            window_id,
            state: Cell::new(LifecycleState::Created),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == LifecycleState::Running
    }

    pub fn is_closed(&self) -> bool {
        self.state.get() == LifecycleState::Closed
    }

    pub fn mark_running(&self) -> PlatformResult<()> {
        self.transition(LifecycleState::Running)
    }

    /*
     * Claims the close protocol for the caller. Fails with
     * `CloseAlreadyInProgress` when another close already owns it, so callers
     * can treat the failure as a silent no-op.
     */
    pub fn begin_closing(&self) -> PlatformResult<()> {
        match self.state.get() {
            LifecycleState::Closing => Err(PlatformError::CloseAlreadyInProgress(self.window_id)),
            _ => self.transition(LifecycleState::Closing),
        }
    }

    pub fn finish_closing(&self) -> PlatformResult<()> {
        self.transition(LifecycleState::Closed)
    }

    fn transition(&self, next: LifecycleState) -> PlatformResult<()> {
        let current = self.state.get();
        if !current.can_transition_to(next) {
            log::debug!(
                "Lifecycle: Rejected transition {current:?} -> {next:?} for WinID {:?}.",
                self.window_id
            );
            return Err(PlatformError::InvalidStateTransition {
                from: current,
                to: next,
            });
        }
        log::trace!(
            "Lifecycle: WinID {:?} {current:?} -> {next:?}.",
            self.window_id
        );
        self.state.set(next);
        Ok(())
    }
}
