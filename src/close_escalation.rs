/*
 * Escalating close protocol. Runs at most once per window (the caller holds
 * the `Closing` gate) and always runs to completion:
 *
 *   1. stop driving the window (timer stopped and cleaned up)
 *   2. detach host-side callbacks
 *   3. graceful close through the wrapping container, then re-check the handle
 *   4. post the platform close signal and pump the surface queue a bounded
 *      number of times
 *   5. force-destroy the handle
 *   6. finalize: drop the handle, mark `Closed`, leave the registry
 *
 * Steps 3 to 5 stop as soon as the handle is confirmed gone. A failing step is
 * logged and falls through to the next one; nothing here returns an error.
 */
use crate::platform::{HostContainer, Sleeper, WindowPlatform, run_contained};
use crate::types::{CloseEscalationConfig, NativeHandle, WindowId};

use std::rc::Rc;

/// The step that confirmed the native handle was gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStep {
    // There was no handle to reclaim.
    NoHandle,
    GracefulClose,
    CloseSignal,
    ForcedDestroy,
    // Every step ran and the platform still reports the handle valid.
    NotConfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReport {
    pub window_id: WindowId,
    pub confirmed_by: CloseStep,
    pub detached_callbacks: usize,
    pub signal_pump_iterations: u32,
    pub force_destroy_attempted: bool,
}

/// What the protocol needs from the window being closed.
pub trait CloseTarget {
    fn window_id(&self) -> WindowId;
    fn stop_driving(&self);
    // Returns how many callbacks were detached.
    fn detach_host_callbacks(&self) -> usize;
    fn native_handle(&self) -> Option<NativeHandle>;
    fn container(&self) -> Option<Rc<dyn HostContainer>>;
    fn finalize(&self);
}

pub struct CloseEscalation<'a> {
    config: CloseEscalationConfig,
    platform: &'a dyn WindowPlatform,
    sleeper: &'a dyn Sleeper,
}

impl<'a> CloseEscalation<'a> {
    pub fn new(
        config: CloseEscalationConfig,
        platform: &'a dyn WindowPlatform,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            config,
            platform,
            sleeper,
        }
    }

    pub fn run(&self, target: &dyn CloseTarget) -> CloseReport {
        let window_id = target.window_id();
        log::debug!("CloseEscalation: Closing WinID {window_id:?}.");

        if let Err(err) = run_contained("stop driving", || {
            target.stop_driving();
            Ok(())
        }) {
            log::warn!("CloseEscalation: Stopping the timer for WinID {window_id:?} failed: {err}");
        }
        let mut detached_callbacks = 0;
        if let Err(err) = run_contained("callback detach", || {
            detached_callbacks = target.detach_host_callbacks();
            Ok(())
        }) {
            log::warn!("CloseEscalation: Detaching callbacks for WinID {window_id:?} failed: {err}");
        }

        let mut report = CloseReport {
            window_id,
            confirmed_by: CloseStep::NoHandle,
            detached_callbacks,
            signal_pump_iterations: 0,
            force_destroy_attempted: false,
        };

        let container = target.container();
        match target.native_handle() {
            Some(handle) => {
                report.confirmed_by =
                    self.reclaim_handle(window_id, handle, container.as_deref(), &mut report);
            }
            None => {
                log::debug!("CloseEscalation: WinID {window_id:?} has no native handle.");
                if let Some(container) = container.as_deref() {
                    self.close_container(window_id, container);
                }
            }
        }

        target.finalize();

        match report.confirmed_by {
            CloseStep::NotConfirmed => log::error!(
                "CloseEscalation: WinID {window_id:?} closed, but its native handle could not be confirmed destroyed."
            ),
            step => log::info!("CloseEscalation: WinID {window_id:?} closed ({step:?})."),
        }
        report
    }

    fn reclaim_handle(
        &self,
        window_id: WindowId,
        handle: NativeHandle,
        container: Option<&dyn HostContainer>,
        report: &mut CloseReport,
    ) -> CloseStep {
        if let Some(container) = container {
            self.close_container(window_id, container);
        }
        if !self.still_valid(window_id, handle) {
            return CloseStep::GracefulClose;
        }

        log::debug!(
            "CloseEscalation: Handle {handle:?} for WinID {window_id:?} survived graceful close; sending close signal."
        );
        match run_contained("close signal", || self.platform.send_graceful_close(handle)) {
            Ok(()) => {
                if self.pump_until_gone(window_id, handle, report) {
                    return CloseStep::CloseSignal;
                }
            }
            Err(err) => log::warn!(
                "CloseEscalation: Close signal to {handle:?} for WinID {window_id:?} failed: {err}"
            ),
        }

        // The signal may have been processed by a failing final pump.
        if !self.still_valid(window_id, handle) {
            return CloseStep::CloseSignal;
        }

        log::warn!(
            "CloseEscalation: Handle {handle:?} for WinID {window_id:?} still valid; forcing destroy."
        );
        report.force_destroy_attempted = true;
        let mut destroyed = false;
        let outcome = run_contained("forced destroy", || {
            destroyed = self.platform.force_destroy(handle);
            Ok(())
        });
        match outcome {
            Ok(()) if destroyed => {
                log::debug!("CloseEscalation: Forced destroy of {handle:?} reported success.")
            }
            Ok(()) => log::error!("CloseEscalation: Forced destroy of {handle:?} reported failure."),
            Err(err) => log::error!("CloseEscalation: Forced destroy of {handle:?} failed: {err}"),
        }

        if self.still_valid(window_id, handle) {
            CloseStep::NotConfirmed
        } else {
            CloseStep::ForcedDestroy
        }
    }

    // Returns true once the handle is observed gone.
    fn pump_until_gone(
        &self,
        window_id: WindowId,
        handle: NativeHandle,
        report: &mut CloseReport,
    ) -> bool {
        let iterations = self.config.signal_pump_iterations;
        for iteration in 0..iterations {
            if let Err(err) = run_contained("signal pump", || self.platform.pump_once(handle)) {
                log::warn!(
                    "CloseEscalation: Pump {} of {iterations} failed for WinID {window_id:?}: {err}",
                    iteration + 1
                );
            }
            report.signal_pump_iterations = iteration + 1;
            if !self.still_valid(window_id, handle) {
                return true;
            }
            if iteration + 1 < iterations {
                self.sleeper.sleep(self.config.signal_pump_delay);
            }
        }
        false
    }

    // A validity check that fails counts as "still valid" so escalation goes on.
    fn still_valid(&self, window_id: WindowId, handle: NativeHandle) -> bool {
        let mut valid = true;
        if let Err(err) = run_contained("validity check", || {
            valid = self.platform.is_valid(handle);
            Ok(())
        }) {
            log::warn!("CloseEscalation: Validity check for WinID {window_id:?} failed: {err}");
            return true;
        }
        valid
    }

    fn close_container(&self, window_id: WindowId, container: &dyn HostContainer) {
        if let Err(err) = run_contained("container close", || container.close()) {
            log::warn!("CloseEscalation: Container close failed for WinID {window_id:?}: {err}");
        }
    }
}
