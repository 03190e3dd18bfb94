/*
 * Cooperative fixed-interval driver for one managed window. Every tick runs
 * synchronously on the UI thread and, in order:
 *
 *   1. drains one batch of host UI events,
 *   2. drains the embedded surface's own message queue,
 *   3. bumps the tick counter,
 *   4. runs the tick observers,
 *   5. optionally re-queries the native handle and, if it is gone, stops the
 *      timer and reports the close to the close observers and the owner.
 *
 * Nothing that happens inside a tick is allowed to escape it: pump failures
 * and observer failures (including panics) are logged and the next tick runs
 * as usual, because the timer is the only path by which an operator-initiated
 * close is ever noticed.
 *
 * The timer never keeps its owner alive. The owner relation is a `Weak`
 * reference, and the scheduler callback only holds a `Weak` to the timer
 * itself. `cleanup` clears the owner relation and every observer.
 */
use crate::error::Result as PlatformResult;
use crate::lifecycle::LifecycleState;
use crate::platform::{HostPump, TickScheduler, TimerToken, WindowPlatform, run_contained};
use crate::types::{EventTimerConfig, NativeHandle, WindowId};

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

pub type TickObserver = Rc<dyn Fn(u64) -> PlatformResult<()>>;
pub type CloseObserver = Rc<dyn Fn() -> PlatformResult<()>>;

/// The window a timer drives. Held weakly by the timer.
pub trait TimerOwner {
    fn lifecycle_state(&self) -> LifecycleState;
    fn on_close_detected(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    // The timer was not running; nothing was pumped.
    Skipped,
    Continued,
    CloseDetected,
}

pub struct EventTimer {
    window_id: WindowId,
    handle: NativeHandle,
    config: EventTimerConfig,
    platform: Rc<dyn WindowPlatform>,
    host_pump: Option<Rc<dyn HostPump>>,
    scheduler: Rc<dyn TickScheduler>,
    owner: RefCell<Option<Weak<dyn TimerOwner>>>,
    running: Cell<bool>,
    tick_count: Cell<u64>,
    token: Cell<Option<TimerToken>>,
    close_reported: Cell<bool>,
    tick_observers: RefCell<Vec<TickObserver>>,
    close_observers: RefCell<Vec<CloseObserver>>,
}

impl std::fmt::Debug for EventTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTimer")
            .field("window_id", &self.window_id)
            .field("handle", &self.handle)
            .field("interval", &self.config.interval)
            .field("running", &self.running.get())
            .field("tick_count", &self.tick_count.get())
            .finish()
    }
}

impl EventTimer {
    pub fn new(
        window_id: WindowId,
        handle: NativeHandle,
        config: EventTimerConfig,
        platform: Rc<dyn WindowPlatform>,
        host_pump: Option<Rc<dyn HostPump>>,
        scheduler: Rc<dyn TickScheduler>,
    ) -> Rc<Self> {
        Rc::new(Self {
            window_id,
            handle,
            config,
            platform,
            host_pump,
            scheduler,
            owner: RefCell::new(None),
            running: Cell::new(false),
            tick_count: Cell::new(0),
            token: Cell::new(None),
            close_reported: Cell::new(false),
            tick_observers: RefCell::new(Vec::new()),
            close_observers: RefCell::new(Vec::new()),
        })
    }

    pub fn set_owner(&self, owner: Weak<dyn TimerOwner>) {
        *self.owner.borrow_mut() = Some(owner);
    }

    pub fn has_owner(&self) -> bool {
        self.owner.borrow().is_some()
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.get()
    }

    pub fn observer_count(&self) -> usize {
        self.tick_observers.borrow().len() + self.close_observers.borrow().len()
    }

    pub fn on_tick<F>(&self, observer: F)
    where
        F: Fn(u64) -> PlatformResult<()> + 'static,
    {
        self.tick_observers.borrow_mut().push(Rc::new(observer));
    }

    pub fn on_close<F>(&self, observer: F)
    where
        F: Fn() -> PlatformResult<()> + 'static,
    {
        self.close_observers.borrow_mut().push(Rc::new(observer));
    }

    /*
     * Schedules recurring ticks. A no-op when already running. The scheduled
     * callback holds only a weak reference, so a timer dropped without
     * `stop` simply stops ticking.
     */
    pub fn start(self: &Rc<Self>) -> PlatformResult<()> {
        if self.running.get() {
            log::debug!(
                "EventTimer: Already running for WinID {:?}; start ignored.",
                self.window_id
            );
            return Ok(());
        }

        let weak_timer = Rc::downgrade(self);
        let token = self.scheduler.schedule_repeating(
            self.config.interval,
            Box::new(move || {
                if let Some(timer) = weak_timer.upgrade() {
                    timer.tick();
                }
            }),
        )?;

        self.token.set(Some(token));
        self.running.set(true);
        log::debug!(
            "EventTimer: Started for WinID {:?} (interval {:?}, validity check {}).",
            self.window_id,
            self.config.interval,
            self.config.check_window_validity
        );
        Ok(())
    }

    // Halts scheduling. References and observers are kept.
    pub fn stop(&self) {
        let was_running = self.running.replace(false);
        if let Some(token) = self.token.take() {
            self.scheduler.cancel(token);
        }
        if was_running {
            log::debug!(
                "EventTimer: Stopped for WinID {:?} after {} ticks.",
                self.window_id,
                self.tick_count.get()
            );
        }
    }

    pub fn cleanup(&self) {
        self.stop();
        self.owner.borrow_mut().take();
        self.tick_observers.borrow_mut().clear();
        self.close_observers.borrow_mut().clear();
        log::trace!("EventTimer: Cleaned up for WinID {:?}.", self.window_id);
    }

    pub fn tick(&self) -> TickOutcome {
        if !self.running.get() {
            return TickOutcome::Skipped;
        }

        if let Some(host_pump) = &self.host_pump
            && let Err(err) = run_contained("host pump", || host_pump.drain_once())
        {
            log::warn!(
                "EventTimer: Host pump drain failed for WinID {:?}: {err}",
                self.window_id
            );
        }

        if let Err(err) = run_contained("surface pump", || self.platform.pump_once(self.handle)) {
            log::warn!(
                "EventTimer: Surface pump failed for WinID {:?}: {err}",
                self.window_id
            );
        }

        let tick = self.tick_count.get() + 1;
        self.tick_count.set(tick);
        self.log_tick(tick);

        let observers: Vec<TickObserver> = self.tick_observers.borrow().clone();
        for observer in observers {
            if let Err(err) = run_contained("tick observer", || observer(tick)) {
                log::error!(
                    "EventTimer: Tick observer failed on tick #{tick} for WinID {:?}: {err}",
                    self.window_id
                );
            }
        }

        // An observer may have closed the window and stopped us.
        if !self.running.get() {
            return TickOutcome::Continued;
        }

        if self.config.check_window_validity && !self.platform.is_valid(self.handle) {
            log::info!(
                "EventTimer: Handle {:?} for WinID {:?} is no longer valid on tick #{tick}; treating as closed.",
                self.handle,
                self.window_id
            );
            self.stop();
            self.report_close();
            return TickOutcome::CloseDetected;
        }

        TickOutcome::Continued
    }

    fn report_close(&self) {
        if self.close_reported.replace(true) {
            return;
        }

        let observers: Vec<CloseObserver> = self.close_observers.borrow().clone();
        for observer in observers {
            if let Err(err) = run_contained("close observer", || observer()) {
                log::error!(
                    "EventTimer: Close observer failed for WinID {:?}: {err}",
                    self.window_id
                );
            }
        }

        let owner = self.owner.borrow().as_ref().and_then(Weak::upgrade);
        match owner {
            Some(owner) => owner.on_close_detected(),
            None => log::debug!(
                "EventTimer: Owner of WinID {:?} already gone when close was detected.",
                self.window_id
            ),
        }
    }

    fn log_tick(&self, tick: u64) {
        let Some(logging) = self.config.tick_logging else {
            return;
        };
        if logging.should_log_tick(tick) {
            log::debug!("EventTimer: WinID {:?} tick #{tick}.", self.window_id);
        }
        if logging.should_log_state(tick) {
            let state = self
                .owner
                .borrow()
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|owner| owner.lifecycle_state());
            log::debug!(
                "EventTimer: WinID {:?} lifecycle state at tick #{tick}: {state:?}.",
                self.window_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platform::ManualScheduler;
    use crate::testing::{FakeHostPump, FakePlatform, PlatformCall};

    const INTERVAL: Duration = Duration::from_millis(16);

    struct CountingOwner {
        detections: Cell<u32>,
    }

    impl TimerOwner for CountingOwner {
        fn lifecycle_state(&self) -> LifecycleState {
            LifecycleState::Running
        }

        fn on_close_detected(&self) {
            self.detections.set(self.detections.get() + 1);
        }
    }

    struct Harness {
        platform: Rc<FakePlatform>,
        host_pump: Rc<FakeHostPump>,
        scheduler: Rc<ManualScheduler>,
        handle: NativeHandle,
        timer: Rc<EventTimer>,
    }

    fn setup(config: EventTimerConfig) -> Harness {
        let platform = FakePlatform::new();
        let host_pump = Rc::new(FakeHostPump::default());
        let scheduler = Rc::new(ManualScheduler::new());
        let handle = platform.add_handle();
        let timer = EventTimer::new(
            WindowId(1),
            handle,
            config,
            platform.clone(),
            Some(host_pump.clone()),
            scheduler.clone(),
        );
        Harness {
            platform,
            host_pump,
            scheduler,
            handle,
            timer,
        }
    }

    fn default_config() -> EventTimerConfig {
        EventTimerConfig::default()
            .with_interval(INTERVAL)
            .without_tick_logging()
    }

    #[test]
    fn tick_count_advances_once_per_interval_and_freezes_after_stop() {
        // Arrange
        let h = setup(default_config());
        h.timer.start().unwrap();
        // Act
        h.scheduler.advance(INTERVAL * 5);
        let before_stop = h.timer.tick_count();
        h.timer.stop();
        h.scheduler.advance(INTERVAL * 5);
        // Assert
        assert_eq!(before_stop, 5);
        assert_eq!(h.timer.tick_count(), 5);
        assert_eq!(h.scheduler.active_count(), 0);
        assert_eq!(h.host_pump.drains.get(), 5);
        assert_eq!(
            h.platform
                .count_calls(|c| *c == PlatformCall::PumpOnce(h.handle)),
            5
        );
    }

    #[test]
    fn start_twice_schedules_only_once() {
        let h = setup(default_config());
        h.timer.start().unwrap();
        h.timer.start().unwrap();

        h.scheduler.advance(INTERVAL * 3);

        assert_eq!(h.scheduler.active_count(), 1);
        assert_eq!(h.timer.tick_count(), 3);
    }

    #[test]
    fn invalidated_handle_fires_close_once_and_stops_ticking() {
        // Arrange
        let h = setup(default_config());
        let owner = Rc::new(CountingOwner {
            detections: Cell::new(0),
        });
        let owner_dyn: Rc<dyn TimerOwner> = owner.clone();
        h.timer.set_owner(Rc::downgrade(&owner_dyn));
        let closes = Rc::new(Cell::new(0u32));
        let closes_in_cb = Rc::clone(&closes);
        h.timer.on_close(move || {
            closes_in_cb.set(closes_in_cb.get() + 1);
            Ok(())
        });
        h.timer.start().unwrap();
        h.scheduler.advance(INTERVAL * 3);
        // Act
        h.platform.invalidate(h.handle);
        h.scheduler.advance(INTERVAL * 10);
        // Assert
        assert_eq!(closes.get(), 1);
        assert_eq!(owner.detections.get(), 1);
        assert_eq!(h.timer.tick_count(), 4);
        assert!(!h.timer.is_running());
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[test]
    fn validity_is_not_queried_when_check_disabled() {
        let h = setup(default_config().with_validity_check(false));
        let closes = Rc::new(Cell::new(0u32));
        let closes_in_cb = Rc::clone(&closes);
        h.timer.on_close(move || {
            closes_in_cb.set(closes_in_cb.get() + 1);
            Ok(())
        });
        h.timer.start().unwrap();
        h.platform.invalidate(h.handle);

        h.scheduler.advance(INTERVAL * 4);

        assert_eq!(closes.get(), 0);
        assert_eq!(h.timer.tick_count(), 4);
        assert_eq!(
            h.platform
                .count_calls(|c| matches!(c, PlatformCall::IsValid(_))),
            0
        );
    }

    #[test]
    fn failing_and_panicking_observers_do_not_stop_the_loop() {
        let h = setup(default_config());
        let seen = Rc::new(RefCell::new(Vec::new()));
        h.timer
            .on_tick(|_| Err(PlatformError::ObserverFailure("always fails".into())));
        h.timer.on_tick(|tick| {
            if tick == 2 {
                panic!("observer blew up on tick 2");
            }
            Ok(())
        });
        let seen_in_cb = Rc::clone(&seen);
        h.timer.on_tick(move |tick| {
            seen_in_cb.borrow_mut().push(tick);
            Ok(())
        });
        h.timer.start().unwrap();

        h.scheduler.advance(INTERVAL * 3);

        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert!(h.timer.is_running());
    }

    #[test]
    fn pump_failures_are_contained_and_retried_next_tick() {
        let h = setup(default_config());
        h.host_pump.fails.set(true);
        h.platform.state().pump_fails.set(true);
        h.timer.start().unwrap();

        h.scheduler.advance(INTERVAL * 2);
        h.host_pump.fails.set(false);
        h.platform.state().pump_fails.set(false);
        h.scheduler.advance(INTERVAL);

        assert_eq!(h.timer.tick_count(), 3);
        assert_eq!(h.host_pump.drains.get(), 3);
        assert!(h.timer.is_running());
    }

    #[test]
    fn observer_stopping_the_timer_skips_validity_check() {
        let h = setup(default_config());
        let weak_timer = Rc::downgrade(&h.timer);
        h.timer.on_tick(move |_| {
            if let Some(timer) = weak_timer.upgrade() {
                timer.cleanup();
            }
            Ok(())
        });
        h.timer.start().unwrap();
        h.platform.invalidate(h.handle);

        h.scheduler.advance(INTERVAL * 3);

        assert_eq!(h.timer.tick_count(), 1);
        assert_eq!(
            h.platform
                .count_calls(|c| matches!(c, PlatformCall::IsValid(_))),
            0
        );
    }

    #[test]
    fn cleanup_clears_owner_and_observers() {
        // Arrange
        let h = setup(default_config());
        let owner: Rc<dyn TimerOwner> = Rc::new(CountingOwner {
            detections: Cell::new(0),
        });
        h.timer.set_owner(Rc::downgrade(&owner));
        h.timer.on_tick(|_| Ok(()));
        h.timer.on_close(|| Ok(()));
        h.timer.start().unwrap();
        // Act
        h.timer.cleanup();
        h.timer.cleanup();
        // Assert
        assert!(!h.timer.has_owner());
        assert_eq!(h.timer.observer_count(), 0);
        assert!(!h.timer.is_running());
        assert_eq!(h.timer.tick(), TickOutcome::Skipped);
    }

    #[test]
    fn dropped_timer_stops_ticking_through_weak_callback() {
        let h = setup(default_config());
        h.timer.start().unwrap();
        let Harness {
            scheduler,
            timer,
            platform,
            ..
        } = h;
        drop(timer);

        scheduler.advance(INTERVAL * 3);

        assert_eq!(
            platform.count_calls(|c| matches!(c, PlatformCall::PumpOnce(_))),
            0
        );
    }
}
