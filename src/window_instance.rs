/*
 * One managed window: the native handle, its lifecycle tracker, the host-side
 * callback registrations and the event timer that drives it. Instances live in
 * an `Rc` and are only ever touched from the UI thread.
 *
 * Ownership runs one way. The instance owns its `EventTimer`; the timer points
 * back through a `Weak<dyn TimerOwner>` that `cleanup` clears. The registry
 * holds the instance strongly, the instance reaches the registry only through
 * a `RegistryLink`.
 *
 * Every path to `Closed` (explicit `close`, a close detected by the timer,
 * singleton recycling, or dropping the last reference) goes through the same
 * escalation, exactly once.
 */
use crate::close_escalation::{CloseEscalation, CloseReport, CloseTarget};
use crate::error::{PlatformError, Result as PlatformResult};
use crate::event_timer::{EventTimer, TimerOwner};
use crate::lifecycle::{LifecycleState, LifecycleTracker};
use crate::platform::{
    HostCallback, HostContainer, HostPump, Sleeper, SystemSleeper, TickScheduler, WindowPlatform,
    run_contained,
};
use crate::registry::{ManagedWindow, RegistryLink};
use crate::types::{CloseEscalationConfig, EventTimerConfig, NativeHandle, WindowConfig, WindowId};

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// The platform collaborators every window of one host shares.
#[derive(Clone)]
pub struct WindowServices {
    pub platform: Rc<dyn WindowPlatform>,
    pub scheduler: Rc<dyn TickScheduler>,
    pub host_pump: Option<Rc<dyn HostPump>>,
    pub sleeper: Rc<dyn Sleeper>,
}

impl WindowServices {
    pub fn new(platform: Rc<dyn WindowPlatform>, scheduler: Rc<dyn TickScheduler>) -> Self {
        Self {
            platform,
            scheduler,
            host_pump: None,
            sleeper: Rc::new(SystemSleeper),
        }
    }

    pub fn with_host_pump(mut self, host_pump: Rc<dyn HostPump>) -> Self {
        self.host_pump = Some(host_pump);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Rc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

pub struct WindowInstance {
    window_id: WindowId,
    lifecycle: LifecycleTracker,
    handle: Cell<Option<NativeHandle>>,
    container: RefCell<Option<Rc<dyn HostContainer>>>,
    services: WindowServices,
    timer_config: EventTimerConfig,
    escalation_config: CloseEscalationConfig,
    timer: RefCell<Option<Rc<EventTimer>>>,
    host_callbacks: RefCell<Vec<Box<dyn HostCallback>>>,
    registry_link: RefCell<Option<RegistryLink<WindowInstance>>>,
    close_report: RefCell<Option<CloseReport>>,
}

impl std::fmt::Debug for WindowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowInstance")
            .field("window_id", &self.window_id)
            .field("state", &self.lifecycle.state())
            .field("handle", &self.handle.get())
            .field("singleton_key", &self.singleton_key())
            .finish()
    }
}

impl WindowInstance {
    /*
     * Creates the native window and starts driving it. If the timer cannot be
     * started the half-built window is closed again before the error is
     * returned, so a failed create never leaks a handle.
     */
    pub fn create(
        window_id: WindowId,
        config: &WindowConfig,
        services: WindowServices,
        timer_config: EventTimerConfig,
        escalation_config: CloseEscalationConfig,
    ) -> PlatformResult<Rc<Self>> {
        log::debug!(
            "WindowInstance: Creating WinID {window_id:?} '{}' ({:?}).",
            config.title,
            config.bounds
        );
        let created = services.platform.create(window_id, config)?;
        let instance = Rc::new(Self {
            window_id,
            lifecycle: LifecycleTracker::new(window_id),
            handle: Cell::new(Some(created.handle)),
            container: RefCell::new(created.container),
            services,
            timer_config,
            escalation_config,
            timer: RefCell::new(None),
            host_callbacks: RefCell::new(Vec::new()),
            registry_link: RefCell::new(None),
            close_report: RefCell::new(None),
        });

        if let Err(err) = instance.start_event_processing(created.handle) {
            log::error!(
                "WindowInstance: Could not start event processing for WinID {window_id:?}: {err}"
            );
            instance.close();
            return Err(err);
        }

        instance.lifecycle.mark_running()?;
        log::info!(
            "WindowInstance: WinID {window_id:?} running with handle {:?}.",
            created.handle
        );
        Ok(instance)
    }

    fn start_event_processing(self: &Rc<Self>, handle: NativeHandle) -> PlatformResult<()> {
        let timer = EventTimer::new(
            self.window_id,
            handle,
            self.timer_config,
            Rc::clone(&self.services.platform),
            self.services.host_pump.clone(),
            Rc::clone(&self.services.scheduler),
        );
        let owner: Weak<dyn TimerOwner> = Rc::downgrade(self) as Weak<dyn TimerOwner>;
        timer.set_owner(owner);
        *self.timer.borrow_mut() = Some(Rc::clone(&timer));
        timer.start()
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.handle.get()
    }

    pub fn singleton_key(&self) -> Option<String> {
        self.registry_link
            .borrow()
            .as_ref()
            .map(|link| link.key().to_string())
    }

    pub fn tick_count(&self) -> u64 {
        self.timer
            .borrow()
            .as_ref()
            .map_or(0, |timer| timer.tick_count())
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer
            .borrow()
            .as_ref()
            .is_some_and(|timer| timer.is_running())
    }

    pub fn close_report(&self) -> Option<CloseReport> {
        self.close_report.borrow().clone()
    }

    /*
     * Live means running, still backed by a valid native handle, and visible
     * in its container (when it has one). Always queried fresh.
     */
    pub fn is_live(&self) -> bool {
        if !self.lifecycle.is_running() {
            return false;
        }
        let Some(handle) = self.handle.get() else {
            return false;
        };
        if !self.services.platform.is_valid(handle) {
            return false;
        }
        self.container
            .borrow()
            .as_ref()
            .is_none_or(|container| container.is_visible())
    }

    pub fn on_tick<F>(&self, observer: F) -> PlatformResult<()>
    where
        F: Fn(u64) -> PlatformResult<()> + 'static,
    {
        self.with_timer(|timer| timer.on_tick(observer))
    }

    pub fn on_close<F>(&self, observer: F) -> PlatformResult<()>
    where
        F: Fn() -> PlatformResult<()> + 'static,
    {
        self.with_timer(|timer| timer.on_close(observer))
    }

    fn with_timer(&self, f: impl FnOnce(&EventTimer)) -> PlatformResult<()> {
        let timer = self.timer.borrow().clone();
        match timer {
            Some(timer) if !self.is_closing_or_closed() => {
                f(&timer);
                Ok(())
            }
            _ => Err(PlatformError::HandleInvalid(format!(
                "WinID {:?} is {:?}; observers can no longer be registered",
                self.window_id,
                self.lifecycle.state()
            ))),
        }
    }

    /*
     * Ties a host-side registration to this window. It is detached by the
     * close protocol; registering on a closing window detaches it right away.
     */
    pub fn register_host_callback(&self, callback: Box<dyn HostCallback>) {
        if self.is_closing_or_closed() {
            log::warn!(
                "WindowInstance: WinID {:?} is closing; detaching '{}' immediately.",
                self.window_id,
                callback.name()
            );
            Self::detach_one(self.window_id, callback);
            return;
        }
        log::debug!(
            "WindowInstance: Registered host callback '{}' for WinID {:?}.",
            callback.name(),
            self.window_id
        );
        self.host_callbacks.borrow_mut().push(callback);
    }

    pub fn host_callback_count(&self) -> usize {
        self.host_callbacks.borrow().len()
    }

    /*
     * Runs the close protocol unless it already ran or is running. Returns the
     * report only for the call that actually closed the window.
     */
    pub fn close(&self) -> Option<CloseReport> {
        if let Err(err) = self.lifecycle.begin_closing() {
            match err {
                PlatformError::CloseAlreadyInProgress(_) => log::debug!(
                    "WindowInstance: WinID {:?} already closing; skipping.",
                    self.window_id
                ),
                _ => log::trace!(
                    "WindowInstance: WinID {:?} already closed; nothing to do.",
                    self.window_id
                ),
            }
            return None;
        }

        let platform = Rc::clone(&self.services.platform);
        let sleeper = Rc::clone(&self.services.sleeper);
        let report =
            CloseEscalation::new(self.escalation_config, platform.as_ref(), sleeper.as_ref())
                .run(self);
        *self.close_report.borrow_mut() = Some(report.clone());
        Some(report)
    }

    fn is_closing_or_closed(&self) -> bool {
        matches!(
            self.lifecycle.state(),
            LifecycleState::Closing | LifecycleState::Closed
        )
    }

    fn detach_one(window_id: WindowId, callback: Box<dyn HostCallback>) -> bool {
        let name = callback.name().to_string();
        match run_contained("host callback detach", move || callback.detach()) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "WindowInstance: Detaching '{name}' for WinID {window_id:?} failed: {err}"
                );
                false
            }
        }
    }
}

impl CloseTarget for WindowInstance {
    fn window_id(&self) -> WindowId {
        self.window_id
    }

    // The timer stays in its slot so its counters remain readable after close.
    fn stop_driving(&self) {
        let timer = self.timer.borrow().clone();
        if let Some(timer) = timer {
            timer.cleanup();
        }
    }

    fn detach_host_callbacks(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.host_callbacks.borrow_mut());
        let total = callbacks.len();
        let detached = callbacks
            .into_iter()
            .map(|callback| Self::detach_one(self.window_id, callback))
            .filter(|ok| *ok)
            .count();
        if detached < total {
            log::warn!(
                "WindowInstance: {detached} of {total} host callbacks detached cleanly for WinID {:?}.",
                self.window_id
            );
        }
        total
    }

    fn native_handle(&self) -> Option<NativeHandle> {
        self.handle.get()
    }

    fn container(&self) -> Option<Rc<dyn HostContainer>> {
        self.container.borrow().clone()
    }

    fn finalize(&self) {
        self.handle.set(None);
        self.container.borrow_mut().take();
        if let Err(err) = self.lifecycle.finish_closing() {
            log::error!(
                "WindowInstance: Unexpected lifecycle state while finalizing WinID {:?}: {err}",
                self.window_id
            );
        }
        let link = self.registry_link.borrow_mut().take();
        if let Some(link) = link {
            link.evict(self);
        }
    }
}

impl TimerOwner for WindowInstance {
    fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn on_close_detected(&self) {
        log::info!(
            "WindowInstance: Close detected for WinID {:?}; running close protocol.",
            self.window_id
        );
        self.close();
    }
}

impl ManagedWindow for WindowInstance {
    fn is_live(&self) -> bool {
        WindowInstance::is_live(self)
    }

    fn request_close(&self) {
        self.close();
    }

    fn attach_registry(&self, link: RegistryLink<Self>) {
        *self.registry_link.borrow_mut() = Some(link);
    }
}

impl Drop for WindowInstance {
    fn drop(&mut self) {
        if !self.lifecycle.is_closed() {
            log::debug!(
                "WindowInstance: WinID {:?} dropped while {:?}; closing.",
                self.window_id,
                self.lifecycle.state()
            );
            self.close();
        }
    }
}
