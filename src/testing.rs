/*
 * Scriptable fakes for the platform capabilities. Only compiled for tests.
 * `FakePlatform` keeps the set of live handles and a log of every call so
 * tests can assert on exactly which escalation steps ran.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::platform::{CreatedWindow, HostCallback, HostContainer, HostPump, Sleeper, WindowPlatform};
use crate::types::{NativeHandle, WindowConfig, WindowId};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    Create(WindowId),
    IsValid(NativeHandle),
    GracefulClose(NativeHandle),
    ForceDestroy(NativeHandle),
    PumpOnce(NativeHandle),
    ContainerClose(NativeHandle),
    CallbackDetached,
}

#[derive(Default)]
pub(crate) struct FakeState {
    valid: RefCell<HashSet<NativeHandle>>,
    calls: RefCell<Vec<PlatformCall>>,
    next_handle: Cell<isize>,
    // Pumps remaining before a signalled handle disappears.
    pending_signals: RefCell<HashMap<NativeHandle, u32>>,
    pub(crate) container_close_invalidates: Cell<bool>,
    pub(crate) signal_invalidates_after_pumps: Cell<Option<u32>>,
    pub(crate) force_destroy_succeeds: Cell<bool>,
    pub(crate) pump_fails: Cell<bool>,
    pub(crate) create_fails: Cell<bool>,
    pub(crate) signal_panics: Cell<bool>,
    pub(crate) force_destroy_panics: Cell<bool>,
}

impl FakeState {
    fn record(&self, call: PlatformCall) {
        self.calls.borrow_mut().push(call);
    }

    fn invalidate(&self, handle: NativeHandle) {
        self.valid.borrow_mut().remove(&handle);
        self.pending_signals.borrow_mut().remove(&handle);
    }
}

pub(crate) struct FakePlatform {
    state: Rc<FakeState>,
    containers: RefCell<Vec<Rc<FakeContainer>>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Rc<Self> {
        let state = FakeState {
            next_handle: Cell::new(0x100),
            container_close_invalidates: Cell::new(true),
            force_destroy_succeeds: Cell::new(true),
            ..FakeState::default()
        };
        Rc::new(Self {
            state: Rc::new(state),
            containers: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn state(&self) -> &FakeState {
        &self.state
    }

    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        self.state.calls.borrow().clone()
    }

    pub(crate) fn count_calls(&self, predicate: impl Fn(&PlatformCall) -> bool) -> usize {
        self.state.calls.borrow().iter().filter(|c| predicate(c)).count()
    }

    pub(crate) fn add_handle(&self) -> NativeHandle {
        let handle = NativeHandle(self.state.next_handle.get());
        self.state.next_handle.set(handle.0 + 1);
        self.state.valid.borrow_mut().insert(handle);
        handle
    }

    pub(crate) fn invalidate(&self, handle: NativeHandle) {
        self.state.invalidate(handle);
    }

    pub(crate) fn is_handle_alive(&self, handle: NativeHandle) -> bool {
        self.state.valid.borrow().contains(&handle)
    }

    pub(crate) fn container_for(&self, handle: NativeHandle) -> Option<Rc<FakeContainer>> {
        self.containers
            .borrow()
            .iter()
            .find(|c| c.handle == handle)
            .cloned()
    }

    pub(crate) fn new_container(&self, handle: NativeHandle) -> Rc<FakeContainer> {
        let container = Rc::new(FakeContainer {
            state: Rc::clone(&self.state),
            handle,
            visible: Cell::new(true),
            close_calls: Cell::new(0),
            close_fails: Cell::new(false),
        });
        self.containers.borrow_mut().push(Rc::clone(&container));
        container
    }

    // A callback whose detach is written to this platform's call log.
    pub(crate) fn logged_callback(&self, name: &str, detached: &Rc<Cell<u32>>) -> Box<FakeCallback> {
        let mut callback = FakeCallback::boxed(name, detached);
        callback.log = Some(Rc::clone(&self.state));
        callback
    }
}

impl WindowPlatform for FakePlatform {
    fn create(&self, window_id: WindowId, config: &WindowConfig) -> PlatformResult<CreatedWindow> {
        self.state.record(PlatformCall::Create(window_id));
        if self.state.create_fails.get() {
            return Err(PlatformError::OperationFailed(format!(
                "FakePlatform: create refused for {window_id:?}"
            )));
        }
        let handle = self.add_handle();
        let container = self.new_container(handle);
        container.visible.set(config.visible_on_create);
        Ok(CreatedWindow {
            handle,
            container: Some(container as Rc<dyn HostContainer>),
        })
    }

    fn is_valid(&self, handle: NativeHandle) -> bool {
        self.state.record(PlatformCall::IsValid(handle));
        self.state.valid.borrow().contains(&handle)
    }

    fn send_graceful_close(&self, handle: NativeHandle) -> PlatformResult<()> {
        self.state.record(PlatformCall::GracefulClose(handle));
        if self.state.signal_panics.get() {
            panic!("FakePlatform: close signal exploded");
        }
        if !self.state.valid.borrow().contains(&handle) {
            return Err(PlatformError::HandleInvalid(format!("{handle:?}")));
        }
        match self.state.signal_invalidates_after_pumps.get() {
            Some(0) => self.state.invalidate(handle),
            Some(pumps) => {
                self.state.pending_signals.borrow_mut().insert(handle, pumps);
            }
            None => {}
        }
        Ok(())
    }

    fn force_destroy(&self, handle: NativeHandle) -> bool {
        self.state.record(PlatformCall::ForceDestroy(handle));
        if self.state.force_destroy_panics.get() {
            panic!("FakePlatform: forced destroy exploded");
        }
        if self.state.force_destroy_succeeds.get() {
            self.state.invalidate(handle);
            true
        } else {
            false
        }
    }

    fn pump_once(&self, handle: NativeHandle) -> PlatformResult<()> {
        self.state.record(PlatformCall::PumpOnce(handle));
        if self.state.pump_fails.get() {
            return Err(PlatformError::PumpFailure("FakePlatform: pump refused".into()));
        }
        let expired = {
            let mut pending = self.state.pending_signals.borrow_mut();
            match pending.get_mut(&handle) {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            }
        };
        if expired {
            self.state.invalidate(handle);
        }
        Ok(())
    }
}

pub(crate) struct FakeContainer {
    state: Rc<FakeState>,
    handle: NativeHandle,
    pub(crate) visible: Cell<bool>,
    pub(crate) close_calls: Cell<u32>,
    pub(crate) close_fails: Cell<bool>,
}

impl HostContainer for FakeContainer {
    fn is_visible(&self) -> bool {
        self.visible.get()
    }

    fn close(&self) -> PlatformResult<()> {
        self.state.record(PlatformCall::ContainerClose(self.handle));
        self.close_calls.set(self.close_calls.get() + 1);
        if self.close_fails.get() {
            return Err(PlatformError::OperationFailed("FakeContainer: close refused".into()));
        }
        self.visible.set(false);
        if self.state.container_close_invalidates.get() {
            self.state.invalidate(self.handle);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeHostPump {
    pub(crate) drains: Cell<u32>,
    pub(crate) fails: Cell<bool>,
}

impl HostPump for FakeHostPump {
    fn drain_once(&self) -> PlatformResult<()> {
        self.drains.set(self.drains.get() + 1);
        if self.fails.get() {
            return Err(PlatformError::PumpFailure("FakeHostPump: drain refused".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) sleeps: RefCell<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

pub(crate) struct FakeCallback {
    pub(crate) name: String,
    pub(crate) detached: Rc<Cell<u32>>,
    pub(crate) fails: bool,
    log: Option<Rc<FakeState>>,
}

impl FakeCallback {
    pub(crate) fn boxed(name: &str, detached: &Rc<Cell<u32>>) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            detached: Rc::clone(detached),
            fails: false,
            log: None,
        })
    }

    pub(crate) fn failing(name: &str, detached: &Rc<Cell<u32>>) -> Box<Self> {
        let mut callback = Self::boxed(name, detached);
        callback.fails = true;
        callback
    }
}

impl HostCallback for FakeCallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn detach(self: Box<Self>) -> PlatformResult<()> {
        self.detached.set(self.detached.get() + 1);
        if let Some(log) = &self.log {
            log.record(PlatformCall::CallbackDetached);
        }
        if self.fails {
            return Err(PlatformError::OperationFailed(format!(
                "FakeCallback {} refused to detach",
                self.name
            )));
        }
        Ok(())
    }
}
