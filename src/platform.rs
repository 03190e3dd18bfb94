/*
 * Capability interfaces consumed by the lifecycle subsystem. Each backend (the
 * Win32 implementation in `win32`, or the fakes used by the tests) supplies
 * these once at construction time; nothing here probes objects for optional
 * methods at call time.
 *
 * Also hosts the two small schedulers the crate ships with: `SystemSleeper`
 * for the bounded waits of the close escalation, and `ManualScheduler` for
 * hosts that drive ticks from their own idle loop (and for tests, where it
 * acts as a fake clock).
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::types::{NativeHandle, WindowConfig, WindowId};

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Duration;

/*
 * The toolkit-level wrapper around an embedded surface, e.g. the dialog or
 * container window the surface is parented into. Its `close` is the "normal"
 * close path tried before any escalation.
 */
pub trait HostContainer {
    fn is_visible(&self) -> bool;
    fn close(&self) -> PlatformResult<()>;
}

/// Result of a successful `WindowPlatform::create`.
pub struct CreatedWindow {
    pub handle: NativeHandle,
    pub container: Option<Rc<dyn HostContainer>>,
}

impl std::fmt::Debug for CreatedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedWindow")
            .field("handle", &self.handle)
            .field("has_container", &self.container.is_some())
            .finish()
    }
}

/*
 * Native window primitive. `is_valid` must always ask the platform; the handle
 * may die at any moment outside this crate's control.
 */
pub trait WindowPlatform {
    fn create(&self, window_id: WindowId, config: &WindowConfig) -> PlatformResult<CreatedWindow>;
    fn is_valid(&self, handle: NativeHandle) -> bool;
    fn send_graceful_close(&self, handle: NativeHandle) -> PlatformResult<()>;
    // Returns whether the platform reported the destroy as successful.
    fn force_destroy(&self, handle: NativeHandle) -> bool;
    // Drains the surface's own message queue once, without blocking.
    fn pump_once(&self, handle: NativeHandle) -> PlatformResult<()>;
}

/// The host application's UI event queue; `drain_once` must never block.
pub trait HostPump {
    fn drain_once(&self) -> PlatformResult<()>;
}

/*
 * A host-side registration (scene watcher, selection callback, ...) tied to a
 * window. Detached exactly once by the close protocol before the native
 * handle is touched.
 */
pub trait HostCallback {
    fn name(&self) -> &str;
    fn detach(self: Box<Self>) -> PlatformResult<()>;
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

pub type TickCallback = Box<dyn FnMut()>;

/*
 * Source of recurring ticks on the UI thread. Implementations must run each
 * callback to completion before starting the next one and must tolerate a
 * callback cancelling its own token.
 */
pub trait TickScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        callback: TickCallback,
    ) -> PlatformResult<TimerToken>;
    fn cancel(&self, token: TimerToken);
}

struct ScheduledTick {
    interval: Duration,
    next_due: Duration,
    // Taken out while the callback runs so no borrow is held across it.
    callback: Option<TickCallback>,
}

/*
 * Scheduler driven explicitly through `advance`. Virtual time only moves when
 * the owner says so, which makes it usable both from a host idle hook (advance
 * by the real elapsed time) and as a deterministic clock in tests.
 */
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<Duration>,
    next_token: Cell<u64>,
    entries: RefCell<BTreeMap<TimerToken, ScheduledTick>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn active_count(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_scheduled(&self, token: TimerToken) -> bool {
        self.entries.borrow().contains_key(&token)
    }

    /*
     * Moves virtual time forward by `elapsed`, firing every callback that falls
     * due on the way, one interval at a time and in due-time order. Returns the
     * number of callbacks fired.
     */
    pub fn advance(&self, elapsed: Duration) -> usize {
        let target = self.now.get() + elapsed;
        let mut fired = 0usize;

        loop {
            let due = {
                let entries = self.entries.borrow();
                entries
                    .iter()
                    .filter(|(_, tick)| tick.next_due <= target && tick.callback.is_some())
                    .min_by_key(|(token, tick)| (tick.next_due, **token))
                    .map(|(token, tick)| (*token, tick.next_due))
            };
            let Some((token, due_at)) = due else {
                break;
            };

            // A callback may advance the clock itself; time never runs backwards.
            self.now.set(self.now.get().max(due_at));
            let callback = self
                .entries
                .borrow_mut()
                .get_mut(&token)
                .and_then(|tick| tick.callback.take());
            let Some(mut callback) = callback else {
                continue;
            };

            callback();
            fired += 1;

            let mut entries = self.entries.borrow_mut();
            if let Some(tick) = entries.get_mut(&token) {
                tick.next_due = due_at + tick.interval;
                tick.callback = Some(callback);
            } else {
                log::trace!("ManualScheduler: Timer {token:?} cancelled during its own callback.");
            }
        }

        self.now.set(self.now.get().max(target));
        fired
    }
}

impl TickScheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        callback: TickCallback,
    ) -> PlatformResult<TimerToken> {
        if interval.is_zero() {
            return Err(PlatformError::OperationFailed(
                "ManualScheduler: Refusing to schedule a zero-length interval".to_string(),
            ));
        }
        let token = TimerToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.entries.borrow_mut().insert(
            token,
            ScheduledTick {
                interval,
                next_due: self.now.get() + interval,
                callback: Some(callback),
            },
        );
        log::trace!("ManualScheduler: Scheduled {token:?} every {interval:?}.");
        Ok(token)
    }

    fn cancel(&self, token: TimerToken) {
        // The callback may be checked out right now; dropping the entry is
        // enough for `advance` to discard it once it returns.
        if self.entries.borrow_mut().remove(&token).is_some() {
            log::trace!("ManualScheduler: Cancelled {token:?}.");
        }
    }
}

/*
 * Runs a caller-supplied callback and folds both error results and panics into
 * a `PlatformError`, so a misbehaving observer cannot unwind into the
 * scheduler (which may be an FFI timer procedure).
 */
pub(crate) fn run_contained<F>(label: &str, f: F) -> PlatformResult<()>
where
    F: FnOnce() -> PlatformResult<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(PlatformError::ObserverFailure(format!(
                "{label} panicked: {detail}"
            )))
        }
    }
}
