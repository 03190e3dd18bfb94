/*
 * `TickScheduler` backed by Win32 thread timers (`SetTimer` without a window).
 * WM_TIMER is delivered through whatever loop pumps the thread, the host's own
 * or our `Win32HostPump`, which then calls `timer_proc`.
 *
 * Callbacks live in a thread-local map keyed by timer id. A callback is taken
 * out of the map while it runs, so a WM_TIMER dispatched from inside its own
 * tick (the tick pumps messages) finds nothing to run and is skipped.
 *
 * The OS may hand a cancelled timer's id to a new timer while the old callback
 * is still running. Each registration therefore gets a generation that is never
 * reused, and a checked-out callback only goes back into a slot of its own
 * generation.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::platform::{TickCallback, TickScheduler, TimerToken};

use windows::Win32::Foundation::{GetLastError, HWND};
use windows::Win32::UI::WindowsAndMessaging::{KillTimer, SetTimer};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

struct TimerSlot {
    generation: u64,
    callback: Option<TickCallback>,
}

thread_local! {
    static TIMER_CALLBACKS: RefCell<HashMap<usize, TimerSlot>> = RefCell::new(HashMap::new());
    static NEXT_GENERATION: Cell<u64> = const { Cell::new(1) };
}

fn register_callback(timer_id: usize, callback: TickCallback) -> u64 {
    let generation = NEXT_GENERATION.with(|next| {
        let generation = next.get();
        next.set(generation + 1);
        generation
    });
    TIMER_CALLBACKS.with_borrow_mut(|callbacks| {
        callbacks.insert(
            timer_id,
            TimerSlot {
                generation,
                callback: Some(callback),
            },
        );
    });
    generation
}

fn unregister_callback(timer_id: usize) {
    TIMER_CALLBACKS.with_borrow_mut(|callbacks| {
        callbacks.remove(&timer_id);
    });
}

fn checkout_callback(timer_id: usize) -> Option<(u64, TickCallback)> {
    TIMER_CALLBACKS.with_borrow_mut(|callbacks| {
        let slot = callbacks.get_mut(&timer_id)?;
        let callback = slot.callback.take()?;
        Some((slot.generation, callback))
    })
}

/// Puts a checked-out callback back. Returns false, dropping the callback, when
/// its timer was cancelled or the id now belongs to another registration.
fn restore_callback(timer_id: usize, generation: u64, callback: TickCallback) -> bool {
    TIMER_CALLBACKS.with_borrow_mut(|callbacks| match callbacks.get_mut(&timer_id) {
        Some(slot) if slot.generation == generation && slot.callback.is_none() => {
            slot.callback = Some(callback);
            true
        }
        _ => false,
    })
}

pub struct ThreadTimerScheduler {
    timers: RefCell<HashSet<usize>>,
    // Thread timers belong to the creating thread.
    _not_send: PhantomData<*const ()>,
}

impl Default for ThreadTimerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTimerScheduler {
    pub fn new() -> Self {
        Self {
            timers: RefCell::new(HashSet::new()),
            _not_send: PhantomData,
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.borrow().len()
    }
}

fn timer_millis(interval: Duration) -> u32 {
    u32::try_from(interval.as_millis()).unwrap_or(u32::MAX).max(1)
}

impl TickScheduler for ThreadTimerScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        callback: TickCallback,
    ) -> PlatformResult<TimerToken> {
        if interval.is_zero() {
            return Err(PlatformError::OperationFailed(
                "ThreadTimerScheduler: Refusing to schedule a zero-length interval".to_string(),
            ));
        }
        let millis = timer_millis(interval);
        let timer_id = unsafe { SetTimer(None, 0, millis, Some(timer_proc)) };
        if timer_id == 0 {
            let last_error = unsafe { GetLastError() };
            log::error!("ThreadTimerScheduler: SetTimer failed: {last_error:?}");
            return Err(PlatformError::OperationFailed(format!(
                "SetTimer failed: {last_error:?}"
            )));
        }

        register_callback(timer_id, callback);
        self.timers.borrow_mut().insert(timer_id);
        log::debug!("ThreadTimerScheduler: Timer {timer_id} scheduled every {millis} ms.");
        Ok(TimerToken(timer_id as u64))
    }

    fn cancel(&self, token: TimerToken) {
        let timer_id = token.0 as usize;
        if !self.timers.borrow_mut().remove(&timer_id) {
            return;
        }
        if let Err(err) = unsafe { KillTimer(None, timer_id) } {
            log::warn!("ThreadTimerScheduler: KillTimer({timer_id}) failed: {err}");
        }
        // A callback currently checked out is dropped by `timer_proc` when it returns.
        unregister_callback(timer_id);
        log::debug!("ThreadTimerScheduler: Timer {timer_id} cancelled.");
    }
}

impl Drop for ThreadTimerScheduler {
    fn drop(&mut self) {
        let timers: Vec<usize> = self.timers.borrow().iter().copied().collect();
        for timer_id in timers {
            self.cancel(TimerToken(timer_id as u64));
        }
    }
}

unsafe extern "system" fn timer_proc(_hwnd: HWND, _msg: u32, timer_id: usize, _time: u32) {
    let Some((generation, mut callback)) = checkout_callback(timer_id) else {
        log::trace!("ThreadTimerScheduler: Timer {timer_id} busy or cancelled; skipping WM_TIMER.");
        return;
    };

    // Unwinding across the FFI boundary would abort the host.
    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        log::error!("ThreadTimerScheduler: Callback for timer {timer_id} panicked.");
    }

    if !restore_callback(timer_id, generation, callback) {
        log::trace!("ThreadTimerScheduler: Timer {timer_id} was cancelled while firing.");
    }
}
