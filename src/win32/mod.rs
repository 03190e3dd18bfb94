/*
 * Win32 backend for the lifecycle subsystem. Provides the native window
 * primitive (`Win32Platform` and its `Win32Container`), a non-blocking drain of
 * the host thread's message queue (`Win32HostPump`), and a `TickScheduler`
 * driven by thread timers (`ThreadTimerScheduler`).
 *
 * Everything here must run on the thread that owns the host's message loop.
 */
mod platform;
mod pump;
mod timer;

pub use platform::{Win32Container, Win32Platform};
pub use pump::Win32HostPump;
pub use timer::ThreadTimerScheduler;

use crate::error::Result as PlatformResult;
use crate::types::NativeHandle;
use crate::window_instance::WindowServices;

use windows::Win32::Foundation::{HWND, LPARAM};

use std::ffi::c_void;
use std::rc::Rc;

/*
 * Wires the standard Win32 collaborators together for hosts that own a plain
 * Win32 message loop. `app_name` is used to derive the window class names.
 */
pub fn default_services(app_name: &str) -> PlatformResult<WindowServices> {
    let platform = Win32Platform::new(app_name)?;
    Ok(
        WindowServices::new(platform, Rc::new(ThreadTimerScheduler::new()))
            .with_host_pump(Rc::new(Win32HostPump::default())),
    )
}

#[inline]
pub(crate) fn hwnd_from_handle(handle: NativeHandle) -> HWND {
    HWND(handle.raw() as *mut c_void)
}

#[inline]
pub(crate) fn handle_from_hwnd(hwnd: HWND) -> NativeHandle {
    NativeHandle(hwnd.0 as isize)
}

#[inline]
pub(crate) fn loword_from_lparam(lparam: LPARAM) -> i32 {
    (lparam.0 & 0xFFFF) as i32
}

#[inline]
pub(crate) fn hiword_from_lparam(lparam: LPARAM) -> i32 {
    ((lparam.0 >> 16) & 0xFFFF) as i32
}
