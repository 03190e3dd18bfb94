/*
 * Drains the calling thread's message queue without blocking, so a host whose
 * own loop is stalled (e.g. inside a modal script call) keeps repainting while
 * our timer ticks. A `WM_QUIT` found here is re-posted for the host's loop.
 */
use crate::error::Result as PlatformResult;
use crate::platform::HostPump;

use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, MSG, PM_REMOVE, PeekMessageW, PostQuitMessage, TranslateMessage, WM_QUIT,
};

pub const DEFAULT_MAX_HOST_MESSAGES: u32 = 256;

#[derive(Debug, Clone, Copy)]
pub struct Win32HostPump {
    max_messages: u32,
}

impl Default for Win32HostPump {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOST_MESSAGES)
    }
}

impl Win32HostPump {
    pub fn new(max_messages: u32) -> Self {
        Self {
            max_messages: max_messages.max(1),
        }
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }
}

impl HostPump for Win32HostPump {
    fn drain_once(&self) -> PlatformResult<()> {
        let mut msg = MSG::default();
        let mut dispatched = 0u32;
        while dispatched < self.max_messages {
            if !unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.as_bool() {
                break;
            }
            if msg.message == WM_QUIT {
                log::debug!("Win32HostPump: WM_QUIT seen while draining; re-posting for the host.");
                unsafe { PostQuitMessage(msg.wParam.0 as i32) };
                break;
            }
            unsafe {
                _ = TranslateMessage(&msg);
                _ = DispatchMessageW(&msg);
            }
            dispatched += 1;
        }
        if dispatched == self.max_messages {
            log::trace!("Win32HostPump: Dispatch cap of {dispatched} reached; remainder left queued.");
        }
        Ok(())
    }
}
