/*
 * Provides the public entry point for the hostview crate: lifecycle management
 * for a web surface embedded in a native window owned by a foreign host
 * application. The crate tracks whether that window is still alive, drives
 * both the host's and the surface's message queues cooperatively from a
 * timer, and guarantees that closing (however it is triggered) runs exactly
 * once and always reclaims the handle through an escalating protocol.
 *
 * The lifecycle core is platform-agnostic and talks to the platform only
 * through the capability traits in `platform`, so it builds and tests on every
 * target. The Win32 backend in `win32` is compiled on Windows only.
 */
pub mod app;
pub mod close_escalation;
pub mod error;
pub mod event_timer;
pub mod lifecycle;
pub mod platform;
pub mod registry;
#[cfg(test)]
mod testing;
pub mod types;
#[cfg(target_os = "windows")]
pub mod win32;
pub mod window_instance;

pub use app::EmbedHost;
pub use close_escalation::{CloseReport, CloseStep};
pub use error::{PlatformError, Result as PlatformResult};
pub use event_timer::{EventTimer, TickOutcome};
pub use lifecycle::LifecycleState;
pub use platform::{
    HostCallback, HostContainer, HostPump, ManualScheduler, Sleeper, SystemSleeper, TickScheduler,
    WindowPlatform,
};
pub use registry::{ManagedWindow, SingletonRegistry};
pub use types::{
    Bounds, CloseEscalationConfig, EventTimerConfig, NativeHandle, SurfaceContent, TickLogging,
    WindowConfig, WindowId,
};
pub use window_instance::{WindowInstance, WindowServices};
