/*
 * Platform-agnostic value types shared by the lifecycle subsystem: logical and
 * native window identifiers plus the configuration structs used to create
 * windows, drive their event timers and bound their close escalation.
 *
 * None of these types own a platform resource. A `NativeHandle` is only a copy
 * of the identifier; whether it still names a live window is always asked of
 * the platform at the moment it matters.
 */
use std::time::Duration;

/// Logical identifier for a managed window, unique within one `EmbedHost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub usize);

impl WindowId {
    pub fn raw(self) -> usize {
        self.0
    }
}

/*
 * Opaque platform identifier for a created window. On Windows this carries the
 * HWND value. Validity is never cached here.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub isize);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn raw(self) -> isize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn sized(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// What the embedded surface should display once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceContent {
    Url(String),
    Html(String),
}

pub const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:5173";

/*
 * Describes a window to be created by a `WindowPlatform`. `parent` is the host
 * application's window the surface is owned by; `None` creates a top-level
 * window.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub bounds: Bounds,
    pub content: SurfaceContent,
    pub parent: Option<NativeHandle>,
    pub visible_on_create: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "hostview".to_string(),
            bounds: Bounds::sized(400, 800),
            content: SurfaceContent::Url(DEFAULT_DEV_SERVER_URL.to_string()),
            parent: None,
            visible_on_create: true,
        }
    }
}

impl WindowConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_content(mut self, content: SurfaceContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_parent(mut self, parent: NativeHandle) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Throttling for the built-in tick diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickLogging {
    pub log_first_ticks: u64,
    pub log_every_ticks: u64,
    pub state_log_every_ticks: u64,
}

impl Default for TickLogging {
    fn default() -> Self {
        Self {
            log_first_ticks: 5,
            log_every_ticks: 60,
            state_log_every_ticks: 300,
        }
    }
}

impl TickLogging {
    pub(crate) fn should_log_tick(&self, tick: u64) -> bool {
        tick <= self.log_first_ticks || (self.log_every_ticks > 0 && tick % self.log_every_ticks == 0)
    }

    pub(crate) fn should_log_state(&self, tick: u64) -> bool {
        self.state_log_every_ticks > 0 && tick % self.state_log_every_ticks == 0
    }
}

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimerConfig {
    pub interval: Duration,
    // When set, every tick re-queries the native handle and treats an invalid
    // handle as a detected close.
    pub check_window_validity: bool,
    pub tick_logging: Option<TickLogging>,
}

impl Default for EventTimerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TICK_INTERVAL,
            check_window_validity: true,
            tick_logging: Some(TickLogging::default()),
        }
    }
}

impl EventTimerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_validity_check(mut self, check_window_validity: bool) -> Self {
        self.check_window_validity = check_window_validity;
        self
    }

    pub fn without_tick_logging(mut self) -> Self {
        self.tick_logging = None;
        self
    }
}

/*
 * Bounds the signal-based escalation step: after posting the close signal the
 * surface queue is pumped at most `signal_pump_iterations` times with
 * `signal_pump_delay` between iterations.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseEscalationConfig {
    pub signal_pump_iterations: u32,
    pub signal_pump_delay: Duration,
}

impl Default for CloseEscalationConfig {
    fn default() -> Self {
        Self {
            signal_pump_iterations: 10,
            signal_pump_delay: Duration::from_millis(10),
        }
    }
}

impl CloseEscalationConfig {
    pub fn new(signal_pump_iterations: u32, signal_pump_delay: Duration) -> Self {
        Self {
            signal_pump_iterations,
            signal_pump_delay,
        }
    }
}
