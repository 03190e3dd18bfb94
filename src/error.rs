/*
 * Defines the error taxonomy shared by the lifecycle subsystem. Only
 * `FactoryFailure` is expected to cross the public boundary unchanged; the
 * other variants are produced and contained internally (tick observers, pump
 * drains, escalation steps) and surface mainly through logging.
 */
use crate::lifecycle::LifecycleState;
use crate::types::WindowId;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    // The native handle is already gone or was never known to the platform.
    HandleInvalid(String),
    // A single host or surface pump drain faulted; the next tick retries.
    PumpFailure(String),
    // A close was requested while the close protocol was already running.
    CloseAlreadyInProgress(WindowId),
    // The singleton factory failed to build a window.
    FactoryFailure(String),
    // A registered tick or close observer reported failure.
    ObserverFailure(String),
    InvalidStateTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    InitializationFailed(String),
    OperationFailed(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::HandleInvalid(msg) => write!(f, "Invalid handle: {msg}"),
            PlatformError::PumpFailure(msg) => write!(f, "Pump failure: {msg}"),
            PlatformError::CloseAlreadyInProgress(window_id) => {
                write!(f, "Close already in progress for window {window_id:?}")
            }
            PlatformError::FactoryFailure(msg) => write!(f, "Window factory failed: {msg}"),
            PlatformError::ObserverFailure(msg) => write!(f, "Observer failed: {msg}"),
            PlatformError::InvalidStateTransition { from, to } => {
                write!(f, "Invalid lifecycle transition {from:?} -> {to:?}")
            }
            PlatformError::InitializationFailed(msg) => write!(f, "Initialization failed: {msg}"),
            PlatformError::OperationFailed(msg) => write!(f, "Operation failed: {msg}"),
        }
    }
}

impl std::error::Error for PlatformError {}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        PlatformError::OperationFailed(format!("Win32 error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
