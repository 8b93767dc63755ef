//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {message}")]
    Image { message: String },

    // ─────────────────────────────────────────────────────────────
    // Debug-Bridge Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Ensure the Android platform tools are in your PATH.")]
    AdbNotFound,

    #[error("Bridge error: {message}")]
    Bridge { message: String },

    #[error("Bridge protocol error: {message}")]
    Protocol { message: String },

    #[error("Device {serial} is offline")]
    DeviceOffline { serial: String },

    #[error("Device {serial} is busy")]
    DeviceBusy { serial: String },

    // ─────────────────────────────────────────────────────────────
    // Workflow Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid workflow: {message}")]
    WorkflowInvalid { message: String },

    #[error("Workflow not found: {selector}")]
    WorkflowNotFound { selector: String },

    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Step {step_index} failed: {message}")]
    StepFailed { step_index: usize, message: String },

    // ─────────────────────────────────────────────────────────────
    // Job / Queue Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("A job is already running")]
    JobAlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn image(message: impl Into<String>) -> Self {
        Self::Image {
            message: message.into(),
        }
    }

    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn device_offline(serial: impl Into<String>) -> Self {
        Self::DeviceOffline {
            serial: serial.into(),
        }
    }

    pub fn device_busy(serial: impl Into<String>) -> Self {
        Self::DeviceBusy {
            serial: serial.into(),
        }
    }

    pub fn workflow_invalid(message: impl Into<String>) -> Self {
        Self::WorkflowInvalid {
            message: message.into(),
        }
    }

    pub fn workflow_not_found(selector: impl Into<String>) -> Self {
        Self::WorkflowNotFound {
            selector: selector.into(),
        }
    }

    pub fn template_not_found(name: impl Into<String>) -> Self {
        Self::TemplateNotFound { name: name.into() }
    }

    pub fn step_failed(step_index: usize, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step_index,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors fail the current account or command but leave the
    /// process able to carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bridge { .. }
                | Error::Protocol { .. }
                | Error::DeviceBusy { .. }
                | Error::StepFailed { .. }
                | Error::ChannelSend { .. }
                | Error::Cancelled
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound | Error::ConfigInvalid { .. } | Error::ChannelClosed
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
