//! Debug-bridge command building
//!
//! Every device operation is expressed as a [`BridgeCommand`] that knows its
//! argv, timeout, and a short description for logging. The transport layer
//! turns these into actual `adb` invocations.

use std::path::PathBuf;
use std::time::Duration;

/// Android keycode for the back key.
pub const KEYCODE_BACK: i32 = 4;

/// Debug-bridge commands understood by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// List attached devices (`adb devices -l`). Not bound to a serial.
    Devices,
    /// Connect to a TCP endpoint (`adb connect host:port`). Not bound to a serial.
    Connect { address: String },
    /// Raw framebuffer screenshot (`exec-out screencap`).
    Screenshot,
    /// PNG screenshot (`exec-out screencap -p`).
    ScreenshotPng,
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x: i32,
        y: i32,
        end_x: i32,
        end_y: i32,
        duration_ms: u64,
    },
    Key {
        code: i32,
    },
    /// Launch via explicit component when an activity is configured,
    /// otherwise through the launcher-category monkey fallback.
    StartApp {
        package: String,
        activity: Option<String>,
    },
    ForceStop {
        package: String,
    },
    Push {
        local: PathBuf,
        remote: String,
    },
    Pull {
        remote: String,
        local: PathBuf,
    },
    Shell {
        command: String,
    },
    /// Screen geometry (`shell wm size`).
    ScreenSize,
}

impl BridgeCommand {
    /// True for commands that are not addressed to a single device.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Devices | Self::Connect { .. })
    }

    /// Arguments after the optional `-s <serial>` selector.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Devices => svec(&["devices", "-l"]),
            Self::Connect { address } => vec!["connect".into(), address.clone()],
            Self::Screenshot => svec(&["exec-out", "screencap"]),
            Self::ScreenshotPng => svec(&["exec-out", "screencap", "-p"]),
            Self::Tap { x, y } => vec![
                "shell".into(),
                "input".into(),
                "tap".into(),
                x.to_string(),
                y.to_string(),
            ],
            Self::Swipe {
                x,
                y,
                end_x,
                end_y,
                duration_ms,
            } => vec![
                "shell".into(),
                "input".into(),
                "swipe".into(),
                x.to_string(),
                y.to_string(),
                end_x.to_string(),
                end_y.to_string(),
                duration_ms.to_string(),
            ],
            Self::Key { code } => vec![
                "shell".into(),
                "input".into(),
                "keyevent".into(),
                code.to_string(),
            ],
            Self::StartApp { package, activity } => match activity {
                Some(activity) => vec![
                    "shell".into(),
                    "am".into(),
                    "start".into(),
                    "-n".into(),
                    format!("{}/{}", package, activity),
                ],
                None => vec![
                    "shell".into(),
                    "monkey".into(),
                    "-p".into(),
                    package.clone(),
                    "-c".into(),
                    "android.intent.category.LAUNCHER".into(),
                    "1".into(),
                ],
            },
            Self::ForceStop { package } => vec![
                "shell".into(),
                "am".into(),
                "force-stop".into(),
                package.clone(),
            ],
            Self::Push { local, remote } => vec![
                "push".into(),
                local.display().to_string(),
                remote.clone(),
            ],
            Self::Pull { remote, local } => vec![
                "pull".into(),
                remote.clone(),
                local.display().to_string(),
            ],
            Self::Shell { command } => vec!["shell".into(), command.clone()],
            Self::ScreenSize => svec(&["shell", "wm", "size"]),
        }
    }

    /// Full argv including the serial selector when applicable.
    pub fn argv(&self, serial: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if !self.is_global() && !serial.is_empty() {
            argv.push("-s".to_string());
            argv.push(serial.to_string());
        }
        argv.extend(self.args());
        argv
    }

    /// How long the transport waits before declaring the command stalled.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Devices | Self::Connect { .. } => Duration::from_secs(10),
            Self::Screenshot | Self::ScreenshotPng => Duration::from_secs(10),
            Self::Tap { .. } | Self::Swipe { .. } | Self::Key { .. } | Self::ScreenSize => {
                Duration::from_secs(5)
            }
            Self::StartApp { .. } | Self::ForceStop { .. } => Duration::from_secs(10),
            Self::Push { .. } | Self::Pull { .. } | Self::Shell { .. } => Duration::from_secs(30),
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Devices => "list devices",
            Self::Connect { .. } => "connect",
            Self::Screenshot => "screenshot",
            Self::ScreenshotPng => "screenshot (png)",
            Self::Tap { .. } => "tap",
            Self::Swipe { .. } => "swipe",
            Self::Key { .. } => "key event",
            Self::StartApp { .. } => "start app",
            Self::ForceStop { .. } => "force stop",
            Self::Push { .. } => "push file",
            Self::Pull { .. } => "pull file",
            Self::Shell { .. } => "shell",
            Self::ScreenSize => "screen size",
        }
    }
}

fn svec(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
