//! Bridge transport: how commands reach the `adb` binary
//!
//! The [`BridgeTransport`] trait is the seam between the engine and the real
//! platform tools. Production code uses [`ProcessTransport`]; tests script a
//! fake transport and never touch a live bridge.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use droidherd_core::prelude::*;

use crate::commands::BridgeCommand;

/// Captured output of one bridge command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Raw stdout. Screenshots come through here as binary data.
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout as lossy UTF-8 for text-mode commands.
    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Build a successful output from text (test and fake-transport helper).
    pub fn ok_text(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into().into_bytes(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Build a successful output from binary data.
    pub fn ok_bytes(bytes: Vec<u8>) -> Self {
        Self {
            stdout: bytes,
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Build a failed output with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }
}

/// Executes bridge commands against a device serial.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Run one command. `serial` is empty for global commands.
    ///
    /// An `Err` means the command could not be executed (missing binary,
    /// spawn failure, timeout). A command that ran but exited non-zero is an
    /// `Ok` whose output reports the failure.
    async fn run(&self, serial: &str, command: &BridgeCommand) -> Result<CommandOutput>;
}

/// Real transport spawning the configured `adb` binary.
pub struct ProcessTransport {
    adb_path: String,
}

impl ProcessTransport {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl BridgeTransport for ProcessTransport {
    async fn run(&self, serial: &str, command: &BridgeCommand) -> Result<CommandOutput> {
        let argv = command.argv(serial);
        trace!("bridge: {} {}", self.adb_path, argv.join(" "));

        let spawned = Command::new(&self.adb_path)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = timeout(command.timeout(), spawned)
            .await
            .map_err(|_| {
                Error::bridge(format!(
                    "{} timed out after {:?}",
                    command.description(),
                    command.timeout()
                ))
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::AdbNotFound
                } else {
                    Error::bridge(format!("failed to run {}: {}", command.description(), e))
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.is_empty() {
            debug!("{} stderr: {}", command.description(), stderr.trim_end());
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr,
            exit_code: output.status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::ok_text("ok").success());
        assert!(!CommandOutput::failed("boom").success());
        assert!(!CommandOutput::default().success());
    }

    #[test]
    fn test_stdout_utf8_lossy() {
        let output = CommandOutput::ok_bytes(vec![0x68, 0x69, 0xFF]);
        assert!(output.stdout_utf8().starts_with("hi"));
    }

    #[tokio::test]
    async fn test_missing_binary_maps_to_adb_not_found() {
        let transport = ProcessTransport::new("definitely-not-a-real-adb-binary");
        let err = transport
            .run("emulator-5554", &BridgeCommand::ScreenSize)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdbNotFound));
    }

    #[tokio::test]
    #[ignore] // Requires the Android platform tools
    async fn test_devices_against_live_bridge() {
        let transport = ProcessTransport::default();
        let output = transport.run("", &BridgeCommand::Devices).await.unwrap();
        assert!(output.stdout_utf8().contains("List of devices"));
    }
}
