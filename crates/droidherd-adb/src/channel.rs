//! Per-device serialized command channel
//!
//! Bridge clients tolerate concurrency poorly, and a screenshot must reflect
//! the input that preceded it. Every command for one serial therefore flows
//! through a single-consumer queue owned by a worker task; callers get their
//! result back on a oneshot reply.
//!
//! Transient bridge failures are retried up to a small bound. When retries
//! are exhausted the device is marked offline in the registry (when the
//! channel is attached to one) and the error propagates to the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use droidherd_core::prelude::*;
use droidherd_vision::Frame;

use crate::commands::{BridgeCommand, KEYCODE_BACK};
use crate::registry::DeviceRegistry;
use crate::screencap;
use crate::transport::{BridgeTransport, CommandOutput};

/// Default bound on transient-failure retries per command.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Commands queued beyond this bound make `try_`-style calls fail fast.
const QUEUE_DEPTH: usize = 32;

/// Pause between retries of a failed command.
const RETRY_PAUSE: Duration = Duration::from_millis(200);

struct ChannelRequest {
    command: BridgeCommand,
    reply: oneshot::Sender<Result<CommandOutput>>,
}

/// Handle to one device's serialized command queue.
#[derive(Clone)]
pub struct DeviceChannel {
    serial: String,
    tx: mpsc::Sender<ChannelRequest>,
}

impl std::fmt::Debug for DeviceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceChannel")
            .field("serial", &self.serial)
            .finish()
    }
}

impl DeviceChannel {
    /// Open a channel without registry attachment.
    pub fn open(
        serial: impl Into<String>,
        transport: Arc<dyn BridgeTransport>,
        retry_limit: u32,
    ) -> Self {
        Self::spawn(serial.into(), transport, retry_limit, None)
    }

    /// Open a channel that marks its device offline on bridge loss.
    pub fn open_with_registry(
        serial: impl Into<String>,
        transport: Arc<dyn BridgeTransport>,
        retry_limit: u32,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self::spawn(serial.into(), transport, retry_limit, Some(registry))
    }

    fn spawn(
        serial: String,
        transport: Arc<dyn BridgeTransport>,
        retry_limit: u32,
        registry: Option<Arc<DeviceRegistry>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<ChannelRequest>(QUEUE_DEPTH);
        tokio::spawn(Self::worker(
            serial.clone(),
            transport,
            retry_limit.max(1),
            registry,
            rx,
        ));
        Self { serial, tx }
    }

    /// Single-consumer worker: commands execute strictly in queue order.
    async fn worker(
        serial: String,
        transport: Arc<dyn BridgeTransport>,
        retry_limit: u32,
        registry: Option<Arc<DeviceRegistry>>,
        mut rx: mpsc::Receiver<ChannelRequest>,
    ) {
        debug!("[{}] channel worker started", serial);

        while let Some(request) = rx.recv().await {
            let result =
                Self::execute_with_retries(&serial, &*transport, &request.command, retry_limit)
                    .await;

            if let Err(e) = &result {
                if matches!(e, Error::Bridge { .. } | Error::AdbNotFound) {
                    if let Some(registry) = &registry {
                        registry.mark_offline(&serial);
                    }
                }
            }

            // Caller may have given up; a dropped receiver is not an error.
            let _ = request.reply.send(result);
        }

        debug!("[{}] channel worker finished", serial);
    }

    async fn execute_with_retries(
        serial: &str,
        transport: &dyn BridgeTransport,
        command: &BridgeCommand,
        retry_limit: u32,
    ) -> Result<CommandOutput> {
        let mut last_error = None;

        for attempt in 1..=retry_limit {
            match transport.run(serial, command).await {
                Ok(output) => {
                    // Shell output goes back verbatim; the caller inspects it.
                    if output.success() || matches!(command, BridgeCommand::Shell { .. }) {
                        return Ok(output);
                    }
                    last_error = Some(Error::bridge(format!(
                        "{} exited with {:?}: {}",
                        command.description(),
                        output.exit_code,
                        output.stderr.trim_end()
                    )));
                }
                // A missing binary never heals mid-run.
                Err(Error::AdbNotFound) => return Err(Error::AdbNotFound),
                Err(e) => last_error = Some(e),
            }

            if attempt < retry_limit {
                warn!(
                    "[{}] {} failed (attempt {}/{}), retrying",
                    serial,
                    command.description(),
                    attempt,
                    retry_limit
                );
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::bridge("command failed")))
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Enqueue a command and wait for its result.
    pub async fn exec(&self, command: BridgeCommand) -> Result<CommandOutput> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ChannelRequest {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Enqueue without waiting for queue space; fails fast when the device
    /// is saturated. Used by background preview screenshots.
    async fn exec_nonblocking(&self, command: BridgeCommand) -> Result<CommandOutput> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(ChannelRequest {
                command,
                reply: reply_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::device_busy(&self.serial),
                mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
            })?;

        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    // ─────────────────────────────────────────────────────────
    // Screenshots
    // ─────────────────────────────────────────────────────────

    /// Capture and decode the current screen.
    pub async fn screenshot(&self) -> Result<Frame> {
        let output = self.exec(BridgeCommand::Screenshot).await?;
        screencap::decode(&output.stdout)
    }

    /// Capture a PNG screenshot (for template capture and previews).
    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let output = self.exec(BridgeCommand::ScreenshotPng).await?;
        Ok(output.stdout)
    }

    /// Screenshot that skips instead of queueing behind a busy device.
    pub async fn try_screenshot(&self) -> Result<Frame> {
        let output = self.exec_nonblocking(BridgeCommand::Screenshot).await?;
        screencap::decode(&output.stdout)
    }

    // ─────────────────────────────────────────────────────────
    // Input Injection
    // ─────────────────────────────────────────────────────────

    pub async fn tap(&self, x: i32, y: i32) -> Result<()> {
        debug!("[{}] tap ({}, {})", self.serial, x, y);
        self.exec(BridgeCommand::Tap { x, y }).await.map(|_| ())
    }

    pub async fn swipe(
        &self,
        x: i32,
        y: i32,
        end_x: i32,
        end_y: i32,
        duration_ms: u64,
    ) -> Result<()> {
        debug!(
            "[{}] swipe ({}, {}) -> ({}, {}) over {}ms",
            self.serial, x, y, end_x, end_y, duration_ms
        );
        self.exec(BridgeCommand::Swipe {
            x,
            y,
            end_x,
            end_y,
            duration_ms,
        })
        .await
        .map(|_| ())
    }

    pub async fn key(&self, code: i32) -> Result<()> {
        self.exec(BridgeCommand::Key { code }).await.map(|_| ())
    }

    pub async fn press_back(&self) -> Result<()> {
        self.key(KEYCODE_BACK).await
    }

    // ─────────────────────────────────────────────────────────
    // App Lifecycle
    // ─────────────────────────────────────────────────────────

    pub async fn launch_app(&self, package: &str, activity: Option<&str>) -> Result<()> {
        info!("[{}] launching {}", self.serial, package);
        self.exec(BridgeCommand::StartApp {
            package: package.to_string(),
            activity: activity.map(|a| a.to_string()),
        })
        .await
        .map(|_| ())
    }

    pub async fn force_stop(&self, package: &str) -> Result<()> {
        info!("[{}] force-stopping {}", self.serial, package);
        self.exec(BridgeCommand::ForceStop {
            package: package.to_string(),
        })
        .await
        .map(|_| ())
    }

    // ─────────────────────────────────────────────────────────
    // File Transfer
    // ─────────────────────────────────────────────────────────

    pub async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("[{}] push {} -> {}", self.serial, local.display(), remote);
        self.exec(BridgeCommand::Push {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Push a byte buffer by staging it in a temp file.
    pub async fn push(&self, bytes: &[u8], remote: &str) -> Result<()> {
        let staged = tempfile::NamedTempFile::new()?;
        std::fs::write(staged.path(), bytes)?;
        // The temp file must outlive the command.
        let result = self.push_file(staged.path(), remote).await;
        drop(staged);
        result
    }

    /// Pull a remote file into memory.
    pub async fn pull(&self, remote: &str) -> Result<Vec<u8>> {
        let staged = tempfile::NamedTempFile::new()?;
        self.exec(BridgeCommand::Pull {
            remote: remote.to_string(),
            local: staged.path().to_path_buf(),
        })
        .await?;
        Ok(std::fs::read(staged.path())?)
    }

    // ─────────────────────────────────────────────────────────
    // Misc
    // ─────────────────────────────────────────────────────────

    /// Run a shell command, returning combined stdout and stderr.
    pub async fn shell(&self, command: &str) -> Result<String> {
        let output = self
            .exec(BridgeCommand::Shell {
                command: command.to_string(),
            })
            .await?;
        Ok(format!("{}{}", output.stdout_utf8(), output.stderr))
    }

    /// Probe the device's screen geometry.
    pub async fn screen_size(&self) -> Result<(u32, u32)> {
        let output = self.exec(BridgeCommand::ScreenSize).await?;
        crate::discovery::parse_screen_size(&output.stdout_utf8())
            .ok_or_else(|| Error::protocol("unparseable wm size output"))
    }
}
