//! Multi-device job coordination
//!
//! One job exists process-wide: a shared account queue drained by one worker
//! task per device. Workers claim accounts, push the state file, run the
//! bound workflow, and record the outcome. A supervisor task waits for every
//! worker and finalizes the job.
//!
//! Stop is cooperative: the shared token is signalled, workers exit at their
//! next checkpoint, and any in-flight account is released back into the
//! claimable pool so a later resume picks it up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;

use droidherd_adb::{DeviceChannel, DeviceRegistry};
use droidherd_core::prelude::*;
use droidherd_core::{AccountTask, CancelToken, StatusBus, StatusEvent, Workflow};

use crate::interpreter::WorkflowInterpreter;
use crate::queue::AccountQueue;
use crate::settings::Settings;

/// Job-level knobs, bound once per run.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub move_on_complete: bool,
    /// Destination for successful files; None means `<source>/done/`.
    pub done_folder: Option<PathBuf>,
    /// Where account files land on the device.
    pub account_remote_path: String,
    pub delay_between_accounts_secs: f64,
    /// Account file extension used when scanning folders.
    pub extension: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            move_on_complete: true,
            done_folder: None,
            account_remote_path: "/sdcard/droidherd_account.xml".to_string(),
            delay_between_accounts_secs: 2.0,
            extension: "xml".to_string(),
        }
    }
}

impl From<&Settings> for JobSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            move_on_complete: settings.batch.move_on_complete,
            done_folder: settings.batch.done_folder_opt(),
            account_remote_path: settings.game.account_remote_path.clone(),
            delay_between_accounts_secs: settings.batch.delay_between_accounts_secs,
            extension: settings.batch.extension.clone(),
        }
    }
}

/// Lifecycle of the process-wide job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Completed,
}

/// Per-device progress, updated by the device's worker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceRuntime {
    pub serial: String,
    pub current_account: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub is_running: bool,
    pub last_error: String,
}

/// Read-only view of the job for observers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub folder_path: Option<PathBuf>,
    pub total_accounts: usize,
    pub processed_count: usize,
    pub remaining_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub devices: Vec<DeviceRuntime>,
    pub accounts: Vec<AccountTask>,
}

struct JobInner {
    state: JobState,
    cancel: CancelToken,
    runtimes: HashMap<String, Arc<Mutex<DeviceRuntime>>>,
    supervisor: Option<JoinHandle<()>>,
}

/// Owns the account queue and the per-device workers of the current job.
pub struct JobCoordinator {
    registry: Arc<DeviceRegistry>,
    interpreter: Arc<WorkflowInterpreter>,
    queue: Arc<AccountQueue>,
    bus: StatusBus,
    settings: Mutex<JobSettings>,
    inner: Mutex<JobInner>,
}

impl JobCoordinator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        interpreter: Arc<WorkflowInterpreter>,
        bus: StatusBus,
        settings: JobSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            interpreter,
            queue: Arc::new(AccountQueue::new()),
            bus,
            settings: Mutex::new(settings),
            inner: Mutex::new(JobInner {
                state: JobState::Idle,
                cancel: CancelToken::new(),
                runtimes: HashMap::new(),
                supervisor: None,
            }),
        })
    }

    pub fn queue(&self) -> &Arc<AccountQueue> {
        &self.queue
    }

    pub fn bus(&self) -> &StatusBus {
        &self.bus
    }

    /// Load the account queue from a folder. Rejected while a job runs.
    pub fn scan_folder(&self, folder: &Path) -> Result<usize> {
        if self.state() == JobState::Running {
            return Err(Error::JobAlreadyRunning);
        }
        let extension = self.settings.lock().expect("settings lock").extension.clone();
        self.queue.load(folder, &extension)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().expect("job lock").state
    }

    pub fn set_move_on_complete(&self, enabled: bool) {
        self.settings.lock().expect("settings lock").move_on_complete = enabled;
    }

    pub fn set_done_folder(&self, folder: Option<PathBuf>) {
        self.settings.lock().expect("settings lock").done_folder = folder;
    }

    /// Delete a bugged account file and drop it from the queue.
    pub fn mark_bugged(&self, filename: &str) -> Result<bool> {
        self.queue.mark_bugged(filename)
    }

    /// Start (or resume) a multi-device run. Non-blocking: workers are
    /// spawned and the call returns.
    pub fn start(
        self: &Arc<Self>,
        serials: &[String],
        workflow: Workflow,
        resume: bool,
    ) -> Result<()> {
        if serials.is_empty() {
            return Err(Error::validation("no devices selected"));
        }
        for serial in serials {
            if !self.registry.is_online(serial) {
                return Err(Error::validation(format!("device {} is offline", serial)));
            }
        }
        self.interpreter.validate(&workflow)?;

        let mut inner = self.inner.lock().expect("job lock");
        if inner.state == JobState::Running {
            return Err(Error::JobAlreadyRunning);
        }

        if resume {
            if self.queue.remaining_count() == 0 {
                // Everything done already: treat resume as a fresh pass.
                self.queue.reset_statuses();
            } else {
                self.queue.reset_running();
            }
        } else {
            self.queue.reset_statuses();
        }

        // An empty queue completes immediately instead of spawning workers.
        if self.queue.total() == 0 {
            inner.state = JobState::Completed;
            self.bus.publish(StatusEvent::JobCompleted {
                processed: 0,
                succeeded: 0,
                failed: 0,
            });
            info!("job started with an empty queue; completed immediately");
            return Ok(());
        }

        let cancel = CancelToken::new();
        inner.cancel = cancel.clone();
        inner.state = JobState::Running;
        inner.runtimes.clear();

        let workflow = Arc::new(workflow);
        let settings = self.settings.lock().expect("settings lock").clone();

        self.bus.publish(StatusEvent::JobStarted {
            total_accounts: self.queue.remaining_count(),
            device_count: serials.len(),
        });
        info!(
            "job started: {} account(s) across {} device(s), workflow '{}'",
            self.queue.remaining_count(),
            serials.len(),
            workflow.name
        );

        let mut handles = Vec::with_capacity(serials.len());
        for serial in serials {
            let runtime = Arc::new(Mutex::new(DeviceRuntime {
                serial: serial.clone(),
                is_running: true,
                ..DeviceRuntime::default()
            }));
            inner.runtimes.insert(serial.clone(), Arc::clone(&runtime));

            let channel = self.registry.channel(serial);
            self.registry.set_running(serial, true);

            let context = WorkerContext {
                serial: serial.clone(),
                channel,
                queue: Arc::clone(&self.queue),
                interpreter: Arc::clone(&self.interpreter),
                workflow: Arc::clone(&workflow),
                runtime,
                settings: settings.clone(),
                cancel: cancel.clone(),
                bus: self.bus.clone(),
                registry: Arc::clone(&self.registry),
            };
            handles.push(tokio::spawn(worker_loop(context)));
        }

        let coordinator = Arc::clone(self);
        inner.supervisor = Some(tokio::spawn(async move {
            for handle in handles {
                let _ = handle.await;
            }
            coordinator.finalize(cancel);
        }));

        Ok(())
    }

    /// Signal the cancellation token and wait until every worker has exited.
    /// After this returns no bridge command is issued until the next start.
    pub async fn stop(&self) -> Result<()> {
        let (cancel, supervisor) = {
            let mut inner = self.inner.lock().expect("job lock");
            if inner.state != JobState::Running {
                return Err(Error::validation("no job running"));
            }
            (inner.cancel.clone(), inner.supervisor.take())
        };

        info!("stopping job");
        cancel.cancel();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }
        Ok(())
    }

    /// All workers have exited; settle the final state.
    fn finalize(&self, cancel: CancelToken) {
        let processed = self.queue.processed_count();
        let succeeded = self.queue.succeeded_count();
        let failed = self.queue.failed_count();
        let total = self.queue.total();
        let cancelled = cancel.is_cancelled();

        {
            let mut inner = self.inner.lock().expect("job lock");
            inner.state = if cancelled {
                JobState::Idle
            } else {
                JobState::Completed
            };
        }

        if cancelled {
            // Clear stale claims so resume can pick in-flight accounts up.
            self.queue.reset_running();
            self.bus
                .publish(StatusEvent::JobStopped { processed, total });
            info!("job stopped: {}/{} processed", processed, total);
        } else {
            self.bus.publish(StatusEvent::JobCompleted {
                processed,
                succeeded,
                failed,
            });
            info!(
                "job completed: {} processed, {} succeeded, {} failed",
                processed, succeeded, failed
            );
        }
    }

    /// Read-only view of the job and its queue.
    pub fn status(&self) -> JobSnapshot {
        let inner = self.inner.lock().expect("job lock");
        let mut devices: Vec<DeviceRuntime> = inner
            .runtimes
            .values()
            .map(|r| r.lock().expect("runtime lock").clone())
            .collect();
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));

        JobSnapshot {
            state: inner.state,
            folder_path: self.queue.folder(),
            total_accounts: self.queue.total(),
            processed_count: self.queue.processed_count(),
            remaining_count: self.queue.remaining_count(),
            succeeded_count: self.queue.succeeded_count(),
            failed_count: self.queue.failed_count(),
            devices,
            accounts: self.queue.snapshot(),
        }
    }
}

struct WorkerContext {
    serial: String,
    channel: DeviceChannel,
    queue: Arc<AccountQueue>,
    interpreter: Arc<WorkflowInterpreter>,
    workflow: Arc<Workflow>,
    runtime: Arc<Mutex<DeviceRuntime>>,
    settings: JobSettings,
    cancel: CancelToken,
    bus: StatusBus,
    registry: Arc<DeviceRegistry>,
}

/// One device's claim-process-complete loop.
async fn worker_loop(ctx: WorkerContext) {
    info!("[{}] worker started", ctx.serial);

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let Some(task) = ctx.queue.claim(&ctx.serial) else {
            info!("[{}] queue drained", ctx.serial);
            break;
        };

        ctx.runtime.lock().expect("runtime lock").current_account = task.filename.clone();
        ctx.bus.publish(StatusEvent::AccountStarted {
            serial: ctx.serial.clone(),
            filename: task.filename.clone(),
        });

        let result = process_account(&ctx, &task).await;

        match result {
            Ok(()) => {
                ctx.queue.complete(&task.filename, true, None);
                {
                    let mut runtime = ctx.runtime.lock().expect("runtime lock");
                    runtime.processed += 1;
                    runtime.succeeded += 1;
                    runtime.current_account.clear();
                }
                ctx.bus.publish(StatusEvent::AccountFinished {
                    serial: ctx.serial.clone(),
                    filename: task.filename.clone(),
                    success: true,
                    error: None,
                });

                if ctx.settings.move_on_complete {
                    if let Err(e) = ctx
                        .queue
                        .move_to_done(&task.filename, ctx.settings.done_folder.as_deref())
                    {
                        warn!("[{}] could not move {}: {}", ctx.serial, task.filename, e);
                    }
                }
            }

            Err(Error::Cancelled) => {
                // Give the in-flight account back to the pool.
                ctx.queue.release(&task.filename);
                {
                    let mut runtime = ctx.runtime.lock().expect("runtime lock");
                    runtime.current_account.clear();
                    runtime.last_error = "cancelled".to_string();
                }
                info!("[{}] cancelled while on {}", ctx.serial, task.filename);
                break;
            }

            Err(e) => {
                let worker_fatal = matches!(
                    e,
                    Error::Bridge { .. }
                        | Error::AdbNotFound
                        | Error::ChannelClosed
                        | Error::DeviceOffline { .. }
                );

                let message = e.to_string();
                ctx.queue.complete(&task.filename, false, Some(&message));
                {
                    let mut runtime = ctx.runtime.lock().expect("runtime lock");
                    runtime.processed += 1;
                    runtime.failed += 1;
                    runtime.last_error = message.clone();
                    runtime.current_account.clear();
                }
                ctx.bus.publish(StatusEvent::AccountFinished {
                    serial: ctx.serial.clone(),
                    filename: task.filename.clone(),
                    success: false,
                    error: Some(message.clone()),
                });

                if worker_fatal {
                    error!(
                        "[{}] bridge lost on {}: {}",
                        ctx.serial, task.filename, message
                    );
                    break;
                }
                warn!("[{}] {} failed: {}", ctx.serial, task.filename, message);
            }
        }

        ctx.bus.publish(StatusEvent::Progress {
            processed: ctx.queue.processed_count(),
            total: ctx.queue.total(),
        });

        if !ctx.cancel.is_cancelled() && ctx.queue.remaining_count() > 0 {
            ctx.cancel
                .wait_secs(ctx.settings.delay_between_accounts_secs)
                .await;
        }
    }

    let (processed, succeeded, failed) = {
        let mut runtime = ctx.runtime.lock().expect("runtime lock");
        runtime.is_running = false;
        runtime.current_account.clear();
        (runtime.processed, runtime.succeeded, runtime.failed)
    };
    ctx.registry.set_running(&ctx.serial, false);
    ctx.bus.publish(StatusEvent::WorkerFinished {
        serial: ctx.serial.clone(),
        processed,
        succeeded,
        failed,
    });
    info!(
        "[{}] worker finished: {} processed ({} ok, {} failed)",
        ctx.serial, processed, succeeded, failed
    );
}

/// Push the account file to the device and run the workflow on it.
async fn process_account(ctx: &WorkerContext, task: &AccountTask) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let bytes = tokio::fs::read(&task.filepath).await?;
    ctx.channel
        .push(&bytes, &ctx.settings.account_remote_path)
        .await?;

    ctx.interpreter
        .run(&ctx.workflow, &ctx.channel, &ctx.cancel)
        .await
}
