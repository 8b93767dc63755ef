//! Command-line interface over the engine
//!
//! One-shot tool semantics: exit code 0 when every target succeeded, 1 when
//! at least one failed, 2 on invalid input, 3 on an unrecoverable bridge
//! failure.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use droidherd_adb::{DeviceRegistry, ProcessTransport};
use droidherd_core::prelude::*;
use droidherd_core::{CancelToken, StatusBus, StatusEvent, Workflow};
use droidherd_engine::{
    find_duplicates, AccountExporter, GameConfig, JobCoordinator, JobSettings, Settings,
    WorkflowInterpreter, WorkflowRepo,
};
use droidherd_vision::{Region, TemplateStore};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURES: i32 = 1;
pub const EXIT_INVALID_INPUT: i32 = 2;
pub const EXIT_BRIDGE_FAILURE: i32 = 3;

#[derive(Parser)]
#[command(name = "droidherd", version, about = "Workflow automation for Android emulator fleets")]
pub struct Cli {
    /// Directory containing .droidherd/config.toml (defaults to the cwd)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a commented default config to .droidherd/config.toml
    Init,

    /// List devices known to the bridge
    Devices,

    /// Execute a workflow once on each listed device
    Run {
        /// Workflow selector: an id, a name, "master", or "mode:<name>"
        #[arg(long)]
        workflow: String,
        /// Device serial (repeatable)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,
    },

    /// Process a folder of account files across devices
    Batch {
        /// Folder containing account files
        #[arg(long)]
        folder: PathBuf,
        /// Device serial (repeatable)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,
        /// Workflow selector; defaults to "mode:daily-login"
        #[arg(long)]
        workflow: Option<String>,
        /// Continue a previously stopped run instead of starting over
        #[arg(long)]
        resume: bool,
        /// Leave processed files in place instead of moving them
        #[arg(long)]
        no_move: bool,
        /// Destination for processed files (default: <folder>/done)
        #[arg(long)]
        done_folder: Option<PathBuf>,
    },

    /// Capture a screen region from a device as a named template
    Capture {
        #[arg(long)]
        device: String,
        #[arg(long)]
        name: String,
        /// Region as X,Y,WIDTH,HEIGHT in workflow-resolution pixels
        #[arg(long)]
        region: String,
    },

    /// List stored templates
    Templates,

    /// List stored workflows
    Workflows,

    /// Find account files in TARGET duplicating content in MASTER
    Dedup {
        #[arg(long)]
        master: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Actually delete the duplicates (default is a dry run)
        #[arg(long)]
        delete: bool,
    },

    /// Pull the on-device account file from each device
    Export {
        #[arg(long = "device", required = true)]
        devices: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },
}

/// Shared wiring for every subcommand.
struct App {
    settings: Settings,
    registry: Arc<DeviceRegistry>,
    templates: Arc<TemplateStore>,
    repo: WorkflowRepo,
    interpreter: Arc<WorkflowInterpreter>,
    bus: StatusBus,
}

impl App {
    fn build(settings: Settings) -> Result<Self> {
        let bus = StatusBus::new();
        let transport = Arc::new(ProcessTransport::new(settings.bridge.adb_path.clone()));
        let registry = Arc::new(DeviceRegistry::new(
            transport,
            settings.bridge.command_retries,
            bus.clone(),
        ));

        let templates = Arc::new(TemplateStore::open(settings.storage.templates_dir())?);
        let repo = WorkflowRepo::open(settings.storage.workflows_dir())?;
        let interpreter = Arc::new(WorkflowInterpreter::new(
            Arc::clone(&templates),
            GameConfig::from(&settings.game),
        ));

        Ok(Self {
            settings,
            registry,
            templates,
            repo,
            interpreter,
            bus,
        })
    }

    /// Resolve a workflow selector: id, name, "master", or "mode:<name>".
    fn resolve_workflow(&self, selector: &str) -> Result<Workflow> {
        if selector == "master" {
            return self
                .repo
                .master()
                .ok_or_else(|| Error::workflow_not_found("master"));
        }
        if let Some(mode) = selector.strip_prefix("mode:") {
            return self
                .repo
                .find_for_mode(mode, None)
                .ok_or_else(|| Error::workflow_not_found(selector));
        }
        if let Ok(id) = selector.parse::<i64>() {
            if let Some(workflow) = self.repo.get(id) {
                return Ok(workflow);
            }
        }
        self.repo
            .get_by_name(selector)
            .ok_or_else(|| Error::workflow_not_found(selector))
    }
}

/// Parse arguments, dispatch, and map the outcome onto exit codes.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let base_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let settings = droidherd_engine::load_settings(&base_dir);

    match dispatch(cli, &base_dir, settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::AdbNotFound | Error::Bridge { .. } | Error::ChannelClosed => EXIT_BRIDGE_FAILURE,
        Error::Validation { .. }
        | Error::WorkflowNotFound { .. }
        | Error::WorkflowInvalid { .. }
        | Error::TemplateNotFound { .. }
        | Error::Config { .. }
        | Error::ConfigInvalid { .. }
        | Error::JobAlreadyRunning => EXIT_INVALID_INPUT,
        _ => EXIT_FAILURES,
    }
}

async fn dispatch(cli: Cli, base_dir: &std::path::Path, settings: Settings) -> Result<i32> {
    // `init` must work before any stores exist.
    if matches!(cli.command, Command::Init) {
        droidherd_engine::settings::init_config_dir(base_dir)?;
        eprintln!(
            "wrote {}",
            base_dir.join(".droidherd/config.toml").display()
        );
        return Ok(EXIT_OK);
    }

    let app = App::build(settings)?;

    match cli.command {
        Command::Init => unreachable!("handled above"),
        Command::Devices => devices(&app).await,
        Command::Run { workflow, devices } => run_workflow(&app, &workflow, &devices).await,
        Command::Batch {
            folder,
            devices,
            workflow,
            resume,
            no_move,
            done_folder,
        } => batch(&app, folder, devices, workflow, resume, no_move, done_folder).await,
        Command::Capture {
            device,
            name,
            region,
        } => capture(&app, &device, &name, &region).await,
        Command::Templates => {
            for template in app.templates.list() {
                println!(
                    "{}\t{}x{}\t{}",
                    template.name,
                    template.width,
                    template.height,
                    template.file_path.display()
                );
            }
            Ok(EXIT_OK)
        }
        Command::Workflows => {
            for workflow in app.repo.list() {
                println!(
                    "#{}\t{}\t{}{}",
                    workflow.id.unwrap_or_default(),
                    workflow.name,
                    workflow.mode_name.as_deref().unwrap_or("-"),
                    if workflow.is_master { "\t[master]" } else { "" }
                );
            }
            Ok(EXIT_OK)
        }
        Command::Dedup {
            master,
            target,
            delete,
        } => {
            let report = find_duplicates(
                &master,
                &target,
                &app.settings.batch.extension,
                !delete,
            )?;
            for pair in &report.pairs {
                println!("{}\t(matches {})", pair.file_b_name, pair.matches_with_name);
            }
            println!(
                "{} duplicate(s), {} removed",
                report.pairs.len(),
                report.removed_count
            );
            Ok(EXIT_OK)
        }
        Command::Export { devices, out } => export(&app, &devices, out).await,
    }
}

async fn devices(app: &App) -> Result<i32> {
    app.registry.refresh().await?;
    for device in app.registry.snapshot() {
        println!(
            "{}\t{}\t{}\t{}",
            device.serial,
            device.status.as_str(),
            device.screen_size_label(),
            device.assigned_task.as_str()
        );
    }
    Ok(EXIT_OK)
}

async fn run_workflow(app: &App, selector: &str, serials: &[String]) -> Result<i32> {
    let workflow = app.resolve_workflow(selector)?;
    app.interpreter.validate(&workflow)?;

    app.registry.refresh().await?;
    for serial in serials {
        if !app.registry.is_online(serial) {
            return Err(Error::validation(format!("device {} is offline", serial)));
        }
    }

    let cancel = CancelToken::new();
    let mut tasks = tokio::task::JoinSet::new();
    for serial in serials {
        let channel = app.registry.channel(serial);
        let interpreter = Arc::clone(&app.interpreter);
        let workflow = workflow.clone();
        let cancel = cancel.clone();
        let serial = serial.clone();
        tasks.spawn(async move {
            let result = interpreter.run(&workflow, &channel, &cancel).await;
            (serial, result)
        });
    }

    let mut failures = 0usize;
    let mut bridge_lost = false;
    while let Some(joined) = tasks.join_next().await {
        let Ok((serial, result)) = joined else {
            failures += 1;
            continue;
        };
        match result {
            Ok(()) => eprintln!("{}: ok", serial),
            Err(e) => {
                eprintln!("{}: {}", serial, e);
                failures += 1;
                if matches!(e, Error::AdbNotFound | Error::Bridge { .. }) {
                    bridge_lost = true;
                }
            }
        }
    }

    Ok(if failures == 0 {
        EXIT_OK
    } else if bridge_lost && failures == serials.len() {
        EXIT_BRIDGE_FAILURE
    } else {
        EXIT_FAILURES
    })
}

#[allow(clippy::too_many_arguments)]
async fn batch(
    app: &App,
    folder: PathBuf,
    serials: Vec<String>,
    selector: Option<String>,
    resume: bool,
    no_move: bool,
    done_folder: Option<PathBuf>,
) -> Result<i32> {
    let workflow = app.resolve_workflow(selector.as_deref().unwrap_or("mode:daily-login"))?;

    app.registry.refresh().await?;

    let mut job_settings = JobSettings::from(&app.settings);
    if no_move {
        job_settings.move_on_complete = false;
    }
    if done_folder.is_some() {
        job_settings.done_folder = done_folder;
    }

    let coordinator = JobCoordinator::new(
        Arc::clone(&app.registry),
        Arc::clone(&app.interpreter),
        app.bus.clone(),
        job_settings,
    );

    let count = coordinator.scan_folder(&folder)?;
    eprintln!("{} account file(s) in {}", count, folder.display());

    let events = app.bus.subscribe();
    coordinator.start(&serials, workflow, resume)?;

    // Keep the device registry fresh while the job runs.
    let poll_cancel = CancelToken::new();
    let poller = app.registry.spawn_poller(
        std::time::Duration::from_secs(app.settings.bridge.poll_interval_secs.max(1)),
        poll_cancel.clone(),
    );

    let outcome = stream_job(app, &coordinator, events).await;

    poll_cancel.cancel();
    let _ = poller.await;
    outcome
}

/// Stream progress to stderr until the job settles; Ctrl-C stops it cleanly.
async fn stream_job(
    app: &App,
    coordinator: &std::sync::Arc<JobCoordinator>,
    mut events: tokio::sync::broadcast::Receiver<StatusEvent>,
) -> Result<i32> {
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(StatusEvent::AccountStarted { serial, filename }) => {
                        eprintln!("[{}] -> {}", serial, filename);
                    }
                    Ok(StatusEvent::AccountFinished { serial, filename, success, error }) => {
                        if success {
                            eprintln!("[{}] ok {}", serial, filename);
                        } else {
                            eprintln!(
                                "[{}] FAILED {} ({})",
                                serial,
                                filename,
                                error.unwrap_or_default()
                            );
                        }
                    }
                    Ok(StatusEvent::Progress { processed, total }) => {
                        eprintln!("progress: {}/{}", processed, total);
                    }
                    Ok(StatusEvent::JobCompleted { processed, succeeded, failed }) => {
                        eprintln!(
                            "completed: {} processed, {} ok, {} failed",
                            processed, succeeded, failed
                        );
                        return Ok(if failed == 0 { EXIT_OK } else { EXIT_FAILURES });
                    }
                    Ok(StatusEvent::JobStopped { processed, total }) => {
                        eprintln!("stopped: {}/{} processed", processed, total);
                        return Ok(EXIT_FAILURES);
                    }
                    Ok(_) => {}
                    Err(_) => {
                        // Lagged behind the bus; re-subscribe, and settle from
                        // the job state if the run already finished.
                        events = app.bus.subscribe();
                        if coordinator.state() != droidherd_engine::JobState::Running {
                            let snapshot = coordinator.status();
                            return Ok(if snapshot.failed_count == 0 {
                                EXIT_OK
                            } else {
                                EXIT_FAILURES
                            });
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupt: stopping job");
                // The job may have settled in the meantime; nothing to stop then.
                let _ = coordinator.stop().await;
            }
        }
    }
}

async fn capture(app: &App, serial: &str, name: &str, region_spec: &str) -> Result<i32> {
    let region = parse_region(region_spec)?;

    app.registry.refresh().await?;
    if !app.registry.is_online(serial) {
        return Err(Error::validation(format!("device {} is offline", serial)));
    }

    let channel = app.registry.channel(serial);
    let frame = channel.screenshot().await?;
    let meta = app.templates.capture(&frame, name, region)?;

    println!(
        "{}\t{}x{}\t{}",
        meta.name,
        meta.width,
        meta.height,
        meta.file_path.display()
    );
    Ok(EXIT_OK)
}

async fn export(app: &App, serials: &[String], out: PathBuf) -> Result<i32> {
    app.registry.refresh().await?;
    let mut channels = Vec::new();
    for serial in serials {
        if !app.registry.is_online(serial) {
            return Err(Error::validation(format!("device {} is offline", serial)));
        }
        channels.push(app.registry.channel(serial));
    }

    let exporter = AccountExporter::new(
        app.settings.game.account_remote_path.clone(),
        out,
    );
    let results = exporter.export_all(&channels).await;

    let mut failures = 0usize;
    for (serial, result) in &results {
        match result {
            Ok(path) => eprintln!("{}: {}", serial, path.display()),
            Err(e) => {
                eprintln!("{}: {}", serial, e);
                failures += 1;
            }
        }
    }
    Ok(if failures == 0 { EXIT_OK } else { EXIT_FAILURES })
}

fn parse_region(spec: &str) -> Result<Region> {
    let parts: Vec<&str> = spec.split(',').map(|p| p.trim()).collect();
    if parts.len() != 4 {
        return Err(Error::validation(
            "region must be X,Y,WIDTH,HEIGHT".to_string(),
        ));
    }
    let mut values = [0u32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| Error::validation(format!("invalid region component '{}'", part)))?;
    }
    Ok(Region {
        x: values[0],
        y: values[1],
        width: values[2],
        height: values[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region() {
        let region = parse_region("10, 20, 30, 40").unwrap();
        assert_eq!(
            region,
            Region {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            }
        );

        assert!(parse_region("10,20,30").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&Error::AdbNotFound), EXIT_BRIDGE_FAILURE);
        assert_eq!(exit_code_for(&Error::bridge("gone")), EXIT_BRIDGE_FAILURE);
        assert_eq!(
            exit_code_for(&Error::validation("bad")),
            EXIT_INVALID_INPUT
        );
        assert_eq!(
            exit_code_for(&Error::workflow_not_found("x")),
            EXIT_INVALID_INPUT
        );
        assert_eq!(exit_code_for(&Error::step_failed(0, "x")), EXIT_FAILURES);
        assert_eq!(exit_code_for(&Error::Cancelled), EXIT_FAILURES);
    }

    #[test]
    fn test_cli_parses_batch() {
        let cli = Cli::parse_from([
            "droidherd",
            "batch",
            "--folder",
            "/accounts",
            "--device",
            "emulator-5554",
            "--device",
            "emulator-5556",
            "--resume",
        ]);
        match cli.command {
            Command::Batch {
                folder,
                devices,
                resume,
                ..
            } => {
                assert_eq!(folder, PathBuf::from("/accounts"));
                assert_eq!(devices.len(), 2);
                assert!(resume);
            }
            _ => panic!("expected batch"),
        }
    }

    #[test]
    fn test_cli_requires_device_for_run() {
        assert!(Cli::try_parse_from(["droidherd", "run", "--workflow", "master"]).is_err());
    }
}
