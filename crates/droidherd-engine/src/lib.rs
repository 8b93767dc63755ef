//! # droidherd-engine - Workflow Execution and Job Coordination
//!
//! The execution engine: workflow storage, the step interpreter, the shared
//! account queue, and the multi-device job coordinator, plus the batch
//! utilities built on top of them (duplicate finder, account exporter).
//!
//! Depends on [`droidherd_core`], [`droidherd_vision`], and [`droidherd_adb`].
//!
//! ## Architecture
//!
//! ```text
//! JobCoordinator
//!     ├── AccountQueue (shared FIFO, one mutex)
//!     ├── per-device worker tasks
//!     │       └── WorkflowInterpreter ── DeviceChannel
//!     ├── StatusBus (progress events)
//!     └── supervisor (final state + totals)
//! ```
//!
//! ## Public API
//!
//! - [`WorkflowInterpreter`] / [`GameConfig`] - step execution on one device
//! - [`WorkflowRepo`] - persistent workflow store with a single master
//! - [`AccountQueue`] - linearizable claim/complete over account files
//! - [`JobCoordinator`] / [`JobState`] / [`JobSnapshot`] - the current run
//! - [`find_duplicates`] - SHA-256 duplicate finder
//! - [`AccountExporter`] - pull account files off devices
//! - [`Settings`] - `.droidherd/config.toml`

pub mod dedup;
pub mod export;
pub mod interpreter;
pub mod job;
pub mod queue;
pub mod repo;
pub mod settings;

pub use dedup::{find_duplicates, DedupReport, DuplicatePair};
pub use export::AccountExporter;
pub use interpreter::{GameConfig, WorkflowInterpreter};
pub use job::{DeviceRuntime, JobCoordinator, JobSettings, JobSnapshot, JobState};
pub use queue::AccountQueue;
pub use repo::WorkflowRepo;
pub use settings::{load_settings, save_settings, Settings};
