//! # droidherd-core - Core Domain Types
//!
//! Foundation crate for droidherd. Provides domain types, error handling,
//! the workflow model, cooperative cancellation, and the status event bus.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, chrono, thiserror, tokio, tracing).
//!
//! ## Public API
//!
//! ### Workflow Model (`workflow`)
//! - [`Workflow`] - Named step program authored at a fixed resolution
//! - [`WorkflowStep`] / [`StepAction`] - Tagged step sum (`step_type` on the wire)
//! - [`OnMatchAction`] - What `image_match` does on a hit
//!
//! ### Accounts (`account`)
//! - [`AccountTask`] - One account state file in the batch queue
//!
//! ### Events (`events`)
//! - [`StatusEvent`] - Progress events for observers
//! - [`StatusBus`] - Bounded broadcast with drop-on-lag delivery
//!
//! ### Cancellation (`cancel`)
//! - [`CancelToken`] - Monotonic cooperative cancellation with early-return waits
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use droidherd_core::prelude::*;
//! ```

pub mod account;
pub mod cancel;
pub mod error;
pub mod events;
pub mod logging;
pub mod workflow;

/// Prelude for common imports used throughout all droidherd crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use account::AccountTask;
pub use cancel::CancelToken;
pub use error::{Error, Result, ResultExt};
pub use events::{StatusBus, StatusEvent, STATUS_BUS_CAPACITY};
pub use workflow::{
    month_year_now, OnMatchAction, StepAction, Workflow, WorkflowStep, DEFAULT_SCREEN_HEIGHT,
    DEFAULT_SCREEN_WIDTH,
};
