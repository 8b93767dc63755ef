//! Progress events published for external observers
//!
//! The [`StatusBus`] is a bounded many-producer broadcast. Delivery is
//! best-effort: a lagged observer loses the oldest events rather than
//! back-pressuring the workers.

use tokio::sync::broadcast;

/// Broadcast buffer size. Observers slower than this many events fall behind.
pub const STATUS_BUS_CAPACITY: usize = 256;

/// Progress events emitted by the registry, workers, and coordinator.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    // ─────────────────────────────────────────────────────────
    // Device Lifecycle
    // ─────────────────────────────────────────────────────────
    /// A device appeared or came back online.
    DeviceOnline { serial: String },

    /// A device disappeared or stopped responding.
    DeviceOffline { serial: String },

    // ─────────────────────────────────────────────────────────
    // Job Lifecycle
    // ─────────────────────────────────────────────────────────
    /// A multi-device run started.
    JobStarted {
        total_accounts: usize,
        device_count: usize,
    },

    /// A worker claimed an account and began processing it.
    AccountStarted { serial: String, filename: String },

    /// A worker finished an account, successfully or not.
    AccountFinished {
        serial: String,
        filename: String,
        success: bool,
        error: Option<String>,
    },

    /// A worker exited (queue drained, bridge lost, or cancelled).
    WorkerFinished {
        serial: String,
        processed: usize,
        succeeded: usize,
        failed: usize,
    },

    /// Aggregate progress snapshot after each account completion.
    Progress { processed: usize, total: usize },

    /// Every worker has exited and the job is complete.
    JobCompleted {
        processed: usize,
        succeeded: usize,
        failed: usize,
    },

    /// The job was stopped before the queue drained.
    JobStopped { processed: usize, total: usize },
}

impl StatusEvent {
    /// Short snake_case label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DeviceOnline { .. } => "device_online",
            Self::DeviceOffline { .. } => "device_offline",
            Self::JobStarted { .. } => "job_started",
            Self::AccountStarted { .. } => "account_started",
            Self::AccountFinished { .. } => "account_finished",
            Self::WorkerFinished { .. } => "worker_finished",
            Self::Progress { .. } => "progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobStopped { .. } => "job_stopped",
        }
    }
}

/// Many-producer, many-observer event bus with drop-on-lag semantics.
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Events with no observers are dropped silently.
    pub fn publish(&self, event: StatusEvent) {
        tracing::trace!("status event: {}", event.event_type());
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
