//! Account task records for the shared batch queue

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One account state file waiting to be (or already) processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTask {
    /// File name within the scanned folder, unique per queue.
    pub filename: String,

    /// Absolute path of the file on disk. Updated when the file is moved
    /// to the done folder.
    pub filepath: PathBuf,

    #[serde(default)]
    pub processed: bool,

    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub error_message: String,

    /// Serial of the worker currently holding this task, if any.
    #[serde(default)]
    pub running_on_device: Option<String>,
}

impl AccountTask {
    pub fn new(filename: impl Into<String>, filepath: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            filepath: filepath.into(),
            processed: false,
            success: false,
            error_message: String::new(),
            running_on_device: None,
        }
    }

    /// A task is claimable when it has neither finished nor been claimed.
    pub fn is_claimable(&self) -> bool {
        !self.processed && self.running_on_device.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_claimable() {
        let task = AccountTask::new("a.xml", "/accounts/a.xml");
        assert!(task.is_claimable());
        assert!(!task.processed);
        assert!(!task.success);
        assert!(task.error_message.is_empty());
    }

    #[test]
    fn test_claimed_task_not_claimable() {
        let mut task = AccountTask::new("a.xml", "/accounts/a.xml");
        task.running_on_device = Some("emulator-5554".to_string());
        assert!(!task.is_claimable());
    }

    #[test]
    fn test_processed_task_not_claimable() {
        let mut task = AccountTask::new("a.xml", "/accounts/a.xml");
        task.processed = true;
        assert!(!task.is_claimable());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut task = AccountTask::new("b.xml", "/accounts/b.xml");
        task.processed = true;
        task.success = false;
        task.error_message = "bridge".to_string();

        let json = serde_json::to_string(&task).unwrap();
        let parsed: AccountTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }
}
