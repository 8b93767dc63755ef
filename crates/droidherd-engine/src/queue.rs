//! Shared account queue drained by per-device workers
//!
//! A FIFO of account files plus a by-filename index, guarded by a single
//! mutex. `claim` is linearizable: two workers can never hold the same task,
//! and completed tasks are never handed out again.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use droidherd_core::prelude::*;
use droidherd_core::AccountTask;

#[derive(Default)]
struct QueueInner {
    folder: Option<PathBuf>,
    accounts: Vec<AccountTask>,
}

/// Thread-safe queue of account tasks for one job.
#[derive(Default)]
pub struct AccountQueue {
    inner: Mutex<QueueInner>,
}

impl AccountQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `folder` for files with `extension` and rebuild the queue in
    /// lexicographic filename order. Returns the number of tasks loaded.
    pub fn load(&self, folder: &Path, extension: &str) -> Result<usize> {
        if !folder.is_dir() {
            return Err(Error::validation(format!(
                "not a folder: {}",
                folder.display()
            )));
        }

        let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
        let mut accounts = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase() == wanted)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            accounts.push(AccountTask::new(filename, path.clone()));
        }
        accounts.sort_by(|a, b| a.filename.cmp(&b.filename));

        let count = accounts.len();
        let mut inner = self.inner.lock().expect("queue lock");
        inner.folder = Some(folder.to_path_buf());
        inner.accounts = accounts;

        info!("Loaded {} account(s) from {}", count, folder.display());
        Ok(count)
    }

    /// The folder the queue was loaded from.
    pub fn folder(&self) -> Option<PathBuf> {
        self.inner.lock().expect("queue lock").folder.clone()
    }

    /// Claim the first unprocessed, unclaimed task for `serial`.
    pub fn claim(&self, serial: &str) -> Option<AccountTask> {
        let mut inner = self.inner.lock().expect("queue lock");
        let task = inner.accounts.iter_mut().find(|t| t.is_claimable())?;
        task.running_on_device = Some(serial.to_string());
        debug!("[{}] claimed {}", serial, task.filename);
        Some(task.clone())
    }

    /// Record the outcome of a claimed task and release the claim.
    pub fn complete(&self, filename: &str, success: bool, error: Option<&str>) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        match inner.accounts.iter_mut().find(|t| t.filename == filename) {
            Some(task) => {
                task.processed = true;
                task.success = success;
                task.error_message = error.unwrap_or_default().to_string();
                task.running_on_device = None;
                true
            }
            None => false,
        }
    }

    /// Release a claim without completing the task (cancellation path);
    /// the task goes back into the claimable pool.
    pub fn release(&self, filename: &str) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        match inner
            .accounts
            .iter_mut()
            .find(|t| t.filename == filename && !t.processed)
        {
            Some(task) => {
                task.running_on_device = None;
                true
            }
            None => false,
        }
    }

    /// Clear stale claims on incomplete tasks (resume after a crash or stop).
    pub fn reset_running(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        for task in inner.accounts.iter_mut().filter(|t| !t.processed) {
            task.running_on_device = None;
        }
    }

    /// Reset every task to unprocessed for a fresh run.
    pub fn reset_statuses(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        for task in inner.accounts.iter_mut() {
            task.processed = false;
            task.success = false;
            task.error_message.clear();
            task.running_on_device = None;
        }
    }

    /// Delete a bugged file from disk and drop its task when unprocessed.
    pub fn mark_bugged(&self, filename: &str) -> Result<bool> {
        let mut inner = self.inner.lock().expect("queue lock");
        let Some(position) = inner.accounts.iter().position(|t| t.filename == filename) else {
            warn!("mark_bugged: {} not in queue", filename);
            return Ok(false);
        };

        let task = &inner.accounts[position];
        if task.filepath.exists() {
            std::fs::remove_file(&task.filepath)?;
            info!("Deleted bugged file {}", task.filepath.display());
        }

        if !task.processed {
            inner.accounts.remove(position);
        }
        Ok(true)
    }

    /// Move a processed file into the done folder (default `<source>/done/`).
    pub fn move_to_done(&self, filename: &str, done_folder: Option<&Path>) -> Result<PathBuf> {
        let mut inner = self.inner.lock().expect("queue lock");
        let task = inner
            .accounts
            .iter_mut()
            .find(|t| t.filename == filename)
            .ok_or_else(|| Error::validation(format!("{} not in queue", filename)))?;

        if !task.filepath.exists() {
            return Err(Error::validation(format!(
                "source file missing: {}",
                task.filepath.display()
            )));
        }

        let destination_dir = match done_folder {
            Some(dir) => dir.to_path_buf(),
            None => task
                .filepath
                .parent()
                .map(|p| p.join("done"))
                .ok_or_else(|| Error::validation("source file has no parent folder"))?,
        };
        std::fs::create_dir_all(&destination_dir)?;

        let destination = destination_dir.join(&task.filename);
        std::fs::rename(&task.filepath, &destination)?;
        task.filepath = destination.clone();

        info!("Moved {} to {}", filename, destination_dir.display());
        Ok(destination)
    }

    // ─────────────────────────────────────────────────────────
    // Counters / Snapshots
    // ─────────────────────────────────────────────────────────

    pub fn total(&self) -> usize {
        self.inner.lock().expect("queue lock").accounts.len()
    }

    pub fn processed_count(&self) -> usize {
        self.count(|t| t.processed)
    }

    pub fn remaining_count(&self) -> usize {
        self.count(|t| !t.processed)
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(|t| t.processed && t.success)
    }

    pub fn failed_count(&self) -> usize {
        self.count(|t| t.processed && !t.success)
    }

    fn count(&self, predicate: impl Fn(&AccountTask) -> bool) -> usize {
        self.inner
            .lock()
            .expect("queue lock")
            .accounts
            .iter()
            .filter(|t| predicate(t))
            .count()
    }

    /// Copy of every task, in queue order.
    pub fn snapshot(&self) -> Vec<AccountTask> {
        self.inner.lock().expect("queue lock").accounts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn folder_with(files: &[&str]) -> tempfile::TempDir {
        let temp = tempdir().unwrap();
        for name in files {
            std::fs::write(temp.path().join(name), format!("<data name='{}'/>", name)).unwrap();
        }
        temp
    }

    #[test]
    fn test_load_sorts_and_filters() {
        let temp = folder_with(&["b.xml", "a.xml", "notes.txt", "c.XML"]);
        let queue = AccountQueue::new();

        let count = queue.load(temp.path(), "xml").unwrap();
        assert_eq!(count, 3);

        let names: Vec<String> = queue.snapshot().into_iter().map(|t| t.filename).collect();
        assert_eq!(names, vec!["a.xml", "b.xml", "c.XML"]);
        assert_eq!(queue.folder(), Some(temp.path().to_path_buf()));
    }

    #[test]
    fn test_load_missing_folder() {
        let queue = AccountQueue::new();
        let err = queue.load(Path::new("/definitely/not/here"), "xml").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let temp = folder_with(&["a.xml", "b.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        let first = queue.claim("dev-1").unwrap();
        assert_eq!(first.filename, "a.xml");
        assert_eq!(first.running_on_device.as_deref(), Some("dev-1"));

        // The same task cannot be claimed twice.
        let second = queue.claim("dev-2").unwrap();
        assert_eq!(second.filename, "b.xml");

        assert!(queue.claim("dev-3").is_none());
    }

    #[test]
    fn test_complete_releases_claim_and_counts() {
        let temp = folder_with(&["a.xml", "b.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        let task = queue.claim("dev-1").unwrap();
        assert!(queue.complete(&task.filename, true, None));

        assert_eq!(queue.processed_count(), 1);
        assert_eq!(queue.succeeded_count(), 1);
        assert_eq!(queue.failed_count(), 0);
        assert_eq!(queue.remaining_count(), 1);

        let snapshot = queue.snapshot();
        assert!(snapshot[0].processed);
        assert!(snapshot[0].running_on_device.is_none());

        // Completed tasks are never reclaimed.
        assert_eq!(queue.claim("dev-1").unwrap().filename, "b.xml");
    }

    #[test]
    fn test_complete_records_error() {
        let temp = folder_with(&["a.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        queue.claim("dev-1").unwrap();
        queue.complete("a.xml", false, Some("bridge lost"));

        let task = &queue.snapshot()[0];
        assert!(task.processed);
        assert!(!task.success);
        assert_eq!(task.error_message, "bridge lost");
    }

    #[test]
    fn test_release_returns_task_to_pool() {
        let temp = folder_with(&["a.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        queue.claim("dev-1").unwrap();
        assert!(queue.claim("dev-2").is_none());

        assert!(queue.release("a.xml"));
        let reclaimed = queue.claim("dev-2").unwrap();
        assert_eq!(reclaimed.running_on_device.as_deref(), Some("dev-2"));
        assert_eq!(queue.processed_count(), 0);
    }

    #[test]
    fn test_reset_running_only_touches_incomplete() {
        let temp = folder_with(&["a.xml", "b.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        let a = queue.claim("dev-1").unwrap();
        queue.complete(&a.filename, true, None);
        queue.claim("dev-1").unwrap();

        queue.reset_running();

        let snapshot = queue.snapshot();
        assert!(snapshot[0].processed);
        assert!(snapshot[1].running_on_device.is_none());
        assert!(!snapshot[1].processed);
    }

    #[test]
    fn test_reset_statuses_for_fresh_run() {
        let temp = folder_with(&["a.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        queue.claim("dev-1").unwrap();
        queue.complete("a.xml", false, Some("boom"));
        queue.reset_statuses();

        let task = &queue.snapshot()[0];
        assert!(!task.processed);
        assert!(!task.success);
        assert!(task.error_message.is_empty());
        assert!(queue.claim("dev-1").is_some());
    }

    #[test]
    fn test_mark_bugged_deletes_file_and_task() {
        let temp = folder_with(&["a.xml", "b.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        assert!(queue.mark_bugged("a.xml").unwrap());
        assert!(!temp.path().join("a.xml").exists());
        assert_eq!(queue.total(), 1);

        assert!(!queue.mark_bugged("a.xml").unwrap());
    }

    #[test]
    fn test_move_to_done_default_subfolder() {
        let temp = folder_with(&["a.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        let destination = queue.move_to_done("a.xml", None).unwrap();
        assert_eq!(destination, temp.path().join("done").join("a.xml"));
        assert!(destination.exists());
        assert!(!temp.path().join("a.xml").exists());

        // The task's path follows the file.
        assert_eq!(queue.snapshot()[0].filepath, destination);
    }

    #[test]
    fn test_move_to_done_custom_folder() {
        let temp = folder_with(&["a.xml"]);
        let done = tempdir().unwrap();
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        let destination = queue
            .move_to_done("a.xml", Some(done.path()))
            .unwrap();
        assert_eq!(destination, done.path().join("a.xml"));
        assert!(destination.exists());
    }

    #[test]
    fn test_move_to_done_missing_source() {
        let temp = folder_with(&["a.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();
        std::fs::remove_file(temp.path().join("a.xml")).unwrap();

        assert!(queue.move_to_done("a.xml", None).is_err());
    }

    #[test]
    fn test_processed_count_matches_flags_at_every_snapshot() {
        let temp = folder_with(&["a.xml", "b.xml", "c.xml"]);
        let queue = AccountQueue::new();
        queue.load(temp.path(), "xml").unwrap();

        for expected in 1..=3usize {
            let task = queue.claim("dev-1").unwrap();
            queue.complete(&task.filename, expected % 2 == 0, None);

            let flagged = queue.snapshot().iter().filter(|t| t.processed).count();
            assert_eq!(queue.processed_count(), flagged);
            assert_eq!(queue.processed_count(), expected);
        }
    }
}
