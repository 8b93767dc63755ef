//! Workflow repository: CRUD over a key/value-shaped file store
//!
//! One JSON document per workflow under the data directory. The repository
//! keeps a full in-memory view guarded by a RwLock; mutations rewrite the
//! affected documents atomically. `set_master` clears the previous master
//! inside the same write guard, so at most one master is ever observable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use droidherd_core::prelude::*;
use droidherd_core::workflow::{month_year_now, Workflow};

/// File-backed workflow store.
pub struct WorkflowRepo {
    root: PathBuf,
    workflows: RwLock<HashMap<i64, Workflow>>,
}

impl WorkflowRepo {
    /// Open (or create) the repository at `root`, loading every document.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut workflows = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_document(&path) {
                Ok(workflow) => {
                    if let Some(id) = workflow.id {
                        workflows.insert(id, workflow);
                    } else {
                        warn!("Skipping workflow without id: {}", path.display());
                    }
                }
                Err(e) => warn!("Skipping unreadable workflow {}: {}", path.display(), e),
            }
        }

        info!(
            "Workflow repo opened at {} ({} workflow(s))",
            root.display(),
            workflows.len()
        );
        Ok(Self {
            root,
            workflows: RwLock::new(workflows),
        })
    }

    fn read_document(path: &Path) -> Result<Workflow> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn document_path(&self, id: i64) -> PathBuf {
        self.root.join(format!("workflow-{:04}.json", id))
    }

    /// Atomic document write: temp file then rename.
    fn write_document(&self, workflow: &Workflow) -> Result<()> {
        let id = workflow
            .id
            .ok_or_else(|| Error::workflow_invalid("cannot persist a workflow without an id"))?;
        let content = serde_json::to_string_pretty(workflow)?;
        let temp_path = self.root.join(format!(".workflow-{:04}.json.tmp", id));
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, self.document_path(id))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    /// All workflows, most recently updated first.
    pub fn list(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self
            .workflows
            .read()
            .expect("repo lock")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn get(&self, id: i64) -> Option<Workflow> {
        self.workflows.read().expect("repo lock").get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Workflow> {
        self.workflows
            .read()
            .expect("repo lock")
            .values()
            .find(|w| w.name == name)
            .cloned()
    }

    /// The current master workflow, if one is set.
    pub fn master(&self) -> Option<Workflow> {
        self.workflows
            .read()
            .expect("repo lock")
            .values()
            .find(|w| w.is_master)
            .cloned()
    }

    /// The workflow for a mode and month.
    ///
    /// Prefers an exact (mode, month) match, master first; falls back to the
    /// most recently updated workflow for the mode. `month_year` defaults to
    /// the current local calendar month.
    pub fn find_for_mode(&self, mode_name: &str, month_year: Option<&str>) -> Option<Workflow> {
        let month = month_year
            .map(|m| m.to_string())
            .unwrap_or_else(month_year_now);

        let workflows = self.workflows.read().expect("repo lock");

        let mut exact: Vec<&Workflow> = workflows
            .values()
            .filter(|w| {
                w.mode_name.as_deref() == Some(mode_name)
                    && w.month_year.as_deref() == Some(month.as_str())
            })
            .collect();
        exact.sort_by(|a, b| {
            b.is_master
                .cmp(&a.is_master)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        if let Some(found) = exact.first() {
            return Some((*found).clone());
        }

        let mut any_month: Vec<&Workflow> = workflows
            .values()
            .filter(|w| w.mode_name.as_deref() == Some(mode_name))
            .collect();
        any_month.sort_by(|a, b| {
            b.is_master
                .cmp(&a.is_master)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        any_month.first().map(|w| (*w).clone())
    }

    // ─────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────

    /// Persist a new workflow. Steps are reindexed to a contiguous order.
    pub fn create(&self, mut workflow: Workflow) -> Result<Workflow> {
        normalize_step_order(&mut workflow);
        workflow.validate()?;

        let now = Utc::now();
        workflow.created_at = Some(now);
        workflow.updated_at = Some(now);

        let mut workflows = self.workflows.write().expect("repo lock");
        let id = workflows.keys().max().copied().unwrap_or(0) + 1;
        workflow.id = Some(id);

        if workflow.is_master {
            self.clear_master_locked(&mut workflows, id)?;
        }

        self.write_document(&workflow)?;
        workflows.insert(id, workflow.clone());
        info!("Created workflow #{} '{}'", id, workflow.name);
        Ok(workflow)
    }

    /// Replace an existing workflow's contents.
    pub fn update(&self, id: i64, mut workflow: Workflow) -> Result<Workflow> {
        normalize_step_order(&mut workflow);
        workflow.validate()?;

        let mut workflows = self.workflows.write().expect("repo lock");
        let existing = workflows
            .get(&id)
            .ok_or_else(|| Error::workflow_not_found(format!("#{}", id)))?;

        workflow.id = Some(id);
        workflow.created_at = existing.created_at;
        workflow.updated_at = Some(Utc::now());

        if workflow.is_master {
            self.clear_master_locked(&mut workflows, id)?;
        }

        self.write_document(&workflow)?;
        workflows.insert(id, workflow.clone());
        info!("Updated workflow #{} '{}'", id, workflow.name);
        Ok(workflow)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let mut workflows = self.workflows.write().expect("repo lock");
        if workflows.remove(&id).is_none() {
            return Ok(false);
        }

        let path = self.document_path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        info!("Deleted workflow #{}", id);
        Ok(true)
    }

    /// Make `id` the sole master. Atomic: the previous master is cleared
    /// under the same write guard.
    pub fn set_master(&self, id: i64) -> Result<()> {
        let mut workflows = self.workflows.write().expect("repo lock");
        if !workflows.contains_key(&id) {
            return Err(Error::workflow_not_found(format!("#{}", id)));
        }

        self.clear_master_locked(&mut workflows, id)?;

        let target = workflows.get_mut(&id).expect("checked above");
        if !target.is_master {
            target.is_master = true;
            target.touch();
            let updated = target.clone();
            self.write_document(&updated)?;
        }
        info!("Workflow #{} is now master", id);
        Ok(())
    }

    /// Clear the master flag on every workflow except `keep`, persisting the
    /// change. Caller holds the write guard.
    fn clear_master_locked(
        &self,
        workflows: &mut HashMap<i64, Workflow>,
        keep: i64,
    ) -> Result<()> {
        let demoted: Vec<i64> = workflows
            .values()
            .filter(|w| w.is_master && w.id != Some(keep))
            .filter_map(|w| w.id)
            .collect();

        for id in demoted {
            let workflow = workflows.get_mut(&id).expect("id from same map");
            workflow.is_master = false;
            workflow.touch();
            let updated = workflow.clone();
            self.write_document(&updated)?;
        }
        Ok(())
    }
}

/// Reindex steps into contiguous order_index values, keeping relative order.
fn normalize_step_order(workflow: &mut Workflow) {
    workflow.steps.sort_by_key(|s| s.order_index);
    for (index, step) in workflow.steps.iter_mut().enumerate() {
        step.order_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidherd_core::workflow::{StepAction, WorkflowStep};
    use tempfile::tempdir;

    fn workflow_named(name: &str) -> Workflow {
        let mut workflow = Workflow::new(name);
        workflow.steps = vec![WorkflowStep {
            order_index: 0,
            description: String::new(),
            group_name: None,
            action: StepAction::Click { x: 1, y: 2 },
        }];
        workflow
    }

    #[test]
    fn test_create_assigns_ids() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let a = repo.create(workflow_named("a")).unwrap();
        let b = repo.create(workflow_named("b")).unwrap();

        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
        assert_eq!(repo.list().len(), 2);
    }

    #[test]
    fn test_round_trip_preserves_steps() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut workflow = workflow_named("rt");
        workflow.steps.push(WorkflowStep {
            order_index: 1,
            description: "wait for lobby".to_string(),
            group_name: Some("farm".to_string()),
            action: StepAction::WaitForColor {
                x: 10,
                y: 20,
                expected_color: [12, 34, 56],
                tolerance: 5,
                max_wait_seconds: 20.0,
                check_interval: 0.5,
            },
        });

        let created = repo.create(workflow).unwrap();

        // A fresh repo instance reads back from disk.
        let reopened = WorkflowRepo::open(temp.path()).unwrap();
        let loaded = reopened.get(created.id.unwrap()).unwrap();
        assert_eq!(loaded.steps, created.steps);
        assert_eq!(loaded.name, "rt");
    }

    #[test]
    fn test_create_rejects_invalid() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut workflow = workflow_named("bad");
        workflow.steps.push(WorkflowStep {
            order_index: 1,
            description: String::new(),
            group_name: None,
            action: StepAction::RepeatGroup {
                loop_group_name: "missing".to_string(),
                stop_template_ref: None,
                stop_on_not_found: true,
                loop_max_iterations: 10,
                threshold: 0.8,
            },
        });

        assert!(repo.create(workflow).is_err());
        assert!(repo.list().is_empty());
    }

    #[test]
    fn test_create_normalizes_order() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut workflow = Workflow::new("gaps");
        for (i, order) in [5usize, 2, 9].iter().enumerate() {
            workflow.steps.push(WorkflowStep {
                order_index: *order,
                description: format!("step {}", i),
                group_name: None,
                action: StepAction::PressBack,
            });
        }

        let created = repo.create(workflow).unwrap();
        let orders: Vec<usize> = created.steps.iter().map(|s| s.order_index).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        // Relative order preserved: 2 < 5 < 9.
        assert_eq!(created.steps[0].description, "step 1");
    }

    #[test]
    fn test_update_preserves_created_at() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let created = repo.create(workflow_named("w")).unwrap();
        let mut updated = created.clone();
        updated.description = "revised".to_string();

        let saved = repo.update(created.id.unwrap(), updated).unwrap();
        assert_eq!(saved.created_at, created.created_at);
        assert_eq!(saved.description, "revised");
        assert!(saved.updated_at >= created.updated_at);
    }

    #[test]
    fn test_update_unknown_id() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();
        let err = repo.update(42, workflow_named("w")).unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound { .. }));
    }

    #[test]
    fn test_delete_removes_document() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let created = repo.create(workflow_named("w")).unwrap();
        let id = created.id.unwrap();

        assert!(repo.delete(id).unwrap());
        assert!(repo.get(id).is_none());
        assert!(!repo.delete(id).unwrap());

        let reopened = WorkflowRepo::open(temp.path()).unwrap();
        assert!(reopened.get(id).is_none());
    }

    #[test]
    fn test_set_master_is_exclusive() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let a = repo.create(workflow_named("a")).unwrap();
        let b = repo.create(workflow_named("b")).unwrap();

        repo.set_master(a.id.unwrap()).unwrap();
        assert_eq!(repo.master().unwrap().id, a.id);

        repo.set_master(b.id.unwrap()).unwrap();
        assert_eq!(repo.master().unwrap().id, b.id);

        let masters = repo.list().iter().filter(|w| w.is_master).count();
        assert_eq!(masters, 1);

        // Survives reopen.
        let reopened = WorkflowRepo::open(temp.path()).unwrap();
        assert_eq!(reopened.master().unwrap().id, b.id);
    }

    #[test]
    fn test_create_with_master_clears_previous() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut first = workflow_named("first");
        first.is_master = true;
        repo.create(first).unwrap();

        let mut second = workflow_named("second");
        second.is_master = true;
        let second = repo.create(second).unwrap();

        assert_eq!(repo.master().unwrap().id, second.id);
        assert_eq!(repo.list().iter().filter(|w| w.is_master).count(), 1);
    }

    #[test]
    fn test_find_for_mode_prefers_exact_month() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut old = workflow_named("november");
        old.mode_name = Some("daily-login".to_string());
        old.month_year = Some("2025-11".to_string());
        repo.create(old).unwrap();

        let mut current = workflow_named("december");
        current.mode_name = Some("daily-login".to_string());
        current.month_year = Some("2025-12".to_string());
        repo.create(current).unwrap();

        let found = repo
            .find_for_mode("daily-login", Some("2025-12"))
            .unwrap();
        assert_eq!(found.name, "december");
    }

    #[test]
    fn test_find_for_mode_falls_back_to_mode() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut old = workflow_named("november");
        old.mode_name = Some("daily-login".to_string());
        old.month_year = Some("2025-11".to_string());
        repo.create(old).unwrap();

        let found = repo.find_for_mode("daily-login", Some("2026-01")).unwrap();
        assert_eq!(found.name, "november");

        assert!(repo.find_for_mode("stage-farm", None).is_none());
    }

    #[test]
    fn test_find_for_mode_prefers_master_on_tie() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();

        let mut plain = workflow_named("plain");
        plain.mode_name = Some("daily-login".to_string());
        plain.month_year = Some("2025-12".to_string());
        repo.create(plain).unwrap();

        let mut master = workflow_named("master");
        master.mode_name = Some("daily-login".to_string());
        master.month_year = Some("2025-12".to_string());
        master.is_master = true;
        repo.create(master).unwrap();

        let found = repo.find_for_mode("daily-login", Some("2025-12")).unwrap();
        assert_eq!(found.name, "master");
    }

    #[test]
    fn test_get_by_name() {
        let temp = tempdir().unwrap();
        let repo = WorkflowRepo::open(temp.path()).unwrap();
        repo.create(workflow_named("special")).unwrap();

        assert!(repo.get_by_name("special").is_some());
        assert!(repo.get_by_name("nope").is_none());
    }

    #[test]
    fn test_open_skips_corrupt_documents() {
        let temp = tempdir().unwrap();
        {
            let repo = WorkflowRepo::open(temp.path()).unwrap();
            repo.create(workflow_named("good")).unwrap();
        }
        std::fs::write(temp.path().join("workflow-0099.json"), "{broken").unwrap();

        let repo = WorkflowRepo::open(temp.path()).unwrap();
        assert_eq!(repo.list().len(), 1);
    }
}
