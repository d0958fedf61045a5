//! Explicit job registry.
//!
//! Jobs live in a store keyed by job id with a create/get/remove
//! lifecycle; the store is injected into the orchestrator rather than
//! held as process-wide state. Concurrent jobs share nothing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assembly::AssemblyOutput;
use crate::ledger::{Stage, StageSummary, TaskLedger, TaskStatus};
use crate::models::SlideRecord;

/// Overall job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Running,
    /// Assembly succeeded and no fallback was used anywhere
    Completed,
    /// Assembly succeeded but some slide used a silent track, a
    /// placeholder clip, or the burn-in fallback
    CompletedWithWarnings,
    /// Assembly failed; earlier stage outputs remain on disk
    Failed,
    Cancelled,
}

/// Per-stage progress attached to a status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub summary: StageSummary,
}

/// Poll-based status snapshot for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub outcome: JobOutcome,
    pub current_stage: Stage,
    /// Integer percent of the active stage
    pub percent_complete: u8,
    pub stages: Vec<StageProgress>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub output: Option<AssemblyOutput>,
}

#[derive(Debug)]
struct JobState {
    outcome: JobOutcome,
    current_stage: Stage,
    active_percent: u8,
    warnings: Vec<String>,
    errors: Vec<String>,
    output: Option<AssemblyOutput>,
}

/// Mutable state of one running or finished job. Queryable mid-flight and
/// after termination.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    slides: Vec<SlideRecord>,
    state: Mutex<JobState>,
    ledger: Mutex<TaskLedger>,
    cancelled: AtomicBool,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slides(&self) -> &[SlideRecord] {
        &self.slides
    }

    /// Request cancellation; checked between stages and before each new
    /// work item, never mid-task
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        let state = self.state.lock().unwrap();
        let ledger = self.ledger.lock().unwrap();
        JobStatus {
            job_id: self.id.clone(),
            outcome: state.outcome,
            current_stage: state.current_stage,
            percent_complete: state.active_percent,
            stages: Stage::ALL
                .iter()
                .map(|stage| StageProgress {
                    stage: *stage,
                    summary: ledger.stage_summary(*stage),
                })
                .collect(),
            warnings: state.warnings.clone(),
            errors: state.errors.clone(),
            output: state.output.clone(),
        }
    }

    pub(crate) fn set_stage(&self, stage: Stage) {
        let mut state = self.state.lock().unwrap();
        state.current_stage = stage;
        state.active_percent = 0;
    }

    pub(crate) fn set_percent(&self, percent: u8) {
        self.state.lock().unwrap().active_percent = percent;
    }

    pub(crate) fn set_outcome(&self, outcome: JobOutcome) {
        self.state.lock().unwrap().outcome = outcome;
    }

    pub(crate) fn set_output(&self, output: AssemblyOutput) {
        self.state.lock().unwrap().output = Some(output);
    }

    pub(crate) fn add_warning(&self, warning: String) {
        self.state.lock().unwrap().warnings.push(warning);
    }

    pub(crate) fn add_error(&self, error: String) {
        self.state.lock().unwrap().errors.push(error);
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.state.lock().unwrap().warnings.clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.state.lock().unwrap().errors.clone()
    }

    pub(crate) fn output(&self) -> Option<AssemblyOutput> {
        self.state.lock().unwrap().output.clone()
    }

    pub(crate) fn outcome(&self) -> JobOutcome {
        self.state.lock().unwrap().outcome
    }

    /// Mutate the ledger row for `task_id`; a rejected transition is a
    /// programming error on the calling stage and is only logged
    pub(crate) fn update_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
        result: Option<String>,
    ) {
        if let Err(e) = self
            .ledger
            .lock()
            .unwrap()
            .update_status(task_id, status, error, result)
        {
            log::error!("ledger update for task {} failed: {}", task_id, e);
        }
    }

    pub(crate) fn stage_percent(&self, stage: Stage) -> u8 {
        self.ledger.lock().unwrap().stage_summary(stage).percent
    }

    pub(crate) fn is_stage_complete(&self, stage: Stage) -> bool {
        self.ledger.lock().unwrap().is_stage_complete(stage)
    }

    pub(crate) fn failed_tasks(&self, stage: Stage) -> Vec<String> {
        self.ledger.lock().unwrap().failed_tasks(stage)
    }
}

/// Registry of jobs keyed by job id
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job and return its handle
    pub fn create(&self, slides: Vec<SlideRecord>, ledger: TaskLedger) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle {
            id: Uuid::new_v4().to_string(),
            slides,
            state: Mutex::new(JobState {
                outcome: JobOutcome::Running,
                current_stage: Stage::Parse,
                active_percent: 0,
                warnings: Vec::new(),
                errors: Vec::new(),
                output: None,
            }),
            ledger: Mutex::new(ledger),
            cancelled: AtomicBool::new(false),
        });
        self.jobs
            .lock()
            .unwrap()
            .insert(handle.id.clone(), handle.clone());
        info!("registered job {} ({} slides)", handle.id, handle.slides.len());
        handle
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.get(job_id).map(|handle| handle.status())
    }

    /// Request cancellation of a job; returns false for unknown ids
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.get(job_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Expire a finished job from the registry
    pub fn remove(&self, job_id: &str) -> bool {
        self.jobs.lock().unwrap().remove(job_id).is_some()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job() -> (JobStore, Arc<JobHandle>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let slides = vec![
            SlideRecord::new(1, "One", "first"),
            SlideRecord::new(2, "Two", "second"),
        ];
        let ledger = TaskLedger::initialize(dir.path().join("tasks.json"), &slides).unwrap();
        let store = JobStore::new();
        let handle = store.create(slides, ledger);
        (store, handle, dir)
    }

    #[test]
    fn test_create_and_lookup() {
        let (store, handle, _dir) = store_with_job();
        assert!(store.get(handle.id()).is_some());
        assert!(store.get("no-such-job").is_none());

        let status = store.status(handle.id()).unwrap();
        assert_eq!(status.outcome, JobOutcome::Running);
        assert_eq!(status.stages.len(), 5);
    }

    #[test]
    fn test_cancel_flag() {
        let (store, handle, _dir) = store_with_job();
        assert!(!handle.is_cancelled());
        assert!(store.cancel(handle.id()));
        assert!(handle.is_cancelled());
        assert!(!store.cancel("no-such-job"));
    }

    #[test]
    fn test_remove_expires_job() {
        let (store, handle, _dir) = store_with_job();
        assert!(store.remove(handle.id()));
        assert!(store.get(handle.id()).is_none());
        assert!(!store.remove(handle.id()));
    }

    #[test]
    fn test_status_reflects_ledger_and_state() {
        let (store, handle, _dir) = store_with_job();
        handle.set_stage(Stage::Narration);
        handle.update_task("narration_slide_001", TaskStatus::Completed, None, None);
        handle.set_percent(handle.stage_percent(Stage::Narration));
        handle.add_warning("slide 2 narration fell back to silence".to_string());

        let status = store.status(handle.id()).unwrap();
        assert_eq!(status.current_stage, Stage::Narration);
        assert_eq!(status.percent_complete, 50);
        assert_eq!(status.warnings.len(), 1);
        let narration = status
            .stages
            .iter()
            .find(|p| p.stage == Stage::Narration)
            .unwrap();
        assert_eq!(narration.summary.completed, 1);
        assert_eq!(narration.summary.pending, 1);
    }
}
