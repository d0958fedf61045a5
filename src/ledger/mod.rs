//! Durable task ledger.
//!
//! One row per (stage, slide) for the per-slide stages plus one row each
//! for the single-task parse and merge stages. Rows are created when a job
//! starts, mutated only by their owning stage, and persisted to a JSON
//! file after every change so execution state survives the process.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};
use crate::models::SlideRecord;

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Narration,
    Clips,
    Subtitles,
    Merge,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Parse,
        Stage::Narration,
        Stage::Clips,
        Stage::Subtitles,
        Stage::Merge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Narration => "narration",
            Stage::Clips => "clips",
            Stage::Subtitles => "subtitles",
            Stage::Merge => "merge",
        }
    }

    /// Whether the stage has one task per slide (vs. a single task)
    pub fn is_per_slide(&self) -> bool {
        matches!(self, Stage::Narration | Stage::Clips | Stage::Subtitles)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One execution record. Terminal states are irreversible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub stage: Stage,
    pub slide_index: Option<usize>,
    pub description: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub error: Option<String>,
    pub result: Option<String>,
}

impl Task {
    fn new(id: String, stage: Stage, slide_index: Option<usize>, description: String) -> Self {
        Self {
            id,
            stage,
            slide_index,
            description,
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_secs: 0.0,
            error: None,
            result: None,
        }
    }
}

/// Completion counts for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
    pub pending: usize,
    pub percent: u8,
}

/// Build the canonical task id for a (stage, slide) pair
pub fn task_id(stage: Stage, slide_index: Option<usize>) -> String {
    match (stage, slide_index) {
        (Stage::Parse, _) => "parse_deck".to_string(),
        (Stage::Merge, _) => "final_merge".to_string(),
        (stage, Some(index)) => format!("{}_slide_{:03}", stage.as_str(), index),
        (stage, None) => stage.as_str().to_string(),
    }
}

#[derive(Debug)]
pub struct TaskLedger {
    path: PathBuf,
    tasks: Vec<Task>,
}

impl TaskLedger {
    /// Create one row per (stage, slide) for the per-slide stages plus the
    /// single parse and merge rows, and persist the initial table. The
    /// parse row is recorded as already completed: the slide list handed
    /// in is its output.
    pub fn initialize(path: impl Into<PathBuf>, slides: &[SlideRecord]) -> Result<Self> {
        let mut tasks = Vec::with_capacity(slides.len() * 3 + 2);

        let now = Utc::now();
        let mut parse = Task::new(
            task_id(Stage::Parse, None),
            Stage::Parse,
            None,
            format!("parse deck into {} slides", slides.len()),
        );
        parse.status = TaskStatus::Completed;
        parse.started_at = Some(now);
        parse.finished_at = Some(now);
        parse.result = Some(format!("{} slides", slides.len()));
        tasks.push(parse);

        for stage in [Stage::Narration, Stage::Clips, Stage::Subtitles] {
            for slide in slides {
                let description = match stage {
                    Stage::Narration => {
                        format!("synthesize narration for slide {}", slide.index)
                    }
                    Stage::Clips => format!("render video clip for slide {}", slide.index),
                    _ => format!("generate subtitles for slide {}", slide.index),
                };
                tasks.push(Task::new(
                    task_id(stage, Some(slide.index)),
                    stage,
                    Some(slide.index),
                    description,
                ));
            }
        }

        tasks.push(Task::new(
            task_id(Stage::Merge, None),
            Stage::Merge,
            None,
            format!("merge {} clips, narration and subtitles", slides.len()),
        ));

        let ledger = Self {
            path: path.into(),
            tasks,
        };
        ledger.persist()?;
        info!(
            "task ledger initialized with {} rows at {}",
            ledger.tasks.len(),
            ledger.path.display()
        );
        Ok(ledger)
    }

    /// Reload a persisted ledger for inspection or resumption
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)?;
        let tasks: Vec<Task> = serde_json::from_str(&contents)?;
        Ok(Self { path, tasks })
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Mutate exactly the row matching `id`. Repeating an identical
    /// terminal update is a no-op (the persisted file is not rewritten);
    /// any other transition out of a terminal state is rejected.
    pub fn update_status(
        &mut self,
        id: &str,
        status: TaskStatus,
        error: Option<String>,
        result: Option<String>,
    ) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PipelineError::Ledger(format!("unknown task id: {}", id)))?;

        if task.status.is_terminal() {
            if task.status == status && task.error == error && task.result == result {
                return Ok(());
            }
            return Err(PipelineError::Ledger(format!(
                "task {} is already {:?} and cannot transition to {:?}",
                id, task.status, status
            )));
        }

        match status {
            TaskStatus::Running => {
                if task.started_at.is_none() {
                    task.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                let finished = Utc::now();
                task.finished_at = Some(finished);
                if let Some(started) = task.started_at {
                    task.duration_secs =
                        (finished - started).num_milliseconds() as f64 / 1000.0;
                }
            }
            TaskStatus::Pending => {}
        }
        task.status = status;
        task.error = error;
        task.result = result;

        if status == TaskStatus::Failed {
            warn!("task {} failed: {}", id, task.error.as_deref().unwrap_or("unknown"));
        }

        self.persist()
    }

    pub fn tasks_for_stage(&self, stage: Stage) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.stage == stage).collect()
    }

    /// Ids of tasks still pending for a stage, for selective re-execution
    pub fn pending_tasks(&self, stage: Stage) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.stage == stage && t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn failed_tasks(&self, stage: Stage) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.stage == stage && t.status == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn stage_summary(&self, stage: Stage) -> StageSummary {
        let mut summary = StageSummary {
            total: 0,
            completed: 0,
            running: 0,
            failed: 0,
            pending: 0,
            percent: 0,
        };
        for task in self.tasks.iter().filter(|t| t.stage == stage) {
            summary.total += 1;
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        if summary.total > 0 {
            summary.percent = (summary.completed * 100 / summary.total) as u8;
        }
        summary
    }

    /// A stage is complete only when nothing is pending, nothing failed
    /// and at least one task completed. A failed task leaves the stage
    /// incomplete without failing it, so only the failed items need rerun.
    pub fn is_stage_complete(&self, stage: Stage) -> bool {
        let summary = self.stage_summary(stage);
        summary.pending == 0 && summary.failed == 0 && summary.completed > 0
    }

    /// Whether every task of the stage reached a terminal state
    pub fn is_stage_terminal(&self, stage: Stage) -> bool {
        let summary = self.stage_summary(stage);
        summary.pending == 0 && summary.running == 0
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.tasks)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
