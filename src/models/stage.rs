//! Stage (operation) model.
//!
//! A stage is a group of identical, independently executable tasks within a
//! job. Task slots are pre-allocated up to the stage's capacity and bound to
//! workers one at a time; a stage is *saturated* once every slot is either
//! running or completed.

use serde::{Deserialize, Serialize};

use super::{StageId, TaskId, WorkerId, WorkerTypeId};

/// Static definition of a stage, supplied by the caller at reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Number of identical tasks in the stage.
    pub task_count: usize,
    /// Expected task duration per worker type. `f64::INFINITY` marks a
    /// worker type as incompatible with this stage.
    pub expected_durations: Vec<f64>,
    /// Indices of stages within the same job that must saturate before this
    /// stage becomes schedulable.
    pub dependencies: Vec<StageId>,
}

impl StageSpec {
    /// Creates a stage with the given task count and duration table.
    pub fn new(task_count: usize, expected_durations: Vec<f64>) -> Self {
        Self {
            task_count,
            expected_durations,
            dependencies: Vec::new(),
        }
    }

    /// Adds dependency stage indices.
    pub fn with_dependencies(mut self, dependencies: Vec<StageId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// One unit of executable work within a stage.
///
/// Slots exist from stage creation; assignment binds a slot to a worker and
/// stamps its acceptance time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSlot {
    /// Slot index within the stage.
    pub id: TaskId,
    /// Worker currently or last bound to this slot.
    pub worker: Option<WorkerId>,
    /// Time the slot was accepted by its worker.
    pub accepted_at: Option<f64>,
    /// Time the task finished.
    pub completed_at: Option<f64>,
    /// Whether the task is currently running.
    pub in_progress: bool,
}

impl TaskSlot {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            worker: None,
            accepted_at: None,
            completed_at: None,
            in_progress: false,
        }
    }
}

/// Mutable stage state.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage index within its job.
    pub id: StageId,
    /// Owning job.
    pub job_id: super::JobId,
    /// Total number of tasks.
    pub task_count: usize,
    /// Expected task duration per worker type; infinite = incompatible.
    pub expected_durations: Vec<f64>,
    /// Pre-allocated task slots, `task_count` of them.
    pub tasks: Vec<TaskSlot>,
    /// Duration most recently sampled for a task of this stage. Seeds the
    /// remaining-work estimate before any task has run.
    pub most_recent_duration: f64,
    completed_tasks: usize,
    processing_tasks: usize,
}

impl Stage {
    /// Builds a stage from its spec.
    pub fn from_spec(id: StageId, job_id: super::JobId, spec: &StageSpec) -> Self {
        let initial_estimate = spec
            .expected_durations
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(f64::INFINITY, f64::min);
        Self {
            id,
            job_id,
            task_count: spec.task_count,
            expected_durations: spec.expected_durations.clone(),
            tasks: (0..spec.task_count).map(TaskSlot::new).collect(),
            most_recent_duration: initial_estimate,
            completed_tasks: 0,
            processing_tasks: 0,
        }
    }

    /// Number of completed tasks.
    pub fn completed_tasks(&self) -> usize {
        self.completed_tasks
    }

    /// Number of tasks currently running.
    pub fn processing_tasks(&self) -> usize {
        self.processing_tasks
    }

    /// Tasks either completed or running.
    pub fn saturated_tasks(&self) -> usize {
        self.completed_tasks + self.processing_tasks
    }

    /// Unassigned task slots.
    pub fn remaining_tasks(&self) -> usize {
        self.task_count - self.saturated_tasks()
    }

    /// Whether every task has completed.
    pub fn is_complete(&self) -> bool {
        self.completed_tasks == self.task_count
    }

    /// Whether every slot is assigned or completed.
    pub fn all_tasks_saturated(&self) -> bool {
        assert!(self.saturated_tasks() <= self.task_count);
        self.saturated_tasks() == self.task_count
    }

    /// Worker demand given the in-flight and committed supply headed here.
    ///
    /// May be zero or negative; the engine clamps caller requests against it
    /// and never lets commitments drive it below zero.
    pub fn worker_demand(&self, moving_to: usize, committed_to: usize) -> i64 {
        self.remaining_tasks() as i64 - moving_to as i64 - committed_to as i64
    }

    /// Whether the given worker type can run this stage's tasks.
    pub fn compatible_with(&self, worker_type: WorkerTypeId) -> bool {
        self.expected_durations
            .get(worker_type)
            .is_some_and(|d| d.is_finite())
    }

    /// Expected task duration for the given worker type.
    pub fn expected_duration(&self, worker_type: WorkerTypeId) -> f64 {
        self.expected_durations
            .get(worker_type)
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// Estimated remaining work: unassigned tasks times the latest sampled
    /// task duration.
    pub fn approx_remaining_work(&self) -> f64 {
        self.remaining_tasks() as f64 * self.most_recent_duration
    }

    /// Binds the next unfilled slot to `worker` at `time`.
    ///
    /// Returns `None` when the stage is saturated.
    pub fn assign(&mut self, worker: WorkerId, time: f64) -> Option<TaskId> {
        if self.all_tasks_saturated() {
            return None;
        }
        let task_id = self.saturated_tasks();
        let slot = &mut self.tasks[task_id];
        slot.worker = Some(worker);
        slot.accepted_at = Some(time);
        slot.in_progress = true;
        self.processing_tasks += 1;
        Some(task_id)
    }

    /// Marks `task` complete at `time`.
    pub fn complete_task(&mut self, task: TaskId, time: f64) {
        assert!(self.completed_tasks < self.task_count);
        let slot = &mut self.tasks[task];
        assert!(slot.in_progress, "completing a task that is not running");
        slot.in_progress = false;
        slot.completed_at = Some(time);
        self.processing_tasks -= 1;
        self.completed_tasks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stage(task_count: usize) -> Stage {
        Stage::from_spec(0, 0, &StageSpec::new(task_count, vec![100.0]))
    }

    #[test]
    fn test_slots_preallocated() {
        let stage = make_stage(3);
        assert_eq!(stage.tasks.len(), 3);
        assert_eq!(stage.remaining_tasks(), 3);
        assert!(!stage.is_complete());
        assert!(!stage.all_tasks_saturated());
    }

    #[test]
    fn test_assign_fills_slots_in_order() {
        let mut stage = make_stage(2);
        assert_eq!(stage.assign(7, 10.0), Some(0));
        assert_eq!(stage.assign(8, 11.0), Some(1));
        assert_eq!(stage.assign(9, 12.0), None);

        assert_eq!(stage.tasks[0].worker, Some(7));
        assert_eq!(stage.tasks[0].accepted_at, Some(10.0));
        assert!(stage.tasks[0].in_progress);
        assert!(stage.all_tasks_saturated());
        assert_eq!(stage.remaining_tasks(), 0);
    }

    #[test]
    fn test_complete_task_updates_counters() {
        let mut stage = make_stage(2);
        let t0 = stage.assign(1, 0.0).unwrap();
        stage.complete_task(t0, 50.0);

        assert_eq!(stage.completed_tasks(), 1);
        assert_eq!(stage.processing_tasks(), 0);
        assert_eq!(stage.tasks[t0].completed_at, Some(50.0));
        assert!(!stage.tasks[t0].in_progress);
        // completion frees no slot: remaining counts unassigned slots only
        assert_eq!(stage.remaining_tasks(), 1);

        let t1 = stage.assign(2, 50.0).unwrap();
        stage.complete_task(t1, 90.0);
        assert!(stage.is_complete());
    }

    #[test]
    fn test_worker_demand_accounts_for_inflight_supply() {
        let mut stage = make_stage(4);
        stage.assign(0, 0.0);
        assert_eq!(stage.worker_demand(0, 0), 3);
        assert_eq!(stage.worker_demand(1, 1), 1);
        assert_eq!(stage.worker_demand(2, 2), -1);
    }

    #[test]
    fn test_compatibility_from_duration_table() {
        let stage = Stage::from_spec(0, 0, &StageSpec::new(1, vec![50.0, f64::INFINITY]));
        assert!(stage.compatible_with(0));
        assert!(!stage.compatible_with(1));
        assert!(!stage.compatible_with(2));
        assert_eq!(stage.expected_duration(0), 50.0);
    }

    #[test]
    fn test_approx_remaining_work_tracks_latest_sample() {
        let mut stage = make_stage(3);
        assert_eq!(stage.approx_remaining_work(), 300.0);
        stage.most_recent_duration = 40.0;
        assert_eq!(stage.approx_remaining_work(), 120.0);
    }

    #[test]
    #[should_panic]
    fn test_completing_idle_task_panics() {
        let mut stage = make_stage(1);
        stage.complete_task(0, 1.0);
    }
}
