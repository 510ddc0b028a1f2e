//! Worker model.
//!
//! Workers are reusable execution resources. They are never destroyed during
//! a run; they change job affiliation (at a cost) and alternate between
//! idling in a pool, moving, and running a task.

use serde::{Deserialize, Serialize};

use super::{JobId, StageId, TaskId, WorkerId, WorkerTypeId};

/// Static definition of a worker, supplied by the caller at reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker type, indexing each stage's expected-duration table.
    pub worker_type: WorkerTypeId,
}

impl WorkerSpec {
    /// Creates a worker of the given type.
    pub fn new(worker_type: WorkerTypeId) -> Self {
        Self { worker_type }
    }

    /// A homogeneous roster of `count` workers of type 0.
    pub fn homogeneous(count: usize) -> Vec<Self> {
        vec![Self::new(0); count]
    }
}

/// Reference to a task within a specific job and stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub job: JobId,
    pub stage: StageId,
    pub task: TaskId,
}

/// How a worker's new assignment relates to what it was doing before.
///
/// Drives the duration oracle: fresh or relocated workers warm up, workers
/// continuing the same stage run hot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrevAssignment {
    /// The worker was idle or moving between jobs.
    Idle,
    /// The worker's previous task belonged to the same stage.
    SameStage,
    /// The worker's previous task belonged to a different stage.
    SwitchedStage,
}

/// A live worker inside the simulation.
#[derive(Debug, Clone)]
pub struct Worker {
    /// Worker identifier, the roster index.
    pub id: WorkerId,
    /// Worker type.
    pub worker_type: WorkerTypeId,
    /// Job the worker is currently attached to.
    pub job: Option<JobId>,
    /// Whether the worker can accept work right now.
    pub available: bool,
    /// The task the worker is running, or last ran since it was last parked
    /// or moved between jobs.
    pub task: Option<TaskRef>,
}

impl Worker {
    /// Creates a fresh worker from its spec.
    pub fn from_spec(id: WorkerId, spec: WorkerSpec) -> Self {
        Self {
            id,
            worker_type: spec.worker_type,
            job: None,
            available: true,
            task: None,
        }
    }

    /// Whether the worker is attached to the given job.
    pub fn is_at_job(&self, job: JobId) -> bool {
        self.job == Some(job)
    }

    /// Whether the worker has no recent task context (it idled or moved).
    pub fn is_idle(&self) -> bool {
        self.task.is_none()
    }

    /// Classifies a prospective assignment against the worker's history.
    pub fn prev_assignment(&self, job: JobId, stage: StageId) -> PrevAssignment {
        match self.task {
            None => PrevAssignment::Idle,
            Some(t) if t.job == job && t.stage == stage => PrevAssignment::SameStage,
            Some(_) => PrevAssignment::SwitchedStage,
        }
    }

    /// Clears the worker's task context, e.g. when it parks or changes jobs.
    pub fn clear_task(&mut self) {
        self.task = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_homogeneous_roster() {
        let roster = WorkerSpec::homogeneous(3);
        assert_eq!(roster.len(), 3);
        assert!(roster.iter().all(|w| w.worker_type == 0));
    }

    #[test]
    fn test_fresh_worker_state() {
        let worker = Worker::from_spec(2, WorkerSpec::new(1));
        assert_eq!(worker.id, 2);
        assert_eq!(worker.worker_type, 1);
        assert!(worker.available);
        assert!(worker.is_idle());
        assert!(!worker.is_at_job(0));
    }

    #[test]
    fn test_prev_assignment_classification() {
        let mut worker = Worker::from_spec(0, WorkerSpec::new(0));
        assert_eq!(worker.prev_assignment(1, 2), PrevAssignment::Idle);

        worker.task = Some(TaskRef {
            job: 1,
            stage: 2,
            task: 0,
        });
        assert_eq!(worker.prev_assignment(1, 2), PrevAssignment::SameStage);
        assert_eq!(worker.prev_assignment(1, 3), PrevAssignment::SwitchedStage);
        assert_eq!(worker.prev_assignment(2, 2), PrevAssignment::SwitchedStage);

        worker.clear_task();
        assert_eq!(worker.prev_assignment(1, 2), PrevAssignment::Idle);
    }
}
