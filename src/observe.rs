//! Raw-count observations.
//!
//! The engine exposes counts, flags, and masks; turning them into tensors
//! for a learner is the caller's concern. Every field is derivable from the
//! simulation state at the instant control returns to the caller.

use serde::{Deserialize, Serialize};

use crate::models::{JobId, StageId};

/// Per-stage view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    /// Stage index within its job.
    pub id: StageId,
    /// Whether the stage is a legal target this round.
    pub schedulable: bool,
    /// Unassigned task slots.
    pub remaining_tasks: usize,
    /// Remaining tasks weighted by the latest sampled task duration.
    pub approx_remaining_work: f64,
}

/// Per-job view, broadcast over the job's stages by the caller as needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    /// Job identifier.
    pub id: JobId,
    /// Whether this job's pool is the current commitment-round source.
    pub is_source: bool,
    /// Workers attached to the job: resident, moving in, or committed in.
    pub total_workers: usize,
    /// The job's stages, in index order.
    pub stages: Vec<StageView>,
}

/// Observation returned by `reset` and `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Current simulated time.
    pub wall_time: f64,
    /// Uncommitted workers at the current source; bounds the worker-count
    /// choice.
    pub source_workers: usize,
    /// Job the current source belongs to, if any.
    pub source_job: Option<JobId>,
    /// Active jobs, ascending by id.
    pub jobs: Vec<JobView>,
    /// Legal `(job, stage)` targets: schedulable and not yet selected this
    /// round.
    pub valid_targets: Vec<(JobId, StageId)>,
    /// Mask over worker-count choices: entry `i` is true when requesting
    /// `i + 1` workers is within the uncommitted source supply.
    pub worker_mask: Vec<bool>,
}

impl Observation {
    /// Whether any action is legal.
    pub fn has_valid_target(&self) -> bool {
        !self.valid_targets.is_empty()
    }
}
