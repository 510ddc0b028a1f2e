//! Simulation domain models.
//!
//! The static side (specs, supplied by the caller at reset) and the mutable
//! side (jobs, stages, task slots, workers, owned by the engine) of the
//! data model.

mod job;
mod stage;
mod worker;

pub use job::{FrontierCriterion, Job, JobSpec};
pub use stage::{Stage, StageSpec, TaskSlot};
pub use worker::{PrevAssignment, TaskRef, Worker, WorkerSpec};

/// Job identifier, assigned in arrival order.
pub type JobId = usize;
/// Stage index within a job.
pub type StageId = usize;
/// Task slot index within a stage.
pub type TaskId = usize;
/// Worker identifier, the roster index.
pub type WorkerId = usize;
/// Worker type, indexing per-stage expected-duration tables.
pub type WorkerTypeId = usize;
