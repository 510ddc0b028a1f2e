//! Simulation error types.
//!
//! Two classes of failure exist:
//!
//! - **Invalid actions** — the caller targeted a stage that is not currently
//!   schedulable, re-targeted a stage within the same commitment round, or
//!   requested a worker count that clamps to zero. These leave the simulation
//!   state untouched and are safe to retry with a different action.
//! - **Fatal errors** — an engine defect surfaced mid-episode (timeline
//!   underflow, a saturated stage asked for a task slot). The episode must be
//!   discarded. Cheap internal consistency checks (non-negative counters,
//!   supply ≥ demand, worker conservation) are `assert!`s and panic instead;
//!   they guard the commitment protocol and are never compiled out.

use thiserror::Error;

use crate::models::{JobId, StageId};

/// Errors surfaced by [`Simulation::reset`](crate::engine::Simulation::reset)
/// and [`Simulation::step`](crate::engine::Simulation::step).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// The episode already ended; call `reset` to start a new one.
    #[error("episode is over; reset the simulation")]
    EpisodeOver,

    /// The targeted job is unknown or no longer active.
    #[error("job {0} is not active")]
    InactiveJob(JobId),

    /// The targeted stage index does not exist within the job.
    #[error("job {0} has no stage {1}")]
    UnknownStage(JobId, StageId),

    /// The targeted stage is not in the schedulable set.
    #[error("stage ({0}, {1}) is not schedulable")]
    Unschedulable(JobId, StageId),

    /// The targeted stage was already selected during this commitment round.
    #[error("stage ({0}, {1}) was already selected this round")]
    AlreadySelected(JobId, StageId),

    /// The requested worker count clamps to zero against the stage's demand.
    #[error("no worker demand at stage ({job}, {stage}): requested {requested}")]
    NoWorkerDemand {
        job: JobId,
        stage: StageId,
        requested: usize,
    },

    /// Reset input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The timeline was empty where an event was required. Fatal.
    #[error("event timeline is empty")]
    EmptyTimeline,

    /// A task slot was requested from a stage with none remaining. Fatal.
    #[error("stage ({0}, {1}) is saturated; no task slot available")]
    StageSaturated(JobId, StageId),
}

impl SimError {
    /// Whether the simulation instance is still usable after this error.
    ///
    /// Recoverable errors correspond to malformed caller actions; fatal ones
    /// indicate an engine defect and the episode must be abandoned.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EmptyTimeline | Self::StageSaturated(_, _))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SimError::EpisodeOver.is_recoverable());
        assert!(SimError::InactiveJob(3).is_recoverable());
        assert!(SimError::Unschedulable(0, 1).is_recoverable());
        assert!(SimError::AlreadySelected(0, 1).is_recoverable());
        assert!(SimError::NoWorkerDemand {
            job: 0,
            stage: 1,
            requested: 0
        }
        .is_recoverable());
        assert!(SimError::InvalidInput("bad".into()).is_recoverable());

        assert!(!SimError::EmptyTimeline.is_recoverable());
        assert!(!SimError::StageSaturated(0, 0).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = SimError::Unschedulable(2, 4);
        assert_eq!(err.to_string(), "stage (2, 4) is not schedulable");

        let err = SimError::NoWorkerDemand {
            job: 1,
            stage: 0,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "no worker demand at stage (1, 0): requested 5"
        );
    }
}
