//! Episode-level metrics.
//!
//! Computed on demand from the engine's job archive; useful for evaluating
//! a policy without reconstructing the trajectory.

use serde::{Deserialize, Serialize};

use crate::models::Job;

/// Summary metrics over one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    /// Simulated time at the point of measurement.
    pub wall_time: f64,
    /// Jobs that finished.
    pub completed_jobs: usize,
    /// Jobs still in the system.
    pub active_jobs: usize,
    /// Mean completion − arrival over finished jobs.
    pub avg_job_duration: Option<f64>,
    /// Latest completion time over finished jobs.
    pub makespan: f64,
}

impl EpisodeStats {
    /// Computes stats over all jobs seen so far.
    pub fn calculate<'a>(wall_time: f64, jobs: impl Iterator<Item = &'a Job>) -> Self {
        let mut completed = 0;
        let mut active = 0;
        let mut total_duration = 0.0;
        let mut makespan: f64 = 0.0;

        for job in jobs {
            match job.completion_time {
                Some(done) => {
                    completed += 1;
                    total_duration += done - job.arrival_time;
                    makespan = makespan.max(done);
                }
                None => active += 1,
            }
        }

        Self {
            wall_time,
            completed_jobs: completed,
            active_jobs: active,
            avg_job_duration: (completed > 0).then(|| total_duration / completed as f64),
            makespan,
        }
    }
}
