//! Timeline event handling.
//!
//! One handler per event type, plus the worker routing that follows from
//! them: fulfilling commitments, rerouting workers whose destination
//! evaporated, and deciding where the next commitment round opens.

use tracing::{debug, trace};

use crate::error::SimError;
use crate::models::{JobId, StageId, TaskId, TaskRef, WorkerId};
use crate::pools::PoolKey;
use crate::timeline::Event;

use super::Simulation;

impl Simulation {
    pub(super) fn handle_event(&mut self, event: Event) -> Result<(), SimError> {
        match event {
            Event::JobArrival { job } => self.handle_job_arrival(job),
            Event::WorkerArrival { worker, job, stage } => {
                self.handle_worker_arrival(worker, job, stage)
            }
            Event::TaskCompletion { job, stage, task } => {
                self.handle_task_completion(job, stage, task)
            }
        }
    }

    // ── Job arrivals ────────────────────────────────────────────────────

    fn handle_job_arrival(&mut self, job_id: JobId) -> Result<(), SimError> {
        let (arrival_time, spec) = self.pending[job_id]
            .take()
            .expect("job arrival delivered twice");
        debug!(job = job_id, stages = spec.stages.len(), "job arrival");

        let mut job = crate::models::Job::from_spec(job_id, arrival_time, &spec);
        let sources = job.initialize_frontier();
        self.pools.add_job(job_id);
        for &stage in &sources {
            self.pools.add_op(job_id, stage);
            self.schedulable.insert((job_id, stage));
        }
        self.jobs.insert(job_id, job);
        self.active_jobs.insert(job_id);

        // Unattached workers may be routed to the new job: give the caller
        // the chance by opening a round at the general pool.
        if self.pools.general_pool_has_workers() {
            self.pools.update_source(PoolKey::General);
        }
        Ok(())
    }

    // ── Worker arrivals ─────────────────────────────────────────────────

    fn handle_worker_arrival(
        &mut self,
        worker: WorkerId,
        job_id: JobId,
        stage_id: StageId,
    ) -> Result<(), SimError> {
        self.pools.count_worker_arrival(job_id, stage_id);
        trace!(worker, job = job_id, stage = stage_id, "worker arrival");

        {
            let job = self.jobs.get_mut(&job_id).expect("arrival at unknown job");
            job.add_local_worker(worker);
        }
        self.workers[worker].job = Some(job_id);

        let (job_complete, remaining, runnable) = {
            let job = &self.jobs[&job_id];
            (
                job.is_complete(),
                job.stages[stage_id].remaining_tasks(),
                job.is_runnable(stage_id),
            )
        };

        if job_complete || remaining == 0 {
            // The job finished or the stage saturated while the worker was
            // in flight: greedily look for other work.
            self.try_backup_schedule(worker, None)
        } else if !runnable {
            // Parents are saturated but not completed; the stage can't run
            // yet. Park the worker at the job and re-offer the stage.
            self.pools.move_to_pool(worker, PoolKey::Job(job_id), false);
            self.workers[worker].clear_task();
            self.reopen_stage_if_needed(job_id, stage_id);
            Ok(())
        } else {
            self.pools
                .move_to_pool(worker, PoolKey::Op(job_id, stage_id), false);
            self.work_on_stage(worker, job_id, stage_id)
        }
    }

    // ── Task completions ────────────────────────────────────────────────

    fn handle_task_completion(
        &mut self,
        job_id: JobId,
        stage_id: StageId,
        task: TaskId,
    ) -> Result<(), SimError> {
        let worker = self.jobs[&job_id].stages[stage_id].tasks[task]
            .worker
            .expect("completed task has no worker");
        trace!(worker, job = job_id, stage = stage_id, task, "task completion");

        let wall_time = self.wall_time;
        {
            let job = self.jobs.get_mut(&job_id).expect("completion at unknown job");
            job.stages[stage_id].complete_task(task, wall_time);
        }
        self.workers[worker].available = true;

        if self.jobs[&job_id].stages[stage_id].remaining_tasks() > 0 {
            // More unassigned tasks: keep the worker on this stage.
            return self.work_on_stage(worker, job_id, stage_id);
        }

        let mut frontier_changed = false;
        if self.jobs[&job_id].stages[stage_id].is_complete() {
            debug!(job = job_id, stage = stage_id, "stage completion");
            assert!(
                !self.schedulable.contains(&(job_id, stage_id)),
                "completed stage still schedulable"
            );
            let newly_runnable = self
                .jobs
                .get_mut(&job_id)
                .expect("completion at unknown job")
                .record_stage_completion(stage_id);
            frontier_changed = !newly_runnable.is_empty();
            // A stage whose commitments were absorbed while it waited on its
            // parents becomes offerable again the moment it can run.
            for stage in newly_runnable {
                self.reopen_stage_if_needed(job_id, stage);
            }
        }

        if self.jobs[&job_id].is_complete() {
            self.finalize_job(job_id);
        }

        let commitment = self.route_freed_worker(worker, job_id, stage_id, frontier_changed)?;
        self.update_round_source(job_id, stage_id, commitment, frontier_changed);
        Ok(())
    }

    fn finalize_job(&mut self, job_id: JobId) {
        debug!(job = job_id, wall_time = self.wall_time, "job completion");
        assert!(self.active_jobs.remove(&job_id), "finalizing inactive job");
        self.completed_jobs.push(job_id);
        self.jobs
            .get_mut(&job_id)
            .expect("finalizing unknown job")
            .completion_time = Some(self.wall_time);
    }

    /// Routes a worker that just finished a task: fulfill its pool's first
    /// outstanding commitment, or park it at the job pool when the frontier
    /// grew so it can be assigned to the new stages.
    fn route_freed_worker(
        &mut self,
        worker: WorkerId,
        job_id: JobId,
        stage_id: StageId,
        frontier_changed: bool,
    ) -> Result<Option<PoolKey>, SimError> {
        let commitment = self.pools.peek_commitment(PoolKey::Op(job_id, stage_id));
        if let Some(dest) = commitment {
            let (dest_job, dest_stage) = dest.as_op().expect("commitment to a non-op pool");
            if self.jobs[&dest_job].stages[dest_stage].remaining_tasks() > 0 {
                self.fulfill_commitment(worker, dest_job, dest_stage)?;
            } else {
                debug!(?dest, "committed stage saturated, trying backup");
                self.try_backup_schedule(worker, Some(dest))?;
            }
        } else if frontier_changed {
            self.pools.move_to_pool(worker, PoolKey::Job(job_id), false);
            self.workers[worker].clear_task();
        }
        Ok(commitment)
    }

    /// Decides where the next commitment round opens after a task
    /// completion: at the job pool if the frontier grew, else at the
    /// stage's own pool if the worker had nowhere to go — re-offering
    /// stranded workers to the decision-maker.
    fn update_round_source(
        &mut self,
        job_id: JobId,
        stage_id: StageId,
        commitment: Option<PoolKey>,
        frontier_changed: bool,
    ) {
        if frontier_changed {
            self.pools.update_source(PoolKey::Job(job_id));
        } else if commitment.is_none() {
            self.pools.update_source(PoolKey::Op(job_id, stage_id));
        }
    }

    // ── Worker routing ──────────────────────────────────────────────────

    /// Consumes one commitment unit toward `(job, stage)` and moves the
    /// worker: synchronously when it is already local, via a delayed
    /// arrival otherwise.
    pub(super) fn fulfill_commitment(
        &mut self,
        worker: WorkerId,
        job_id: JobId,
        stage_id: StageId,
    ) -> Result<(), SimError> {
        assert!(
            self.jobs[&job_id].stages[stage_id].remaining_tasks() > 0,
            "fulfilling a commitment to a saturated stage"
        );
        trace!(worker, job = job_id, stage = stage_id, "fulfilling commitment");
        let dest = PoolKey::Op(job_id, stage_id);

        if self.workers[worker].is_at_job(job_id) {
            self.pools.fulfill_commitment(worker, dest, false);
            if !self.jobs[&job_id].is_runnable(stage_id) {
                // Parents saturated but not completed: the stage can't run
                // yet, so hold the worker at the job pool. The stage is
                // re-offered once its parents complete.
                self.pools.move_to_pool(worker, PoolKey::Job(job_id), false);
                self.workers[worker].clear_task();
                if self.stage_worker_demand(job_id, stage_id) > 0 {
                    self.jobs
                        .get_mut(&job_id)
                        .expect("unknown job")
                        .set_saturated(stage_id, false);
                }
                Ok(())
            } else {
                self.work_on_stage(worker, job_id, stage_id)
            }
        } else {
            self.pools.fulfill_commitment(worker, dest, true);
            self.send_worker(worker, job_id, stage_id);
            Ok(())
        }
    }

    /// Greedy rescue for a worker whose destination evaporated: drop the
    /// stale commitment if any, pick another schedulable stage (same job
    /// preferred), or park the worker at its job pool.
    pub(super) fn try_backup_schedule(
        &mut self,
        worker: WorkerId,
        commitment: Option<PoolKey>,
    ) -> Result<(), SimError> {
        if let Some(dest) = commitment {
            self.pools.remove_commitment(worker, dest);
        }

        if let Some((job_id, stage_id)) = self.find_backup_stage(worker) {
            self.reroute_worker(worker, job_id, stage_id)
        } else {
            let job_id = self.workers[worker]
                .job
                .expect("backup scheduling for an unaffiliated worker");
            trace!(worker, job = job_id, "no backup stage, parking worker");
            self.pools.move_to_pool(worker, PoolKey::Job(job_id), false);
            self.workers[worker].clear_task();
            Ok(())
        }
    }

    /// First schedulable stage of the worker's own job, else the first
    /// schedulable stage overall, in ascending `(job, stage)` order.
    pub(super) fn find_backup_stage(&self, worker: WorkerId) -> Option<(JobId, StageId)> {
        let worker_job = self.workers[worker].job;
        self.schedulable
            .iter()
            .find(|&&(job, _)| Some(job) == worker_job)
            .or_else(|| self.schedulable.iter().next())
            .copied()
    }

    fn reroute_worker(
        &mut self,
        worker: WorkerId,
        job_id: JobId,
        stage_id: StageId,
    ) -> Result<(), SimError> {
        debug!(worker, job = job_id, stage = stage_id, "rerouting worker");
        assert!(
            self.jobs[&job_id].stages[stage_id].remaining_tasks() > 0,
            "rerouting to a saturated stage"
        );

        if self.workers[worker].is_at_job(job_id) {
            self.pools
                .move_to_pool(worker, PoolKey::Op(job_id, stage_id), false);
            self.work_on_stage(worker, job_id, stage_id)
        } else {
            self.pools
                .move_to_pool(worker, PoolKey::Op(job_id, stage_id), true);
            self.send_worker(worker, job_id, stage_id);
            Ok(())
        }
    }

    /// Detaches the worker from its old job and schedules its delayed
    /// arrival at the destination stage. The pool-side move must already
    /// have happened.
    fn send_worker(&mut self, worker: WorkerId, job_id: JobId, stage_id: StageId) {
        assert!(self.workers[worker].available, "sending a busy worker");
        assert!(
            !self.workers[worker].is_at_job(job_id),
            "sending a worker to its own job"
        );

        if let Some(old_job) = self.workers[worker].job.take() {
            if let Some(job) = self.jobs.get_mut(&old_job) {
                job.remove_local_worker(worker);
            }
        }
        self.workers[worker].job = Some(job_id);
        self.workers[worker].clear_task();

        // A direct send without a commitment eats into the stage's demand.
        if self.schedulable.contains(&(job_id, stage_id))
            && self.stage_worker_demand(job_id, stage_id) <= 0
        {
            self.saturate_stage(job_id, stage_id);
        }

        let delay = self.sample_move_cost();
        trace!(worker, job = job_id, stage = stage_id, delay, "worker sent");
        self.timeline.push(
            self.wall_time + delay,
            Event::WorkerArrival {
                worker,
                job: job_id,
                stage: stage_id,
            },
        );
    }

    /// Starts the worker on the next task of a runnable stage and schedules
    /// the task's completion.
    pub(super) fn work_on_stage(
        &mut self,
        worker: WorkerId,
        job_id: JobId,
        stage_id: StageId,
    ) -> Result<(), SimError> {
        let wall_time = self.wall_time;
        let (worker_type, prev) = {
            let w = &self.workers[worker];
            assert!(w.available, "assigning a busy worker");
            assert!(w.is_at_job(job_id), "assigning a non-local worker");
            (w.worker_type, w.prev_assignment(job_id, stage_id))
        };

        let duration = {
            let job = self.jobs.get_mut(&job_id).expect("assignment to unknown job");
            let colocated_workers = job.local_workers().len();
            let stage = &mut job.stages[stage_id];
            assert!(
                stage.compatible_with(worker_type),
                "worker type {worker_type} incompatible with stage ({job_id}, {stage_id})"
            );
            let expected = stage.expected_duration(worker_type);
            let task = stage
                .assign(worker, wall_time)
                .ok_or(SimError::StageSaturated(job_id, stage_id))?;
            let duration = self.oracle.sample(&crate::duration::DurationRequest {
                expected,
                prev,
                colocated_workers,
            });
            stage.most_recent_duration = duration;

            self.timeline.push(
                wall_time + duration,
                Event::TaskCompletion {
                    job: job_id,
                    stage: stage_id,
                    task,
                },
            );
            self.workers[worker].available = false;
            self.workers[worker].task = Some(TaskRef {
                job: job_id,
                stage: stage_id,
                task,
            });
            duration
        };
        trace!(worker, job = job_id, stage = stage_id, duration, "task started");

        if self.schedulable.contains(&(job_id, stage_id))
            && self.stage_worker_demand(job_id, stage_id) <= 0
        {
            self.saturate_stage(job_id, stage_id);
        }
        Ok(())
    }

    /// Re-adds a stage to the schedulable set when it still has unmet
    /// demand; used when an expected worker fails to start on it or when it
    /// enters the runnable frontier with demand left over.
    pub(super) fn reopen_stage_if_needed(&mut self, job_id: JobId, stage_id: StageId) {
        if self.stage_worker_demand(job_id, stage_id) > 0
            && !self.schedulable.contains(&(job_id, stage_id))
            && !self.jobs[&job_id].stages[stage_id].is_complete()
        {
            debug!(job = job_id, stage = stage_id, "stage is schedulable again");
            self.jobs
                .get_mut(&job_id)
                .expect("unknown job")
                .set_saturated(stage_id, false);
            self.schedulable.insert((job_id, stage_id));
        }
    }

    fn sample_move_cost(&mut self) -> f64 {
        use rand::Rng;
        match self.config.move_cost {
            crate::config::MoveCost::Fixed(delay) => delay,
            crate::config::MoveCost::Exponential { mean } => {
                let u: f64 = self.rng.random();
                -mean * (1.0 - u).ln()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Action, Simulation};
    use crate::config::SimConfig;
    use crate::models::{JobSpec, StageSpec, WorkerSpec};

    fn single_stage_job(tasks: usize, duration: f64) -> JobSpec {
        JobSpec::new(vec![StageSpec::new(tasks, vec![duration])])
    }

    #[test]
    fn test_find_backup_stage_prefers_same_job() {
        let mut sim = Simulation::new(SimConfig::new());
        sim.reset(
            vec![
                (0.0, single_stage_job(4, 100.0)),
                (0.0, single_stage_job(4, 100.0)),
            ],
            WorkerSpec::homogeneous(2),
        )
        .unwrap();

        // Both stages schedulable; an unaffiliated worker gets the first.
        assert_eq!(sim.find_backup_stage(0), Some((0, 0)));

        // A worker attached to job 1 prefers its own job's stage.
        sim.workers[0].job = Some(1);
        assert_eq!(sim.find_backup_stage(0), Some((1, 0)));
    }

    #[test]
    fn test_backup_reroutes_to_other_job() {
        // Job 0: one short task. Job 1: two medium tasks. Job 2: two long
        // tasks. Worker 0 frees up first, is committed to job 1's stage,
        // but the local worker absorbs the stage's last task before worker
        // 0 arrives — backup reroutes it to job 2.
        let mut sim = Simulation::new(SimConfig::new());
        sim.reset(
            vec![
                (0.0, single_stage_job(1, 1000.0)),
                (0.0, single_stage_job(2, 1500.0)),
                (0.0, single_stage_job(2, 4000.0)),
            ],
            WorkerSpec::homogeneous(3),
        )
        .unwrap();

        sim.step(Action::new(0, 0, 1)).unwrap();
        sim.step(Action::new(1, 0, 1)).unwrap();
        let step = sim.step(Action::new(2, 0, 1)).unwrap();
        assert!(!step.done);
        // Worker 0 finished job 0 at t = 3000 and a round opened at its
        // stage pool; job 1's stage still shows demand for its second task.
        assert_eq!(step.observation.wall_time, 3000.0);
        assert!(step.observation.valid_targets.contains(&(1, 0)));

        // Commit worker 0 to job 1. Its arrival at t = 5000 finds both
        // tasks taken (the resident worker grabbed the second at t = 3500),
        // so it is rerouted toward job 2.
        let step = sim.step(Action::new(1, 0, 1)).unwrap();

        let job1 = sim.job(1).unwrap();
        let assigned: Vec<_> = job1.stages[0].tasks.iter().filter_map(|t| t.worker).collect();
        assert_eq!(assigned, vec![1, 1], "job 1 ran entirely on its resident worker");
        assert_eq!(sim.worker(0).unwrap().job, Some(2), "worker 0 rerouted to job 2");
        assert!(step.done);
        assert!(sim.all_jobs_complete());
    }

    #[test]
    fn test_backup_parks_worker_when_nothing_schedulable() {
        // Same shape without job 2: when worker 0's destination saturates
        // and nothing else is schedulable, it parks at the job pool.
        let mut sim = Simulation::new(SimConfig::new());
        sim.reset(
            vec![
                (0.0, single_stage_job(1, 1000.0)),
                (0.0, single_stage_job(2, 1500.0)),
            ],
            WorkerSpec::homogeneous(2),
        )
        .unwrap();

        sim.step(Action::new(0, 0, 1)).unwrap();
        let step = sim.step(Action::new(1, 0, 1)).unwrap();
        assert!(!step.done);
        assert_eq!(step.observation.wall_time, 3000.0);

        let step = sim.step(Action::new(1, 0, 1)).unwrap();
        assert!(step.done);
        assert!(sim.all_jobs_complete());

        let worker = sim.worker(0).unwrap();
        assert_eq!(worker.job, Some(1));
        assert!(worker.available);
        assert_eq!(
            sim.pools.location_of(0),
            Some(crate::pools::PoolKey::Job(1))
        );
    }
}
