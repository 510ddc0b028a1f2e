//! Simulation engine.
//!
//! Orchestrates the event timeline, the job/stage/task model, and the worker
//! pool state machine behind a `reset`/`step` interface:
//!
//! 1. `reset` loads the arrival timeline, processes everything at t = 0, and
//!    opens the first commitment round.
//! 2. Each `step` commits workers from the current source pool to one stage.
//!    The round closes once every source worker is committed or every
//!    schedulable stage has been selected; the engine then dispatches
//!    workers, drains the timeline until a new round must open, and returns
//!    the accumulated reward.
//! 3. The episode ends when the timeline is exhausted and no round can open,
//!    or when the configured time limit truncates it.
//!
//! Everything is synchronous and deterministic: time is a logical clock
//! driven by the event queue, free workers are dispatched in ascending id
//! order, and commitment destinations are served in registration order.

mod events;

use std::collections::{BTreeSet, HashMap, VecDeque};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SimConfig;
use crate::duration::{DurationOracle, ExpectedDuration};
use crate::error::SimError;
use crate::models::{Job, JobId, JobSpec, StageId, Worker, WorkerSpec};
use crate::observe::{JobView, Observation, StageView};
use crate::pools::{PoolKey, WorkerPoolState};
use crate::stats::EpisodeStats;
use crate::timeline::Timeline;
use crate::validation::validate_input;

/// A scheduling decision: route workers from the current source to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Target stage as a `(job, stage)` pair.
    pub target: (JobId, StageId),
    /// Requested worker count; clamped against demand and source supply.
    pub workers: usize,
}

impl Action {
    /// Creates an action.
    pub fn new(job: JobId, stage: StageId, workers: usize) -> Self {
        Self {
            target: (job, stage),
            workers,
        }
    }
}

/// Result of one `step` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// State visible to the decision-maker after the step.
    pub observation: Observation,
    /// Reward accumulated over the drained time window.
    pub reward: f64,
    /// Whether the episode ended.
    pub done: bool,
}

/// The discrete-event simulation of DAG jobs on a shared worker pool.
pub struct Simulation {
    config: SimConfig,
    oracle: Box<dyn DurationOracle>,
    rng: SmallRng,
    timeline: Timeline,
    wall_time: f64,
    /// All jobs seen so far, completed ones included.
    jobs: HashMap<JobId, Job>,
    /// Arrival definitions, consumed when the arrival event fires.
    pending: Vec<Option<(f64, JobSpec)>>,
    workers: Vec<Worker>,
    pools: WorkerPoolState,
    active_jobs: BTreeSet<JobId>,
    completed_jobs: Vec<JobId>,
    schedulable: BTreeSet<(JobId, StageId)>,
    selected: BTreeSet<(JobId, StageId)>,
    done: bool,
    truncated: bool,
}

impl Simulation {
    /// Creates a simulation with the deterministic expected-duration oracle.
    pub fn new(config: SimConfig) -> Self {
        Self::with_oracle(config, Box::new(ExpectedDuration))
    }

    /// Creates a simulation with an injected duration oracle.
    pub fn with_oracle(config: SimConfig, oracle: Box<dyn DurationOracle>) -> Self {
        let seed = config.seed;
        Self {
            config,
            oracle,
            rng: SmallRng::seed_from_u64(seed),
            timeline: Timeline::new(),
            wall_time: 0.0,
            jobs: HashMap::new(),
            pending: Vec::new(),
            workers: Vec::new(),
            pools: WorkerPoolState::new(0),
            active_jobs: BTreeSet::new(),
            completed_jobs: Vec::new(),
            schedulable: BTreeSet::new(),
            selected: BTreeSet::new(),
            done: true,
            truncated: false,
        }
    }

    /// Starts a new episode.
    ///
    /// Loads the arrival timeline and the worker roster, processes every
    /// event at t = 0, and advances until the first commitment round can
    /// open (or the episode is trivially over). Returns the initial
    /// observation.
    pub fn reset(
        &mut self,
        arrivals: Vec<(f64, JobSpec)>,
        roster: Vec<WorkerSpec>,
    ) -> Result<Observation, SimError> {
        if let Err(errors) = validate_input(&arrivals, &roster) {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SimError::InvalidInput(joined));
        }

        self.rng = SmallRng::seed_from_u64(self.config.seed);
        self.oracle.reset_rng(self.config.seed);
        self.timeline = Timeline::new();
        self.wall_time = 0.0;
        self.jobs = HashMap::new();
        self.workers = roster
            .iter()
            .enumerate()
            .map(|(id, &spec)| Worker::from_spec(id, spec))
            .collect();
        self.pools = WorkerPoolState::new(roster.len());
        self.active_jobs.clear();
        self.completed_jobs.clear();
        self.schedulable.clear();
        self.selected.clear();
        self.done = false;
        self.truncated = false;

        for (job_id, (time, _)) in arrivals.iter().enumerate() {
            self.timeline
                .push(*time, crate::timeline::Event::JobArrival { job: job_id });
        }
        self.pending = arrivals.into_iter().map(Some).collect();

        // Load every arrival at time zero before handing control back.
        while self.timeline.peek_time() == Some(0.0) {
            let (time, event) = self.timeline.pop().ok_or(SimError::EmptyTimeline)?;
            self.wall_time = time;
            self.handle_event(event)?;
        }

        // No round can open yet (e.g. the first arrival is later): advance
        // until one can.
        if !self.round_pending() {
            self.drain_timeline()?;
        }

        self.done = self.truncated || (self.timeline.is_empty() && !self.round_pending());
        if self.done {
            self.pools.clear_source();
        }
        Ok(self.observe())
    }

    /// Applies one scheduling decision.
    ///
    /// Only legal while a commitment round is open. The requested worker
    /// count is clamped against the stage's demand and the uncommitted
    /// source supply; a request that clamps to zero, targets an
    /// unschedulable stage, or re-targets a stage already selected this
    /// round fails with a recoverable error and leaves the state untouched.
    pub fn step(&mut self, action: Action) -> Result<Step, SimError> {
        if self.done {
            return Err(SimError::EpisodeOver);
        }

        let (job_id, stage_id) = action.target;
        if !self.active_jobs.contains(&job_id) {
            return Err(SimError::InactiveJob(job_id));
        }
        if stage_id >= self.jobs[&job_id].stage_count() {
            return Err(SimError::UnknownStage(job_id, stage_id));
        }
        let key = (job_id, stage_id);
        if !self.schedulable.contains(&key) {
            return Err(SimError::Unschedulable(job_id, stage_id));
        }
        if self.selected.contains(&key) {
            return Err(SimError::AlreadySelected(job_id, stage_id));
        }

        let demand = self.stage_worker_demand(job_id, stage_id);
        let supply = self.pools.uncommitted_at_source() as i64;
        let granted = (action.workers as i64).min(demand).min(supply);
        if granted <= 0 {
            return Err(SimError::NoWorkerDemand {
                job: job_id,
                stage: stage_id,
                requested: action.workers,
            });
        }

        debug!(
            job = job_id,
            stage = stage_id,
            requested = action.workers,
            granted,
            "workers committed"
        );
        self.pools
            .add_commitment(granted as usize, PoolKey::Op(job_id, stage_id));
        if self.stage_worker_demand(job_id, stage_id) <= 0 {
            self.saturate_stage(job_id, stage_id);
        }
        self.selected.insert(key);

        if !self.round_complete() {
            // The source still has uncommitted workers and unselected
            // schedulable stages: consult the caller again.
            return Ok(Step {
                observation: self.observe(),
                reward: 0.0,
                done: false,
            });
        }

        debug!(source = ?self.pools.source(), "commitment round closed");
        self.selected.clear();
        self.fulfill_source_commitments()?;

        let t_prev = self.wall_time;
        self.drain_timeline()?;
        let reward = self.reward_since(t_prev);

        self.done = self.truncated || (self.timeline.is_empty() && !self.round_pending());
        if self.done {
            if !self.truncated {
                assert!(
                    self.schedulable.is_empty(),
                    "terminal state with schedulable stages"
                );
                assert!(
                    self.active_jobs.is_empty(),
                    "terminal state with active jobs"
                );
            }
            self.pools.clear_source();
        }

        Ok(Step {
            observation: self.observe(),
            reward,
            done: self.done,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Current simulated time.
    pub fn wall_time(&self) -> f64 {
        self.wall_time
    }

    /// Whether the episode ended.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the episode was cut off by the time limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Jobs currently in the system.
    pub fn active_job_count(&self) -> usize {
        self.active_jobs.len()
    }

    /// Jobs that finished.
    pub fn completed_job_count(&self) -> usize {
        self.completed_jobs.len()
    }

    /// Whether every job seen so far has completed.
    pub fn all_jobs_complete(&self) -> bool {
        self.active_jobs.is_empty()
    }

    /// A job by id, if it has arrived.
    pub fn job(&self, job: JobId) -> Option<&Job> {
        self.jobs.get(&job)
    }

    /// A worker by id.
    pub fn worker(&self, worker: crate::models::WorkerId) -> Option<&Worker> {
        self.workers.get(worker)
    }

    /// Episode metrics at the current instant.
    pub fn stats(&self) -> EpisodeStats {
        EpisodeStats::calculate(self.wall_time, self.jobs.values())
    }

    /// The state visible to the decision-maker right now.
    pub fn observe(&self) -> Observation {
        let source_job = self.pools.source_job();
        let source_workers = self.pools.uncommitted_at_source();

        let jobs = self
            .active_jobs
            .iter()
            .map(|&job_id| {
                let job = &self.jobs[&job_id];
                let stages = job
                    .stages
                    .iter()
                    .map(|stage| StageView {
                        id: stage.id,
                        schedulable: self.schedulable.contains(&(job_id, stage.id))
                            && !self.selected.contains(&(job_id, stage.id)),
                        remaining_tasks: stage.remaining_tasks(),
                        approx_remaining_work: stage.approx_remaining_work(),
                    })
                    .collect();
                JobView {
                    id: job_id,
                    is_source: source_job == Some(job_id),
                    total_workers: self.pools.total_worker_count(job_id),
                    stages,
                }
            })
            .collect();

        let valid_targets = self
            .schedulable
            .iter()
            .filter(|key| !self.selected.contains(key))
            .copied()
            .collect();
        let worker_mask = (0..self.workers.len()).map(|i| i < source_workers).collect();

        Observation {
            wall_time: self.wall_time,
            source_workers,
            source_job,
            jobs,
            valid_targets,
            worker_mask,
        }
    }

    // ── Commitment rounds ───────────────────────────────────────────────

    /// Remaining worker demand of a stage: unassigned tasks minus workers
    /// already moving there minus outstanding commitments.
    fn stage_worker_demand(&self, job: JobId, stage: StageId) -> i64 {
        self.jobs[&job].stages[stage].worker_demand(
            self.pools.moving_to(job, stage),
            self.pools.committed_to(job, stage),
        )
    }

    /// Whether the current round has nothing left to decide.
    fn round_complete(&self) -> bool {
        self.pools.all_source_committed()
            || self
                .schedulable
                .iter()
                .all(|key| self.selected.contains(key))
    }

    /// Whether a new commitment round must open at the current source.
    fn round_pending(&self) -> bool {
        !self.pools.all_source_committed() && !self.schedulable.is_empty()
    }

    /// Removes a stage whose demand reached zero from the schedulable set
    /// and unlocks any successors whose parents are now all saturated.
    fn saturate_stage(&mut self, job_id: JobId, stage_id: StageId) {
        assert!(
            self.stage_worker_demand(job_id, stage_id) <= 0,
            "saturating stage ({job_id}, {stage_id}) with positive demand"
        );
        let removed = self.schedulable.remove(&(job_id, stage_id));
        assert!(removed, "saturating a stage outside the schedulable set");
        debug!(job = job_id, stage = stage_id, "stage saturated");

        let unlocked = {
            let job = self.jobs.get_mut(&job_id).expect("saturation of unknown job");
            job.set_saturated(stage_id, true);
            let unlocked = job.find_new_frontier_stages(
                stage_id,
                crate::models::FrontierCriterion::Saturated,
            );
            for &next in &unlocked {
                assert!(!job.is_saturated(next));
                assert!(!job.stages[next].is_complete());
            }
            unlocked
        };
        for &next in &unlocked {
            debug!(job = job_id, stage = next, "stage became schedulable");
            self.schedulable.insert((job_id, next));
            self.pools.add_op(job_id, next);
        }
    }

    /// Dispatches the source pool's free workers against its outstanding
    /// commitments, then parks any leftovers.
    ///
    /// Busy source workers keep their pool's commitments outstanding; they
    /// are reconciled one at a time as they free up.
    fn fulfill_source_commitments(&mut self) -> Result<(), SimError> {
        let source = self.pools.source();
        let mut free: VecDeque<_> = self
            .pools
            .members_of(source)
            .into_iter()
            .filter(|&worker| self.workers[worker].available)
            .collect();

        for (dest, count) in self.pools.source_commitments() {
            assert!(count > 0, "empty commitment entry");
            let (job, stage) = dest.as_op().expect("commitment to a non-op pool");
            for _ in 0..count {
                let Some(worker) = free.pop_front() else {
                    break;
                };
                self.fulfill_commitment(worker, job, stage)?;
            }
        }

        if !free.is_empty() {
            self.park_leftover_source_workers(free);
        }
        Ok(())
    }

    /// Applies the saturation rules to free-but-uncommitted source workers
    /// once a round closes: keep them at the general pool or an unsaturated
    /// job pool, otherwise fold them back to the job pool or the general
    /// pool.
    fn park_leftover_source_workers(&mut self, leftover: VecDeque<crate::models::WorkerId>) {
        let source = self.pools.source();
        match source {
            PoolKey::Null | PoolKey::General => {}
            PoolKey::Job(job) => {
                if self.jobs[&job].all_stages_saturated() {
                    for worker in leftover {
                        self.park_at_general(worker);
                    }
                }
            }
            PoolKey::Op(job, _) => {
                let job_saturated = self.jobs[&job].all_stages_saturated();
                for worker in leftover {
                    if job_saturated {
                        self.park_at_general(worker);
                    } else {
                        self.pools.move_to_pool(worker, PoolKey::Job(job), false);
                        self.workers[worker].clear_task();
                    }
                }
            }
        }
    }

    /// Detaches a worker from its job and returns it to the general pool.
    fn park_at_general(&mut self, worker: crate::models::WorkerId) {
        if let Some(job) = self.workers[worker].job.take() {
            if let Some(job_ref) = self.jobs.get_mut(&job) {
                job_ref.remove_local_worker(worker);
            }
        }
        self.workers[worker].clear_task();
        self.pools.move_to_pool(worker, PoolKey::General, false);
    }

    // ── Timeline ────────────────────────────────────────────────────────

    /// Advances simulated time until a new commitment round must open or
    /// the timeline runs out, honoring the configured time limit.
    fn drain_timeline(&mut self) -> Result<(), SimError> {
        while !(self.timeline.is_empty() || self.round_pending()) {
            if let (Some(limit), Some(next)) = (self.config.time_limit, self.timeline.peek_time())
            {
                if next > limit {
                    debug!(limit, "time limit reached, truncating episode");
                    self.truncated = true;
                    self.wall_time = limit;
                    return Ok(());
                }
            }
            let (time, event) = self.timeline.pop().ok_or(SimError::EmptyTimeline)?;
            self.wall_time = time;
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Time-weighted active-job penalty over `(t_prev, wall_time]`, scaled.
    ///
    /// Each job contributes the overlap of the window with its
    /// `[arrival, completion]` span, so jobs finishing mid-window still pay
    /// for their final stretch. By Little's law, minimizing the cumulative
    /// penalty minimizes mean job completion time.
    fn reward_since(&self, t_prev: f64) -> f64 {
        let mut total = 0.0;
        for job in self.jobs.values() {
            let start = job.arrival_time.max(t_prev);
            let end = job.completion_time.unwrap_or(self.wall_time).min(self.wall_time);
            if end > start {
                total -= end - start;
            }
        }
        total * self.config.reward_scale
    }
}
