//! Worker pools and the commitment state machine.
//!
//! Every worker resides in exactly one pool, or is in transit toward an
//! operation pool. Commitments are directed promises to send workers from a
//! source pool to an operation pool; they are recorded during a commitment
//! round and fulfilled later, as workers free up. Destinations are served in
//! the order their first commitment was registered.
//!
//! The asserts in this module are the correctness net of the commitment
//! protocol: supply ≥ demand at the source, non-negative counters, and a
//! single location per worker. They abort the instance on violation.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use tracing::trace;

use crate::models::{JobId, StageId, WorkerId};

/// A named holding area for workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PoolKey {
    /// Virtual pool; never holds workers. The source is set here when no
    /// pool is eligible to open a commitment round.
    #[default]
    Null,
    /// Workers not attached to any job.
    General,
    /// Idle workers parked at a job.
    Job(JobId),
    /// Workers working on, or en route to, a stage.
    Op(JobId, StageId),
}

impl PoolKey {
    /// The job this pool belongs to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match *self {
            Self::Null | Self::General => None,
            Self::Job(job) => Some(job),
            Self::Op(job, _) => Some(job),
        }
    }

    /// The `(job, stage)` pair of an operation pool.
    pub fn as_op(&self) -> Option<(JobId, StageId)> {
        match *self {
            Self::Op(job, stage) => Some((job, stage)),
            _ => None,
        }
    }
}

/// Tracks worker locations, pool membership, commitments, and in-flight
/// moves.
#[derive(Debug, Default)]
pub struct WorkerPoolState {
    /// Worker → resident pool; `None` while the worker is moving.
    locations: Vec<Option<PoolKey>>,
    /// Worker → job attachment, including while moving.
    affiliations: Vec<Option<JobId>>,
    members: HashMap<PoolKey, BTreeSet<WorkerId>>,
    /// Source pool → (destination → outstanding count), insertion-ordered.
    commitments: HashMap<PoolKey, IndexMap<PoolKey, usize>>,
    committed_from: HashMap<PoolKey, usize>,
    committed_to_op: HashMap<(JobId, StageId), usize>,
    moving_to_op: HashMap<(JobId, StageId), usize>,
    job_totals: HashMap<JobId, usize>,
    source: PoolKey,
}

impl WorkerPoolState {
    /// Creates the state machine with all workers in the general pool.
    pub fn new(num_workers: usize) -> Self {
        let mut members = HashMap::new();
        members.insert(PoolKey::Null, BTreeSet::new());
        members.insert(PoolKey::General, (0..num_workers).collect());

        let mut commitments = HashMap::new();
        commitments.insert(PoolKey::Null, IndexMap::new());
        commitments.insert(PoolKey::General, IndexMap::new());

        let mut committed_from = HashMap::new();
        committed_from.insert(PoolKey::Null, 0);
        committed_from.insert(PoolKey::General, 0);

        Self {
            locations: vec![Some(PoolKey::General); num_workers],
            affiliations: vec![None; num_workers],
            members,
            commitments,
            committed_from,
            committed_to_op: HashMap::new(),
            moving_to_op: HashMap::new(),
            job_totals: HashMap::new(),
            source: PoolKey::General,
        }
    }

    /// Registers a new job pool.
    pub fn add_job(&mut self, job: JobId) {
        self.members.insert(PoolKey::Job(job), BTreeSet::new());
        self.commitments.insert(PoolKey::Job(job), IndexMap::new());
        self.committed_from.insert(PoolKey::Job(job), 0);
        self.job_totals.insert(job, 0);
    }

    /// Registers a new operation pool.
    pub fn add_op(&mut self, job: JobId, stage: StageId) {
        let key = PoolKey::Op(job, stage);
        self.members.insert(key, BTreeSet::new());
        self.commitments.insert(key, IndexMap::new());
        self.committed_from.insert(key, 0);
        self.committed_to_op.insert((job, stage), 0);
        self.moving_to_op.insert((job, stage), 0);
    }

    // ── Source pool ─────────────────────────────────────────────────────

    /// The pool eligible to open the next commitment round.
    pub fn source(&self) -> PoolKey {
        self.source
    }

    /// The source pool's job, if it is a job or operation pool.
    pub fn source_job(&self) -> Option<JobId> {
        self.source.job_id()
    }

    /// Points the next commitment round at `pool`.
    pub fn update_source(&mut self, pool: PoolKey) {
        self.source = pool;
    }

    /// Clears the source; no round can open until it is set again.
    pub fn clear_source(&mut self) {
        self.source = PoolKey::Null;
    }

    /// Source workers without an outstanding commitment.
    pub fn uncommitted_at_source(&self) -> usize {
        let supply = self.workers_at(self.source);
        let demand = self.committed_from.get(&self.source).copied().unwrap_or(0);
        assert!(supply >= demand, "source pool oversubscribed");
        supply - demand
    }

    /// Whether every source worker has somewhere to go.
    pub fn all_source_committed(&self) -> bool {
        self.uncommitted_at_source() == 0
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Number of workers resident in `pool`.
    pub fn workers_at(&self, pool: PoolKey) -> usize {
        self.members.get(&pool).map_or(0, BTreeSet::len)
    }

    /// Workers resident in `pool`, ascending by id.
    pub fn members_of(&self, pool: PoolKey) -> Vec<WorkerId> {
        self.members
            .get(&pool)
            .map_or_else(Vec::new, |set| set.iter().copied().collect())
    }

    /// The pool a worker resides in, or `None` while it is moving.
    pub fn location_of(&self, worker: WorkerId) -> Option<PoolKey> {
        self.locations[worker]
    }

    /// Whether any unattached workers exist.
    pub fn general_pool_has_workers(&self) -> bool {
        self.workers_at(PoolKey::General) > 0
    }

    /// Workers currently moving toward a stage.
    pub fn moving_to(&self, job: JobId, stage: StageId) -> usize {
        self.moving_to_op.get(&(job, stage)).copied().unwrap_or(0)
    }

    /// Outstanding commitments targeting a stage.
    pub fn committed_to(&self, job: JobId, stage: StageId) -> usize {
        self.committed_to_op
            .get(&(job, stage))
            .copied()
            .unwrap_or(0)
    }

    /// Workers attached to a job: residents of its pools, workers moving to
    /// its stages, and cross-job commitments into it.
    pub fn total_worker_count(&self, job: JobId) -> usize {
        self.job_totals.get(&job).copied().unwrap_or(0)
    }

    /// `(resident, moving)` worker counts; their sum is conserved.
    pub fn conservation_counts(&self) -> (usize, usize) {
        let resident = self.members.values().map(BTreeSet::len).sum();
        let moving = self.moving_to_op.values().sum();
        (resident, moving)
    }

    // ── Commitments ─────────────────────────────────────────────────────

    /// Commits `count` workers from the current source to `dest`.
    ///
    /// The caller must clamp `count` to the destination's demand first; this
    /// method only enforces that the source is not oversubscribed.
    pub fn add_commitment(&mut self, count: usize, dest: PoolKey) {
        let (dest_job, _) = dest.as_op().expect("commitments target operation pools");
        let source = self.source;

        *self
            .commitments
            .get_mut(&source)
            .expect("unregistered source pool")
            .entry(dest)
            .or_insert(0) += count;
        *self.committed_from.get_mut(&source).unwrap() += count;
        *self
            .committed_to_op
            .get_mut(&dest.as_op().unwrap())
            .expect("unregistered op pool") += count;

        let supply = self.workers_at(source);
        let demand = self.committed_from[&source];
        assert!(
            supply >= demand,
            "commitment oversubscribes source {source:?}: supply {supply}, demand {demand}"
        );

        if source.job_id() != Some(dest_job) {
            *self.job_totals.entry(dest_job).or_insert(0) += count;
        }
        trace!(?source, ?dest, count, "commitment added");
    }

    /// Reverses one unit of commitment from `worker`'s resident pool to
    /// `dest`. Returns the source pool.
    pub fn remove_commitment(&mut self, worker: WorkerId, dest: PoolKey) -> PoolKey {
        let source = self.locations[worker].expect("worker has no resident pool");
        self.decrement_commitment(source, dest);
        source
    }

    /// First destination, in insertion order, with outstanding commitments
    /// from `pool`.
    pub fn peek_commitment(&self, pool: PoolKey) -> Option<PoolKey> {
        self.commitments
            .get(&pool)
            .and_then(|map| map.keys().next().copied())
    }

    /// Snapshot of the source pool's outstanding commitments, in insertion
    /// order.
    pub fn source_commitments(&self) -> Vec<(PoolKey, usize)> {
        self.commitments
            .get(&self.source)
            .map_or_else(Vec::new, |map| {
                map.iter().map(|(&dest, &count)| (dest, count)).collect()
            })
    }

    /// Consumes one unit of `worker`'s pool's commitment to `dest` and moves
    /// the worker there — physically if `send` is false, as an in-flight
    /// move if `send` is true.
    pub fn fulfill_commitment(&mut self, worker: WorkerId, dest: PoolKey, send: bool) {
        self.remove_commitment(worker, dest);
        self.move_to_pool(worker, dest, send);
    }

    // ── Worker movement ─────────────────────────────────────────────────

    /// Relocates `worker` to `dest`.
    ///
    /// With `send == false` the worker becomes resident in `dest`
    /// immediately. With `send == true` the worker leaves its pool, is
    /// counted as moving toward `dest` (an operation pool), and becomes
    /// resident only when the corresponding arrival event is processed.
    pub fn move_to_pool(&mut self, worker: WorkerId, dest: PoolKey, send: bool) {
        if let Some(old) = self.locations[worker].take() {
            let removed = self.members.get_mut(&old).unwrap().remove(&worker);
            assert!(removed, "worker {worker} missing from pool {old:?}");
        }

        if !send {
            self.locations[worker] = Some(dest);
            self.members
                .get_mut(&dest)
                .expect("unregistered destination pool")
                .insert(worker);
            self.set_affiliation(worker, dest.job_id());
            trace!(worker, ?dest, "worker placed");
            return;
        }

        let (job, stage) = dest.as_op().expect("workers are sent to operation pools");
        assert!(
            self.affiliations[worker] != Some(job),
            "sending worker {worker} to its own job {job}"
        );
        *self
            .moving_to_op
            .get_mut(&(job, stage))
            .expect("unregistered op pool") += 1;
        self.set_affiliation(worker, Some(job));
        trace!(worker, ?dest, "worker sent");
    }

    /// Accounts for a worker-arrival event at `(job, stage)`. Called exactly
    /// once per arrival event.
    pub fn count_worker_arrival(&mut self, job: JobId, stage: StageId) {
        let moving = self
            .moving_to_op
            .get_mut(&(job, stage))
            .expect("arrival at unregistered op pool");
        assert!(*moving > 0, "arrival without a matching move");
        *moving -= 1;
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn decrement_commitment(&mut self, source: PoolKey, dest: PoolKey) {
        let per_source = self
            .commitments
            .get_mut(&source)
            .expect("unregistered source pool");
        let count = per_source
            .get_mut(&dest)
            .expect("no commitment to decrement");
        assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            // shift_remove keeps the remaining destinations in order.
            per_source.shift_remove(&dest);
        }

        let from = self.committed_from.get_mut(&source).unwrap();
        assert!(*from > 0, "negative outgoing commitment count");
        *from -= 1;

        let op = dest.as_op().expect("commitments target operation pools");
        let to = self.committed_to_op.get_mut(&op).unwrap();
        assert!(*to > 0, "negative incoming commitment count");
        *to -= 1;

        let dest_job = op.0;
        if source.job_id() != Some(dest_job) {
            let total = self.job_totals.get_mut(&dest_job).unwrap();
            assert!(*total > 0, "negative job worker total");
            *total -= 1;
        }
    }

    fn set_affiliation(&mut self, worker: WorkerId, job: Option<JobId>) {
        let old = self.affiliations[worker];
        if old == job {
            return;
        }
        if let Some(old_job) = old {
            let total = self.job_totals.get_mut(&old_job).unwrap();
            assert!(*total > 0, "negative job worker total");
            *total -= 1;
        }
        if let Some(new_job) = job {
            *self.job_totals.entry(new_job).or_insert(0) += 1;
        }
        self.affiliations[worker] = job;
    }
}
