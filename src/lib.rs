//! Discrete-event simulation of DAG-structured jobs on a shared worker pool.
//!
//! Simulates many jobs — each a DAG of multi-task stages — executing on a
//! fixed roster of workers, so an external scheduling policy can be
//! evaluated or trained against realistic timing dynamics. The crate owns
//! the timing and bookkeeping core; deciding *which* assignment is best is
//! the caller's job. The engine enforces legality, advances time, and
//! reports observations and rewards.
//!
//! # Modules
//!
//! - **`models`**: Domain types — `JobSpec`/`Job`, `StageSpec`/`Stage`,
//!   `TaskSlot`, `WorkerSpec`/`Worker`
//! - **`timeline`**: Deterministic time-ordered event queue
//! - **`pools`**: Worker pools and the commitment state machine
//! - **`engine`**: The `reset`/`step` simulation engine
//! - **`duration`**: Injected task-duration oracles
//! - **`observe`**: Raw-count observations for the decision-maker
//! - **`validation`**: Input integrity checks (DAG cycles, roster coverage)
//! - **`config`**, **`error`**, **`stats`**: configuration, error taxonomy,
//!   episode metrics
//!
//! # Control flow
//!
//! ```
//! use dagsim::config::SimConfig;
//! use dagsim::engine::{Action, Simulation};
//! use dagsim::models::{JobSpec, StageSpec, WorkerSpec};
//!
//! let mut sim = Simulation::new(SimConfig::new());
//! let arrivals = vec![(0.0, JobSpec::new(vec![StageSpec::new(2, vec![500.0])]))];
//! let mut obs = sim.reset(arrivals, WorkerSpec::homogeneous(2)).unwrap();
//!
//! while let Some(&(job, stage)) = obs.valid_targets.first() {
//!     let step = sim.step(Action::new(job, stage, obs.source_workers)).unwrap();
//!     if step.done {
//!         break;
//!     }
//!     obs = step.observation;
//! }
//! assert!(sim.all_jobs_complete());
//! ```
//!
//! Each instance is single-threaded and fully synchronous; time is a
//! logical clock driven by the event queue. Given the same inputs and seed,
//! an episode replays identically. Instances share no state, so any number
//! may run in parallel.
//!
//! # References
//!
//! - Mao et al. (2019), "Learning Scheduling Algorithms for Data Processing
//!   Clusters"
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems"

pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod models;
pub mod observe;
pub mod pools;
pub mod stats;
pub mod timeline;
pub mod validation;

pub use config::{MoveCost, SimConfig};
pub use engine::{Action, Simulation, Step};
pub use error::SimError;
pub use observe::Observation;
