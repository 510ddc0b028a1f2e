//! Input validation for simulation runs.
//!
//! Checks structural integrity of job arrivals and the worker roster before
//! the engine accepts them. Detects:
//! - Empty jobs, stages, or rosters
//! - Out-of-range or self-referential dependencies
//! - Circular stage dependencies (DAG validation)
//! - Duration tables that don't cover the roster's worker types
//! - Malformed arrival times

use std::collections::VecDeque;

use crate::models::{JobSpec, WorkerSpec};

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A job has no stages.
    EmptyJob,
    /// A stage has no tasks.
    EmptyStage,
    /// The worker roster is empty.
    NoWorkers,
    /// A dependency references a stage that doesn't exist, or itself.
    InvalidDependency,
    /// A job's dependency graph contains a cycle.
    CyclicDependency,
    /// A stage's duration table doesn't cover a roster worker type, or has
    /// no finite entry at all.
    IncompatibleStage,
    /// An arrival time is negative or non-finite.
    InvalidArrivalTime,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Validates job arrivals and the worker roster.
///
/// Checks:
/// 1. The roster is non-empty.
/// 2. Every job has at least one stage; every stage at least one task.
/// 3. Dependency indices are in range and never self-referential.
/// 4. Each job's dependency graph is acyclic.
/// 5. Every stage's duration table covers every roster worker type and has
///    at least one finite entry.
/// 6. Arrival times are finite and non-negative.
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_input(arrivals: &[(f64, JobSpec)], workers: &[WorkerSpec]) -> ValidationResult {
    let mut errors = Vec::new();

    if workers.is_empty() {
        errors.push(ValidationError::new(
            ValidationErrorKind::NoWorkers,
            "worker roster is empty",
        ));
    }
    let max_worker_type = workers.iter().map(|w| w.worker_type).max().unwrap_or(0);

    for (job_id, (arrival, spec)) in arrivals.iter().enumerate() {
        if !arrival.is_finite() || *arrival < 0.0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidArrivalTime,
                format!("job {job_id} has arrival time {arrival}"),
            ));
        }

        if spec.stages.is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::EmptyJob,
                format!("job {job_id} has no stages"),
            ));
            continue;
        }

        for (stage_id, stage) in spec.stages.iter().enumerate() {
            if stage.task_count == 0 {
                errors.push(ValidationError::new(
                    ValidationErrorKind::EmptyStage,
                    format!("stage ({job_id}, {stage_id}) has no tasks"),
                ));
            }

            if !workers.is_empty() {
                if stage.expected_durations.len() <= max_worker_type {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::IncompatibleStage,
                        format!(
                            "stage ({job_id}, {stage_id}) duration table covers {} worker types, roster needs {}",
                            stage.expected_durations.len(),
                            max_worker_type + 1
                        ),
                    ));
                } else if !stage.expected_durations.iter().any(|d| d.is_finite()) {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::IncompatibleStage,
                        format!("stage ({job_id}, {stage_id}) is compatible with no worker type"),
                    ));
                }
            }

            for &dep in &stage.dependencies {
                if dep >= spec.stages.len() || dep == stage_id {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::InvalidDependency,
                        format!("stage ({job_id}, {stage_id}) has invalid dependency {dep}"),
                    ));
                }
            }
        }

        if has_cycle(spec) {
            errors.push(ValidationError::new(
                ValidationErrorKind::CyclicDependency,
                format!("job {job_id} has a dependency cycle"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Cycle detection via Kahn's algorithm over one job's stage graph.
fn has_cycle(spec: &JobSpec) -> bool {
    let n = spec.stages.len();
    let mut in_degree = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (stage_id, stage) in spec.stages.iter().enumerate() {
        for &dep in &stage.dependencies {
            if dep >= n || dep == stage_id {
                // Reported separately as InvalidDependency.
                continue;
            }
            in_degree[stage_id] += 1;
            children[dep].push(stage_id);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&s| in_degree[s] == 0).collect();
    let mut visited = 0;

    while let Some(stage) = queue.pop_front() {
        visited += 1;
        for &child in &children[stage] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    visited < n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageSpec;

    fn stage(tasks: usize, deps: Vec<usize>) -> StageSpec {
        StageSpec::new(tasks, vec![100.0]).with_dependencies(deps)
    }

    fn workers() -> Vec<WorkerSpec> {
        WorkerSpec::homogeneous(2)
    }

    #[test]
    fn test_valid_input() {
        let arrivals = vec![(
            0.0,
            JobSpec::new(vec![stage(2, vec![]), stage(1, vec![0])]),
        )];
        assert!(validate_input(&arrivals, &workers()).is_ok());
    }

    #[test]
    fn test_empty_roster() {
        let arrivals = vec![(0.0, JobSpec::new(vec![stage(1, vec![])]))];
        let errors = validate_input(&arrivals, &[]).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::NoWorkers));
    }

    #[test]
    fn test_empty_job_and_stage() {
        let arrivals = vec![
            (0.0, JobSpec::new(vec![])),
            (0.0, JobSpec::new(vec![stage(0, vec![])])),
        ];
        let errors = validate_input(&arrivals, &workers()).unwrap_err();
        assert!(errors.iter().any(|e| e.kind == ValidationErrorKind::EmptyJob));
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::EmptyStage));
    }

    #[test]
    fn test_invalid_dependency() {
        let arrivals = vec![(0.0, JobSpec::new(vec![stage(1, vec![5]), stage(1, vec![1])]))];
        let errors = validate_input(&arrivals, &workers()).unwrap_err();
        let count = errors
            .iter()
            .filter(|e| e.kind == ValidationErrorKind::InvalidDependency)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cycle_detection() {
        // 0 → 1 → 2 → 0
        let arrivals = vec![(
            0.0,
            JobSpec::new(vec![stage(1, vec![2]), stage(1, vec![0]), stage(1, vec![1])]),
        )];
        let errors = validate_input(&arrivals, &workers()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::CyclicDependency));
    }

    #[test]
    fn test_duration_table_must_cover_roster() {
        let roster = vec![WorkerSpec::new(0), WorkerSpec::new(1)];
        let arrivals = vec![(0.0, JobSpec::new(vec![stage(1, vec![])]))];
        // `stage` builds a one-entry table; type 1 is uncovered.
        let errors = validate_input(&arrivals, &roster).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::IncompatibleStage));
    }

    #[test]
    fn test_all_infinite_durations_rejected() {
        let spec = JobSpec::new(vec![StageSpec::new(1, vec![f64::INFINITY])]);
        let errors = validate_input(&[(0.0, spec)], &workers()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::IncompatibleStage));
    }

    #[test]
    fn test_negative_arrival_time() {
        let arrivals = vec![(-1.0, JobSpec::new(vec![stage(1, vec![])]))];
        let errors = validate_input(&arrivals, &workers()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::InvalidArrivalTime));
    }
}
