//! Job complexity classification.
//!
//! `evaluate_job_complexity` inspects a submission's declared machine type
//! and resource overrides and returns the tier together with the execution
//! service that should run the workload:
//!
//!   - SIMPLE  → LIGHT   (no machine type, tiny CPU/memory, ≤ 10 min)
//!   - MEDIUM  → MEDIUM  (no machine type, moderate resources, ≤ 1 hour)
//!   - COMPLEX → HEAVY   (specific machine type, heavy resources, or long duration)

use crate::config::ResourceOverride;

/// Tier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityLevel::Simple => write!(f, "SIMPLE"),
            ComplexityLevel::Medium => write!(f, "MEDIUM"),
            ComplexityLevel::Complex => write!(f, "COMPLEX"),
        }
    }
}

/// Execution backend tier a job is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignedService {
    Light,
    Medium,
    Heavy,
}

impl std::fmt::Display for AssignedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignedService::Light => write!(f, "LIGHT"),
            AssignedService::Medium => write!(f, "MEDIUM"),
            AssignedService::Heavy => write!(f, "HEAVY"),
        }
    }
}

/// Output of [`evaluate_job_complexity`].
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub complexity: ComplexityLevel,
    pub assigned_service: AssignedService,
    /// Short human-readable explanation of why this tier was chosen.
    /// Never empty.
    pub reason: String,
}

/// Maximum CPU (milli-cores) for a SIMPLE job.
pub const SIMPLE_CPU_MILLIS_MAX: i64 = 500;
/// Maximum memory (MiB) for a SIMPLE job.
pub const SIMPLE_MEMORY_MIB_MAX: i64 = 512;
/// Maximum duration (seconds) for a SIMPLE job (10 min).
pub const SIMPLE_DURATION_SEC_MAX: i64 = 600;

/// Maximum CPU (milli-cores) for a MEDIUM job.
pub const MEDIUM_CPU_MILLIS_MAX: i64 = 4000;
/// Maximum memory (MiB) for a MEDIUM job.
pub const MEDIUM_MEMORY_MIB_MAX: i64 = 8192;
/// Maximum duration (seconds) for a MEDIUM job (1 hour).
pub const MEDIUM_DURATION_SEC_MAX: i64 = 3600;

/// Classify a submission into a tier and an execution service.
///
/// Decision logic (strictest check first):
/// 1. machine type set → COMPLEX / HEAVY;
/// 2. any override above the medium thresholds → COMPLEX / HEAVY;
/// 3. any override above the simple thresholds → MEDIUM / MEDIUM;
/// 4. otherwise → SIMPLE / LIGHT.
///
/// Zero-value resource fields are treated as "not specified" and never push
/// the job into a higher tier on their own. Pure function: identical inputs
/// always yield identical outputs.
pub fn evaluate_job_complexity(
    machine_type: &str,
    overrides: &ResourceOverride,
) -> RoutingDecision {
    if !machine_type.is_empty() {
        return RoutingDecision {
            complexity: ComplexityLevel::Complex,
            assigned_service: AssignedService::Heavy,
            reason: format!("explicit machine_type requested: {machine_type}"),
        };
    }

    if exceeds_threshold(overrides.cpu_millis, MEDIUM_CPU_MILLIS_MAX) {
        return complex("cpu_millis exceeds medium threshold");
    }
    if exceeds_threshold(overrides.memory_mib, MEDIUM_MEMORY_MIB_MAX) {
        return complex("memory_mib exceeds medium threshold");
    }
    if exceeds_threshold(overrides.max_run_duration_seconds, MEDIUM_DURATION_SEC_MAX) {
        return complex("max_run_duration_seconds exceeds medium threshold");
    }

    if exceeds_threshold(overrides.cpu_millis, SIMPLE_CPU_MILLIS_MAX) {
        return medium("cpu_millis exceeds simple threshold");
    }
    if exceeds_threshold(overrides.memory_mib, SIMPLE_MEMORY_MIB_MAX) {
        return medium("memory_mib exceeds simple threshold");
    }
    if exceeds_threshold(overrides.max_run_duration_seconds, SIMPLE_DURATION_SEC_MAX) {
        return medium("max_run_duration_seconds exceeds simple threshold");
    }

    RoutingDecision {
        complexity: ComplexityLevel::Simple,
        assigned_service: AssignedService::Light,
        reason: "no machine type, resources within simple thresholds".to_string(),
    }
}

fn complex(reason: &str) -> RoutingDecision {
    RoutingDecision {
        complexity: ComplexityLevel::Complex,
        assigned_service: AssignedService::Heavy,
        reason: reason.to_string(),
    }
}

fn medium(reason: &str) -> RoutingDecision {
    RoutingDecision {
        complexity: ComplexityLevel::Medium,
        assigned_service: AssignedService::Medium,
        reason: reason.to_string(),
    }
}

/// True only when value is both non-zero and greater than max. A zero value
/// means "not specified" and is not penalised.
fn exceeds_threshold(value: i64, max: i64) -> bool {
    value > 0 && value > max
}
