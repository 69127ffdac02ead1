//! Classifier tests: tier boundaries, machine-type escalation, and purity.

use gantry::classifier::{
    evaluate_job_complexity, AssignedService, ComplexityLevel, MEDIUM_CPU_MILLIS_MAX,
    MEDIUM_DURATION_SEC_MAX, MEDIUM_MEMORY_MIB_MAX, SIMPLE_CPU_MILLIS_MAX,
    SIMPLE_DURATION_SEC_MAX, SIMPLE_MEMORY_MIB_MAX,
};
use gantry::config::ResourceOverride;

fn overrides(cpu_millis: i64, memory_mib: i64, duration: i64) -> ResourceOverride {
    ResourceOverride {
        cpu_millis,
        memory_mib,
        max_run_duration_seconds: duration,
    }
}

#[test]
fn test_no_resources_is_simple() {
    let decision = evaluate_job_complexity("", &ResourceOverride::default());
    assert_eq!(decision.complexity, ComplexityLevel::Simple);
    assert_eq!(decision.assigned_service, AssignedService::Light);
    assert!(!decision.reason.is_empty());
}

#[test]
fn test_simple_thresholds_inclusive() {
    // Exactly at the simple maxima stays SIMPLE.
    let decision = evaluate_job_complexity(
        "",
        &overrides(
            SIMPLE_CPU_MILLIS_MAX,
            SIMPLE_MEMORY_MIB_MAX,
            SIMPLE_DURATION_SEC_MAX,
        ),
    );
    assert_eq!(decision.complexity, ComplexityLevel::Simple);
    assert_eq!(decision.assigned_service, AssignedService::Light);
}

#[test]
fn test_one_past_simple_threshold_is_medium() {
    for o in [
        overrides(SIMPLE_CPU_MILLIS_MAX + 1, 0, 0),
        overrides(0, SIMPLE_MEMORY_MIB_MAX + 1, 0),
        overrides(0, 0, SIMPLE_DURATION_SEC_MAX + 1),
    ] {
        let decision = evaluate_job_complexity("", &o);
        assert_eq!(decision.complexity, ComplexityLevel::Medium, "{o:?}");
        assert_eq!(decision.assigned_service, AssignedService::Medium, "{o:?}");
        assert!(!decision.reason.is_empty());
    }
}

#[test]
fn test_one_past_medium_threshold_is_complex() {
    for o in [
        overrides(MEDIUM_CPU_MILLIS_MAX + 1, 0, 0),
        overrides(0, MEDIUM_MEMORY_MIB_MAX + 1, 0),
        overrides(0, 0, MEDIUM_DURATION_SEC_MAX + 1),
    ] {
        let decision = evaluate_job_complexity("", &o);
        assert_eq!(decision.complexity, ComplexityLevel::Complex, "{o:?}");
        assert_eq!(decision.assigned_service, AssignedService::Heavy, "{o:?}");
    }
}

#[test]
fn test_machine_type_always_complex() {
    // Even tiny resources escalate once a machine type is named.
    let decision = evaluate_job_complexity("e2-standard-4", &overrides(100, 128, 60));
    assert_eq!(decision.complexity, ComplexityLevel::Complex);
    assert_eq!(decision.assigned_service, AssignedService::Heavy);
    assert!(decision.reason.contains("e2-standard-4"));
}

#[test]
fn test_machine_type_checked_before_resources() {
    let decision = evaluate_job_complexity("n2-highmem-8", &ResourceOverride::default());
    assert_eq!(decision.complexity, ComplexityLevel::Complex);
    assert!(decision.reason.contains("machine_type"));
}

#[test]
fn test_zero_values_never_escalate() {
    // Zero means "unspecified", not "bigger than the threshold".
    let decision = evaluate_job_complexity("", &overrides(0, 0, 0));
    assert_eq!(decision.complexity, ComplexityLevel::Simple);
}

#[test]
fn test_medium_band_values() {
    let decision = evaluate_job_complexity("", &overrides(2000, 4096, 1800));
    assert_eq!(decision.complexity, ComplexityLevel::Medium);
    assert_eq!(decision.assigned_service, AssignedService::Medium);
}

#[test]
fn test_classifier_is_pure() {
    let o = overrides(501, 0, 0);
    let first = evaluate_job_complexity("", &o);
    let second = evaluate_job_complexity("", &o);
    assert_eq!(first.complexity, second.complexity);
    assert_eq!(first.assigned_service, second.assigned_service);
    assert_eq!(first.reason, second.reason);
}

#[test]
fn test_reason_is_never_empty() {
    let cases = [
        ("", overrides(0, 0, 0)),
        ("", overrides(501, 0, 0)),
        ("", overrides(0, 8193, 0)),
        ("e2-small", overrides(0, 0, 0)),
    ];
    for (machine_type, o) in cases {
        let decision = evaluate_job_complexity(machine_type, &o);
        assert!(!decision.reason.is_empty(), "{machine_type} {o:?}");
    }
}
