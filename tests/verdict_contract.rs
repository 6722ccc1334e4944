//! Verdict contract tests
//!
//! The output line and exit status are the interface judging pipelines parse.

use antiskill::verdict::verdict::{LimitSnapshot, RunReport, VerdictClassifier};
use antiskill::{
    exit_code, ResourceUsage, RunEvidence, SandboxConfig, Termination, Verdict,
    CHILD_SETUP_FAILED,
};

fn limits() -> LimitSnapshot {
    let config = SandboxConfig {
        time_limit_ms: 200,
        memory_limit_kb: 1024,
        ..SandboxConfig::new("solution")
    };
    LimitSnapshot::from(&config)
}

fn run(termination: Termination, time_ms: u64, memory_kb: u64, deadline_fired: bool) -> RunReport {
    let evidence = RunEvidence {
        termination,
        usage: ResourceUsage {
            time_ms,
            memory_kb,
            peak_rss_kb: 0,
        },
        deadline_fired,
    };
    RunReport::from_evidence(evidence, limits())
}

#[test]
fn test_every_verdict_has_one_line_and_status() {
    let cases = [
        (run(Termination::Exited { code: 0 }, 15, 300, false), "0 15 300", exit_code::SUCCESS),
        (run(Termination::Exited { code: 1 }, 15, 300, false), "1 15 300", exit_code::RUNTIME_ERROR),
        (run(Termination::Exited { code: 0 }, 201, 300, false), "Time Limit Exceeded", exit_code::TIME_LIMIT),
        (run(Termination::Exited { code: 0 }, 15, 1025, false), "Memory Limit Exceeded", exit_code::MEMORY_LIMIT),
        (
            run(Termination::Signaled { signal: libc::SIGSEGV }, 15, 300, false),
            "Program Killed",
            exit_code::RUNTIME_ERROR,
        ),
        (
            run(Termination::Exited { code: CHILD_SETUP_FAILED }, 0, 0, false),
            "fatal",
            exit_code::FATAL,
        ),
    ];

    for (report, line, status) in cases {
        assert_eq!(report.to_string(), line);
        assert_eq!(report.exit_status(), status, "status for {:?}", report.verdict);
    }
}

#[test]
fn test_deadline_kill_reports_tle_not_killed() {
    // The supervisor SIGKILLs the group when the deadline fires; the
    // reaped status is a signal but the verdict must be TLE.
    let report = run(Termination::Signaled { signal: libc::SIGKILL }, 40, 300, true);
    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    assert_eq!(report.to_string(), "Time Limit Exceeded");
}

#[test]
fn test_cpu_limit_signal_is_tle_when_time_exceeds() {
    let report = run(Termination::Signaled { signal: libc::SIGXCPU }, 1000, 300, false);
    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
}

#[test]
fn test_allocation_failure_over_limit_is_mle() {
    // A program whose allocation fails under RLIMIT_AS typically aborts
    let report = run(Termination::Signaled { signal: libc::SIGABRT }, 10, 4096, false);
    assert_eq!(report.verdict, Verdict::MemoryLimitExceeded);
}

#[test]
fn test_classification_is_pure() {
    let evidence = RunEvidence {
        termination: Termination::Exited { code: 9 },
        usage: ResourceUsage {
            time_ms: 3,
            memory_kb: 3,
            peak_rss_kb: 3,
        },
        deadline_fired: false,
    };
    let first = VerdictClassifier::classify(&evidence, &limits());
    let second = VerdictClassifier::classify(&evidence, &limits());
    assert_eq!(first, second);
    assert_eq!(first, Verdict::RuntimeError);
}

#[test]
fn test_fatal_report_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");

    RunReport::fatal(limits()).write_json(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["verdict"], "FATAL");
    assert!(value["evidence"].is_null());
    assert_eq!(value["limits"]["time_limit_ms"], 200);
}
