//! Real programs run through the full sandbox
//!
//! Each scenario compiles a tiny statically linked C helper with `cc -static`
//! and runs it through `cli::execute`, reading the outcome back from the JSON
//! report. Skipped without root, a `nobody` account, or a static toolchain.

use antiskill::cli::execute;
use antiskill::kernel::credentials::resolve_identity;
use antiskill::verdict::verdict::RunReport;
use antiskill::{exit_code, SandboxConfig, Termination, Verdict};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// Supervision shares one process-wide state; run confined programs one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

const ADDER: &str = r#"
#include <stdio.h>
int main(void) {
    long a, b;
    if (scanf("%ld %ld", &a, &b) != 2) return 2;
    printf("%ld\n", a + b);
    return 0;
}
"#;

const EXIT_42: &str = "int main(void) { return 42; }\n";

const SPINNER: &str = r#"
int main(void) {
    volatile unsigned long x = 0;
    for (;;) x++;
}
"#;

const SLEEPER: &str = r#"
#include <unistd.h>
int main(void) {
    for (;;) pause();
}
"#;

const HOG: &str = r#"
#include <stdlib.h>
#include <string.h>
int main(void) {
    for (;;) {
        char *p = malloc(1 << 20);
        if (!p) return 1;
        memset(p, 1, 1 << 20);
    }
}
"#;

const CAT: &str = r#"
#include <unistd.h>
int main(void) {
    char buf[4096];
    ssize_t n;
    while ((n = read(0, buf, sizeof buf)) > 0) {
        if (write(1, buf, n) != n) return 1;
    }
    return n < 0;
}
"#;

const FORKER: &str = r#"
#include <stdio.h>
#include <unistd.h>
int main(void) {
    pid_t child = fork();
    if (child < 0) return 1;
    if (child == 0) {
        for (;;) pause();
    }
    printf("%d\n", (int)child);
    return 0;
}
"#;

/// Build directory holding one compiled helper
struct Helper {
    dir: TempDir,
    binary: PathBuf,
}

impl Helper {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn can_confine() -> bool {
    if !nix::unistd::geteuid().is_root() {
        println!("skipping: requires root");
        return false;
    }
    if resolve_identity("nobody").is_err() {
        println!("skipping: no usable 'nobody' account");
        return false;
    }
    true
}

fn build(name: &str, source: &str) -> Option<Helper> {
    if !can_confine() {
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join(format!("{}.c", name));
    let binary = dir.path().join(name);
    fs::write(&source_path, source).unwrap();

    let built = Command::new("cc")
        .arg("-static")
        .arg("-O1")
        .arg("-o")
        .arg(&binary)
        .arg(&source_path)
        .status();
    match built {
        Ok(status) if status.success() => Some(Helper { dir, binary }),
        _ => {
            println!("skipping: cannot build static helper '{}'", name);
            None
        }
    }
}

/// Outcome of one confined run
struct Outcome {
    status: i32,
    report: RunReport,
    elapsed: Duration,
    /// Staging directories that appeared during the run and were not removed
    leftover: Vec<PathBuf>,
}

fn run(helper: &Helper, config: SandboxConfig) -> Outcome {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let report_path = helper.path("report.json");
    let config = SandboxConfig {
        report: Some(report_path.clone()),
        ..config
    };

    let before = staging_dirs();
    let started = Instant::now();
    let status = execute(&config);
    let elapsed = started.elapsed();
    let leftover = staging_dirs()
        .into_iter()
        .filter(|dir| !before.contains(dir))
        .collect();

    let report: RunReport =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    fs::remove_file(&report_path).unwrap();
    Outcome {
        status,
        report,
        elapsed,
        leftover,
    }
}

fn staging_dirs() -> Vec<PathBuf> {
    fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("sandbox."))
        })
        .collect()
}

#[test]
fn test_adder_reads_input_and_writes_output() {
    let Some(helper) = build("adder", ADDER) else {
        return;
    };
    let input = helper.path("in.txt");
    let output = helper.path("out.txt");
    fs::write(&input, b"3 4").unwrap();

    let outcome = run(
        &helper,
        SandboxConfig {
            input: Some(input),
            output: Some(output.clone()),
            time_limit_ms: 500,
            memory_limit_kb: 65536,
            ..SandboxConfig::new(&helper.binary)
        },
    );

    assert_eq!(outcome.status, exit_code::SUCCESS);
    assert_eq!(outcome.report.verdict, Verdict::Success);
    let evidence = outcome.report.evidence.unwrap();
    assert_eq!(
        outcome.report.to_string(),
        format!("0 {} {}", evidence.usage.time_ms, evidence.usage.memory_kb)
    );
    assert_eq!(fs::read(&output).unwrap(), b"7\n");
    assert!(outcome.leftover.is_empty(), "{:?}", outcome.leftover);
}

#[test]
fn test_nonzero_exit_is_runtime_error_line() {
    let Some(helper) = build("exit42", EXIT_42) else {
        return;
    };

    let outcome = run(&helper, SandboxConfig::new(&helper.binary));

    assert_eq!(outcome.status, exit_code::RUNTIME_ERROR);
    assert_eq!(outcome.report.verdict, Verdict::RuntimeError);
    let evidence = outcome.report.evidence.unwrap();
    assert_eq!(evidence.termination, Termination::Exited { code: 42 });
    assert!(outcome.report.to_string().starts_with("42 "));
}

#[test]
fn test_cpu_spinner_is_tle_within_deadline() {
    let Some(helper) = build("spinner", SPINNER) else {
        return;
    };

    // Whole-second limits are where the CPU ceiling used to kill the spinner
    // before its recorded time passed the limit.
    for time_limit_ms in [1000, 1000, 1000, 500] {
        let outcome = run(
            &helper,
            SandboxConfig {
                time_limit_ms,
                ..SandboxConfig::new(&helper.binary)
            },
        );
        assert_eq!(
            outcome.report.verdict,
            Verdict::TimeLimitExceeded,
            "limit {} ms: {:?}",
            time_limit_ms,
            outcome.report.evidence
        );
        assert_eq!(outcome.report.to_string(), "Time Limit Exceeded");
        assert_eq!(outcome.status, exit_code::TIME_LIMIT);
        assert!(outcome.elapsed < Duration::from_millis(time_limit_ms + 1000 + 1500));
    }
}

#[test]
fn test_sleeper_is_tle_by_deadline() {
    let Some(helper) = build("sleeper", SLEEPER) else {
        return;
    };

    let outcome = run(
        &helper,
        SandboxConfig {
            time_limit_ms: 300,
            ..SandboxConfig::new(&helper.binary)
        },
    );

    assert_eq!(outcome.report.verdict, Verdict::TimeLimitExceeded);
    assert!(outcome.report.evidence.unwrap().deadline_fired);
    assert!(outcome.elapsed >= Duration::from_millis(1300));
    assert!(outcome.elapsed < Duration::from_millis(1300 + 1500));
}

#[test]
fn test_memory_hog_is_mle_or_killed() {
    let Some(helper) = build("hog", HOG) else {
        return;
    };

    let outcome = run(
        &helper,
        SandboxConfig {
            memory_limit_kb: 65536,
            ..SandboxConfig::new(&helper.binary)
        },
    );

    assert!(
        matches!(
            outcome.report.verdict,
            Verdict::MemoryLimitExceeded | Verdict::Killed
        ),
        "{:?}",
        outcome.report
    );
}

#[test]
fn test_streams_pass_through_byte_for_byte() {
    let Some(helper) = build("cat", CAT) else {
        return;
    };
    let input = helper.path("blob.in");
    let output = helper.path("blob.out");
    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    fs::write(&input, &payload).unwrap();

    let outcome = run(
        &helper,
        SandboxConfig {
            input: Some(input),
            output: Some(output.clone()),
            ..SandboxConfig::new(&helper.binary)
        },
    );

    assert_eq!(outcome.report.verdict, Verdict::Success);
    assert_eq!(fs::read(&output).unwrap(), payload);
}

fn is_gone_or_zombie(pid: &str) -> bool {
    match fs::read_to_string(Path::new("/proc").join(pid).join("stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
    }
}

#[test]
fn test_descendants_do_not_outlive_the_run() {
    let Some(helper) = build("forker", FORKER) else {
        return;
    };
    let output = helper.path("forker.out");

    let outcome = run(
        &helper,
        SandboxConfig {
            output: Some(output.clone()),
            ..SandboxConfig::new(&helper.binary)
        },
    );
    assert_eq!(outcome.report.verdict, Verdict::Success);

    let text = fs::read_to_string(&output).unwrap();
    let pid = text.trim();
    assert!(pid.parse::<i32>().is_ok(), "unexpected output {:?}", text);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !is_gone_or_zombie(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(is_gone_or_zombie(pid), "process {} still running", pid);
    assert!(outcome.leftover.is_empty(), "{:?}", outcome.leftover);
}
