//! Integration tests for the process sandbox
//!
//! Every test drives /bin/sh through `ProcessSandbox` with a private scratch
//! root, so they run unprivileged on any Unix host.

use compilebox::config::settings::SandboxSettings;
use compilebox::sandbox::{
    CancelToken, ExecutionStatus, InputFile, OutputIntegrity, ProcessSandbox, SandboxExecutor,
    SandboxLimits, SandboxProgram, SandboxRequest,
};
use std::path::Path;
use std::time::{Duration, Instant};

fn sandbox(root: &Path) -> ProcessSandbox {
    let settings = SandboxSettings {
        scratch_root: root.to_path_buf(),
        isolate_network: false,
        ..SandboxSettings::default()
    };
    ProcessSandbox::new(settings).unwrap()
}

fn shell(script: &str) -> SandboxProgram {
    SandboxProgram::external(["sh", "-c", script])
}

fn limits(wall: Duration) -> SandboxLimits {
    SandboxLimits {
        wall_time: wall,
        ..SandboxLimits::default()
    }
}

#[test]
fn test_inputs_are_materialized_and_artifacts_collected() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(
        shell("mkdir -p out && tr a-z A-Z < main.c > out/upper.c && cat main.c"),
        limits(Duration::from_secs(5)),
    )
    .with_input(InputFile::new("main.c", "int main(void) { return 0; }\n"))
    .with_collect("out/upper.c");

    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert_eq!(result.status, ExecutionStatus::Ok);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.contains("int main"));
    let artifact = result.artifact("out/upper.c").expect("collected artifact");
    assert!(artifact.text().starts_with("INT MAIN"));
}

#[test]
fn test_nonzero_exit_is_runtime_error_with_stderr() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(
        shell("echo 'main.c:3:1: error: boom' >&2; exit 3"),
        limits(Duration::from_secs(5)),
    );

    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.exit_code, Some(3));
    assert!(result.stderr.contains("error: boom"));
    assert!(!result.resource_exceeded.terminated());
}

#[test]
fn test_wall_limit_kills_the_process_group() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(
        shell("sleep 30 & sleep 30; echo never"),
        limits(Duration::from_millis(300)),
    );

    let started = Instant::now();
    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.status, ExecutionStatus::TimeLimit);
    assert!(result.resource_exceeded.time);
    assert!(!result.stdout.contains("never"));
}

#[test]
fn test_two_second_wall_limit_stops_within_bound() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let scripts = [
        "while :; do :; done",
        "trap '' TERM; while :; do :; done",
        "(while :; do :; done) & while :; do :; done",
    ];
    for script in scripts {
        let request = SandboxRequest::new(shell(script), limits(Duration::from_secs(2)));
        let started = Instant::now();
        let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
        let elapsed = started.elapsed();

        assert!(result.resource_exceeded.time, "{}", script);
        assert_eq!(result.status, ExecutionStatus::TimeLimit, "{}", script);
        assert!(elapsed >= Duration::from_secs(2), "{}: {:?}", script, elapsed);
        assert!(elapsed < Duration::from_millis(2500), "{}: {:?}", script, elapsed);
    }
}

#[test]
fn test_memory_limit_kills_the_tool() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    // the command substitution holds 256 MiB in the shell's heap
    let request = SandboxRequest::new(
        shell("x=$(head -c 268435456 /dev/zero | tr '\\0' a); echo ${#x}"),
        SandboxLimits {
            memory_bytes: 64 * 1024 * 1024,
            ..limits(Duration::from_secs(20))
        },
    );

    let started = Instant::now();
    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.resource_exceeded.memory);
    assert!(!result.resource_exceeded.time);
    assert_eq!(result.status, ExecutionStatus::MemoryLimit);
    assert!(result.memory_peak_bytes >= 64 * 1024 * 1024);
    assert!(result.stdout.is_empty());
}

#[test]
fn test_output_beyond_limit_is_discarded() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(
        shell("i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done"),
        SandboxLimits {
            max_output_bytes: 1000,
            ..limits(Duration::from_secs(10))
        },
    );

    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert_eq!(result.stdout_integrity, OutputIntegrity::TruncatedByLimit);
    assert!(result.stdout.len() <= 1000);
    assert!(result.resource_exceeded.output);
    // Truncation alone does not fail the run
    assert_eq!(result.status, ExecutionStatus::Ok);
}

#[test]
fn test_cancellation_stops_a_running_tool() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(shell("sleep 30"), limits(Duration::from_secs(20)));
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });
    let started = Instant::now();
    let result = sandbox.execute(&request, &cancel).unwrap();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(result.cancelled);
}

#[test]
fn test_environment_is_scrubbed() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    std::env::set_var("COMPILEBOX_SECRET_TEST", "leak");
    let request = SandboxRequest::new(
        shell("echo \"secret=${COMPILEBOX_SECRET_TEST:-none} home=$HOME\""),
        limits(Duration::from_secs(5)),
    );

    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert!(result.stdout.contains("secret=none"));
    assert!(!result.stdout.contains("leak"));
    assert!(result.stdout.contains(&root.path().to_string_lossy().into_owned()));
}

#[test]
fn test_stdin_is_forwarded() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(shell("cat"), limits(Duration::from_secs(5)))
        .with_stdin("from the caller");

    let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
    assert_eq!(result.stdout, "from the caller");
}

#[test]
fn test_scratch_directories_do_not_outlive_the_call() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    for script in ["touch a b c", "exit 1", "sleep 5"] {
        let request = SandboxRequest::new(shell(script), limits(Duration::from_millis(200)));
        let _ = sandbox.execute(&request, &CancelToken::new()).unwrap();
    }
    let leftovers = std::fs::read_dir(root.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_unknown_tool_is_an_error_not_a_result() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let request = SandboxRequest::new(
        SandboxProgram::external(["compilebox-no-such-tool"]),
        limits(Duration::from_secs(1)),
    );
    let err = sandbox.execute(&request, &CancelToken::new()).unwrap_err();
    assert_eq!(err.http_status(), 503);
}
