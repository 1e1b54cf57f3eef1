use crate::config::settings::SandboxSettings;
use crate::config::types::{HubError, Result};
use crate::core::types::ResourceExceeded;
use crate::observability::{audit::events, metrics::get_metrics};
use crate::sandbox::output::{StreamCollector, COLLECTION_GRACE};
use crate::sandbox::process::{self, ChildPlan, ExitInfo, NetIsolation, KILL_GRACE};
use crate::sandbox::toolchain::ToolLocator;
use crate::sandbox::types::{IsolationReport, SandboxProgram, SandboxRequest, SandboxResult};
use crate::sandbox::workspace::ScratchDir;
use crate::sandbox::{inprocess, CancelToken, SandboxExecutor};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on waiting for a SIGKILLed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sandbox built from process groups, rlimits, a network namespace and a
/// polling watchdog. Needs no privileges; degrades (or fails closed in
/// strict mode) when namespaces are unavailable.
pub struct ProcessSandbox {
    settings: SandboxSettings,
    locator: ToolLocator,
    network: Option<NetIsolation>,
    report: IsolationReport,
}

impl ProcessSandbox {
    pub fn new(settings: SandboxSettings) -> Result<Self> {
        let locator = ToolLocator::from_settings(&settings);
        let mut report = IsolationReport::default();

        for control in ["scratch_dir", "rlimits", "process_group", "watchdog"] {
            report.configured.push(control.to_string());
            report.applied.push(control.to_string());
        }

        let network = if settings.isolate_network {
            report.configured.push("network_namespace".to_string());
            match process::probe_network_isolation() {
                Some(mode) => {
                    report.applied.push(mode.as_str().to_string());
                    Some(mode)
                }
                None => {
                    if settings.strict_mode {
                        return Err(HubError::Sandbox(
                            "network isolation unavailable on this host and strict_mode is set"
                                .to_string(),
                        ));
                    }
                    log::warn!("Network namespaces unavailable; sandboxed tools keep host networking");
                    events::control_degraded("network_namespace", "unshare(CLONE_NEWNET) denied");
                    report.missing.push("network_namespace".to_string());
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Sandbox ready: applied={:?} missing={:?} scratch_root={}",
            report.applied,
            report.missing,
            settings.scratch_root.display()
        );

        Ok(Self {
            settings,
            locator,
            network,
            report,
        })
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    fn child_env(&self, request: &SandboxRequest, scratch: &ScratchDir) -> Vec<(String, String)> {
        let scratch_path = scratch.path().to_string_lossy().into_owned();
        let mut env = Vec::new();

        for key in &self.settings.env_passthrough {
            if key == "PATH" {
                env.push(("PATH".to_string(), self.locator.child_path()));
            } else if let Ok(value) = std::env::var(key) {
                env.push((key.clone(), value));
            }
        }
        env.push(("HOME".to_string(), scratch_path.clone()));
        env.push(("TMPDIR".to_string(), scratch_path.clone()));
        // Plain ASCII diagnostics regardless of host locale
        env.push(("LC_ALL".to_string(), "C".to_string()));

        for (key, value) in &request.env {
            env.retain(|(k, _)| k != key);
            env.push((key.clone(), value.replace("{scratch}", &scratch_path)));
        }
        env
    }

    fn run_external(
        &self,
        argv: &[String],
        request: &SandboxRequest,
        scratch: &ScratchDir,
        cancel: &CancelToken,
    ) -> Result<SandboxResult> {
        let program = argv
            .first()
            .ok_or_else(|| HubError::Sandbox("empty command".to_string()))?;
        let resolved = self
            .locator
            .locate(program)
            .ok_or_else(|| HubError::ToolchainUnavailable {
                language: "unknown".to_string(),
                tool: program.clone(),
            })?;

        let limits = &request.limits;
        let cpu_seconds = limits.cpu_time.as_millis().div_ceil(1000).max(1) as u64;
        let plan = ChildPlan::new(
            cpu_seconds,
            limits.max_file_bytes,
            limits.max_open_files,
            limits
                .address_space_bytes
                .or(self.settings.address_space_limit),
            self.network,
        );

        let mut cmd = Command::new(&resolved);
        cmd.args(&argv[1..])
            .current_dir(scratch.path())
            .env_clear()
            .envs(self.child_env(request, scratch))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        unsafe {
            cmd.pre_exec(move || plan.apply());
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            HubError::Sandbox(format!("Failed to start {}: {}", resolved.display(), e))
        })?;
        let pid = child.id() as i32;
        log::debug!("spawned {} (pid {}) in {}", program, pid, scratch.path().display());

        if let (Some(data), Some(mut stdin)) = (request.stdin.clone(), child.stdin.take()) {
            let _ = std::thread::Builder::new()
                .name("sandbox-stdin".to_string())
                .spawn(move || {
                    let _ = stdin.write_all(&data);
                });
        }

        let stdout = child
            .stdout
            .take()
            .map(|s| StreamCollector::spawn("stdout", s, limits.max_output_bytes))
            .transpose()?;
        let stderr = child
            .stderr
            .take()
            .map(|s| StreamCollector::spawn("stderr", s, limits.max_output_bytes))
            .transpose()?;

        let watch = self.watch(pid, request, started, cancel)?;

        // Descendants may outlive the group leader; they go with it.
        let _ = nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGKILL,
        );

        let deadline = Instant::now() + COLLECTION_GRACE;
        let stdout = stdout.map(|c| c.finish(deadline)).unwrap_or_default();
        let stderr = stderr.map(|c| c.finish(deadline)).unwrap_or_default();

        let WatchOutcome {
            exit,
            mut exceeded,
            cancelled,
            peak_rss,
        } = watch;

        let cpu_limit_ms = limits.cpu_time.as_millis() as u64;
        if exit.signal == Some(libc::SIGXCPU)
            || (exit.signal == Some(libc::SIGKILL) && exit.cpu_time_ms >= cpu_limit_ms)
        {
            exceeded.cpu = true;
        }
        exceeded.output = stdout.integrity.is_truncated() || stderr.integrity.is_truncated();

        let status = SandboxResult::classify(exit.exit_code, exit.signal, &exceeded, cancelled);
        Ok(SandboxResult {
            status,
            exit_code: exit.exit_code,
            signal: exit.signal,
            stdout: stdout.text(),
            stderr: stderr.text(),
            stdout_integrity: stdout.integrity,
            stderr_integrity: stderr.integrity,
            wall_time_ms: started.elapsed().as_millis() as u64,
            cpu_time_ms: exit.cpu_time_ms,
            memory_peak_bytes: peak_rss.max(exit.max_rss_bytes),
            resource_exceeded: exceeded,
            cancelled,
            artifacts: Vec::new(),
        })
    }

    /// Poll until the child exits, enforcing wall time, memory and cancellation
    fn watch(
        &self,
        pid: i32,
        request: &SandboxRequest,
        started: Instant,
        cancel: &CancelToken,
    ) -> Result<WatchOutcome> {
        let limits = &request.limits;
        let memory_poll = Duration::from_millis(self.settings.memory_poll_ms.max(1));
        let mut last_memory_poll: Option<Instant> = None;
        let mut exceeded = ResourceExceeded::default();
        let mut cancelled = false;
        let mut peak_rss = 0u64;

        loop {
            if let Some(exit) = process::try_reap(pid)? {
                return Ok(WatchOutcome {
                    exit,
                    exceeded,
                    cancelled,
                    peak_rss,
                });
            }

            let mut kill_reason = None;
            if cancel.is_cancelled() {
                cancelled = true;
                kill_reason = Some("cancelled");
            } else if started.elapsed() >= limits.wall_time {
                exceeded.time = true;
                kill_reason = Some("wall time");
            } else if last_memory_poll.map_or(true, |t| t.elapsed() >= memory_poll) {
                last_memory_poll = Some(Instant::now());
                if let Some(rss) = process::group_rss_bytes(pid) {
                    peak_rss = peak_rss.max(rss);
                    if rss > limits.memory_bytes {
                        exceeded.memory = true;
                        kill_reason = Some("memory");
                    }
                }
            }

            if let Some(reason) = kill_reason {
                let report = process::terminate_group(pid, KILL_GRACE);
                log::debug!("terminated pid {} ({}): {:?}", pid, reason, report);
                let exit = process::reap_blocking(pid, REAP_TIMEOUT)?.ok_or_else(|| {
                    HubError::Sandbox(format!("child {} not reaped after SIGKILL", pid))
                })?;
                return Ok(WatchOutcome {
                    exit,
                    exceeded,
                    cancelled,
                    peak_rss,
                });
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

struct WatchOutcome {
    exit: ExitInfo,
    exceeded: ResourceExceeded,
    cancelled: bool,
    peak_rss: u64,
}

impl SandboxExecutor for ProcessSandbox {
    fn execute(&self, request: &SandboxRequest, cancel: &CancelToken) -> Result<SandboxResult> {
        let metrics = get_metrics();
        metrics.sandbox_invocations.inc();

        let outcome = (|| {
            let scratch = ScratchDir::create(&self.settings.scratch_root)?;
            scratch.materialize(&request.input_files)?;

            let mut result = match &request.program {
                SandboxProgram::External { argv } => {
                    self.run_external(argv, request, &scratch, cancel)?
                }
                SandboxProgram::Embedded { program, args } => {
                    inprocess::run_embedded(program.as_ref(), args, request, &scratch, cancel)
                }
            };
            result.artifacts = scratch.collect(&request.collect)?;
            Ok(result)
        })();

        match &outcome {
            Ok(result) => metrics.record_limits(&result.resource_exceeded),
            Err(e) => {
                metrics.sandbox_faults.inc();
                log::warn!("sandbox call for {} failed: {}", request.program.display_name(), e);
            }
        }
        outcome
    }

    fn isolation_report(&self) -> IsolationReport {
        self.report.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::types::SandboxLimits;

    fn sandbox(root: &std::path::Path) -> ProcessSandbox {
        let mut settings = SandboxSettings::default();
        settings.scratch_root = root.to_path_buf();
        ProcessSandbox::new(settings).unwrap()
    }

    #[test]
    fn test_env_is_cleared_and_scratch_expanded() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let request = SandboxRequest::new(
            SandboxProgram::external(["sh", "-c", "echo \"$HOME|$CACHE|${USER:-none}\""]),
            SandboxLimits::default(),
        )
        .with_env("CACHE", "{scratch}/.cache");

        let result = sandbox.execute(&request, &CancelToken::new()).unwrap();
        assert!(result.success(), "stderr: {}", result.stderr);
        let line = result.stdout.trim();
        let parts: Vec<&str> = line.split('|').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].starts_with(root.path().to_str().unwrap()));
        assert_eq!(parts[1], format!("{}/.cache", parts[0]));
        assert_eq!(parts[2], "none");
    }

    #[test]
    fn test_missing_tool_is_toolchain_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let request = SandboxRequest::new(
            SandboxProgram::external(["no-such-compiler-xyz"]),
            SandboxLimits::default(),
        );
        let err = sandbox.execute(&request, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, HubError::ToolchainUnavailable { .. }));
    }

    #[test]
    fn test_isolation_report_lists_controls() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let report = sandbox.isolation_report();
        assert!(report.applied.iter().any(|c| c == "rlimits"));
        assert!(report.configured.iter().any(|c| c == "network_namespace"));
    }
}
