/// In-process ("embedded") tools run under the sandbox contract
///
/// An embedded program sees the same scratch directory, bounded output and
/// limits as an external tool. CPU is measured with the thread CPU clock,
/// memory is charged explicitly by the program.
use crate::core::types::ResourceExceeded;
use crate::sandbox::output::BoundedBuffer;
use crate::sandbox::types::{ExecutionStatus, SandboxRequest, SandboxResult};
use crate::sandbox::workspace::ScratchDir;
use crate::sandbox::CancelToken;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Ticks between budget checks
const CHECK_INTERVAL: u64 = 1024;

/// Why an embedded program was stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Abort {
    Cpu,
    Memory,
    WallTime,
    Cancelled,
}

pub trait EmbeddedProgram: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion and return the exit code
    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> std::result::Result<i32, Abort>;
}

pub struct EmbeddedContext<'a> {
    dir: &'a Path,
    args: &'a [String],
    stdin: &'a [u8],
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
    started: Instant,
    cpu_start: Duration,
    wall_limit: Duration,
    cpu_limit: Duration,
    memory_limit: u64,
    memory_charged: u64,
    file_limit: u64,
    cancel: &'a CancelToken,
    ticks: u64,
}

impl<'a> EmbeddedContext<'a> {
    pub fn args(&self) -> &[String] {
        self.args
    }

    /// Value following `--name` in the argument list
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == name)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.args.iter().any(|a| a == name)
    }

    /// Positional arguments (those not starting with `-` and not a flag value)
    pub fn positional(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip = false;
        for arg in self.args {
            if skip {
                skip = false;
                continue;
            }
            if arg.starts_with("--") {
                skip = true;
            } else if !arg.starts_with('-') {
                out.push(arg.as_str());
            }
        }
        out
    }

    pub fn stdin(&self) -> &[u8] {
        self.stdin
    }

    pub fn read_input(&self, relative: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.dir.join(relative))
    }

    pub fn read_input_text(&self, relative: &str) -> io::Result<String> {
        self.read_input(relative)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file into the scratch dir; subject to the file size limit
    pub fn write_file(&mut self, relative: &str, data: &[u8]) -> io::Result<PathBuf> {
        if data.len() as u64 > self.file_limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("file {} exceeds size limit", relative),
            ));
        }
        let path = self.dir.join(relative);
        std::fs::write(&path, data)?;
        Ok(path)
    }

    pub fn stdout(&mut self) -> &mut BoundedBuffer {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut BoundedBuffer {
        &mut self.stderr
    }

    /// Account one unit of work; checks budgets every few ticks
    pub fn tick(&mut self) -> std::result::Result<(), Abort> {
        self.ticks += 1;
        if self.ticks % CHECK_INTERVAL == 0 {
            self.check_budgets()?;
        }
        Ok(())
    }

    pub fn check_budgets(&self) -> std::result::Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        if self.started.elapsed() >= self.wall_limit {
            return Err(Abort::WallTime);
        }
        if thread_cpu_time().saturating_sub(self.cpu_start) >= self.cpu_limit {
            return Err(Abort::Cpu);
        }
        Ok(())
    }

    pub fn charge_memory(&mut self, bytes: u64) -> std::result::Result<(), Abort> {
        self.memory_charged = self.memory_charged.saturating_add(bytes);
        if self.memory_charged > self.memory_limit {
            return Err(Abort::Memory);
        }
        Ok(())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

fn thread_cpu_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32)
}

/// Run an embedded program on the calling thread inside `scratch`
pub fn run_embedded(
    program: &dyn EmbeddedProgram,
    args: &[String],
    request: &SandboxRequest,
    scratch: &ScratchDir,
    cancel: &CancelToken,
) -> SandboxResult {
    let limits = &request.limits;
    let stdin = request.stdin.clone().unwrap_or_default();
    let mut ctx = EmbeddedContext {
        dir: scratch.path(),
        args,
        stdin: &stdin,
        stdout: BoundedBuffer::new(limits.max_output_bytes),
        stderr: BoundedBuffer::new(limits.max_output_bytes),
        started: Instant::now(),
        cpu_start: thread_cpu_time(),
        wall_limit: limits.wall_time,
        cpu_limit: limits.cpu_time,
        memory_limit: limits.memory_bytes,
        memory_charged: 0,
        file_limit: limits.max_file_bytes,
        cancel,
        ticks: 0,
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| program.run(&mut ctx)));

    let mut exceeded = ResourceExceeded::default();
    let mut cancelled = false;
    let mut signal = None;
    let exit_code = match outcome {
        Ok(Ok(code)) => Some(code),
        Ok(Err(abort)) => {
            match abort {
                Abort::Cpu => exceeded.cpu = true,
                Abort::Memory => exceeded.memory = true,
                Abort::WallTime => exceeded.time = true,
                Abort::Cancelled => cancelled = true,
            }
            signal = Some(libc::SIGKILL);
            None
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let _ = writeln!(ctx.stderr, "{}: internal error: {}", program.name(), message);
            signal = Some(libc::SIGABRT);
            None
        }
    };

    let wall_time_ms = ctx.started.elapsed().as_millis() as u64;
    let cpu_time_ms = thread_cpu_time().saturating_sub(ctx.cpu_start).as_millis() as u64;
    let memory_peak_bytes = ctx.memory_charged;
    let stdout = ctx.stdout.into_stream();
    let stderr = ctx.stderr.into_stream();
    exceeded.output = stdout.integrity.is_truncated() || stderr.integrity.is_truncated();

    let status = SandboxResult::classify(exit_code, signal, &exceeded, cancelled);
    if status != ExecutionStatus::Ok {
        log::debug!("embedded {} finished with {:?}", program.name(), status);
    }

    SandboxResult {
        status,
        exit_code,
        signal,
        stdout: stdout.text(),
        stderr: stderr.text(),
        stdout_integrity: stdout.integrity,
        stderr_integrity: stderr.integrity,
        wall_time_ms,
        cpu_time_ms,
        memory_peak_bytes,
        resource_exceeded: exceeded,
        cancelled,
        artifacts: Vec::new(),
    }
}
