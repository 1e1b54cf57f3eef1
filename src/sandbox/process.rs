/// Process-level controls for sandboxed children
///
/// Everything that runs between fork and exec lives here and is limited to
/// raw syscalls on data prepared before the fork.
use nix::sched::{unshare, CloneFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::io;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL
pub const KILL_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetIsolation {
    /// Plain CLONE_NEWNET (needs CAP_SYS_ADMIN)
    NetNamespace,
    /// CLONE_NEWUSER|CLONE_NEWNET for unprivileged hosts
    UserAndNetNamespace,
}

impl NetIsolation {
    fn flags(self) -> CloneFlags {
        match self {
            NetIsolation::NetNamespace => CloneFlags::CLONE_NEWNET,
            NetIsolation::UserAndNetNamespace => {
                CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetIsolation::NetNamespace => "net_namespace",
            NetIsolation::UserAndNetNamespace => "user_net_namespace",
        }
    }
}

/// Identity maps written after entering a new user namespace
#[derive(Clone, Debug)]
struct IdentityMaps {
    uid_map_path: CString,
    gid_map_path: CString,
    setgroups_path: CString,
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
}

impl IdentityMaps {
    fn current() -> Self {
        let uid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getegid().as_raw();
        Self {
            uid_map_path: CString::from(c"/proc/self/uid_map"),
            gid_map_path: CString::from(c"/proc/self/gid_map"),
            setgroups_path: CString::from(c"/proc/self/setgroups"),
            uid_map: format!("{} {} 1\n", uid, uid).into_bytes(),
            gid_map: format!("{} {} 1\n", gid, gid).into_bytes(),
        }
    }
}

/// Controls applied in the child before exec
#[derive(Clone, Debug)]
pub struct ChildPlan {
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
    pub open_files: u64,
    pub address_space_bytes: Option<u64>,
    pub network: Option<NetIsolation>,
    maps: IdentityMaps,
}

impl ChildPlan {
    pub fn new(
        cpu_seconds: u64,
        file_size_bytes: u64,
        open_files: u64,
        address_space_bytes: Option<u64>,
        network: Option<NetIsolation>,
    ) -> Self {
        Self {
            cpu_seconds,
            file_size_bytes,
            open_files,
            address_space_bytes,
            network,
            maps: IdentityMaps::current(),
        }
    }

    /// Runs in the forked child. Only async-signal-safe work is allowed.
    pub fn apply(&self) -> io::Result<()> {
        nix::unistd::setsid().map_err(io::Error::from)?;

        // Soft limit raises SIGXCPU, hard limit one second later kills.
        setrlimit(Resource::RLIMIT_CPU, self.cpu_seconds, self.cpu_seconds + 1)
            .map_err(io::Error::from)?;
        setrlimit(Resource::RLIMIT_FSIZE, self.file_size_bytes, self.file_size_bytes)
            .map_err(io::Error::from)?;
        setrlimit(Resource::RLIMIT_NOFILE, self.open_files, self.open_files)
            .map_err(io::Error::from)?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(io::Error::from)?;
        if let Some(bytes) = self.address_space_bytes {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(io::Error::from)?;
        }

        if let Some(mode) = self.network {
            enter_network_namespace(mode, &self.maps)?;
        }
        Ok(())
    }
}

fn enter_network_namespace(mode: NetIsolation, maps: &IdentityMaps) -> io::Result<()> {
    unshare(mode.flags()).map_err(io::Error::from)?;
    if mode == NetIsolation::UserAndNetNamespace {
        write_proc_file(&maps.setgroups_path, b"deny")?;
        write_proc_file(&maps.uid_map_path, &maps.uid_map)?;
        write_proc_file(&maps.gid_map_path, &maps.gid_map)?;
    }
    Ok(())
}

fn write_proc_file(path: &CStr, data: &[u8]) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
    let err = io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    if rc < 0 {
        return Err(err);
    }
    Ok(())
}

/// Find the strongest network isolation this host allows.
///
/// Each candidate is tried in a short-lived forked child so the calling
/// process never changes namespace.
pub fn probe_network_isolation() -> Option<NetIsolation> {
    let maps = IdentityMaps::current();
    [NetIsolation::NetNamespace, NetIsolation::UserAndNetNamespace]
        .into_iter()
        .find(|mode| probe_mode(*mode, &maps))
}

fn probe_mode(mode: NetIsolation, maps: &IdentityMaps) -> bool {
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let code = if enter_network_namespace(mode, maps).is_ok() {
                0
            } else {
                1
            };
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0)))
        }
        Err(e) => {
            log::debug!("fork for namespace probe failed: {}", e);
            false
        }
    }
}

/// Exit information gathered when a child is reaped
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub cpu_time_ms: u64,
    pub max_rss_bytes: u64,
}

/// Non-blocking reap with resource usage
pub fn try_reap(pid: i32) -> io::Result<Option<ExitInfo>> {
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::wait4(pid, &mut status, libc::WNOHANG, &mut usage) };
        if rc == 0 {
            return Ok(None);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        break;
    }

    let (exit_code, signal) = if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    };

    let cpu_time_ms = timeval_ms(&usage.ru_utime) + timeval_ms(&usage.ru_stime);
    Ok(Some(ExitInfo {
        exit_code,
        signal,
        cpu_time_ms,
        // ru_maxrss is reported in KiB on Linux
        max_rss_bytes: (usage.ru_maxrss.max(0) as u64) * 1024,
    }))
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec.max(0) as u64) * 1000 + (tv.tv_usec.max(0) as u64) / 1000
}

/// Block until the child is reaped, polling so a wedged kernel wait cannot hang us
pub fn reap_blocking(pid: i32, timeout: Duration) -> io::Result<Option<ExitInfo>> {
    let started = Instant::now();
    loop {
        if let Some(info) = try_reap(pid)? {
            return Ok(Some(info));
        }
        if started.elapsed() >= timeout {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
}

/// SIGTERM the whole process group, wait `grace`, then SIGKILL it
pub fn terminate_group(pgid: i32, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();
    let group = Pid::from_raw(pgid);

    report.term_sent = killpg(group, Signal::SIGTERM).is_ok();
    if !grace.is_zero() {
        std::thread::sleep(grace);
    }
    report.kill_sent = killpg(group, Signal::SIGKILL).is_ok();

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// Resident memory of every process in group `pgid`, from /proc
pub fn group_rss_bytes(pgid: i32) -> Option<u64> {
    let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as u64,
        _ => 4096,
    };

    let entries = std::fs::read_dir("/proc").ok()?;
    let mut total_pages = 0u64;
    let mut seen = false;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let stat = match std::fs::read_to_string(entry.path().join("stat")) {
            Ok(stat) => stat,
            Err(_) => continue,
        };
        if let Some((group, rss_pages)) = parse_stat_group_rss(&stat) {
            if group == pgid {
                total_pages += rss_pages;
                seen = true;
            }
        }
    }
    seen.then_some(total_pages * page_size)
}

/// Extract (pgrp, rss pages) from a /proc/<pid>/stat line
fn parse_stat_group_rss(stat: &str) -> Option<(i32, u64)> {
    // comm may contain spaces and parens; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state): pgrp is field 5, rss is field 24
    let pgrp = fields.get(2)?.parse().ok()?;
    let rss = fields.get(21)?.parse::<i64>().ok()?;
    Some((pgrp, rss.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_line() {
        let stat = "1234 (my (odd) prog) S 1 1234 1234 0 -1 4194560 100 0 0 0 1 2 0 0 20 0 1 0 100 10000000 321 18446744073709551615";
        assert_eq!(parse_stat_group_rss(stat), Some((1234, 321)));
        assert_eq!(parse_stat_group_rss("garbage"), None);
    }

    #[test]
    fn test_own_group_has_rss() {
        let pgid = nix::unistd::getpgrp().as_raw();
        let rss = group_rss_bytes(pgid);
        assert!(rss.unwrap_or(0) > 0);
    }

    #[test]
    fn test_probe_does_not_panic() {
        let result = probe_network_isolation();
        println!("network isolation available: {:?}", result);
    }

    #[test]
    fn test_reap_exit_code() {
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let info = reap_blocking(child.id() as i32, Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert_eq!(info.exit_code, Some(3));
        assert_eq!(info.signal, None);
    }
}
