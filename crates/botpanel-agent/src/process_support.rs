use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StopSignal {
    Graceful,
    Forced,
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    static PAGE: OnceLock<u64> = OnceLock::new();
    *PAGE.get_or_init(|| unsafe {
        let v = libc::sysconf(libc::_SC_PAGESIZE);
        if v <= 0 { 4096 } else { v as u64 }
    })
}

#[cfg(target_os = "linux")]
async fn read_statm_rss(path: &str) -> Option<u64> {
    let s = tokio::fs::read_to_string(path).await.ok()?;
    let mut it = s.split_whitespace();
    let _size_pages = it.next()?;
    let resident_pages: u64 = it.next()?.parse().ok()?;
    Some(resident_pages.saturating_mul(page_size()))
}

#[cfg(target_os = "linux")]
pub(crate) async fn read_proc_rss_bytes(pid: u32) -> Option<u64> {
    read_statm_rss(&format!("/proc/{pid}/statm")).await
}

#[cfg(not(target_os = "linux"))]
pub(crate) async fn read_proc_rss_bytes(_pid: u32) -> Option<u64> {
    None
}

/// Resident set size of the panel itself.
#[cfg(target_os = "linux")]
pub async fn self_rss_bytes() -> u64 {
    read_statm_rss("/proc/self/statm").await.unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub async fn self_rss_bytes() -> u64 {
    // Keep the unused-import lint quiet on platforms without /proc.
    let _ = OnceLock::<u64>::new();
    0
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the panel dies, take the child down with it.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Puts the child in its own session so signals can target the whole group.
pub(crate) fn configure_process_group(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            set_parent_death_signal()?;
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Sends the stop signal to the child's process group.
///
/// Returns false when there is no group to signal (non-unix, or the child
/// never reported a pid); callers fall back to killing the child directly.
pub(crate) fn signal_group(pgid: Option<i32>, signal: StopSignal) -> bool {
    #[cfg(unix)]
    {
        let Some(pgid) = pgid.filter(|p| *p > 0) else {
            return false;
        };
        let sig = match signal {
            StopSignal::Graceful => libc::SIGTERM,
            StopSignal::Forced => libc::SIGKILL,
        };
        let rc = unsafe { libc::kill(-pgid, sig) };
        rc == 0
    }
    #[cfg(not(unix))]
    {
        let _ = (pgid, signal);
        false
    }
}

pub(crate) fn signal_name(sig: i32) -> String {
    #[cfg(unix)]
    {
        let name = match sig {
            libc::SIGHUP => "SIGHUP",
            libc::SIGINT => "SIGINT",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGABRT => "SIGABRT",
            libc::SIGKILL => "SIGKILL",
            libc::SIGSEGV => "SIGSEGV",
            libc::SIGPIPE => "SIGPIPE",
            libc::SIGTERM => "SIGTERM",
            _ => return format!("signal {sig}"),
        };
        name.to_string()
    }
    #[cfg(not(unix))]
    {
        format!("signal {sig}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Signal(String),
    Code(i32),
    Unknown,
}

pub(crate) fn exit_reason(status: std::process::ExitStatus) -> ExitReason {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitReason::Signal(signal_name(sig));
        }
    }
    match status.code() {
        Some(code) => ExitReason::Code(code),
        None => ExitReason::Unknown,
    }
}
