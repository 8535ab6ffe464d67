//! Process group signalling

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How often the group is checked while it winds down after SIGTERM
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Send `signal` to every process in the group led by `pgid`
///
/// A group that no longer exists is not an error.
pub fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pgid out of range"))?;
    if pgid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "pgid must be positive"));
    }

    // SAFETY: kill has no memory-safety preconditions; the negative pid
    // addresses the group and never this process since pgid > 0.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

/// Whether any process, zombies included, still belongs to group `pgid`
pub fn group_alive(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    if pgid <= 0 {
        return false;
    }

    // SAFETY: signal 0 delivers nothing and only checks for existence.
    let rc = unsafe { libc::kill(-pgid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Stop the group led by `child`: SIGTERM, wait `grace`, then SIGKILL
///
/// The grace period covers the whole group, not just the leader: a member
/// that outlives the leader still gets SIGKILL once `grace` runs out.
/// Returns the leader's exit status once it has been reaped.
pub async fn terminate_group(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let Some(pgid) = child.id() else {
        return child.wait().await;
    };

    debug!("Sending SIGTERM to process group {}", pgid);
    if let Err(e) = signal_group(pgid, libc::SIGTERM) {
        warn!("SIGTERM to process group {} failed: {}", pgid, e);
    }

    let deadline = Instant::now() + grace;
    let mut leader = None;
    loop {
        // An unreaped leader keeps the group alive, so reap it first
        if leader.is_none() {
            match child.try_wait() {
                Ok(status) => leader = status,
                Err(e) => warn!("Wait on process group {} failed: {}", pgid, e),
            }
        }
        if let Some(status) = leader {
            if !group_alive(pgid) {
                return Ok(status);
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(GROUP_POLL_INTERVAL.min(left)).await;
    }

    warn!(
        "Process group {} still running {:?} after SIGTERM, sending SIGKILL",
        pgid, grace
    );
    if let Err(e) = signal_group(pgid, libc::SIGKILL) {
        warn!("SIGKILL to process group {} failed: {}", pgid, e);
    }

    match leader {
        Some(status) => Ok(status),
        None => child.wait().await,
    }
}

/// Exit code of `status`, with death by signal N reported as 128 + N
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
