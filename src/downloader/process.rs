use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, warn};

use crate::errors::{AppError, Result};

/// Grace period between asking a process group to stop and killing it.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Spawns the downloader with piped output, detached into its own process
/// group on unix so cancellation can take helper processes down with it.
pub fn spawn_group(argv: &[String]) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Download("empty command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    Ok(cmd.spawn()?)
}

/// Process group id of a child started by [`spawn_group`]. With
/// `process_group(0)` the child is its own group leader.
pub fn group_id(child: &Child) -> i32 {
    child.id() as i32
}

/// True while any process in the group is still around, including zombies
/// the owning worker has not reaped yet.
#[cfg(unix)]
pub fn group_alive(pgid: i32) -> bool {
    // signal 0 probes without delivering anything
    unsafe { libc::killpg(pgid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn group_alive(_pgid: i32) -> bool {
    false
}

/// Graceful-then-forceful termination of a whole process group. Safe to call
/// on a group that is already gone. Blocks up to [`KILL_GRACE`]; callers on
/// latency-sensitive paths should use [`terminate_group_detached`].
#[cfg(unix)]
pub fn terminate_group(pgid: i32) {
    unsafe { libc::killpg(pgid, libc::SIGTERM) };

    let deadline = std::time::Instant::now() + KILL_GRACE;
    while group_alive(pgid) {
        if std::time::Instant::now() >= deadline {
            warn!("Process group {} ignored SIGTERM, sending SIGKILL", pgid);
            unsafe { libc::killpg(pgid, libc::SIGKILL) };
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    debug!("Process group {} exited after SIGTERM", pgid);
}

/// Without unix process groups, fall back to taskkill against the child's
/// pid, taking its process tree down in one forceful step.
#[cfg(not(unix))]
pub fn terminate_group(pid: i32) {
    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
}

/// Fire-and-forget variant for callers that must not block on the grace
/// period. The worker owning the child still reaps it.
pub fn terminate_group_detached(pgid: i32) {
    std::thread::spawn(move || terminate_group(pgid));
}

/// Feeds every line of `reader` to `sink` until the stream closes. Lines
/// that are not valid UTF-8 are skipped.
pub fn stream_lines<R: Read>(reader: R, mut sink: impl FnMut(&str)) {
    for line in BufReader::new(reader).lines().flatten() {
        sink(&line);
    }
}
