use std::{
    fs::File,
    io,
    os::{
        fd::{AsRawFd, OwnedFd},
        unix::process::CommandExt,
    },
    path::Path,
    process::{Child, Command, Stdio},
};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use tracing::{trace, warn};

use super::GroupSignal;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn output_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn output_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe()
}

/// Reads on `fd` return `WouldBlock` instead of waiting for data.
pub(super) fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Starts `program` as the leader of a new process group.
///
/// stdout and stderr share the write end of one pipe; the read end is returned in
/// non-blocking mode so that its reader can give up on it.
pub(super) fn spawn_group_leader(
    program: &str,
    args: &[String],
    working_dir: &Path,
) -> io::Result<(Child, File)> {
    let (reader, writer) = output_pipe()?;
    set_nonblocking(&reader)?;
    let stderr_writer = writer.try_clone()?;

    let child = {
        // the command owns the parent's copies of the write end: it must be dropped right
        // after spawning, or the collector never sees EOF
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .process_group(0);
        cmd.spawn()?
    };

    Ok((child, File::from(reader)))
}

/// Sends `signal` to every member of the group led by `leader`.
///
/// Returns `false` when the group no longer exists.
pub(super) fn signal_group(leader: u32, signal: GroupSignal) -> bool {
    let signal = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    let Ok(raw) = i32::try_from(leader) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {
            trace!(leader, ?signal, "signal sent to process group");
            true
        }
        Err(Errno::ESRCH) => {
            trace!(leader, ?signal, "process group already gone");
            false
        }
        Err(e) => {
            warn!(leader, ?signal, "could not signal process group: {e}");
            true
        }
    }
}
