use std::{fs::File, io, path::Path, process::Child};

use super::GroupSignal;

pub(super) fn spawn_group_leader(
    _program: &str,
    _args: &[String],
    _working_dir: &Path,
) -> io::Result<(Child, File)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups only available on unix",
    ))
}

pub(super) fn signal_group(_leader: u32, _signal: GroupSignal) -> bool {
    false
}
