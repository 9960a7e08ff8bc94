//! One running copy of a check per argument set
//!
//! Every script takes the same guard before doing any work: a marker file
//! named after the check and the hash of its normalized argument string,
//! holding the PID of the owning process. A second invocation with identical
//! arguments finds a live owner and backs off (the scripts report UNKNOWN
//! and touch nothing). A marker whose owner is dead is reclaimed, so a check
//! killed mid-run doesn't wedge its argument set forever.
//!
//! This is what serializes runs against a shared baseline store; see the
//! [`security`](../security/index.html) module.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use derive_more::From;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use sha2::{Digest, Sha256};

#[derive(Debug, From)]
pub enum GuardError {
    /// Errors originating in IO on the marker file
    Io(io::Error),
    /// Another invocation with the same arguments holds the marker
    #[from(ignore)]
    AlreadyRunning { pid: i32 },
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GuardError::Io(e) => write!(f, "cannot take run marker: {}", e),
            GuardError::AlreadyRunning { pid } => {
                write!(f, "an identical check is already running as pid {}", pid)
            }
        }
    }
}

/// Holds the marker file for the duration of a run, removed on drop
#[derive(Debug)]
pub struct RunGuard {
    marker: PathBuf,
}

impl RunGuard {
    /// Where the marker for this check and argument set lives
    pub fn marker_path(guard_dir: &Path, check_name: &str, args_key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(args_key.as_bytes()));
        guard_dir.join(format!("{}-{}.pid", check_name, &digest[..16]))
    }

    /// Take the marker under the OS temp dir
    pub fn acquire(check_name: &str, argv: &[String]) -> Result<RunGuard, GuardError> {
        Self::acquire_in(&env::temp_dir(), check_name, argv)
    }

    /// Take the marker under an explicit directory (tests)
    pub fn acquire_in(
        guard_dir: &Path,
        check_name: &str,
        argv: &[String],
    ) -> Result<RunGuard, GuardError> {
        let key = argv.join(" ");
        let marker = Self::marker_path(guard_dir, check_name, &key);

        match fs::read_to_string(&marker) {
            Ok(raw) => {
                match raw.trim().parse::<i32>() {
                    Ok(pid) if pid_is_alive(pid) => {
                        return Err(GuardError::AlreadyRunning { pid });
                    }
                    Ok(pid) => {
                        debug!("reclaiming marker of dead pid {}", pid);
                    }
                    Err(_) => {
                        warn!("marker {} held garbage, reclaiming", marker.display());
                    }
                }
                fs::remove_file(&marker)?;
            }
            Err(ref e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => file,
            Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost the race to another invocation between read and create.
                let pid = fs::read_to_string(&marker)
                    .ok()
                    .and_then(|raw| raw.trim().parse().ok())
                    .unwrap_or(0);
                return Err(GuardError::AlreadyRunning { pid });
            }
            Err(e) => return Err(e.into()),
        };
        write!(file, "{}", process::id())?;
        Ok(RunGuard { marker })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.marker) {
            warn!("could not remove run marker {}: {}", self.marker.display(), e);
        }
    }
}

/// Is there a process with this pid (signal 0 probe)?
///
/// EPERM means the pid exists but belongs to someone else, which still
/// counts as alive.
fn pid_is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
