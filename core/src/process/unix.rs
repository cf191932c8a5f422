//! Unix process launching: fixed identity, new session, optional release
//!
//! This module spawns a child that survives its parent. The child is created
//! with a new session (via `setsid()`), which means it:
//!
//! - Becomes the leader of a new session and a new process group
//! - Has no controlling terminal
//! - No longer receives terminal-originated signals aimed at the parent's session
//!
//! The process record itself belongs to the OS. A [`ProcessLauncher`] only
//! holds a *reference* to the most recently spawned child; [`ProcessLauncher::release`]
//! drops that reference and never touches the process.
//!
//! ## Lifecycle
//!
//! ```text
//!      [NoProcess] --exec ok--> [Tracking] --release--> [NoProcess]
//!      [NoProcess] --exec err-> [NoProcess]
//!      [Tracking]  --exec-----> [Tracking]   (AlreadyTracking)
//! ```

// setsid() and the fd flag sweep have to run between fork and exec, which
// needs CommandExt::pre_exec
#![allow(unsafe_code)]

use crate::config::LaunchConfig;
use crate::{CoreError, Result};
use std::ffi::OsStr;
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, error};

/// The user and group a launched child runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Real uid/gid of the calling process
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

/// Credential applied to the child between fork and exec
///
/// Supplementary groups are always cleared: the child runs with exactly the
/// primary group of its [`Identity`]. There is no hook to keep or add groups.
/// Clearing needs `CAP_SETGID`; an unprivileged caller can only launch as
/// itself, in which case the child keeps the caller's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    uid: u32,
    gid: u32,
}

impl Credential {
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Supplementary groups requested for the child (always none)
    pub fn supplementary_groups(&self) -> &'static [u32] {
        &[]
    }

    /// Apply the credential to a command.
    ///
    /// With a uid set and no explicit group list, std calls `setgroups(0, NULL)`
    /// before `setgid`/`setuid` in the child, which is what clears the groups.
    fn apply(&self, command: &mut Command) {
        command.uid(self.uid).gid(self.gid);
    }
}

impl From<Identity> for Credential {
    fn from(identity: Identity) -> Self {
        Self {
            uid: identity.uid,
            gid: identity.gid,
        }
    }
}

/// Reference to a spawned child that has not been released yet
#[derive(Debug)]
struct TrackedProcess {
    pid: u32,
    child: Child,
}

impl TrackedProcess {
    /// Give up the reference to the child.
    ///
    /// A child that already exited is reaped here so it does not linger as a
    /// zombie; a running one is left alone. Dropping `Child` neither signals
    /// nor waits on the process.
    fn release(mut self) -> Result<()> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    "Process {} had already exited ({}), reaped on release",
                    self.pid, status
                );
                Ok(())
            }
            Ok(None) => {
                debug!("Released process {}, it keeps running", self.pid);
                Ok(())
            }
            Err(e) => {
                error!("Failed to release process {}: {}", self.pid, e);
                Err(CoreError::ProcessRelease {
                    pid: self.pid,
                    source: e,
                })
            }
        }
    }
}

/// Spawns children in their own session under a fixed identity
///
/// The three standard streams are borrowed from the caller, who opened them
/// and is responsible for closing them. The launcher duplicates them only
/// while a spawn is in progress; the caller's descriptors are never closed,
/// not even by [`release`](Self::release).
///
/// At most one child is tracked at a time. Methods take `&mut self`, so a
/// launcher cannot be driven from two threads without external locking.
///
/// ## Example
///
/// ```rust,no_run
/// use castoff_core::process::{Identity, ProcessLauncher};
/// use std::fs::{File, OpenOptions};
/// use std::os::fd::AsFd;
///
/// let stdin = File::open("/dev/null")?;
/// let log = OpenOptions::new().append(true).create(true).open("/tmp/sleeper.log")?;
/// let me = Identity::current();
///
/// let mut launcher = ProcessLauncher::new(
///     stdin.as_fd(),
///     log.as_fd(),
///     log.as_fd(),
///     me.uid,
///     me.gid,
///     "/",
/// );
/// launcher.exec(true, "/bin/sleep", &["/bin/sleep", "60"])?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ProcessLauncher<'fd> {
    stdin: BorrowedFd<'fd>,
    stdout: BorrowedFd<'fd>,
    stderr: BorrowedFd<'fd>,
    identity: Identity,
    working_directory: PathBuf,
    live_process: Option<TrackedProcess>,
}

impl<'fd> ProcessLauncher<'fd> {
    /// Assemble a launcher. Performs no I/O.
    ///
    /// `stdin` must be readable and `stdout`/`stderr` writable; nothing is
    /// checked until spawn. An empty `working_directory` is kept as is and
    /// makes every spawn fail.
    pub fn new(
        stdin: BorrowedFd<'fd>,
        stdout: BorrowedFd<'fd>,
        stderr: BorrowedFd<'fd>,
        uid: u32,
        gid: u32,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            identity: Identity::new(uid, gid),
            working_directory: working_directory.into(),
            live_process: None,
        }
    }

    /// Assemble a launcher from a loaded [`LaunchConfig`]
    pub fn from_config(
        config: &LaunchConfig,
        stdin: BorrowedFd<'fd>,
        stdout: BorrowedFd<'fd>,
        stderr: BorrowedFd<'fd>,
    ) -> Self {
        Self::new(
            stdin,
            stdout,
            stderr,
            config.uid,
            config.gid,
            config.working_directory.clone(),
        )
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Whether a spawned child is currently tracked
    pub fn is_tracking(&self) -> bool {
        self.live_process.is_some()
    }

    /// Pid of the tracked child, if any
    ///
    /// A caller who keeps this pid to `waitpid` on the child later must do so
    /// before [`release`](Self::release): release reaps a child that has
    /// already exited, after which its exit status is gone.
    pub fn pid(&self) -> Option<u32> {
        self.live_process.as_ref().map(|p| p.pid)
    }

    /// Spawn `executable_path` in a new session.
    ///
    /// `argv` is the argument vector the child sees, `argv[0]` included; it is
    /// not required to match `executable_path`. An empty `argv` presents the
    /// path itself as `argv[0]`. The child inherits the caller's environment
    /// unchanged and gets exactly the three stored streams as fds 0, 1 and 2;
    /// every other descriptor is marked close-on-exec in the child.
    ///
    /// A path containing a `/` is used as given. A bare program name (no `/`)
    /// is looked up on `PATH`.
    ///
    /// Returns once the OS has accepted the new program; it does not wait for
    /// the child to run or exit. With `detach` set the child is released right
    /// away, so nothing is tracked when this returns successfully.
    ///
    /// ## Errors
    ///
    /// - `AlreadyTracking` if a previous child has not been released
    /// - `ProcessSpawn` with the OS error when creation fails; nothing is tracked
    /// - `ProcessRelease` if `detach` is set and the release fails; the child
    ///   keeps running and nothing is tracked
    pub fn exec<P, S>(&mut self, detach: bool, executable_path: P, argv: &[S]) -> Result<()>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let program = executable_path.as_ref();

        if let Some(tracked) = &self.live_process {
            debug!(
                "Refusing to spawn {:?}: process {} is still tracked",
                program, tracked.pid
            );
            return Err(CoreError::AlreadyTracking { pid: tracked.pid });
        }

        let credential = Credential::from(self.identity);
        debug!(
            "Spawning process: {:?} argc={} uid={} gid={} cwd={:?}",
            program,
            argv.len(),
            credential.uid(),
            credential.gid(),
            self.working_directory
        );

        let child = self
            .build_command(program, argv, &credential)
            .and_then(|mut command| command.spawn())
            .map_err(|e| {
                error!("Failed to spawn process {:?}: {}", program, e);
                CoreError::ProcessSpawn {
                    program: program.to_string_lossy().into_owned(),
                    source: e,
                }
            })?;

        let pid = child.id();
        debug!("Successfully spawned process {} in a new session", pid);
        self.live_process = Some(TrackedProcess { pid, child });

        if detach {
            self.release()?;
        }
        Ok(())
    }

    /// Stop tracking the current child, if any.
    ///
    /// The child keeps running and its exit status can no longer be collected
    /// through this launcher. Calling this with nothing tracked is a no-op.
    /// A child that has already exited is reaped here, so its exit status is
    /// no longer available to `waitpid` on the pid from [`pid`](Self::pid).
    /// The launcher is left with nothing tracked even when an error is returned.
    pub fn release(&mut self) -> Result<()> {
        match self.live_process.take() {
            Some(tracked) => tracked.release(),
            None => Ok(()),
        }
    }

    fn build_command<S: AsRef<OsStr>>(
        &self,
        program: &OsStr,
        argv: &[S],
        credential: &Credential,
    ) -> io::Result<Command> {
        let mut command = Command::new(program);
        if let Some((arg0, args)) = argv.split_first() {
            command.arg0(arg0).args(args);
        }

        credential.apply(&mut command);
        command
            .current_dir(&self.working_directory)
            .stdin(inherit(self.stdin)?)
            .stdout(inherit(self.stdout)?)
            .stderr(inherit(self.stderr)?);

        let open_max = open_max();

        // Safety: setsid(), fcntl() and close_range() are async-signal-safe and
        // touch no state shared with the parent, so they are sound to call
        // between fork and exec.
        #[deny(unsafe_op_in_unsafe_fn)]
        unsafe {
            command.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                cloexec_from(3, open_max)
            });
        }

        Ok(command)
    }
}

/// Highest descriptor number the fcntl fallback scans up to
fn open_max() -> libc::c_int {
    // Safety: sysconf has no preconditions.
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if max <= 0 {
        1024
    } else {
        max.min(libc::c_int::MAX as libc::c_long) as libc::c_int
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Mark every descriptor from `first` upward close-on-exec.
///
/// Runs in the forked child. Descriptors are not closed outright: std still
/// needs its own exec-status pipe until the exec happens.
fn cloexec_from(first: libc::c_int, open_max: libc::c_int) -> io::Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // Safety: close_range only changes descriptor flags in this process.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_close_range,
                first as libc::c_uint,
                libc::c_uint::MAX,
                CLOSE_RANGE_CLOEXEC,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // Kernels before 5.11 lack the CLOEXEC flag (EINVAL) or the syscall
        if !matches!(err.raw_os_error(), Some(libc::ENOSYS) | Some(libc::EINVAL)) {
            return Err(err);
        }
    }

    for fd in first..open_max {
        // Safety: F_GETFD/F_SETFD on any descriptor number is harmless;
        // closed ones just fail with EBADF.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags == -1 || flags & libc::FD_CLOEXEC != 0 {
            continue;
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Duplicate a borrowed descriptor for the child. The duplicate is closed
/// once the command is dropped; the caller's descriptor stays open.
fn inherit(fd: BorrowedFd<'_>) -> io::Result<Stdio> {
    Ok(Stdio::from(fd.try_clone_to_owned()?))
}
