//! PTY-backed child processes.
//!
//! Spawns one subprocess per shell with stdin/stdout/stderr attached to the
//! slave side of a fresh PTY pair, and hands the caller the master side as
//! a non-blocking fd registered with tokio's reactor. The child sees a
//! clean environment containing only the whitelisted variables, forced to
//! UTF-8.
//!
//! The master fd is read and written with plain `libc` calls inside
//! `AsyncFd` readiness guards; errno discrimination (EINTR / EAGAIN /
//! fatal) is left to the caller, which owns the shell lifecycle decisions.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, warn};

use crate::constants::PRESERVED_ENVIRONMENT_VARIABLES;
use crate::error::SpawnError;

/// One spawned child and the master side of its PTY.
pub struct PtyHandle {
    master: AsyncFd<OwnedFd>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<i32>,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle").field("pid", &self.pid).finish()
    }
}

impl PtyHandle {
    /// Spawn `argv` on a fresh 80x24 PTY.
    ///
    /// The slave end is closed in the parent once the child holds it, and
    /// the master is duplicated into an owned non-blocking fd so the
    /// portable-pty wrapper can be dropped without closing our handle.
    pub fn spawn(argv: &[String]) -> Result<Self, SpawnError> {
        if argv.is_empty() {
            return Err(SpawnError::EmptyCommand);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(SpawnError::OpenPty)?;

        let mut cmd = CommandBuilder::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.env_clear();
        let env = subprocess_env();
        debug!(?env, command = %argv.join(" "), "spawning shell subprocess");
        for (name, value) in env {
            cmd.env(name, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|reason| SpawnError::Spawn {
                command: argv.join(" "),
                reason,
            })?;
        drop(pair.slave);

        // Duplicate the master fd into one we own outright, then drop the
        // portable-pty master so the only open copy is ours.
        let master_fd_raw = pair.master.as_raw_fd().ok_or(SpawnError::NoMasterFd)?;
        let dup_fd = unsafe { libc::dup(master_fd_raw) };
        if dup_fd < 0 {
            return Err(SpawnError::MasterFd(io::Error::last_os_error()));
        }
        // SAFETY: dup_fd is a fresh valid fd returned by dup(2).
        let owned = unsafe { OwnedFd::from_raw_fd(dup_fd) };
        drop(pair.master);

        set_nonblocking(owned.as_raw_fd()).map_err(SpawnError::MasterFd)?;
        let master = AsyncFd::with_interest(owned, Interest::READABLE | Interest::WRITABLE)
            .map_err(SpawnError::MasterFd)?;

        let pid = child.process_id().map(|pid| pid as i32);
        debug!(?pid, "shell subprocess spawned");
        Ok(Self { master, child, pid })
    }

    /// The master fd, for readiness polling.
    pub fn master(&self) -> &AsyncFd<OwnedFd> {
        &self.master
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Non-blocking wait. Errors from the underlying wait are treated as
    /// the child being gone.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(error) => {
                warn!(pid = ?self.pid, %error, "could not query child status, assuming exited");
                true
            }
        }
    }

    /// SIGKILL the child. ESRCH is tolerated; the child may already be
    /// gone, e.g. after the user typed `quit`.
    pub fn kill(&self) {
        let Some(pid) = self.pid else { return };
        debug!(pid, "sending SIGKILL to shell subprocess");
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(errno) => warn!(pid, %errno, "SIGKILL failed"),
        }
    }
}

/// One read(2) from the PTY master.
pub fn read_fd(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// One write(2) to the PTY master.
pub fn write_fd(fd: &OwnedFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::write(
            fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// The environment handed to children: the whitelist only, with the locale
/// forced to UTF-8 so line-oriented tools emit what the browser expects.
fn subprocess_env() -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    for name in PRESERVED_ENVIRONMENT_VARIABLES {
        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                env.push((name.to_string(), value));
            }
        }
    }
    match env.iter_mut().find(|(name, _)| name == "LANG") {
        Some((_, value)) => *value = force_utf8(value),
        None => env.push(("LANG".to_string(), "en_US.UTF-8".to_string())),
    }
    env
}

/// Rewrite a locale string's codeset to UTF-8 (`en_US.ISO8859-1` becomes
/// `en_US.UTF-8`, bare `C` becomes `C.UTF-8`).
fn force_utf8(locale: &str) -> String {
    let base = locale.split('.').next().unwrap_or(locale);
    format!("{base}.UTF-8")
}
