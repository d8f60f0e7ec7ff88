//! Tunable limits and the subprocess environment whitelist.
//!
//! All values are compile-time; none are runtime-configurable.

use std::time::Duration;

/// Maximum number of concurrently open shells per user. Browsers allow a
/// small number of simultaneous connections per origin, and each open shell
/// tab holds one of them.
pub const MAX_SHELLS: usize = 3;

/// Input buffer cap per shell, in bytes. Commands arriving while the buffer
/// is at or above this are refused with `bufferExceeded`.
pub const WRITE_BUFFER_LIMIT: usize = 10_000;

/// Bytes requested from the PTY master per read.
pub const OS_READ_AMOUNT: usize = 40_960;

/// How long a long-poll may sit parked before it is answered with a
/// keep-alive, comfortably under the ~60 s browser/proxy request timeout.
pub const BROWSER_REQUEST_TIMEOUT: Duration = Duration::from_secs(55);

/// Idle shells (no output request seen) are destroyed after this long.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(600);

/// Capacity of the per-shell recent-commands ring returned by restore.
pub const COMMAND_HISTORY_LIMIT: usize = 25;

/// Environment variables passed through to shell subprocesses. Everything
/// else is stripped; locale variables are forced to UTF-8 afterwards.
pub const PRESERVED_ENVIRONMENT_VARIABLES: &[&str] = &[
    "JAVA_HOME",
    "HADOOP_HOME",
    "PATH",
    "HOME",
    "LC_ALL",
    "LANG",
    "LC_COLLATE",
    "LC_CTYPE",
    "LC_MESSAGES",
    "LC_MONETARY",
    "LC_NUMERIC",
    "LC_TIME",
    "TZ",
    "FLUME_CONF_DIR",
];
