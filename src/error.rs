//! Typed errors for startup-time failures.
//!
//! Per-request failures never surface as Rust errors; they become protocol
//! flags (`shellCreateFailed`, `noShellExists`, ...) built in
//! [`crate::protocol`]. The enums here cover the two places construction
//! can genuinely fail: loading configuration and spawning a child.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a usable shell-type registry at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("shell type {key_name:?} declared more than once")]
    DuplicateKeyName { key_name: String },

    #[error("shell type {key_name:?} has an unparseable command {command:?}: {source}")]
    BadCommand {
        key_name: String,
        command: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("shell type {key_name:?} has an empty command")]
    EmptyCommand { key_name: String },
}

/// Failure to spawn a child process on a fresh PTY.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("refusing to spawn an empty command vector")]
    EmptyCommand,

    // anyhow::Error is what portable-pty surfaces; it cannot be a
    // thiserror #[source], so it is carried for Display only.
    #[error("failed to open a pty pair: {0}")]
    OpenPty(anyhow::Error),

    #[error("failed to spawn {command:?}: {reason}")]
    Spawn {
        command: String,
        reason: anyhow::Error,
    },

    #[error("pty master has no usable file descriptor")]
    NoMasterFd,

    #[error("failed to prepare the pty master fd: {0}")]
    MasterFd(#[source] std::io::Error),
}
