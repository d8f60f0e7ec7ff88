//! Readiness multiplexing for the manager task.
//!
//! The manager arms read interest on a shell while tabs are waiting for
//! output and write interest while its input buffer is non-empty. This
//! module turns those flags into one future that resolves with the next
//! `(shell, direction)` pair whose fd is ready, polling write interest
//! before read interest so command acks are never delayed behind the
//! output a write is about to produce.
//!
//! With nothing armed the future never resolves; the manager's select loop
//! has its channel and tick branches to wake it.

use std::collections::HashMap;
use std::task::Poll;

use crate::shell::{ShellKey, ShellProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Wait for the next armed fd to become ready.
///
/// Readiness errors are reported as ready events; the subsequent I/O
/// attempt observes the error and dooms the shell.
pub async fn next_ready(shells: &HashMap<ShellKey, ShellProcess>) -> (ShellKey, IoDirection) {
    futures::future::poll_fn(|cx| {
        for (key, shell) in shells {
            if shell.write_armed() && shell.master().poll_write_ready(cx).is_ready() {
                return Poll::Ready((key.clone(), IoDirection::Write));
            }
            if shell.read_armed() && shell.master().poll_read_ready(cx).is_ready() {
                return Poll::Ready((key.clone(), IoDirection::Read));
            }
        }
        Poll::Pending
    })
    .await
}
