//! One live shell subprocess and everything it owns: the PTY master, the
//! cumulative output log, the bounded input buffer, the recent-command
//! ring, the acks waiting for their command to reach the PTY, and the set
//! of tabs waiting for output.
//!
//! The manager drives a shell exclusively through readiness callbacks and
//! the operations below; a shell never reaches back into manager state.
//! Read- and write-ready handling return outcome values the manager turns
//! into deliveries, keeping the subscription table out of this module.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error};

use crate::constants::{
    COMMAND_HISTORY_LIMIT, OS_READ_AMOUNT, SHELL_TIMEOUT, WRITE_BUFFER_LIMIT,
};
use crate::error::SpawnError;
use crate::protocol::{self, ALIVE, BUFFER_EXCEEDED};
use crate::pty::{self, PtyHandle};
use crate::responder::Responder;

/// Identity of one shell: owning user plus the per-user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShellKey {
    pub username: String,
    pub shell_id: String,
}

/// Result of a read-ready callback.
pub enum ReadOutcome {
    /// EINTR or spurious readiness; nothing changed, registration stays.
    NotReady,
    /// Fatal I/O error; the shell doomed itself.
    Fatal,
    /// Bytes were appended to the output log.
    Data {
        /// Offset of the new chunk within the log.
        chunk_start: usize,
        /// The read filled the whole request; the client should poll again
        /// immediately instead of waiting.
        more_available: bool,
        /// The child has exited; this chunk is the final one.
        exited: bool,
    },
}

/// Result of a write-ready callback.
pub enum WriteOutcome {
    /// EINTR or spurious readiness; registration stays.
    NotReady,
    /// Fatal I/O error; the shell doomed itself.
    Fatal,
    /// Some bytes went through but the buffer is not yet empty.
    Partial,
    /// The buffer drained completely; these acks are ready to succeed.
    Flushed(Vec<Box<dyn Responder>>),
}

pub struct ShellProcess {
    key: ShellKey,
    pty: PtyHandle,
    output_log: Vec<u8>,
    input_buffer: Vec<u8>,
    recent_commands: VecDeque<String>,
    pending_acks: Vec<Box<dyn Responder>>,
    subscriber_ids: HashSet<String>,
    last_activity: Instant,
    last_output_sent: bool,
    doomed: bool,
    exited: bool,
    read_armed: bool,
    write_armed: bool,
}

impl ShellProcess {
    pub fn spawn(key: ShellKey, argv: &[String]) -> Result<Self, SpawnError> {
        let pty = PtyHandle::spawn(argv)?;
        Ok(Self {
            key,
            pty,
            output_log: Vec::new(),
            input_buffer: Vec::new(),
            recent_commands: VecDeque::with_capacity(COMMAND_HISTORY_LIMIT),
            pending_acks: Vec::new(),
            subscriber_ids: HashSet::new(),
            last_activity: Instant::now(),
            last_output_sent: false,
            doomed: false,
            exited: false,
            read_armed: false,
            write_armed: false,
        })
    }

    pub fn key(&self) -> &ShellKey {
        &self.key
    }

    pub fn shell_id(&self) -> &str {
        &self.key.shell_id
    }

    pub fn output_len(&self) -> usize {
        self.output_log.len()
    }

    /// The whole output log, for restore.
    pub fn output_log(&self) -> &[u8] {
        &self.output_log
    }

    /// The log from `start` onward.
    pub fn chunk_since(&self, start: usize) -> &[u8] {
        &self.output_log[start.min(self.output_log.len())..]
    }

    pub fn recent_commands(&self) -> Vec<String> {
        self.recent_commands.iter().cloned().collect()
    }

    pub(crate) fn master(&self) -> &tokio::io::unix::AsyncFd<std::os::unix::io::OwnedFd> {
        self.pty.master()
    }

    pub(crate) fn read_armed(&self) -> bool {
        self.read_armed
    }

    pub(crate) fn write_armed(&self) -> bool {
        self.write_armed
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscriber_ids.is_empty()
    }

    pub(crate) fn has_pending_input(&self) -> bool {
        !self.input_buffer.is_empty()
    }

    pub(crate) fn is_doomed(&self) -> bool {
        self.doomed
    }

    /// Queue `command` for the child. A full input buffer refuses the
    /// command outright; otherwise the ack is held until the write path
    /// flushes the buffer into the PTY.
    pub fn submit_command(&mut self, command: &str, responder: Box<dyn Responder>) {
        if self.input_buffer.len() >= WRITE_BUFFER_LIMIT {
            debug!(shell = %self.key.shell_id, "input buffer full, dropping command");
            responder.finish(protocol::flag(BUFFER_EXCEEDED));
            return;
        }
        self.input_buffer.extend_from_slice(command.as_bytes());
        self.input_buffer.push(b'\n');
        if self.recent_commands.len() == COMMAND_HISTORY_LIMIT {
            self.recent_commands.pop_front();
        }
        self.recent_commands.push_back(command.to_string());
        self.pending_acks.push(responder);
        self.write_armed = true;
    }

    /// Register interest in output past `offset`.
    ///
    /// Output the tab has not seen yet is returned as an immediate
    /// snapshot; otherwise the tab id is recorded and read-readiness
    /// armed, and the caller parks the response. An offset beyond the log
    /// is treated as the current end (client clock skew). Every call
    /// refreshes the idle clock.
    pub fn subscribe_for_output(&mut self, tab_id: &str, offset: usize) -> Option<Value> {
        self.last_activity = Instant::now();
        if offset < self.output_log.len() {
            return Some(protocol::output_chunk(
                ALIVE,
                &self.output_log[offset..],
                true,
                self.output_log.len(),
            ));
        }
        self.subscriber_ids.insert(tab_id.to_string());
        self.read_armed = true;
        None
    }

    /// One non-blocking read from the PTY master.
    pub async fn on_read_ready(&mut self) -> ReadOutcome {
        let mut buf = vec![0u8; OS_READ_AMOUNT];
        let result = {
            let mut guard = match self.pty.master().readable().await {
                Ok(guard) => guard,
                Err(error) => {
                    error!(pid = ?self.pty.pid(), %error, "pty readiness failed");
                    self.fatal_io();
                    return ReadOutcome::Fatal;
                }
            };
            guard.try_io(|fd| pty::read_fd(fd.get_ref(), &mut buf))
        };
        let n = match result {
            Err(_would_block) => return ReadOutcome::NotReady,
            Ok(Err(ref error)) if error.kind() == io::ErrorKind::Interrupted => {
                return ReadOutcome::NotReady
            }
            Ok(Err(error)) => {
                error!(pid = ?self.pty.pid(), %error, "error reading from shell subprocess");
                self.fatal_io();
                return ReadOutcome::Fatal;
            }
            Ok(Ok(n)) => n,
        };

        let chunk_start = self.output_log.len();
        self.output_log.extend_from_slice(&buf[..n]);
        let more_available = n == OS_READ_AMOUNT;
        if !self.exited {
            self.exited = self.pty.has_exited();
        }
        if self.exited {
            self.last_output_sent = true;
        }
        ReadOutcome::Data {
            chunk_start,
            more_available,
            exited: self.exited,
        }
    }

    /// One non-blocking write of the input buffer to the PTY master.
    pub async fn on_write_ready(&mut self) -> WriteOutcome {
        let result = {
            let mut guard = match self.pty.master().writable().await {
                Ok(guard) => guard,
                Err(error) => {
                    error!(pid = ?self.pty.pid(), %error, "pty readiness failed");
                    self.fatal_io();
                    return WriteOutcome::Fatal;
                }
            };
            guard.try_io(|fd| pty::write_fd(fd.get_ref(), &self.input_buffer))
        };
        match result {
            Err(_would_block) => WriteOutcome::NotReady,
            Ok(Err(ref error)) if error.kind() == io::ErrorKind::Interrupted => WriteOutcome::NotReady,
            Ok(Err(error)) => {
                error!(pid = ?self.pty.pid(), %error, "error writing to shell subprocess");
                self.fatal_io();
                WriteOutcome::Fatal
            }
            Ok(Ok(n)) => {
                self.input_buffer.drain(..n);
                if self.input_buffer.is_empty() {
                    self.write_armed = false;
                    WriteOutcome::Flushed(std::mem::take(&mut self.pending_acks))
                } else {
                    WriteOutcome::Partial
                }
            }
        }
    }

    /// Hand back every subscriber and drop read interest; called once per
    /// delivered chunk so each tab has at most one response in flight.
    pub fn take_subscribers(&mut self) -> HashSet<String> {
        self.read_armed = false;
        std::mem::take(&mut self.subscriber_ids)
    }

    /// Request destruction at the next periodic tick.
    pub fn mark_doomed(&mut self) {
        self.doomed = true;
    }

    fn fatal_io(&mut self) {
        // A dead fd stays level-ready; disarm so the loop cannot spin in
        // the window before the tick reaps us.
        self.doomed = true;
        self.read_armed = false;
        self.write_armed = false;
    }

    /// Whether the periodic tick should destroy this shell now.
    ///
    /// An exited child is only reaped once nothing is in flight: a parked
    /// subscriber means the final chunk has not been delivered yet and the
    /// imminent read-ready callback must run first.
    pub fn should_reap(&mut self, now: Instant) -> bool {
        if self.doomed || self.last_output_sent {
            return true;
        }
        if now.duration_since(self.last_activity) >= SHELL_TIMEOUT {
            return true;
        }
        if !self.exited {
            self.exited = self.pty.has_exited();
        }
        self.exited && self.subscriber_ids.is_empty() && self.pending_acks.is_empty()
    }

    /// Tear the shell down: disarm, SIGKILL, and hand back everything that
    /// still needs a `shellKilled` notification. The master fd closes when
    /// the shell is dropped.
    pub fn destroy(&mut self) -> (Vec<Box<dyn Responder>>, HashSet<String>) {
        self.read_armed = false;
        self.write_armed = false;
        self.pty.kill();
        (
            std::mem::take(&mut self.pending_acks),
            std::mem::take(&mut self.subscriber_ids),
        )
    }
}
