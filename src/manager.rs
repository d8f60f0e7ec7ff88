//! The shell manager: every piece of mutable core state lives here, owned
//! by a single task.
//!
//! HTTP handlers talk to the manager by sending a [`ManagerMsg`] through a
//! [`ManagerHandle`] and awaiting the oneshot the message carries. The run
//! loop multiplexes three event sources: the message channel, readiness of
//! armed PTY fds, and a 1 Hz tick that reaps dead or idle shells and
//! answers long-polls about to hit the browser timeout. Everything is
//! serialized on this one task, so no state here needs a lock.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ShellTypeRegistry;
use crate::constants::MAX_SHELLS;
use crate::protocol::{
    self, ALIVE, EXITED, NO_SHELL_EXISTS, PERIODIC_RESPONSE, SHELL_CREATE_FAILED, SHELL_KILLED,
    SHELL_LIMIT_REACHED, SUCCESS,
};
use crate::reactor::{self, IoDirection};
use crate::responder::{HttpResponder, Responder};
use crate::shell::{ReadOutcome, ShellKey, ShellProcess, WriteOutcome};
use crate::subscriptions::SubscriptionTable;
use crate::users::UserRegistry;

/// One request dispatched onto the manager task. Each variant carries the
/// write-once handle its eventual response goes out on.
pub enum ManagerMsg {
    ListShellTypes {
        resp: Box<dyn Responder>,
    },
    Create {
        username: String,
        key_name: String,
        resp: Box<dyn Responder>,
    },
    SubmitCommand {
        username: String,
        shell_id: String,
        command: String,
        resp: Box<dyn Responder>,
    },
    RetrieveOutput {
        username: String,
        tab_id: String,
        pairs: Vec<(String, usize)>,
        resp: Box<dyn Responder>,
    },
    AddToOutput {
        username: String,
        tab_id: String,
        pairs: Vec<(String, usize)>,
        resp: Box<dyn Responder>,
    },
    KillShell {
        username: String,
        shell_id: String,
        resp: Box<dyn Responder>,
    },
    Restore {
        username: String,
        shell_id: String,
        resp: Box<dyn Responder>,
    },
}

/// Cheap cloneable front for dispatching requests onto the manager task.
///
/// Every method returns the receiver the response body arrives on; a
/// suspended long-poll is simply a receiver that resolves later. A closed
/// receiver means the request was abandoned (evicted duplicate long-poll
/// or manager shutdown) and surfaces as an empty HTTP body.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerMsg>,
}

impl ManagerHandle {
    fn send(
        &self,
        build: impl FnOnce(Box<dyn Responder>) -> ManagerMsg,
    ) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let msg = build(Box::new(HttpResponder::new(tx)));
        if self.tx.send(msg).is_err() {
            debug!("shell manager is gone, dropping request");
        }
        rx
    }

    pub fn list_shell_types(&self) -> oneshot::Receiver<Value> {
        self.send(|resp| ManagerMsg::ListShellTypes { resp })
    }

    pub fn create(&self, username: &str, key_name: &str) -> oneshot::Receiver<Value> {
        let (username, key_name) = (username.to_string(), key_name.to_string());
        self.send(|resp| ManagerMsg::Create {
            username,
            key_name,
            resp,
        })
    }

    pub fn submit_command(
        &self,
        username: &str,
        shell_id: &str,
        command: &str,
    ) -> oneshot::Receiver<Value> {
        let (username, shell_id, command) =
            (username.to_string(), shell_id.to_string(), command.to_string());
        self.send(|resp| ManagerMsg::SubmitCommand {
            username,
            shell_id,
            command,
            resp,
        })
    }

    pub fn retrieve_output(
        &self,
        username: &str,
        tab_id: &str,
        pairs: Vec<(String, usize)>,
    ) -> oneshot::Receiver<Value> {
        let (username, tab_id) = (username.to_string(), tab_id.to_string());
        self.send(|resp| ManagerMsg::RetrieveOutput {
            username,
            tab_id,
            pairs,
            resp,
        })
    }

    pub fn add_to_output(
        &self,
        username: &str,
        tab_id: &str,
        pairs: Vec<(String, usize)>,
    ) -> oneshot::Receiver<Value> {
        let (username, tab_id) = (username.to_string(), tab_id.to_string());
        self.send(|resp| ManagerMsg::AddToOutput {
            username,
            tab_id,
            pairs,
            resp,
        })
    }

    pub fn kill_shell(&self, username: &str, shell_id: &str) -> oneshot::Receiver<Value> {
        let (username, shell_id) = (username.to_string(), shell_id.to_string());
        self.send(|resp| ManagerMsg::KillShell {
            username,
            shell_id,
            resp,
        })
    }

    pub fn restore(&self, username: &str, shell_id: &str) -> oneshot::Receiver<Value> {
        let (username, shell_id) = (username.to_string(), shell_id.to_string());
        self.send(|resp| ManagerMsg::Restore {
            username,
            shell_id,
            resp,
        })
    }
}

enum LoopEvent {
    Msg(ManagerMsg),
    Fd(ShellKey, IoDirection),
    Tick,
    Closed,
}

pub struct ShellManager {
    shells: HashMap<ShellKey, ShellProcess>,
    users: UserRegistry,
    subscriptions: SubscriptionTable,
    registry: ShellTypeRegistry,
}

impl ShellManager {
    pub fn new(registry: ShellTypeRegistry) -> Self {
        Self {
            shells: HashMap::new(),
            users: UserRegistry::default(),
            subscriptions: SubscriptionTable::default(),
            registry,
        }
    }

    /// Spawn the manager task and return the handle the HTTP layer uses.
    pub fn start(registry: ShellTypeRegistry) -> ManagerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::new(registry).run(rx));
        ManagerHandle { tx }
    }

    /// The event loop. Exits when every handle is dropped, killing any
    /// remaining children on the way out.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerMsg>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let event = tokio::select! {
                biased;
                maybe = rx.recv() => match maybe {
                    Some(msg) => LoopEvent::Msg(msg),
                    None => LoopEvent::Closed,
                },
                ready = reactor::next_ready(&self.shells) => LoopEvent::Fd(ready.0, ready.1),
                _ = tick.tick() => LoopEvent::Tick,
            };
            match event {
                LoopEvent::Msg(msg) => self.handle_msg(msg),
                LoopEvent::Fd(key, direction) => self.handle_fd(key, direction).await,
                LoopEvent::Tick => self.handle_periodic(Instant::now()),
                LoopEvent::Closed => break,
            }
        }
        self.shutdown();
    }

    fn handle_msg(&mut self, msg: ManagerMsg) {
        match msg {
            ManagerMsg::ListShellTypes { resp } => resp.finish(self.registry.types_response()),
            ManagerMsg::Create {
                username,
                key_name,
                resp,
            } => self.try_create(&username, &key_name, resp),
            ManagerMsg::SubmitCommand {
                username,
                shell_id,
                command,
                resp,
            } => {
                let key = ShellKey { username, shell_id };
                match self.shells.get_mut(&key) {
                    None => resp.finish(protocol::flag(NO_SHELL_EXISTS)),
                    Some(shell) => shell.submit_command(&command, resp),
                }
            }
            ManagerMsg::RetrieveOutput {
                username,
                tab_id,
                pairs,
                resp,
            } => self.output_request(&username, &tab_id, &pairs, resp),
            ManagerMsg::AddToOutput {
                username,
                tab_id,
                pairs,
                resp,
            } => self.add_to_output(&username, &tab_id, &pairs, resp),
            ManagerMsg::KillShell {
                username,
                shell_id,
                resp,
            } => {
                let key = ShellKey { username, shell_id };
                match self.shells.get_mut(&key) {
                    None => debug!(
                        username = %key.username,
                        shell_id = %key.shell_id,
                        "kill requested for unknown shell"
                    ),
                    Some(shell) => shell.mark_doomed(),
                }
                resp.finish(Value::Null);
            }
            ManagerMsg::Restore {
                username,
                shell_id,
                resp,
            } => {
                let key = ShellKey { username, shell_id };
                match self.shells.get(&key) {
                    None => resp.finish(protocol::flag(SHELL_KILLED)),
                    Some(shell) => resp.finish(protocol::restore_success(
                        shell.output_log(),
                        shell.output_len(),
                        &shell.recent_commands(),
                    )),
                }
            }
        }
    }

    fn try_create(&mut self, username: &str, key_name: &str, resp: Box<dyn Responder>) {
        let Some(argv) = self.registry.command_for(key_name) else {
            debug!(username, key_name, "unknown shell type requested");
            resp.finish(protocol::flag(SHELL_CREATE_FAILED));
            return;
        };
        if self.users.shell_count(username) >= MAX_SHELLS {
            resp.finish(protocol::flag(SHELL_LIMIT_REACHED));
            return;
        }
        let shell_id = self.users.meta_mut(username).next_id();
        let key = ShellKey {
            username: username.to_string(),
            shell_id: shell_id.clone(),
        };
        match ShellProcess::spawn(key.clone(), argv) {
            Ok(shell) => {
                self.users.increment_count(username);
                self.shells.insert(key, shell);
                info!(username, shell_id, key_name, "shell created");
                resp.finish(protocol::create_success(&shell_id));
            }
            Err(error) => {
                warn!(username, key_name, %error, "could not create shell");
                resp.finish(protocol::flag(SHELL_CREATE_FAILED));
            }
        }
    }

    /// Walk the `(shell_id, offset)` pairs, collecting whatever can be
    /// answered right now and arming read interest for the rest.
    fn gather_output(
        &mut self,
        username: &str,
        tab_id: &str,
        pairs: &[(String, usize)],
    ) -> Map<String, Value> {
        let mut immediate = Map::new();
        for (shell_id, offset) in pairs {
            let key = ShellKey {
                username: username.to_string(),
                shell_id: shell_id.clone(),
            };
            match self.shells.get_mut(&key) {
                None => {
                    immediate.insert(shell_id.clone(), protocol::flag(NO_SHELL_EXISTS));
                }
                Some(shell) => {
                    if let Some(snapshot) = shell.subscribe_for_output(tab_id, *offset) {
                        immediate.insert(shell_id.clone(), snapshot);
                    }
                }
            }
        }
        immediate
    }

    /// The multiplexed long-poll. Anything answerable now goes straight
    /// back on the calling response (the client re-polls the rest with
    /// fresh offsets); only an entirely-pending request parks.
    fn output_request(
        &mut self,
        username: &str,
        tab_id: &str,
        pairs: &[(String, usize)],
        resp: Box<dyn Responder>,
    ) {
        let immediate = self.gather_output(username, tab_id, pairs);
        if !immediate.is_empty() {
            resp.finish(Value::Object(immediate));
        } else {
            self.subscriptions.insert(tab_id, resp, Instant::now());
        }
    }

    /// Attach more shells to a tab's already-parked long-poll. The caller
    /// always gets `{success}`; immediate output, if any, is diverted to
    /// the parked response instead.
    fn add_to_output(
        &mut self,
        username: &str,
        tab_id: &str,
        pairs: &[(String, usize)],
        resp: Box<dyn Responder>,
    ) {
        let immediate = self.gather_output(username, tab_id, pairs);
        if !immediate.is_empty() {
            match self.subscriptions.take_one(tab_id) {
                Some(parked) => parked.finish(Value::Object(immediate)),
                // No poll to divert to; the bytes stay cached and the
                // tab's next poll picks them up by offset.
                None => debug!(tab_id, "immediate output with no parked long-poll"),
            }
        }
        resp.finish(protocol::flag(SUCCESS));
    }

    async fn handle_fd(&mut self, key: ShellKey, direction: IoDirection) {
        let Some(shell) = self.shells.get_mut(&key) else {
            return;
        };
        match direction {
            IoDirection::Write => {
                if let WriteOutcome::Flushed(acks) = shell.on_write_ready().await {
                    for ack in acks {
                        ack.finish(protocol::flag(SUCCESS));
                    }
                }
            }
            IoDirection::Read => {
                if let ReadOutcome::Data {
                    chunk_start,
                    more_available,
                    exited,
                } = shell.on_read_ready().await
                {
                    let status = if exited { EXITED } else { ALIVE };
                    let body = protocol::for_shell(
                        shell.shell_id(),
                        protocol::output_chunk(
                            status,
                            shell.chunk_since(chunk_start),
                            more_available,
                            shell.output_len(),
                        ),
                    );
                    let subscribers = shell.take_subscribers();
                    for responder in self.subscriptions.take(subscribers.iter()) {
                        responder.finish(body.clone());
                    }
                }
            }
        }
    }

    /// The 1 Hz housekeeping pass: reap shells first, then answer parked
    /// long-polls that are about to hit the browser timeout.
    fn handle_periodic(&mut self, now: Instant) {
        let expired: Vec<ShellKey> = self
            .shells
            .iter_mut()
            .filter_map(|(key, shell)| shell.should_reap(now).then(|| key.clone()))
            .collect();
        for key in expired {
            self.destroy_shell(&key);
        }
        for responder in self.subscriptions.sweep(now) {
            responder.finish(protocol::flag(PERIODIC_RESPONSE));
        }
    }

    fn destroy_shell(&mut self, key: &ShellKey) {
        let Some(mut shell) = self.shells.remove(key) else {
            return;
        };
        info!(username = %key.username, shell_id = %key.shell_id, "destroying shell");
        let (acks, subscribers) = shell.destroy();
        for ack in acks {
            ack.finish(protocol::flag(SHELL_KILLED));
        }
        let body = protocol::for_shell(&key.shell_id, protocol::flag(SHELL_KILLED));
        for responder in self.subscriptions.take(subscribers.iter()) {
            responder.finish(body.clone());
        }
        self.users.decrement_count(&key.username);
        // dropping the shell closes its master fd
    }

    fn shutdown(mut self) {
        info!(shells = self.shells.len(), "shell manager stopping");
        let keys: Vec<ShellKey> = self.shells.keys().cloned().collect();
        for key in keys {
            self.destroy_shell(&key);
        }
    }
}
