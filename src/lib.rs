//! shellmux exposes interactive line-oriented subprocesses (Pig's grunt
//! shell, the HBase shell, plain bash) to browser clients through an HTTP
//! long-polling protocol.
//!
//! One server process owns a pool of PTY-backed children and multiplexes
//! their output to the browser tabs of the owning user. All mutable core
//! state lives in a single manager task ([`manager::ShellManager`]); the
//! HTTP layer ([`server`]) only forwards messages onto that task and awaits
//! the response body.

pub mod config;
pub mod constants;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod pty;
pub mod reactor;
pub mod responder;
pub mod server;
pub mod shell;
pub mod subscriptions;
pub mod users;

pub use config::{Config, ShellTypeRegistry};
pub use manager::{ManagerHandle, ShellManager};
pub use responder::Responder;
