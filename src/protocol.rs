//! The JSON wire vocabulary.
//!
//! Every response body in the protocol is a small object of boolean flags
//! plus a few data fields; the outer body of a multiplexed output response
//! maps shell ids to such objects. The member names live here in one place,
//! together with builders for each message shape, so handlers and the
//! manager never assemble ad-hoc literals.

use serde::Serialize;
use serde_json::{Map, Value};

// JSON object member names.
pub const ALIVE: &str = "alive";
pub const EXITED: &str = "exited";
pub const OUTPUT: &str = "output";
pub const SUCCESS: &str = "success";
pub const SHELL_ID: &str = "shellId";
pub const COMMAND: &str = "lineToSend";
pub const KEY_NAME: &str = "keyName";
pub const NICE_NAME: &str = "niceName";
pub const SHELL_TYPES: &str = "shellTypes";
pub const SHELL_KILLED: &str = "shellKilled";
pub const OFFSET: &str = "offset";
pub const NEXT_OFFSET: &str = "nextOffset";
pub const COMMANDS: &str = "commands";
pub const NOT_LOGGED_IN: &str = "notLoggedIn";
pub const NO_SHELL_EXISTS: &str = "noShellExists";
pub const BUFFER_EXCEEDED: &str = "bufferExceeded";
pub const PERIODIC_RESPONSE: &str = "periodicResponse";
pub const SHELL_LIMIT_REACHED: &str = "shellLimitReached";
pub const SHELL_CREATE_FAILED: &str = "shellCreateFailed";
pub const MORE_OUTPUT_AVAILABLE: &str = "moreOutputAvailable";
pub const NUM_PAIRS: &str = "numPairs";

/// Header naming the browser tab a polling request belongs to.
pub const HUE_INSTANCE_ID: &str = "Hue-Instance-ID";

/// Header carrying the authenticated username, installed by the fronting
/// auth middleware. The core only trusts it, it never originates auth.
pub const REMOTE_USER: &str = "X-Remote-User";

/// One entry of the `get_shell_types` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellTypeInfo {
    pub nice_name: String,
    pub key_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// `{<flag>: true}`
pub fn flag(name: &str) -> Value {
    let mut body = Map::new();
    body.insert(name.to_string(), Value::Bool(true));
    Value::Object(body)
}

/// `{success: true, shellId: <id>}`
pub fn create_success(shell_id: &str) -> Value {
    let mut body = Map::new();
    body.insert(SUCCESS.to_string(), Value::Bool(true));
    body.insert(SHELL_ID.to_string(), Value::String(shell_id.to_string()));
    Value::Object(body)
}

/// One shell's contribution to an output response: the status flag
/// (`alive` or `exited`), the chunk, the more-output hint and the offset
/// the client should poll from next.
pub fn output_chunk(status: &str, output: &[u8], more_available: bool, next_offset: usize) -> Value {
    let mut body = Map::new();
    body.insert(status.to_string(), Value::Bool(true));
    body.insert(
        OUTPUT.to_string(),
        Value::String(String::from_utf8_lossy(output).into_owned()),
    );
    body.insert(
        MORE_OUTPUT_AVAILABLE.to_string(),
        Value::Bool(more_available),
    );
    body.insert(NEXT_OFFSET.to_string(), Value::from(next_offset));
    Value::Object(body)
}

/// Wrap a per-shell object under its shell id, the shape every entry of a
/// multiplexed output body takes: `{<shell_id>: <inner>}`.
pub fn for_shell(shell_id: &str, inner: Value) -> Value {
    let mut body = Map::new();
    body.insert(shell_id.to_string(), inner);
    Value::Object(body)
}

/// `{success: true, output, nextOffset, commands}` for restore.
pub fn restore_success(output: &[u8], next_offset: usize, commands: &[String]) -> Value {
    let mut body = Map::new();
    body.insert(SUCCESS.to_string(), Value::Bool(true));
    body.insert(
        OUTPUT.to_string(),
        Value::String(String::from_utf8_lossy(output).into_owned()),
    );
    body.insert(NEXT_OFFSET.to_string(), Value::from(next_offset));
    body.insert(
        COMMANDS.to_string(),
        Value::Array(commands.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(body)
}

/// `{success: true, shellTypes: [...]}`, cached once at startup.
pub fn shell_types(entries: &[ShellTypeInfo]) -> Value {
    let mut body = Map::new();
    body.insert(SUCCESS.to_string(), Value::Bool(true));
    body.insert(
        SHELL_TYPES.to_string(),
        serde_json::to_value(entries).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    Value::Object(body)
}
