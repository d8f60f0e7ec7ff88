//! The HTTP face of the manager: routing, identity, and form plumbing.
//!
//! Handlers are deliberately thin. Each one validates its inputs, sends a
//! message onto the manager task, and awaits the oneshot carrying the
//! response body; a long-poll is nothing more than a receiver that
//! resolves later. Authentication happens upstream; the fronting
//! middleware hands us the username in a trusted header and this layer
//! only forwards `notLoggedIn` when that header is absent.

use std::collections::HashMap;

use axum::{
    extract::{Form, FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::manager::ManagerHandle;
use crate::protocol::{
    self, COMMAND, HUE_INSTANCE_ID, KEY_NAME, NOT_LOGGED_IN, NUM_PAIRS, REMOTE_USER, SHELL_ID,
};

/// Username as asserted by the fronting auth middleware.
pub struct RemoteUser(pub String);

/// Rejection for requests with no authenticated identity.
pub struct NotLoggedIn;

impl IntoResponse for NotLoggedIn {
    fn into_response(self) -> Response {
        Json(protocol::flag(NOT_LOGGED_IN)).into_response()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RemoteUser
where
    S: Send + Sync,
{
    type Rejection = NotLoggedIn;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(REMOTE_USER)
            .and_then(|value| value.to_str().ok())
            .filter(|username| !username.is_empty())
            .map(|username| RemoteUser(username.to_string()))
            .ok_or(NotLoggedIn)
    }
}

pub fn router(handle: ManagerHandle) -> Router {
    Router::new()
        .route("/shell/get_shell_types", get(get_shell_types))
        .route("/shell/create", post(create))
        .route("/shell/process_command", post(process_command))
        .route("/shell/retrieve_output", post(retrieve_output))
        .route("/shell/add_to_output", post(add_to_output))
        .route("/shell/kill_shell", post(kill_shell))
        .route("/shell/restore_shell", post(restore_shell))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Serve until ctrl-c.
pub async fn run_server(listener: TcpListener, handle: ManagerHandle) -> anyhow::Result<()> {
    axum::serve(listener, router(handle))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "could not install ctrl-c handler");
        return;
    }
    info!("shutdown signal received");
}

/// Turn the manager's reply into an HTTP response. `Null` is the protocol's
/// deliberate empty body; a closed channel means the request was abandoned
/// (evicted long-poll or shutdown) and gets an empty body too.
fn respond(reply: Result<Value, oneshot::error::RecvError>) -> Response {
    match reply {
        Ok(Value::Null) | Err(_) => StatusCode::OK.into_response(),
        Ok(body) => Json(body).into_response(),
    }
}

fn field<'f>(form: &'f HashMap<String, String>, name: &str) -> &'f str {
    form.get(name).map_or("", String::as_str)
}

/// The tab identifier, required exactly once on polling endpoints. Any
/// other arity is logged and the request is answered with an empty body.
fn single_instance_id(headers: &HeaderMap, username: &str) -> Option<String> {
    let mut values = headers.get_all(HUE_INSTANCE_ID).iter();
    match (values.next(), values.next()) {
        (Some(value), None) => match value.to_str() {
            Ok(tab_id) => Some(tab_id.to_string()),
            Err(_) => {
                error!(username, "Hue-Instance-ID header is not valid text");
                None
            }
        },
        (first, _) => {
            error!(
                username,
                present = first.is_some(),
                "Hue-Instance-ID header was not set exactly once"
            );
            None
        }
    }
}

/// Decode `numPairs` plus `shellId1..N`/`offset1..N`. Any malformed or
/// missing piece yields an empty list rather than an error.
fn parse_shell_pairs(form: &HashMap<String, String>) -> Vec<(String, usize)> {
    let Some(num_pairs) = form.get(NUM_PAIRS).and_then(|raw| raw.parse::<usize>().ok()) else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for i in 1..=num_pairs {
        let Some(shell_id) = form.get(&format!("shellId{i}")) else {
            return Vec::new();
        };
        let Some(offset) = form
            .get(&format!("offset{i}"))
            .and_then(|raw| raw.parse::<usize>().ok())
        else {
            return Vec::new();
        };
        pairs.push((shell_id.clone(), offset));
    }
    pairs
}

async fn get_shell_types(State(handle): State<ManagerHandle>, _user: RemoteUser) -> Response {
    respond(handle.list_shell_types().await)
}

async fn create(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    respond(handle.create(&user.0, field(&form, KEY_NAME)).await)
}

async fn process_command(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    respond(
        handle
            .submit_command(&user.0, field(&form, SHELL_ID), field(&form, COMMAND))
            .await,
    )
}

async fn retrieve_output(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(tab_id) = single_instance_id(&headers, &user.0) else {
        return StatusCode::OK.into_response();
    };
    let pairs = parse_shell_pairs(&form);
    respond(handle.retrieve_output(&user.0, &tab_id, pairs).await)
}

async fn add_to_output(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(tab_id) = single_instance_id(&headers, &user.0) else {
        return StatusCode::OK.into_response();
    };
    let pairs = parse_shell_pairs(&form);
    respond(handle.add_to_output(&user.0, &tab_id, pairs).await)
}

async fn kill_shell(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    respond(handle.kill_shell(&user.0, field(&form, SHELL_ID)).await)
}

async fn restore_shell(
    State(handle): State<ManagerHandle>,
    user: RemoteUser,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    respond(handle.restore(&user.0, field(&form, SHELL_ID)).await)
}
