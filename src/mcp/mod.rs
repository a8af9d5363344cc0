//! MCP tool server
//!
//! A loopback JSON-RPC 2.0 server the agent subprocess calls back into.
//! Tool calls never touch git from the HTTP handler: plan mutations are
//! forwarded as [`KernelTask`]s over a channel drained by the event loop,
//! and `submit_pr` parks its summary in a per-session slot the kernel
//! consumes exactly once. Children learn the URL and session token from
//! `SCRIPTORIUM_MCP_URL` / `SCRIPTORIUM_SESSION_TOKEN`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Plan mutations requested by an agent over the tool surface; executed by
/// the event loop, never by the HTTP thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelTask {
    CreateArea {
        title: String,
        summary: String,
        scope: String,
        out_of_scope: String,
    },
    CreateTicket {
        title: String,
        goal: String,
        acceptance_criteria: String,
        notes: String,
        /// Area of the ticket whose session issued the call, when any.
        area: Option<String>,
    },
    AddNote {
        ticket_id: String,
        note: String,
    },
}

#[derive(Clone)]
struct AppState {
    session_token: String,
    submit_slot: Arc<Mutex<Option<String>>>,
    session_area: Arc<Mutex<Option<String>>>,
    tasks: mpsc::UnboundedSender<KernelTask>,
}

/// Handle to a running tool server.
pub struct McpHandle {
    url: String,
    session_token: String,
    submit_slot: Arc<Mutex<Option<String>>>,
    session_area: Arc<Mutex<Option<String>>>,
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl McpHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Take the pending `submit_pr` summary, clearing the slot. Each
    /// submitted summary is observable exactly once.
    pub fn consume_submit_pr_summary(&self) -> Option<String> {
        self.submit_slot.lock().unwrap().take()
    }

    /// Tag subsequent `create_ticket` calls with the area of the ticket
    /// now executing.
    pub fn set_session_area(&self, area: Option<String>) {
        *self.session_area.lock().unwrap() = area;
    }

    /// Stop the server and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("tool server task failed on shutdown: {e}");
        }
    }
}

/// Bind the tool server and return the handle plus the task receiver the
/// event loop drains.
pub async fn start(addr: SocketAddr) -> Result<(McpHandle, mpsc::UnboundedReceiver<KernelTask>)> {
    let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let state = AppState {
        session_token: uuid::Uuid::new_v4().to_string(),
        submit_slot: Arc::new(Mutex::new(None)),
        session_area: Arc::new(Mutex::new(None)),
        tasks: tasks_tx,
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Other(format!("cannot bind tool server on {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::Other(format!("tool server address unavailable: {e}")))?;
    let url = format!("http://{local}");

    let handle_state = state.clone();
    let router = Router::new().route("/", post(handle_rpc)).with_state(state);

    let join = tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        if let Err(e) = server.await {
            warn!("tool server terminated: {e}");
        }
    });

    info!("tool server listening on {url}");
    Ok((
        McpHandle {
            url,
            session_token: handle_state.session_token.clone(),
            submit_slot: handle_state.submit_slot,
            session_area: handle_state.session_area,
            shutdown: shutdown_tx,
            join,
        },
        tasks_rx,
    ))
}

async fn handle_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let authorized = bearer_token(&headers)
        .map(|t| t == state.session_token)
        .unwrap_or(false);
    Json(process_request(&state, authorized, &request))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-scriptorium-session")
                .and_then(|v| v.to_str().ok())
        })
}

fn process_request(state: &AppState, authorized: bool, request: &Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    debug!("tool server request: {method}");

    if !authorized {
        return rpc_error(id, -32001, "unauthorized: bad or missing session token");
    }

    match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "scriptorium",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "notifications/initialized" => Value::Null,
        "tools/list" => rpc_result(id, json!({ "tools": tool_descriptors() })),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            match call_tool(state, name, &arguments) {
                Ok(text) => rpc_result(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": false,
                    }),
                ),
                Err(message) => rpc_error(id, -32602, &message),
            }
        }
        "" => rpc_error(id, -32600, "missing method"),
        other => rpc_error(id, -32601, &format!("unknown method '{other}'")),
    }
}

fn call_tool(state: &AppState, name: &str, arguments: &Value) -> std::result::Result<String, String> {
    let arg = |key: &str| -> std::result::Result<String, String> {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("tool '{name}' requires string argument '{key}'"))
    };
    let opt_arg = |key: &str| -> String {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match name {
        "submit_pr" => {
            let summary = arg("summary")?;
            state.submit_slot.lock().unwrap().replace(summary);
            Ok("Merge request enqueued.".to_string())
        }
        "create_area" => {
            let task = KernelTask::CreateArea {
                title: arg("title")?,
                summary: opt_arg("summary"),
                scope: opt_arg("scope"),
                out_of_scope: opt_arg("out_of_scope"),
            };
            state
                .tasks
                .send(task)
                .map_err(|_| "kernel task queue closed".to_string())?;
            Ok("Area creation queued.".to_string())
        }
        "create_ticket" => {
            let task = KernelTask::CreateTicket {
                title: arg("title")?,
                goal: opt_arg("goal"),
                acceptance_criteria: opt_arg("acceptance_criteria"),
                notes: opt_arg("notes"),
                area: state.session_area.lock().unwrap().clone(),
            };
            state
                .tasks
                .send(task)
                .map_err(|_| "kernel task queue closed".to_string())?;
            Ok("Ticket creation queued.".to_string())
        }
        "add_note" => {
            let task = KernelTask::AddNote {
                ticket_id: arg("ticket_id")?,
                note: arg("note")?,
            };
            state
                .tasks
                .send(task)
                .map_err(|_| "kernel task queue closed".to_string())?;
            Ok("Note queued.".to_string())
        }
        other => Err(format!("unknown tool '{other}'")),
    }
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "submit_pr",
            "description": "Submit the current ticket's work for merge with a one-line summary.",
            "inputSchema": {
                "type": "object",
                "properties": { "summary": { "type": "string" } },
                "required": ["summary"],
            },
        },
        {
            "name": "create_area",
            "description": "Propose a new plan area.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "summary": { "type": "string" },
                    "scope": { "type": "string" },
                    "out_of_scope": { "type": "string" },
                },
                "required": ["title"],
            },
        },
        {
            "name": "create_ticket",
            "description": "Propose a new open ticket.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "goal": { "type": "string" },
                    "acceptance_criteria": { "type": "string" },
                    "notes": { "type": "string" },
                },
                "required": ["title"],
            },
        },
        {
            "name": "add_note",
            "description": "Append a note to a ticket by its 4-digit ID.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "ticket_id": { "type": "string" },
                    "note": { "type": "string" },
                },
                "required": ["ticket_id", "note"],
            },
        },
    ])
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}
