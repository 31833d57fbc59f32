//! Tool dispatch: local tools inside the sandbox, remote tools over IPC.
//!
//! Local tools are file read/write/edit and shell, all confined to the
//! workspace via the central safe-path helper. Shell subprocesses get a
//! scrubbed environment so nothing the sandbox inherited can leak further
//! down. Every other tool name is marshalled to the host over IPC and the
//! host's verdict is final.

use ax_ipc::IpcClient;
use ax_types::path::safe_join;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tokio::process::Command;

/// Environment variables a shell subprocess may inherit.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "TMPDIR", "TMP", "TEMP", "LANG", "LC_ALL", "TERM"];

/// Shell timeout inside the sandbox.
const SHELL_TIMEOUT_SECS: u64 = 60;

/// Cap on shell output returned to the model.
const MAX_SHELL_OUTPUT: usize = 100 * 1024;

/// Local tool names.
pub const LOCAL_TOOLS: &[&str] = &["file_read", "file_write", "file_edit", "shell"];

/// The result of one tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Whether a tool runs inside the sandbox.
pub fn is_local_tool(name: &str) -> bool {
    LOCAL_TOOLS.contains(&name)
}

// ---------------------------------------------------------------------------
// Tool specs shown to the model
// ---------------------------------------------------------------------------

/// JSON-schema specs for every tool the model may call.
pub fn tool_specs() -> Vec<Value> {
    let str_prop = |desc: &str| json!({"type": "string", "description": desc});
    let spec = |name: &str, desc: &str, props: Value, required: &[&str]| {
        json!({
            "name": name,
            "description": desc,
            "input_schema": {
                "type": "object",
                "properties": props,
                "required": required,
            }
        })
    };

    vec![
        // -- local --
        spec(
            "file_read",
            "Read a file from the workspace.",
            json!({"path": str_prop("Path relative to the workspace root")}),
            &["path"],
        ),
        spec(
            "file_write",
            "Write a file in the workspace, creating parent directories.",
            json!({
                "path": str_prop("Path relative to the workspace root"),
                "content": str_prop("Full file content"),
            }),
            &["path", "content"],
        ),
        spec(
            "file_edit",
            "Replace the first occurrence of a string in a workspace file.",
            json!({
                "path": str_prop("Path relative to the workspace root"),
                "old": str_prop("Exact text to replace"),
                "new": str_prop("Replacement text"),
            }),
            &["path", "old", "new"],
        ),
        spec(
            "shell",
            "Run a shell command in the workspace. Output is truncated.",
            json!({"command": str_prop("The command line to run")}),
            &["command"],
        ),
        // -- remote (host-policed) --
        spec(
            "memory_write",
            "Store a memory entry.",
            json!({
                "scope": str_prop("Memory scope, e.g. 'notes'"),
                "content": str_prop("Entry content"),
            }),
            &["scope", "content"],
        ),
        spec(
            "memory_query",
            "Search memory entries.",
            json!({"query": str_prop("Search text")}),
            &["query"],
        ),
        spec(
            "web_fetch",
            "Fetch a URL and return its text content.",
            json!({"url": str_prop("http(s) URL")}),
            &["url"],
        ),
        spec(
            "web_search",
            "Search the web and return result snippets.",
            json!({"query": str_prop("Search query")}),
            &["query"],
        ),
        spec(
            "browser_navigate",
            "Navigate the managed browser to a URL.",
            json!({"url": str_prop("http(s) URL")}),
            &["url"],
        ),
        spec(
            "browser_snapshot",
            "Capture a text snapshot of the current browser page.",
            json!({}),
            &[],
        ),
        spec(
            "scheduler_add_cron",
            "Create a recurring scheduled job.",
            json!({
                "schedule": str_prop("5-field cron expression"),
                "prompt": str_prop("Prompt to run when the job fires"),
            }),
            &["schedule", "prompt"],
        ),
        spec(
            "scheduler_list_jobs",
            "List scheduled jobs.",
            json!({}),
            &[],
        ),
        spec(
            "skill_propose",
            "Propose a new skill for yourself (subject to host screening).",
            json!({
                "name": str_prop("Skill name"),
                "description": str_prop("One-line description"),
                "content": str_prop("Skill markdown body"),
            }),
            &["name", "description", "content"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Local tools
// ---------------------------------------------------------------------------

/// Executes local tools, confined to one workspace.
pub struct LocalTools {
    workspace: PathBuf,
}

impl LocalTools {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    /// Run one local tool.
    pub async fn execute(&self, name: &str, input: &Value) -> ToolOutcome {
        match name {
            "file_read" => self.file_read(input),
            "file_write" => self.file_write(input),
            "file_edit" => self.file_edit(input),
            "shell" => self.shell(input).await,
            other => ToolOutcome::err(format!("unknown local tool: {other}")),
        }
    }

    fn resolve(&self, input: &Value) -> Result<PathBuf, String> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or("missing 'path'")?;
        safe_join(&self.workspace, path)
    }

    fn file_read(&self, input: &Value) -> ToolOutcome {
        let path = match self.resolve(input) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => ToolOutcome::ok(content),
            Err(e) => ToolOutcome::err(format!("read failed: {e}")),
        }
    }

    fn file_write(&self, input: &Value) -> ToolOutcome {
        let path = match self.resolve(input) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        let content = match input.get("content").and_then(Value::as_str) {
            Some(c) => c,
            None => return ToolOutcome::err("missing 'content'"),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutcome::err(format!("mkdir failed: {e}"));
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => ToolOutcome::ok(format!("wrote {} bytes", content.len())),
            Err(e) => ToolOutcome::err(format!("write failed: {e}")),
        }
    }

    fn file_edit(&self, input: &Value) -> ToolOutcome {
        let path = match self.resolve(input) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        let (old, new) = match (
            input.get("old").and_then(Value::as_str),
            input.get("new").and_then(Value::as_str),
        ) {
            (Some(o), Some(n)) => (o, n),
            _ => return ToolOutcome::err("missing 'old' or 'new'"),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err(format!("read failed: {e}")),
        };
        if !content.contains(old) {
            return ToolOutcome::err("'old' text not found in file");
        }
        let updated = content.replacen(old, new, 1);
        match std::fs::write(&path, updated) {
            Ok(()) => ToolOutcome::ok("edited"),
            Err(e) => ToolOutcome::err(format!("write failed: {e}")),
        }
    }

    async fn shell(&self, input: &Value) -> ToolOutcome {
        let command = match input.get("command").and_then(Value::as_str) {
            Some(c) => c,
            None => return ToolOutcome::err("missing 'command'"),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        scrub_env(&mut cmd);

        let timeout = std::time::Duration::from_secs(SHELL_TIMEOUT_SECS);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => return ToolOutcome::err(format!("spawn failed: {e}")),
            Err(_) => return ToolOutcome::err(format!("timed out after {SHELL_TIMEOUT_SECS}s")),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str(&stderr);
        }
        if text.len() > MAX_SHELL_OUTPUT {
            text.truncate(MAX_SHELL_OUTPUT);
            text.push_str("\n[output truncated]");
        }
        if output.status.success() {
            ToolOutcome::ok(text)
        } else {
            ToolOutcome::err(format!(
                "exit {}: {text}",
                output.status.code().unwrap_or(-1)
            ))
        }
    }
}

/// Clear the subprocess environment and re-add only the safe allowlist.
fn scrub_env(cmd: &mut Command) {
    cmd.env_clear();
    for var in SAFE_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Remote tools
// ---------------------------------------------------------------------------

/// Marshals a tool call to the host over IPC.
///
/// The tool's input object becomes the action payload verbatim; the host's
/// strict schemas do the real validation.
pub async fn execute_remote(client: &mut IpcClient, name: &str, input: &Value) -> ToolOutcome {
    let fields: Map<String, Value> = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return ToolOutcome::err("tool input must be an object"),
    };

    match client.call_action(name, fields).await {
        Ok(value) => ToolOutcome::ok(remote_result_text(&value)),
        Err(e) => ToolOutcome::err(e),
    }
}

/// Flatten a response body into text for the model.
fn remote_result_text(value: &Value) -> String {
    for key in ["content", "results", "response", "entries", "result"] {
        if let Some(found) = value.get(key) {
            return match found {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    value.to_string()
}
