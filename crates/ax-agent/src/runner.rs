//! The agent turn loop.
//!
//! Build the prompt context, assemble the system prompt, then alternate
//! model invocations with tool dispatch until the model finishes a message
//! without asking for tools. Text deltas hit stdout the moment they arrive.

use crate::guard::HallucinationGuard;
use crate::input::AgentInput;
use crate::llm::{AssistantTurn, ModelClient};
use crate::tools::{execute_remote, is_local_tool, tool_specs, LocalTools, ToolOutcome};
use ax_ipc::IpcClient;
use ax_prompt::{estimate_tokens, IdentityFiles, PromptBuilder, PromptContext, SkillEntry};
use ax_types::config::{SandboxKind, SecurityProfile};
use ax_types::message::{Role, TokenUsage};
use chrono::Utc;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Safety cap on model/tool iterations per turn.
const MAX_ITERATIONS: usize = 20;

/// Output tokens requested per model invocation.
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Runner configuration, from environment variables set by the spawner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub socket_path: PathBuf,
    pub token: String,
    pub workspace: PathBuf,
    pub skills_dir: PathBuf,
    pub model_base_url: String,
    pub model: String,
    pub agent_type: String,
    pub context_window: u64,
}

impl RunnerConfig {
    /// Read the configuration the host passed through the environment.
    pub fn from_env() -> Result<Self, String> {
        let var = |name: &str| std::env::var(name).map_err(|_| format!("missing env var {name}"));
        Ok(Self {
            socket_path: PathBuf::from(var("AX_IPC_SOCKET")?),
            token: var("AX_IPC_TOKEN")?,
            workspace: PathBuf::from(var("AX_WORKSPACE")?),
            skills_dir: std::env::var("AX_SKILLS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(var("AX_WORKSPACE").unwrap_or_default()).join("skills")),
            // Overridden by the bridge when AX_PROXY_SOCKET is set.
            model_base_url: std::env::var("AX_MODEL_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:0".into()),
            model: std::env::var("AX_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".into()),
            agent_type: std::env::var("AX_AGENT_TYPE").unwrap_or_else(|_| "main".into()),
            context_window: std::env::var("AX_CONTEXT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200_000),
        })
    }
}

/// The agent runner.
pub struct AgentRunner {
    config: RunnerConfig,
    model: ModelClient,
    local_tools: LocalTools,
    ipc: IpcClient,
}

impl AgentRunner {
    /// Connect to the host and set up tool dispatch.
    pub async fn connect(config: RunnerConfig) -> Result<Self, String> {
        let ipc = IpcClient::connect(&config.socket_path, &config.token).await?;
        let model = ModelClient::new(config.model_base_url.clone(), config.model.clone());
        let local_tools = LocalTools::new(config.workspace.clone());
        Ok(Self {
            config,
            model,
            local_tools,
            ipc,
        })
    }

    /// Build the prompt context for this turn.
    pub fn prompt_context(config: &RunnerConfig, input: &AgentInput) -> PromptContext {
        let identity = load_identity(&config.workspace);
        let bootstrap_mode = identity.bootstrap.is_some() && identity.soul.is_none();

        let history_tokens: u64 = input
            .history
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();

        let mut ctx = PromptContext::bare(&config.agent_type);
        ctx.workspace = config.workspace.clone();
        ctx.skills = load_skills(&config.skills_dir);
        ctx.profile = SecurityProfile::Standard;
        ctx.sandbox = SandboxKind::Subprocess;
        if let Some(taint) = input.taint_state {
            ctx.taint_ratio = taint.ratio;
            ctx.taint_threshold = taint.threshold;
        }
        ctx.identity = identity;
        ctx.context_window = config.context_window;
        ctx.history_tokens = history_tokens;
        ctx.bootstrap_mode = bootstrap_mode;
        ctx.now = Utc::now();
        ctx
    }

    /// Run one full turn. Returns accumulated token usage.
    pub async fn run(&mut self, input: AgentInput) -> Result<TokenUsage, String> {
        let ctx = Self::prompt_context(&self.config, &input);
        let built = PromptBuilder::new().build(&ctx);
        debug!(
            modules = built.modules.len(),
            tokens = built.estimated_tokens,
            "System prompt assembled"
        );

        let mut messages = build_messages(&input);
        let tools = tool_specs();
        let guard = HallucinationGuard::new();
        let mut usage = TokenUsage::default();
        let mut corrected = false;

        for iteration in 0..MAX_ITERATIONS {
            let turn = self
                .model
                .stream_turn(&built.text, &messages, &tools, MAX_OUTPUT_TOKENS, |text| {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                })
                .await?;
            usage.add(turn.usage);

            messages.push(assistant_message(&turn));
            let tools_called: Vec<String> =
                turn.tool_calls.iter().map(|c| c.name.clone()).collect();

            if turn.tool_calls.is_empty() {
                // A claim of scheduling with no scheduler call gets one
                // corrective round; a second offense ends the turn as-is.
                if let Some(instruction) = guard.check(&turn.text, &tools_called) {
                    if !corrected {
                        corrected = true;
                        warn!("Scheduling claim without scheduler call; injecting corrective instruction");
                        messages.push(json!({
                            "role": "user",
                            "content": [{"type": "text", "text": instruction}],
                        }));
                        continue;
                    }
                }
                break;
            }

            let mut result_blocks = Vec::with_capacity(turn.tool_calls.len());
            for call in &turn.tool_calls {
                let outcome = self.dispatch_tool(&call.name, &call.input).await;
                debug!(tool = %call.name, is_error = outcome.is_error, "Tool dispatched");
                result_blocks.push(tool_result_block(&call.id, &outcome));
            }
            messages.push(json!({"role": "user", "content": result_blocks}));

            if iteration + 1 == MAX_ITERATIONS {
                warn!("Iteration cap reached, ending turn");
            }
        }

        // Terminate the streamed output with a newline for line-based readers.
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();

        Ok(usage)
    }

    /// Route one tool call to its executor. Errors come back as tool
    /// results so the model can react; they never end the turn.
    async fn dispatch_tool(&mut self, name: &str, input: &Value) -> ToolOutcome {
        if is_local_tool(name) {
            self.local_tools.execute(name, input).await
        } else {
            execute_remote(&mut self.ipc, name, input).await
        }
    }
}

/// Convert history + current message into model messages.
pub fn build_messages(input: &AgentInput) -> Vec<Value> {
    let mut messages: Vec<Value> = input
        .history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| {
            json!({
                "role": m.role.to_string(),
                "content": [{"type": "text", "text": m.content}],
            })
        })
        .collect();
    messages.push(json!({
        "role": "user",
        "content": [{"type": "text", "text": input.message}],
    }));
    messages
}

/// Convert a collected assistant turn back into a message value.
pub fn assistant_message(turn: &AssistantTurn) -> Value {
    let mut blocks = Vec::new();
    if !turn.text.is_empty() {
        blocks.push(json!({"type": "text", "text": turn.text}));
    }
    for call in &turn.tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }));
    }
    json!({"role": "assistant", "content": blocks})
}

/// Build a tool_result content block.
pub fn tool_result_block(call_id: &str, outcome: &ToolOutcome) -> Value {
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": call_id,
        "content": outcome.content,
    });
    if outcome.is_error {
        block["is_error"] = Value::Bool(true);
    }
    block
}

/// Load identity files placed in the workspace by the host.
fn load_identity(workspace: &std::path::Path) -> IdentityFiles {
    let read = |name: &str| std::fs::read_to_string(workspace.join(name)).ok();
    IdentityFiles {
        agents: read("AGENTS.md"),
        bootstrap: read("BOOTSTRAP.md"),
        soul: read("SOUL.md"),
        identity: read("IDENTITY.md"),
        user: read("USER.md"),
    }
}

/// Load skills (markdown files) from the skills directory.
fn load_skills(skills_dir: &std::path::Path) -> Vec<SkillEntry> {
    let mut skills = Vec::new();
    let entries = match std::fs::read_dir(skills_dir) {
        Ok(e) => e,
        Err(_) => return skills,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if let Ok(content) = std::fs::read_to_string(&path) {
            skills.push(SkillEntry { name, content });
        }
    }
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}
