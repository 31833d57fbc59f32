//! The request router: one inbound message, one policed agent turn.
//!
//! Pipeline per turn: dedup, bootstrap gate, inbound scan, canary, context
//! prep, workspace prep, sandbox spawn, outbound scan, persistence. Policy
//! refusals come back as terse canned text; the real reasons live in the
//! audit log.

use crate::bootstrap::{BootstrapGate, GateDecision, BOOTSTRAP_REPLY};
use crate::channels::ChannelRegistry;
use crate::config::StateLayout;
use crate::dedup::EventDedup;
use crate::sandbox::{SandboxProvider, SpawnSpec};
use crate::scanner::{InboundScanner, InboundVerdict, OutboundScanner};
use crate::stores::{ConversationStore, SessionStore, StoredTurn};
use crate::workspace::WorkspaceManager;
use ax_ipc::{AuditSink, IpcServer, SessionRegistration};
use ax_taint::{SessionTaintTracker, TaintBudget};
use ax_types::address::SessionAddress;
use ax_types::audit::{AuditRecord, AuditStatus};
use ax_types::config::AxConfig;
use ax_types::message::Role;
use ax_types::{AxError, AxResult, SessionId};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// Terse inbound-block reply; the matched patterns go to audit only.
pub const INBOUND_BLOCK_REPLY: &str = "blocked by security policy (in-1)";

/// Everything the router needs, created in `main` and threaded in.
pub struct RouterDeps {
    pub config: AxConfig,
    pub layout: StateLayout,
    pub sessions: Arc<SessionStore>,
    pub conversations: Arc<ConversationStore>,
    pub inbound: Arc<InboundScanner>,
    pub outbound: Arc<OutboundScanner>,
    pub workspace: Arc<WorkspaceManager>,
    pub sandbox: Arc<dyn SandboxProvider>,
    pub ipc: Arc<IpcServer>,
    pub budget: Arc<TaintBudget>,
    pub tracker: Arc<SessionTaintTracker>,
    pub dedup: Arc<EventDedup>,
    pub gate: Arc<BootstrapGate>,
    pub audit: Arc<dyn AuditSink>,
    pub channels: Arc<ChannelRegistry>,
    /// Path to the agent binary.
    pub agent_program: PathBuf,
}

/// One inbound turn request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub agent_id: String,
    /// Reuse an existing session, or mint a fresh ephemeral one.
    pub session_id: Option<SessionId>,
    pub message: String,
    /// The platform user, when the message arrived over a channel. `None`
    /// is the local CLI (the operator).
    pub user_id: Option<String>,
    /// Channel origin: address plus the platform message id for dedup.
    pub channel: Option<(SessionAddress, String)>,
}

/// What the router produced for a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterOutcome {
    /// A normal assistant reply.
    Reply { session_id: SessionId, text: String },
    /// A policy refusal with canned user-facing text.
    Denied { session_id: SessionId, text: String },
    /// A repeat delivery of an already-handled channel event.
    Duplicate,
    /// The channel adapter declined to respond at this address.
    Silent,
}

/// The request router.
pub struct RequestRouter {
    deps: RouterDeps,
}

impl RequestRouter {
    pub fn new(deps: RouterDeps) -> Self {
        Self { deps }
    }

    /// The router's wired dependencies (shared with the serve loop).
    pub fn deps(&self) -> &RouterDeps {
        &self.deps
    }

    /// Run the full per-turn pipeline.
    pub async fn handle_turn(&self, request: TurnRequest) -> AxResult<RouterOutcome> {
        let d = &self.deps;

        // 0. Dedup repeat channel deliveries, then the adapter's own
        // reply gate (mention rules, mute lists).
        if let Some((address, message_id)) = &request.channel {
            if !d.dedup.first_delivery(&address.provider, message_id) {
                return Ok(RouterOutcome::Duplicate);
            }
            if let Some(adapter) = d.channels.get(&address.provider) {
                if !adapter.should_respond(address, &request.message) {
                    return Ok(RouterOutcome::Silent);
                }
            }
        }

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(SessionId::generate);

        // 1. Bootstrap gate: only admins during first-run setup.
        if d.gate.check(&request.agent_id, request.user_id.as_deref()) == GateDecision::Deny {
            return Ok(RouterOutcome::Denied {
                session_id,
                text: BOOTSTRAP_REPLY.to_string(),
            });
        }

        // 2. Inbound scan.
        let scan = d.inbound.scan(&request.message);
        if scan.verdict == InboundVerdict::Block {
            self.audit(
                &session_id,
                &request.agent_id,
                "inbound_scan",
                AuditStatus::Blocked,
                Some(format!("matched: {}", scan.matched.join(", "))),
            );
            return Ok(RouterOutcome::Denied {
                session_id,
                text: INBOUND_BLOCK_REPLY.to_string(),
            });
        }
        if scan.verdict == InboundVerdict::Flag {
            warn!(matched = ?scan.matched, "Inbound message flagged");
        }

        // 3. Session + canary. The canary exists only router-side.
        let session = d.sessions.get_or_create(&session_id, &request.agent_id, || {
            crate::scanner::mint_canary()
        });
        if session.compromised {
            return Ok(RouterOutcome::Denied {
                session_id,
                text: "blocked by security policy (cn-2)".to_string(),
            });
        }
        if let Some((address, _)) = &request.channel {
            d.sessions
                .record_channel_interaction(&request.agent_id, address.clone());
        }

        // 4. Context prep: bounded history, plus thread backfill on first
        // participation in a channel thread.
        let mut history = d
            .conversations
            .recent(&session_id, d.config.history.max_turns)?;
        if history.is_empty() {
            if let Some((address, _)) = &request.channel {
                if address.scope == ax_types::address::AddressScope::Thread {
                    if let Some(adapter) = d.channels.get(&address.provider) {
                        let backfill = adapter
                            .thread_history(address, d.config.history.thread_context_turns)
                            .await
                            .unwrap_or_default();
                        let now = Utc::now();
                        history = backfill
                            .into_iter()
                            .map(|m| StoredTurn {
                                role: m.role,
                                content: m.content,
                                tainted: false,
                                created_at: now,
                            })
                            .collect();
                    }
                }
            }
        }

        // 5. Workspace prep.
        let workspace = d.workspace.ensure(&session_id)?;
        d.workspace
            .copy_identity(&d.layout.agent_dir(&request.agent_id), &workspace)?;
        d.workspace
            .copy_skills(&d.layout.skills_dir(&request.agent_id), &workspace)?;
        d.workspace.preseed_taint(&workspace, &d.budget, &session_id);

        // 6. Spawn the agent.
        let agent_started = SystemTime::now();
        let stdout = self
            .spawn_agent(&session_id, &request.agent_id, &request.message, &history, &workspace)
            .await?;

        // 7. Outbound scan, strictly after the full turn is collected.
        let outbound = d.outbound.scan(&stdout, &session.canary);
        if outbound.canary_leak {
            d.sessions.mark_compromised(&session_id);
            self.audit(
                &session_id,
                &request.agent_id,
                "outbound_scan",
                AuditStatus::Blocked,
                Some("canary leak: session marked compromised".into()),
            );
            warn!(session = %session_id, "Canary leak detected; response redacted");
        }
        let reply = outbound.text;

        // 8. Persistence: turns inherit the session's taint.
        let tainted = d.tracker.is_tainted(&session_id);
        d.conversations
            .append(&session_id, Role::User, &request.message, false)?;
        d.conversations
            .append(&session_id, Role::Assistant, &reply, tainted)?;

        if tainted {
            if let Some(tag) = d.tracker.taint_tag(&session_id) {
                d.workspace
                    .post_scan(&workspace, agent_started, &tag, &session_id);
            }
        }

        info!(session = %session_id, tainted, "Turn complete");
        Ok(RouterOutcome::Reply {
            session_id,
            text: reply,
        })
    }

    /// Spawn the sandboxed agent for one turn and return its stdout.
    async fn spawn_agent(
        &self,
        session_id: &SessionId,
        agent_id: &str,
        message: &str,
        history: &[StoredTurn],
        workspace: &std::path::Path,
    ) -> AxResult<String> {
        let d = &self.deps;

        let token = d.ipc.register_session(SessionRegistration {
            session_id: session_id.clone(),
            agent_id: agent_id.to_string(),
        });

        let history_json: Vec<serde_json::Value> = history
            .iter()
            .map(|t| json!({"role": t.role.to_string(), "content": t.content}))
            .collect();
        let payload = json!({
            "message": message,
            "history": history_json,
            "taint_state": {
                "ratio": d.budget.ratio(session_id),
                "threshold": d.config.profile.taint_threshold(),
            },
        });

        let mut env = std::collections::HashMap::new();
        env.insert(
            "AX_IPC_SOCKET".into(),
            d.layout.ipc_socket().display().to_string(),
        );
        env.insert("AX_IPC_TOKEN".into(), token);
        env.insert("AX_WORKSPACE".into(), workspace.display().to_string());
        env.insert(
            "AX_SKILLS_DIR".into(),
            workspace.join("skills").display().to_string(),
        );
        env.insert(
            "AX_PROXY_SOCKET".into(),
            d.layout.proxy_socket().display().to_string(),
        );
        env.insert("AX_AGENT_TYPE".into(), agent_id.to_string());

        let result = d
            .sandbox
            .spawn(SpawnSpec {
                program: d.agent_program.clone(),
                args: Vec::new(),
                env,
                stdin_payload: payload.to_string(),
                workspace: workspace.to_path_buf(),
                limits: d.config.sandbox_limits,
            })
            .await?;

        if result.timed_out {
            return Err(AxError::Provider("agent timed out".into()));
        }
        if result.exit_code != 0 {
            warn!(
                exit_code = result.exit_code,
                stderr = %result.stderr.chars().take(500).collect::<String>(),
                "Agent exited nonzero"
            );
        }
        Ok(result.stdout.trim_end().to_string())
    }

    fn audit(
        &self,
        session_id: &SessionId,
        agent_id: &str,
        action: &str,
        status: AuditStatus,
        detail: Option<String>,
    ) {
        self.deps.audit.record(AuditRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            action: action.to_string(),
            args_summary: String::new(),
            status,
            duration_ms: 0,
            taint: self.deps.tracker.taint_tag(session_id),
            detail,
        });
    }
}

/// Delegation support: a child agent turn under the parent's session.
///
/// The child's first message is not re-scanned by the inbound scanner: the
/// parent's scan verdict and shared taint budget already govern this
/// session, and the message originates from the parent model, not from a
/// platform user.
#[async_trait::async_trait]
impl crate::services::AgentInvoker for RequestRouter {
    async fn invoke_child(
        &self,
        agent_type: &str,
        session: &SessionId,
        message: &str,
    ) -> AxResult<String> {
        let d = &self.deps;
        let history = d.conversations.recent(session, d.config.history.max_turns)?;
        let workspace = d.workspace.ensure(session)?;
        d.workspace
            .copy_identity(&d.layout.agent_dir(agent_type), &workspace)?;
        let stdout = self
            .spawn_agent(session, agent_type, message, &history, &workspace)
            .await?;

        let session_state = d.sessions.get(session);
        let canary = session_state.map(|s| s.canary).unwrap_or_default();
        let outbound = d.outbound.scan(&stdout, &canary);
        if outbound.canary_leak {
            d.sessions.mark_compromised(session);
        }
        Ok(outbound.text)
    }
}
