//! The host-side IPC server.
//!
//! One Unix socket, one connection per sandbox. The first frame on a fresh
//! connection is a hello carrying the spawn token the host minted for the
//! session; every later frame is a request. Requests on a connection run in
//! arrival order, and taint records created by a call take effect before
//! its response is written.

use crate::services::{AuditSink, BrowserOp, CallContext, HostServices};
use ax_taint::{SessionTaintTracker, TaintBudget};
use ax_types::audit::{AuditRecord, AuditStatus};
use ax_types::{AxError, SessionId};
use ax_wire::framing::{read_frame, write_frame};
use ax_wire::request::{parse_request, IpcRequest};
use ax_wire::response::IpcResponse;
use ax_wire::Action;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// A session the host has registered for an upcoming sandbox connection.
#[derive(Debug, Clone)]
pub struct SessionRegistration {
    pub session_id: SessionId,
    pub agent_id: String,
}

/// The IPC server.
pub struct IpcServer {
    services: Arc<dyn HostServices>,
    audit: Arc<dyn AuditSink>,
    budget: Arc<TaintBudget>,
    tracker: Arc<SessionTaintTracker>,
    taint_threshold: f64,
    sensitive: HashSet<Action>,
    /// Spawn token → session context. Tokens are single-use.
    registrations: DashMap<String, SessionRegistration>,
}

impl IpcServer {
    pub fn new(
        services: Arc<dyn HostServices>,
        audit: Arc<dyn AuditSink>,
        budget: Arc<TaintBudget>,
        tracker: Arc<SessionTaintTracker>,
        taint_threshold: f64,
    ) -> Self {
        let sensitive = Action::ALL
            .iter()
            .copied()
            .filter(Action::is_sensitive)
            .collect();
        Self {
            services,
            audit,
            budget,
            tracker,
            taint_threshold,
            sensitive,
            registrations: DashMap::new(),
        }
    }

    /// Widen the sensitive-action set beyond the default.
    pub fn add_sensitive(&mut self, action: Action) {
        self.sensitive.insert(action);
    }

    /// Register a session before spawning its sandbox; the returned token
    /// is passed to the agent and authenticates its connection.
    pub fn register_session(&self, registration: SessionRegistration) -> String {
        let token = format!("{}-{}", uuid_like(), uuid_like());
        self.registrations.insert(token.clone(), registration);
        token
    }

    /// Accept connections until the listener task is dropped.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) {
        info!("IPC server listening");
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept failed");
                }
            }
        }
    }

    /// Drive one connection to completion. Generic over the stream so tests
    /// can use in-memory duplex pipes.
    pub async fn handle_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        // Handshake: exactly one hello frame, authenticated by spawn token.
        let ctx = match read_frame(&mut reader).await {
            Ok(Some(bytes)) => match self.authenticate(&bytes) {
                Ok(ctx) => {
                    let _ = write_frame(&mut writer, &IpcResponse::ok().to_bytes()).await;
                    ctx
                }
                Err(e) => {
                    warn!(error = %e, "IPC handshake rejected");
                    let _ = write_frame(&mut writer, &IpcResponse::err(e).to_bytes()).await;
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "IPC handshake framing error");
                return;
            }
        };

        debug!(session = %ctx.session_id, agent = %ctx.agent_id, "IPC connection established");

        loop {
            let bytes = match read_frame(&mut reader).await {
                Ok(Some(b)) => b,
                Ok(None) => break,
                Err(e) => {
                    warn!(session = %ctx.session_id, error = %e, "IPC framing error, closing connection");
                    break;
                }
            };

            let (response, fatal) = self.handle_frame(&ctx, &bytes).await;
            if write_frame(&mut writer, &response.to_bytes()).await.is_err() {
                break;
            }
            if fatal {
                warn!(session = %ctx.session_id, "Closing connection after protocol violation");
                break;
            }
        }

        debug!(session = %ctx.session_id, "IPC connection closed");
    }

    /// Validate the hello frame and consume its token.
    fn authenticate(&self, bytes: &[u8]) -> Result<CallContext, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| format!("malformed hello: {e}"))?;
        let token = value
            .get("hello")
            .and_then(|h| h.get("token"))
            .and_then(Value::as_str)
            .ok_or("hello frame must carry {hello:{token}}")?;

        let (_, registration) = self
            .registrations
            .remove(token)
            .ok_or("unknown or already-used spawn token")?;

        Ok(CallContext {
            session_id: registration.session_id,
            agent_id: registration.agent_id,
        })
    }

    /// Handle one request frame. The bool is true when the connection must
    /// close afterwards (malformed framing-level input).
    pub async fn handle_frame(&self, ctx: &CallContext, bytes: &[u8]) -> (IpcResponse, bool) {
        let started = std::time::Instant::now();

        let request = match parse_request(bytes) {
            Ok(r) => r,
            Err(e) => {
                let fatal = is_protocol_fatal(&e);
                self.audit_record(
                    ctx,
                    "(invalid)",
                    String::new(),
                    AuditStatus::Error,
                    started.elapsed().as_millis() as u64,
                    Some(e.clone()),
                );
                return (IpcResponse::err(e), fatal);
            }
        };

        let action = request.action();

        // Sensitive-action gate. The agent is told only an opaque code; the
        // ratio that tripped the gate goes to the audit log.
        if self.sensitive.contains(&action)
            && self
                .budget
                .blocks_sensitive(&ctx.session_id, self.taint_threshold)
        {
            let ratio = self.budget.ratio(&ctx.session_id);
            self.audit_record(
                ctx,
                action.as_str(),
                request.args_summary(),
                AuditStatus::Blocked,
                started.elapsed().as_millis() as u64,
                Some(format!(
                    "taint budget: ratio {ratio:.3} over threshold {:.3}",
                    self.taint_threshold
                )),
            );
            let err = AxError::policy("tb-1");
            return (IpcResponse::err(err.to_string()), false);
        }

        let result = self.dispatch(ctx, &request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(payload) => {
                if !action.is_query() {
                    self.audit_record(
                        ctx,
                        action.as_str(),
                        request.args_summary(),
                        AuditStatus::Success,
                        duration_ms,
                        None,
                    );
                }
                (IpcResponse::ok_with(payload), false)
            }
            Err(e) => {
                let status = if e.is_policy() {
                    AuditStatus::Blocked
                } else {
                    AuditStatus::Error
                };
                self.audit_record(
                    ctx,
                    action.as_str(),
                    request.args_summary(),
                    status,
                    duration_ms,
                    Some(e.to_string()),
                );
                (IpcResponse::err(e.to_string()), false)
            }
        }
    }

    /// Dispatch a validated request, applying taint recording rules.
    async fn dispatch(&self, ctx: &CallContext, request: &IpcRequest) -> Result<Value, AxError> {
        let session = &ctx.session_id;

        match request {
            IpcRequest::LlmCall(req) => {
                let chunks = self.services.llm_call(ctx, req).await?;
                Ok(json!({ "chunks": chunks }))
            }

            IpcRequest::MemoryWrite(req) => {
                // Host-authored tag: a write from a tainted session carries
                // the session's current provenance, conservatively even when
                // the payload mixes clean and tainted content.
                let taint = self.tracker.taint_tag(session);
                let tags = req.tags.clone().unwrap_or_default();
                let id = self
                    .services
                    .memory_write(ctx, &req.scope, &req.content, &tags, taint)
                    .await?;
                Ok(json!({ "id": id }))
            }

            IpcRequest::MemoryRead(req) => {
                let entry = self.services.memory_read(ctx, &req.id).await?;
                self.reenter_external(ctx, std::slice::from_ref(&entry));
                Ok(json!({ "entry": entry }))
            }

            IpcRequest::MemoryQuery(req) => {
                let entries = self.services.memory_query(ctx, req).await?;
                self.reenter_external(ctx, &entries);
                Ok(json!({ "entries": entries }))
            }

            IpcRequest::MemoryDelete(req) => {
                self.services.memory_delete(ctx, &req.id).await?;
                Ok(json!({}))
            }

            IpcRequest::MemoryList(req) => {
                let entries = self.services.memory_list(ctx, req).await?;
                Ok(json!({ "entries": entries }))
            }

            IpcRequest::WebFetch(req) => {
                let body = self.services.web_fetch(ctx, &req.url).await?;
                self.record_taint(ctx, Action::WebFetch, &body, Some(host_of(&req.url)));
                Ok(json!({ "content": body }))
            }

            IpcRequest::WebSearch(req) => {
                let results = self
                    .services
                    .web_search(ctx, &req.query, req.max_results.unwrap_or(5))
                    .await?;
                self.record_taint(ctx, Action::WebSearch, &results, None);
                Ok(json!({ "results": results }))
            }

            IpcRequest::BrowserNavigate(req) => {
                let op = BrowserOp::Navigate {
                    url: req.url.clone(),
                };
                let result = self.services.browser(ctx, &op).await?;
                self.record_taint(
                    ctx,
                    Action::BrowserNavigate,
                    &value_text(&result),
                    Some(host_of(&req.url)),
                );
                Ok(json!({ "result": result }))
            }

            IpcRequest::BrowserSnapshot(_) => {
                let result = self.services.browser(ctx, &BrowserOp::Snapshot).await?;
                self.record_taint(ctx, Action::BrowserSnapshot, &value_text(&result), None);
                Ok(json!({ "result": result }))
            }

            IpcRequest::BrowserClick(req) => {
                let op = BrowserOp::Click {
                    selector: req.selector.clone(),
                };
                let result = self.services.browser(ctx, &op).await?;
                Ok(json!({ "result": result }))
            }

            IpcRequest::BrowserType(req) => {
                let op = BrowserOp::Type {
                    selector: req.selector.clone(),
                    text: req.text.clone(),
                };
                let result = self.services.browser(ctx, &op).await?;
                Ok(json!({ "result": result }))
            }

            IpcRequest::BrowserScreenshot(_) => {
                let result = self.services.browser(ctx, &BrowserOp::Screenshot).await?;
                Ok(json!({ "result": result }))
            }

            IpcRequest::SkillList(_) => {
                let skills = self.services.skill_list(ctx).await?;
                Ok(json!({ "skills": skills }))
            }

            IpcRequest::SkillRead(req) => {
                let content = self.services.skill_read(ctx, &req.name).await?;
                Ok(json!({ "content": content }))
            }

            IpcRequest::SkillPropose(req) => {
                let verdict = self.services.skill_propose(ctx, req).await?;
                Ok(json!({ "verdict": verdict }))
            }

            IpcRequest::SchedulerAddCron(req) => {
                let id = self.services.scheduler_add_cron(ctx, req).await?;
                Ok(json!({ "id": id.to_string() }))
            }

            IpcRequest::SchedulerRemoveCron(req) => {
                let id: ax_types::scheduler::CronJobId = req
                    .id
                    .parse()
                    .map_err(|_| AxError::Validation("invalid job id".into()))?;
                self.services.scheduler_remove_cron(ctx, id).await?;
                Ok(json!({}))
            }

            IpcRequest::SchedulerListJobs(_) => {
                let jobs = self.services.scheduler_list_jobs(ctx).await?;
                Ok(json!({ "jobs": jobs }))
            }

            IpcRequest::SchedulerRunAt(req) => {
                let id = self.services.scheduler_run_at(ctx, req).await?;
                Ok(json!({ "id": id.to_string() }))
            }

            IpcRequest::AuditQuery(req) => {
                // The agent sees only its own session's entries.
                let filter = ax_types::audit::AuditFilter {
                    session_id: Some(ctx.session_id.to_string()),
                    action: req.action.clone(),
                    status: req.status.as_deref().and_then(parse_status),
                    limit: Some(req.limit.unwrap_or(100)),
                };
                let entries = self.audit.query(&filter);
                Ok(json!({ "entries": entries }))
            }

            IpcRequest::Delegate(req) => {
                let response = self
                    .services
                    .delegate(ctx, &req.agent_type, &req.message)
                    .await?;
                Ok(json!({ "response": response }))
            }
        }
    }

    /// Record a successful taint-producing action: content into the budget,
    /// provenance into the tracker.
    fn record_taint(&self, ctx: &CallContext, action: Action, content: &str, detail: Option<String>) {
        self.budget.record_content(&ctx.session_id, content, true);
        self.tracker
            .record_source(&ctx.session_id, action.as_str(), detail);
    }

    /// Re-enter externally-tagged memory entries into the reading session's
    /// budget and record a derived source.
    fn reenter_external(&self, ctx: &CallContext, entries: &[ax_types::memory::MemoryEntry]) {
        for entry in entries.iter().filter(|e| e.is_external()) {
            self.budget
                .record_content(&ctx.session_id, &entry.content, true);
            let origin = entry
                .taint
                .as_ref()
                .map(|t| t.source.clone())
                .unwrap_or_default();
            self.tracker.record_source(
                &ctx.session_id,
                &origin,
                Some(format!("re-read from memory entry {}", entry.id)),
            );
        }
    }

    fn audit_record(
        &self,
        ctx: &CallContext,
        action: &str,
        args_summary: String,
        status: AuditStatus,
        duration_ms: u64,
        detail: Option<String>,
    ) {
        self.audit.record(AuditRecord {
            timestamp: Utc::now(),
            session_id: ctx.session_id.to_string(),
            agent_id: ctx.agent_id.clone(),
            action: action.to_string(),
            args_summary,
            status,
            duration_ms,
            taint: self.tracker.taint_tag(&ctx.session_id),
            detail,
        });
    }
}

/// Whether a parse failure leaves the connection in a state that must be
/// closed: unparseable JSON or a schema failure on a mandatory field.
fn is_protocol_fatal(error: &str) -> bool {
    error.contains("malformed JSON")
        || error.contains("must be a JSON object")
        || error.contains("missing required field")
        || error.contains("missing field")
}

fn parse_status(s: &str) -> Option<AuditStatus> {
    match s {
        "success" => Some(AuditStatus::Success),
        "blocked" => Some(AuditStatus::Blocked),
        "error" => Some(AuditStatus::Error),
        _ => None,
    }
}

/// Best-effort host extraction for audit detail.
fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .to_string()
}

/// Extract human-readable text from a browser result for budget purposes.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Random token half; two joined halves make a spawn token.
fn uuid_like() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_types::audit::AuditFilter;
    use ax_types::memory::MemoryEntry;
    use ax_types::skill::SkillVerdict;
    use ax_types::taint::TaintTag;
    use ax_types::AxResult;
    use ax_wire::llm::LlmChunk;
    use ax_wire::request::{
        LlmCallRequest, MemoryListRequest, MemoryQueryRequest, SchedulerAddCronRequest,
        SchedulerRunAtRequest, SkillProposeRequest,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory audit sink for assertions.
    #[derive(Default)]
    struct TestAudit {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for TestAudit {
        fn record(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }

        fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
            let records = self.records.lock().unwrap();
            let limit = filter.limit.unwrap_or(100);
            records
                .iter()
                .rev()
                .filter(|r| filter.matches(r))
                .take(limit)
                .cloned()
                .collect()
        }
    }

    /// Canned services: web_fetch returns a fixed body, memory is a vec.
    #[derive(Default)]
    struct TestServices {
        fetch_body: String,
        memory: Mutex<Vec<MemoryEntry>>,
    }

    #[async_trait]
    impl HostServices for TestServices {
        async fn llm_call(
            &self,
            _ctx: &CallContext,
            _req: &LlmCallRequest,
        ) -> AxResult<Vec<LlmChunk>> {
            Ok(vec![
                LlmChunk::TextDelta {
                    text: "hello".into(),
                },
                LlmChunk::Done {
                    input_tokens: 3,
                    output_tokens: 1,
                },
            ])
        }

        async fn memory_write(
            &self,
            _ctx: &CallContext,
            scope: &str,
            content: &str,
            tags: &[String],
            taint: Option<TaintTag>,
        ) -> AxResult<String> {
            let mut memory = self.memory.lock().unwrap();
            let id = format!("m{}", memory.len());
            memory.push(MemoryEntry {
                id: id.clone(),
                scope: scope.into(),
                content: content.into(),
                tags: tags.to_vec(),
                taint,
                created_at: Utc::now(),
            });
            Ok(id)
        }

        async fn memory_read(&self, _ctx: &CallContext, id: &str) -> AxResult<MemoryEntry> {
            self.memory
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| AxError::NotFound(format!("memory entry {id}")))
        }

        async fn memory_query(
            &self,
            _ctx: &CallContext,
            req: &MemoryQueryRequest,
        ) -> AxResult<Vec<MemoryEntry>> {
            Ok(self
                .memory
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.content.contains(&req.query))
                .cloned()
                .collect())
        }

        async fn memory_delete(&self, _ctx: &CallContext, id: &str) -> AxResult<()> {
            self.memory.lock().unwrap().retain(|e| e.id != id);
            Ok(())
        }

        async fn memory_list(
            &self,
            _ctx: &CallContext,
            _req: &MemoryListRequest,
        ) -> AxResult<Vec<MemoryEntry>> {
            Ok(self.memory.lock().unwrap().clone())
        }

        async fn web_fetch(&self, _ctx: &CallContext, _url: &str) -> AxResult<String> {
            Ok(self.fetch_body.clone())
        }

        async fn web_search(
            &self,
            _ctx: &CallContext,
            _query: &str,
            _max: usize,
        ) -> AxResult<String> {
            Ok("result snippets".into())
        }

        async fn browser(&self, _ctx: &CallContext, _op: &BrowserOp) -> AxResult<Value> {
            Ok(json!("page text"))
        }

        async fn skill_list(&self, _ctx: &CallContext) -> AxResult<Vec<String>> {
            Ok(vec!["summarize".into()])
        }

        async fn skill_read(&self, _ctx: &CallContext, _name: &str) -> AxResult<String> {
            Ok("skill body".into())
        }

        async fn skill_propose(
            &self,
            _ctx: &CallContext,
            _req: &SkillProposeRequest,
        ) -> AxResult<SkillVerdict> {
            Ok(SkillVerdict::AutoApprove)
        }

        async fn scheduler_add_cron(
            &self,
            _ctx: &CallContext,
            _req: &SchedulerAddCronRequest,
        ) -> AxResult<ax_types::scheduler::CronJobId> {
            Ok(ax_types::scheduler::CronJobId::new())
        }

        async fn scheduler_remove_cron(
            &self,
            _ctx: &CallContext,
            _id: ax_types::scheduler::CronJobId,
        ) -> AxResult<()> {
            Ok(())
        }

        async fn scheduler_list_jobs(
            &self,
            _ctx: &CallContext,
        ) -> AxResult<Vec<ax_types::scheduler::CronJob>> {
            Ok(vec![])
        }

        async fn scheduler_run_at(
            &self,
            _ctx: &CallContext,
            _req: &SchedulerRunAtRequest,
        ) -> AxResult<ax_types::scheduler::CronJobId> {
            Ok(ax_types::scheduler::CronJobId::new())
        }

        async fn delegate(
            &self,
            _ctx: &CallContext,
            _agent_type: &str,
            _message: &str,
        ) -> AxResult<String> {
            Ok("child says hi".into())
        }
    }

    struct Fixture {
        server: IpcServer,
        audit: Arc<TestAudit>,
        budget: Arc<TaintBudget>,
        tracker: Arc<SessionTaintTracker>,
        ctx: CallContext,
    }

    fn fixture_with(fetch_body: String, threshold: f64) -> Fixture {
        let audit = Arc::new(TestAudit::default());
        let budget = Arc::new(TaintBudget::new());
        let tracker = Arc::new(SessionTaintTracker::new());
        let services = Arc::new(TestServices {
            fetch_body,
            ..Default::default()
        });
        let server = IpcServer::new(
            services,
            audit.clone(),
            budget.clone(),
            tracker.clone(),
            threshold,
        );
        let ctx = CallContext {
            session_id: SessionId::generate(),
            agent_id: "main".into(),
        };
        Fixture {
            server,
            audit,
            budget,
            tracker,
            ctx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with("page body".into(), 0.30)
    }

    async fn call(f: &Fixture, json: &str) -> IpcResponse {
        let (resp, _) = f.server.handle_frame(&f.ctx, json.as_bytes()).await;
        resp
    }

    #[tokio::test]
    async fn well_formed_call_dispatches() {
        let f = fixture();
        let resp = call(
            &f,
            r#"{"action":"memory_write","scope":"notes","content":"remember"}"#,
        )
        .await;
        assert!(resp.is_ok(), "{:?}", resp);
        assert_eq!(resp.as_value()["id"], "m0");
    }

    #[tokio::test]
    async fn unknown_action_keeps_connection() {
        let f = fixture();
        let (resp, fatal) = f
            .server
            .handle_frame(&f.ctx, br#"{"action":"format_disk"}"#)
            .await;
        assert!(!resp.is_ok());
        assert!(!fatal);
    }

    #[tokio::test]
    async fn malformed_json_is_fatal() {
        let f = fixture();
        let (resp, fatal) = f.server.handle_frame(&f.ctx, b"{nope").await;
        assert!(!resp.is_ok());
        assert!(fatal);
    }

    #[tokio::test]
    async fn missing_mandatory_field_is_fatal() {
        let f = fixture();
        let (resp, fatal) = f
            .server
            .handle_frame(&f.ctx, br#"{"action":"memory_write","scope":"s"}"#)
            .await;
        assert!(!resp.is_ok());
        assert!(fatal);
    }

    #[tokio::test]
    async fn web_fetch_records_taint_before_response() {
        let f = fixture_with("x".repeat(4000), 0.30);
        let resp = call(&f, r#"{"action":"web_fetch","url":"https://example.com/p"}"#).await;
        assert!(resp.is_ok());
        assert!(f.tracker.is_tainted(&f.ctx.session_id));
        assert_eq!(f.budget.totals(&f.ctx.session_id).tainted_tokens, 1000);
        let tag = f.tracker.taint_tag(&f.ctx.session_id).unwrap();
        assert_eq!(tag.source, "web_fetch");
    }

    #[tokio::test]
    async fn tainted_session_blocks_sensitive_actions() {
        let f = fixture_with("x".repeat(40_000), 0.30);
        call(&f, r#"{"action":"web_fetch","url":"https://evil.example/p"}"#).await;
        assert!(f.budget.ratio(&f.ctx.session_id) > 0.99);

        let resp = call(
            &f,
            r#"{"action":"skill_propose","name":"helper","description":"d","content":"body"}"#,
        )
        .await;
        assert!(!resp.is_ok());
        let error = resp.error().unwrap();
        assert!(error.contains("blocked by security policy"), "{error}");
        // No bypass detail leaks to the agent.
        assert!(!error.contains("ratio"), "{error}");
        assert!(!error.contains("threshold"), "{error}");

        // The denial is audited with the real reason.
        let blocked = f.audit.query(&AuditFilter {
            status: Some(AuditStatus::Blocked),
            ..Default::default()
        });
        assert_eq!(blocked.len(), 1);
        assert!(blocked[0].detail.as_ref().unwrap().contains("ratio"));
    }

    #[tokio::test]
    async fn non_sensitive_reads_allowed_when_tainted() {
        let f = fixture_with("x".repeat(40_000), 0.30);
        call(&f, r#"{"action":"web_fetch","url":"https://example.com"}"#).await;
        let resp = call(&f, r#"{"action":"memory_query","query":"anything"}"#).await;
        assert!(resp.is_ok());
    }

    #[tokio::test]
    async fn clean_session_allows_sensitive_actions() {
        let f = fixture();
        let resp = call(
            &f,
            r#"{"action":"skill_propose","name":"helper","description":"d","content":"body"}"#,
        )
        .await;
        assert!(resp.is_ok());
        assert_eq!(resp.as_value()["verdict"], "auto_approve");
    }

    #[tokio::test]
    async fn memory_write_from_tainted_session_is_stamped() {
        let f = fixture();
        call(&f, r#"{"action":"web_fetch","url":"https://example.com"}"#).await;
        call(
            &f,
            r#"{"action":"memory_write","scope":"notes","content":"mixed content"}"#,
        )
        .await;

        let resp = call(&f, r#"{"action":"memory_read","id":"m0"}"#).await;
        assert!(resp.is_ok());
        let entry = &resp.as_value()["entry"];
        assert_eq!(entry["taint"]["trust"], "external");
        assert_eq!(entry["taint"]["source"], "web_fetch");
    }

    #[tokio::test]
    async fn memory_write_from_clean_session_is_untagged() {
        let f = fixture();
        call(
            &f,
            r#"{"action":"memory_write","scope":"notes","content":"clean"}"#,
        )
        .await;
        let resp = call(&f, r#"{"action":"memory_read","id":"m0"}"#).await;
        assert!(resp.as_value()["entry"].get("taint").is_none());
    }

    #[tokio::test]
    async fn reading_external_entry_reenters_budget() {
        // Session A fetches and writes; a fresh session reads the entry.
        let f = fixture();
        call(&f, r#"{"action":"web_fetch","url":"https://example.com"}"#).await;
        let content = "z".repeat(400);
        call(
            &f,
            &format!(r#"{{"action":"memory_write","scope":"notes","content":"{content}"}}"#),
        )
        .await;

        let fresh = CallContext {
            session_id: SessionId::generate(),
            agent_id: "main".into(),
        };
        let (resp, _) = f
            .server
            .handle_frame(&fresh, br#"{"action":"memory_read","id":"m0"}"#)
            .await;
        assert!(resp.is_ok());

        // ~⌈400/4⌉ tokens re-entered as tainted.
        assert_eq!(f.budget.totals(&fresh.session_id).tainted_tokens, 100);
        assert!(f.tracker.is_tainted(&fresh.session_id));
        let tag = f.tracker.taint_tag(&fresh.session_id).unwrap();
        assert_eq!(tag.source, "web_fetch");
    }

    #[tokio::test]
    async fn successful_writes_are_audited_with_duration() {
        let f = fixture();
        call(
            &f,
            r#"{"action":"memory_write","scope":"notes","content":"c"}"#,
        )
        .await;
        let records = f.audit.query(&AuditFilter::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "memory_write");
        assert_eq!(records[0].status, AuditStatus::Success);
        assert_eq!(records[0].agent_id, "main");
    }

    #[tokio::test]
    async fn queries_are_not_audited() {
        let f = fixture();
        call(&f, r#"{"action":"memory_list"}"#).await;
        call(&f, r#"{"action":"skill_list"}"#).await;
        assert!(f.audit.query(&AuditFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn audit_query_is_scoped_to_own_session() {
        let f = fixture();
        call(
            &f,
            r#"{"action":"memory_write","scope":"notes","content":"c"}"#,
        )
        .await;

        // Another session's record.
        let other = CallContext {
            session_id: SessionId::generate(),
            agent_id: "main".into(),
        };
        f.server
            .handle_frame(
                &other,
                br#"{"action":"memory_write","scope":"notes","content":"o"}"#,
            )
            .await;

        let resp = call(&f, r#"{"action":"audit_query"}"#).await;
        let entries = resp.as_value()["entries"].as_array().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["session_id"], f.ctx.session_id.to_string());
    }

    #[tokio::test]
    async fn handshake_token_is_single_use() {
        let f = fixture();
        let token = f.server.register_session(SessionRegistration {
            session_id: SessionId::generate(),
            agent_id: "main".into(),
        });
        let hello = format!(r#"{{"hello":{{"token":"{token}"}}}}"#);
        assert!(f.server.authenticate(hello.as_bytes()).is_ok());
        assert!(f.server.authenticate(hello.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn handshake_rejects_unknown_token() {
        let f = fixture();
        assert!(f
            .server
            .authenticate(br#"{"hello":{"token":"bogus"}}"#)
            .is_err());
        assert!(f.server.authenticate(br#"{"nope":true}"#).is_err());
    }

    #[tokio::test]
    async fn full_connection_roundtrip() {
        let f = fixture();
        let server = Arc::new(f.server);
        let token = server.register_session(SessionRegistration {
            session_id: SessionId::generate(),
            agent_id: "main".into(),
        });

        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let server_clone = Arc::clone(&server);
        let conn = tokio::spawn(async move {
            server_clone.handle_connection(server_side).await;
        });

        let (mut reader, mut writer) = tokio::io::split(client_side);
        let hello = format!(r#"{{"hello":{{"token":"{token}"}}}}"#);
        write_frame(&mut writer, hello.as_bytes()).await.unwrap();
        let ack = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(IpcResponse::from_bytes(&ack).unwrap().is_ok());

        write_frame(
            &mut writer,
            br#"{"action":"memory_write","scope":"notes","content":"hi"}"#,
        )
        .await
        .unwrap();
        let reply = read_frame(&mut reader).await.unwrap().unwrap();
        let resp = IpcResponse::from_bytes(&reply).unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.as_value()["id"], "m0");

        drop(writer);
        drop(reader);
        conn.await.unwrap();
    }

    #[test]
    fn host_of_extracts_host() {
        assert_eq!(host_of("https://example.com/a/b"), "example.com");
        assert_eq!(host_of("http://localhost:8080/x"), "localhost:8080");
        assert_eq!(host_of("garbage"), "");
    }
}
