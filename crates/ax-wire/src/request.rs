//! Strict per-action request schemas.
//!
//! Parsing is two-step: the `action` tag is resolved first so an unknown
//! action yields a distinct error, then the remaining fields are parsed into
//! the per-action struct with `deny_unknown_fields` and validated against
//! explicit bounds. Context fields (`session_id`, `agent_id`) and taint
//! flags are host-authored; a payload carrying them is rejected outright.

use crate::action::Action;
use ax_types::address::Delivery;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length for identifiers used as path segments.
pub const MAX_IDENT_LEN: usize = 64;
/// Maximum length for short descriptive strings.
pub const MAX_SHORT_LEN: usize = 200;
/// Maximum length for free-form content.
pub const MAX_CONTENT_LEN: usize = 10_000;
/// Maximum URL length.
pub const MAX_URL_LEN: usize = 2048;
/// Maximum messages in one llm_call.
pub const MAX_MESSAGES: usize = 200;
/// Maximum tags on one memory entry.
pub const MAX_TAGS: usize = 16;

/// Top-level fields the agent may never set; the host injects context from
/// the connection handshake.
const RESERVED_FIELDS: &[&str] = &["session_id", "agent_id", "tainted", "taint"];

/// A parsed, validated IPC request.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcRequest {
    LlmCall(LlmCallRequest),
    MemoryWrite(MemoryWriteRequest),
    MemoryRead(MemoryReadRequest),
    MemoryQuery(MemoryQueryRequest),
    MemoryDelete(MemoryDeleteRequest),
    MemoryList(MemoryListRequest),
    WebFetch(WebFetchRequest),
    WebSearch(WebSearchRequest),
    BrowserNavigate(BrowserNavigateRequest),
    BrowserSnapshot(BrowserSnapshotRequest),
    BrowserClick(BrowserClickRequest),
    BrowserType(BrowserTypeRequest),
    BrowserScreenshot(BrowserScreenshotRequest),
    SkillList(SkillListRequest),
    SkillRead(SkillReadRequest),
    SkillPropose(SkillProposeRequest),
    SchedulerAddCron(SchedulerAddCronRequest),
    SchedulerRemoveCron(SchedulerRemoveCronRequest),
    SchedulerListJobs(SchedulerListJobsRequest),
    SchedulerRunAt(SchedulerRunAtRequest),
    AuditQuery(AuditQueryRequest),
    Delegate(DelegateRequest),
}

impl IpcRequest {
    /// The action this request carries.
    pub fn action(&self) -> Action {
        match self {
            IpcRequest::LlmCall(_) => Action::LlmCall,
            IpcRequest::MemoryWrite(_) => Action::MemoryWrite,
            IpcRequest::MemoryRead(_) => Action::MemoryRead,
            IpcRequest::MemoryQuery(_) => Action::MemoryQuery,
            IpcRequest::MemoryDelete(_) => Action::MemoryDelete,
            IpcRequest::MemoryList(_) => Action::MemoryList,
            IpcRequest::WebFetch(_) => Action::WebFetch,
            IpcRequest::WebSearch(_) => Action::WebSearch,
            IpcRequest::BrowserNavigate(_) => Action::BrowserNavigate,
            IpcRequest::BrowserSnapshot(_) => Action::BrowserSnapshot,
            IpcRequest::BrowserClick(_) => Action::BrowserClick,
            IpcRequest::BrowserType(_) => Action::BrowserType,
            IpcRequest::BrowserScreenshot(_) => Action::BrowserScreenshot,
            IpcRequest::SkillList(_) => Action::SkillList,
            IpcRequest::SkillRead(_) => Action::SkillRead,
            IpcRequest::SkillPropose(_) => Action::SkillPropose,
            IpcRequest::SchedulerAddCron(_) => Action::SchedulerAddCron,
            IpcRequest::SchedulerRemoveCron(_) => Action::SchedulerRemoveCron,
            IpcRequest::SchedulerListJobs(_) => Action::SchedulerListJobs,
            IpcRequest::SchedulerRunAt(_) => Action::SchedulerRunAt,
            IpcRequest::AuditQuery(_) => Action::AuditQuery,
            IpcRequest::Delegate(_) => Action::Delegate,
        }
    }

    /// A short, credential-free argument summary for the audit log.
    pub fn args_summary(&self) -> String {
        match self {
            IpcRequest::LlmCall(r) => format!("messages={}", r.messages.len()),
            IpcRequest::MemoryWrite(r) => {
                format!("scope={} len={}", r.scope, r.content.len())
            }
            IpcRequest::MemoryRead(r) => format!("id={}", r.id),
            IpcRequest::MemoryQuery(r) => format!("query_len={}", r.query.len()),
            IpcRequest::MemoryDelete(r) => format!("id={}", r.id),
            IpcRequest::MemoryList(_) => String::new(),
            IpcRequest::WebFetch(r) => format!("url={}", redact_url(&r.url)),
            IpcRequest::WebSearch(r) => format!("query_len={}", r.query.len()),
            IpcRequest::BrowserNavigate(r) => format!("url={}", redact_url(&r.url)),
            IpcRequest::BrowserSnapshot(_) => String::new(),
            IpcRequest::BrowserClick(r) => format!("selector={}", r.selector),
            IpcRequest::BrowserType(r) => {
                format!("selector={} len={}", r.selector, r.text.len())
            }
            IpcRequest::BrowserScreenshot(_) => String::new(),
            IpcRequest::SkillList(_) => String::new(),
            IpcRequest::SkillRead(r) => format!("name={}", r.name),
            IpcRequest::SkillPropose(r) => {
                format!("name={} len={}", r.name, r.content.len())
            }
            IpcRequest::SchedulerAddCron(r) => format!("schedule={}", r.schedule),
            IpcRequest::SchedulerRemoveCron(r) => format!("id={}", r.id),
            IpcRequest::SchedulerListJobs(_) => String::new(),
            IpcRequest::SchedulerRunAt(r) => format!("at={}", r.at),
            IpcRequest::AuditQuery(_) => String::new(),
            IpcRequest::Delegate(r) => format!("agent_type={}", r.agent_type),
        }
    }
}

/// Strip query string and fragment from a URL before it reaches the audit
/// log; query parameters routinely carry tokens.
fn redact_url(url: &str) -> &str {
    let end = url
        .find(|c| c == '?' || c == '#')
        .unwrap_or(url.len());
    &url[..end]
}

/// Parse and validate a raw request frame.
pub fn parse_request(bytes: &[u8]) -> Result<IpcRequest, String> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| format!("malformed JSON: {e}"))?;

    let mut obj = match value {
        Value::Object(map) => map,
        _ => return Err("request must be a JSON object".into()),
    };

    for reserved in RESERVED_FIELDS {
        if obj.contains_key(*reserved) {
            return Err(format!("field '{reserved}' is host-authored and not accepted"));
        }
    }

    let action_name = match obj.remove("action") {
        Some(Value::String(s)) => s,
        Some(_) => return Err("field 'action' must be a string".into()),
        None => return Err("missing required field 'action'".into()),
    };
    let action = Action::from_name(&action_name)
        .ok_or_else(|| format!("unknown action: {action_name:?}"))?;

    let body = Value::Object(obj);
    let strict = |e: serde_json::Error| format!("invalid {action_name} request: {e}");

    let request = match action {
        Action::LlmCall => IpcRequest::LlmCall(serde_json::from_value(body).map_err(strict)?),
        Action::MemoryWrite => {
            IpcRequest::MemoryWrite(serde_json::from_value(body).map_err(strict)?)
        }
        Action::MemoryRead => {
            IpcRequest::MemoryRead(serde_json::from_value(body).map_err(strict)?)
        }
        Action::MemoryQuery => {
            IpcRequest::MemoryQuery(serde_json::from_value(body).map_err(strict)?)
        }
        Action::MemoryDelete => {
            IpcRequest::MemoryDelete(serde_json::from_value(body).map_err(strict)?)
        }
        Action::MemoryList => {
            IpcRequest::MemoryList(serde_json::from_value(body).map_err(strict)?)
        }
        Action::WebFetch => IpcRequest::WebFetch(serde_json::from_value(body).map_err(strict)?),
        Action::WebSearch => {
            IpcRequest::WebSearch(serde_json::from_value(body).map_err(strict)?)
        }
        Action::BrowserNavigate => {
            IpcRequest::BrowserNavigate(serde_json::from_value(body).map_err(strict)?)
        }
        Action::BrowserSnapshot => {
            IpcRequest::BrowserSnapshot(serde_json::from_value(body).map_err(strict)?)
        }
        Action::BrowserClick => {
            IpcRequest::BrowserClick(serde_json::from_value(body).map_err(strict)?)
        }
        Action::BrowserType => {
            IpcRequest::BrowserType(serde_json::from_value(body).map_err(strict)?)
        }
        Action::BrowserScreenshot => {
            IpcRequest::BrowserScreenshot(serde_json::from_value(body).map_err(strict)?)
        }
        Action::SkillList => IpcRequest::SkillList(serde_json::from_value(body).map_err(strict)?),
        Action::SkillRead => IpcRequest::SkillRead(serde_json::from_value(body).map_err(strict)?),
        Action::SkillPropose => {
            IpcRequest::SkillPropose(serde_json::from_value(body).map_err(strict)?)
        }
        Action::SchedulerAddCron => {
            IpcRequest::SchedulerAddCron(serde_json::from_value(body).map_err(strict)?)
        }
        Action::SchedulerRemoveCron => {
            IpcRequest::SchedulerRemoveCron(serde_json::from_value(body).map_err(strict)?)
        }
        Action::SchedulerListJobs => {
            IpcRequest::SchedulerListJobs(serde_json::from_value(body).map_err(strict)?)
        }
        Action::SchedulerRunAt => {
            IpcRequest::SchedulerRunAt(serde_json::from_value(body).map_err(strict)?)
        }
        Action::AuditQuery => {
            IpcRequest::AuditQuery(serde_json::from_value(body).map_err(strict)?)
        }
        Action::Delegate => IpcRequest::Delegate(serde_json::from_value(body).map_err(strict)?),
    };

    request.validate()?;
    Ok(request)
}

impl IpcRequest {
    /// Apply the per-action field bounds.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            IpcRequest::LlmCall(r) => r.validate(),
            IpcRequest::MemoryWrite(r) => r.validate(),
            IpcRequest::MemoryRead(r) => check_ident("id", &r.id),
            IpcRequest::MemoryQuery(r) => r.validate(),
            IpcRequest::MemoryDelete(r) => check_ident("id", &r.id),
            IpcRequest::MemoryList(r) => r.validate(),
            IpcRequest::WebFetch(r) => check_url("url", &r.url),
            IpcRequest::WebSearch(r) => r.validate(),
            IpcRequest::BrowserNavigate(r) => check_url("url", &r.url),
            IpcRequest::BrowserSnapshot(_) => Ok(()),
            IpcRequest::BrowserClick(r) => check_short("selector", &r.selector),
            IpcRequest::BrowserType(r) => {
                check_short("selector", &r.selector)?;
                check_content("text", &r.text)
            }
            IpcRequest::BrowserScreenshot(_) => Ok(()),
            IpcRequest::SkillList(_) => Ok(()),
            IpcRequest::SkillRead(r) => check_ident("name", &r.name),
            IpcRequest::SkillPropose(r) => r.validate(),
            IpcRequest::SchedulerAddCron(r) => r.validate(),
            IpcRequest::SchedulerRemoveCron(r) => check_uuid("id", &r.id),
            IpcRequest::SchedulerListJobs(_) => Ok(()),
            IpcRequest::SchedulerRunAt(r) => r.validate(),
            IpcRequest::AuditQuery(r) => r.validate(),
            IpcRequest::Delegate(r) => {
                check_ident("agent_type", &r.agent_type)?;
                check_content("message", &r.message)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared field validators
// ---------------------------------------------------------------------------

/// Reject any string containing a NUL byte.
fn check_no_nul(field: &str, s: &str) -> Result<(), String> {
    if s.contains('\0') {
        return Err(format!("field '{field}' contains NUL byte"));
    }
    Ok(())
}

/// Identifier used as a path segment: `[A-Za-z0-9_-]+`, bounded, no `..`.
fn check_ident(field: &str, s: &str) -> Result<(), String> {
    check_no_nul(field, s)?;
    if s.is_empty() || s.len() > MAX_IDENT_LEN {
        return Err(format!("field '{field}' must be 1..={MAX_IDENT_LEN} characters"));
    }
    if s.contains("..") {
        return Err(format!("field '{field}' must not contain '..'"));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("field '{field}' may only contain [A-Za-z0-9_-]"));
    }
    Ok(())
}

/// Short descriptive string, bounded and NUL-free.
fn check_short(field: &str, s: &str) -> Result<(), String> {
    check_no_nul(field, s)?;
    if s.is_empty() || s.len() > MAX_SHORT_LEN {
        return Err(format!("field '{field}' must be 1..={MAX_SHORT_LEN} characters"));
    }
    Ok(())
}

/// Free-form content, bounded and NUL-free. Empty is allowed.
fn check_content(field: &str, s: &str) -> Result<(), String> {
    check_no_nul(field, s)?;
    if s.len() > MAX_CONTENT_LEN {
        return Err(format!(
            "field '{field}' too long ({} chars, max {MAX_CONTENT_LEN})",
            s.len()
        ));
    }
    Ok(())
}

/// http(s) URL, bounded and NUL-free.
fn check_url(field: &str, s: &str) -> Result<(), String> {
    check_no_nul(field, s)?;
    if s.len() > MAX_URL_LEN {
        return Err(format!("field '{field}' too long (max {MAX_URL_LEN})"));
    }
    if !s.starts_with("http://") && !s.starts_with("https://") {
        return Err(format!("field '{field}' must start with http:// or https://"));
    }
    Ok(())
}

/// Lowercase hyphenated UUID.
fn check_uuid(field: &str, s: &str) -> Result<(), String> {
    check_no_nul(field, s)?;
    let ok = s.len() == 36
        && s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => matches!(b, b'0'..=b'9' | b'a'..=b'f'),
        });
    if !ok {
        return Err(format!("field '{field}' must be a lowercase UUID"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-action schemas
// ---------------------------------------------------------------------------

/// One message in an `llm_call` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireMessage {
    /// `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,
    pub content: String,
}

/// A tool the model may call, in JSON-schema form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmCallRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmCallRequest {
    fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".into());
        }
        if self.messages.len() > MAX_MESSAGES {
            return Err(format!("too many messages (max {MAX_MESSAGES})"));
        }
        for (i, m) in self.messages.iter().enumerate() {
            if !matches!(m.role.as_str(), "system" | "user" | "assistant" | "tool") {
                return Err(format!("message {i} has unknown role {:?}", m.role));
            }
            check_no_nul("content", &m.content)?;
        }
        if let Some(tools) = &self.tools {
            for t in tools {
                check_ident("tool name", &t.name)?;
                check_short("tool description", &t.description)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryWriteRequest {
    pub scope: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl MemoryWriteRequest {
    fn validate(&self) -> Result<(), String> {
        check_ident("scope", &self.scope)?;
        check_content("content", &self.content)?;
        if let Some(tags) = &self.tags {
            if tags.len() > MAX_TAGS {
                return Err(format!("too many tags (max {MAX_TAGS})"));
            }
            for tag in tags {
                check_ident("tag", tag)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryReadRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryQueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MemoryQueryRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(scope) = &self.scope {
            check_ident("scope", scope)?;
        }
        check_short("query", &self.query)?;
        if let Some(limit) = self.limit {
            if limit == 0 || limit > 100 {
                return Err("limit must be 1..=100".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryDeleteRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MemoryListRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(scope) = &self.scope {
            check_ident("scope", scope)?;
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > 100 {
                return Err("limit must be 1..=100".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebFetchRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebSearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl WebSearchRequest {
    fn validate(&self) -> Result<(), String> {
        check_short("query", &self.query)?;
        if let Some(n) = self.max_results {
            if n == 0 || n > 20 {
                return Err("max_results must be 1..=20".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserNavigateRequest {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserSnapshotRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserClickRequest {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserTypeRequest {
    pub selector: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserScreenshotRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillListRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillReadRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillProposeRequest {
    pub name: String,
    pub description: String,
    pub content: String,
}

impl SkillProposeRequest {
    fn validate(&self) -> Result<(), String> {
        check_ident("name", &self.name)?;
        check_short("description", &self.description)?;
        if self.content.is_empty() {
            return Err("skill content must not be empty".into());
        }
        check_content("content", &self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerAddCronRequest {
    pub schedule: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
}

impl SchedulerAddCronRequest {
    fn validate(&self) -> Result<(), String> {
        check_no_nul("schedule", &self.schedule)?;
        ax_types::scheduler::validate_cron_expr(&self.schedule)?;
        if self.prompt.is_empty() {
            return Err("prompt must not be empty".into());
        }
        check_content("prompt", &self.prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerRemoveCronRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerListJobsRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerRunAtRequest {
    /// RFC 3339 timestamp.
    pub at: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
}

impl SchedulerRunAtRequest {
    fn validate(&self) -> Result<(), String> {
        check_short("at", &self.at)?;
        if chrono::DateTime::parse_from_rfc3339(&self.at).is_err() {
            return Err("field 'at' must be an RFC 3339 timestamp".into());
        }
        if self.prompt.is_empty() {
            return Err("prompt must not be empty".into());
        }
        check_content("prompt", &self.prompt)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditQueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditQueryRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(action) = &self.action {
            if Action::from_name(action).is_none() {
                return Err(format!("unknown action filter: {action:?}"));
            }
        }
        if let Some(status) = &self.status {
            if !matches!(status.as_str(), "success" | "blocked" | "error") {
                return Err(format!("unknown status filter: {status:?}"));
            }
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > 500 {
                return Err("limit must be 1..=500".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegateRequest {
    pub agent_type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<IpcRequest, String> {
        parse_request(json.as_bytes())
    }

    #[test]
    fn well_formed_request_accepted() {
        let req = parse(r#"{"action":"memory_write","scope":"notes","content":"hello"}"#).unwrap();
        assert_eq!(req.action(), Action::MemoryWrite);
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let err =
            parse(r#"{"action":"memory_write","scope":"s","content":"c","extra":1}"#).unwrap_err();
        assert!(err.contains("memory_write"), "{err}");
    }

    #[test]
    fn unknown_nested_field_rejected() {
        let err = parse(
            r#"{"action":"llm_call","messages":[{"role":"user","content":"hi","sneaky":1}]}"#,
        )
        .unwrap_err();
        assert!(err.contains("llm_call"), "{err}");
    }

    #[test]
    fn missing_required_field_rejected() {
        let err = parse(r#"{"action":"memory_write","scope":"s"}"#).unwrap_err();
        assert!(err.contains("content"), "{err}");
    }

    #[test]
    fn agent_authored_taint_rejected() {
        let err = parse(r#"{"action":"memory_write","scope":"s","content":"c","tainted":true}"#)
            .unwrap_err();
        assert!(err.contains("tainted"), "{err}");
        // The same payload without the flag is fine.
        assert!(parse(r#"{"action":"memory_write","scope":"s","content":"c"}"#).is_ok());
    }

    #[test]
    fn context_fields_rejected() {
        for field in ["session_id", "agent_id"] {
            let json = format!(r#"{{"action":"memory_list","{field}":"x"}}"#);
            let err = parse(&json).unwrap_err();
            assert!(err.contains(field), "{err}");
        }
    }

    #[test]
    fn nul_byte_rejected() {
        let err =
            parse("{\"action\":\"memory_write\",\"scope\":\"s\",\"content\":\"a\\u0000b\"}")
                .unwrap_err();
        assert!(err.contains("NUL"), "{err}");
    }

    #[test]
    fn unknown_action_rejected() {
        let err = parse(r#"{"action":"format_disk"}"#).unwrap_err();
        assert!(err.contains("unknown action"), "{err}");
    }

    #[test]
    fn missing_action_rejected() {
        let err = parse(r#"{"scope":"s"}"#).unwrap_err();
        assert!(err.contains("action"), "{err}");
    }

    #[test]
    fn non_object_rejected() {
        assert!(parse(r#"[1,2,3]"#).is_err());
        assert!(parse(r#""hello""#).is_err());
    }

    #[test]
    fn malformed_json_rejected() {
        let err = parse("{not json").unwrap_err();
        assert!(err.contains("malformed"), "{err}");
    }

    #[test]
    fn ident_traversal_rejected() {
        let err = parse(r#"{"action":"skill_read","name":"../../etc"}"#).unwrap_err();
        assert!(err.contains("name"), "{err}");
    }

    #[test]
    fn ident_too_long_rejected() {
        let name = "a".repeat(MAX_IDENT_LEN + 1);
        let json = format!(r#"{{"action":"skill_read","name":"{name}"}}"#);
        assert!(parse(&json).is_err());
    }

    #[test]
    fn content_too_long_rejected() {
        let content = "x".repeat(MAX_CONTENT_LEN + 1);
        let json = format!(r#"{{"action":"memory_write","scope":"s","content":"{content}"}}"#);
        let err = parse(&json).unwrap_err();
        assert!(err.contains("too long"), "{err}");
    }

    #[test]
    fn web_fetch_requires_http_scheme() {
        assert!(parse(r#"{"action":"web_fetch","url":"file:///etc/passwd"}"#).is_err());
        assert!(parse(r#"{"action":"web_fetch","url":"https://example.com/a"}"#).is_ok());
    }

    #[test]
    fn llm_call_role_validated() {
        let err = parse(r#"{"action":"llm_call","messages":[{"role":"root","content":"x"}]}"#)
            .unwrap_err();
        assert!(err.contains("role"), "{err}");
    }

    #[test]
    fn add_cron_with_last_delivery() {
        let req = parse(
            r#"{"action":"scheduler_add_cron","schedule":"0 9 * * 1","prompt":"Weekly summary","delivery":{"mode":"channel","target":"last"}}"#,
        )
        .unwrap();
        match req {
            IpcRequest::SchedulerAddCron(r) => {
                assert_eq!(r.schedule, "0 9 * * 1");
                assert!(r.delivery.is_some());
            }
            other => panic!("expected SchedulerAddCron, got {other:?}"),
        }
    }

    #[test]
    fn add_cron_bad_expr_rejected() {
        let err = parse(r#"{"action":"scheduler_add_cron","schedule":"whenever","prompt":"p"}"#)
            .unwrap_err();
        assert!(err.contains("5 fields"), "{err}");
    }

    #[test]
    fn remove_cron_requires_uuid() {
        assert!(parse(r#"{"action":"scheduler_remove_cron","id":"abc"}"#).is_err());
        assert!(parse(
            r#"{"action":"scheduler_remove_cron","id":"a4f7c3d2-1b2c-4d4e-8f9a-0b1c2d3e4f5a"}"#
        )
        .is_ok());
    }

    #[test]
    fn run_at_requires_rfc3339() {
        assert!(parse(r#"{"action":"scheduler_run_at","at":"tomorrow","prompt":"p"}"#).is_err());
        assert!(parse(
            r#"{"action":"scheduler_run_at","at":"2026-09-01T09:00:00Z","prompt":"p"}"#
        )
        .is_ok());
    }

    #[test]
    fn audit_query_filters_validated() {
        assert!(parse(r#"{"action":"audit_query","status":"blocked","limit":10}"#).is_ok());
        assert!(parse(r#"{"action":"audit_query","status":"purple"}"#).is_err());
        assert!(parse(r#"{"action":"audit_query","action":"format_disk"}"#).is_err());
        assert!(parse(r#"{"action":"audit_query","limit":0}"#).is_err());
    }

    #[test]
    fn args_summary_redacts_url_query() {
        let req = parse(
            r#"{"action":"web_fetch","url":"https://api.example.com/data?token=secret123"}"#,
        )
        .unwrap();
        let summary = req.args_summary();
        assert!(!summary.contains("secret123"), "{summary}");
        assert!(summary.contains("https://api.example.com/data"), "{summary}");
    }

    #[test]
    fn empty_payload_actions_accept_empty_object() {
        assert!(parse(r#"{"action":"browser_snapshot"}"#).is_ok());
        assert!(parse(r#"{"action":"skill_list"}"#).is_ok());
        assert!(parse(r#"{"action":"scheduler_list_jobs"}"#).is_ok());
    }
}
