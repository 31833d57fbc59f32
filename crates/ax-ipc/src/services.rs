//! The host service surface the IPC server dispatches into.

use ax_types::audit::{AuditFilter, AuditRecord};
use ax_types::memory::MemoryEntry;
use ax_types::scheduler::{CronJob, CronJobId};
use ax_types::skill::SkillVerdict;
use ax_types::taint::TaintTag;
use ax_types::{AxResult, SessionId};
use ax_wire::llm::LlmChunk;
use ax_wire::request::{
    LlmCallRequest, MemoryListRequest, MemoryQueryRequest, SchedulerAddCronRequest,
    SchedulerRunAtRequest, SkillProposeRequest,
};
use async_trait::async_trait;
use serde_json::Value;

/// Per-call context, injected by the server from the connection handshake.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: SessionId,
    pub agent_id: String,
}

/// A browser operation, validated upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserOp {
    Navigate { url: String },
    Snapshot,
    Click { selector: String },
    Type { selector: String, text: String },
    Screenshot,
}

/// The append-only audit sink. Host-owned; the sandbox has no handle to it.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);

    /// Bounded, filtered read used by the `audit_query` action.
    fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord>;
}

/// Everything the IPC server can do on behalf of the agent.
///
/// One trait object bundle injected at server construction; implementations
/// live in the host crate. Handlers return domain results; the server owns
/// response shaping, taint recording, and audit.
#[async_trait]
pub trait HostServices: Send + Sync {
    // -- model --
    async fn llm_call(&self, ctx: &CallContext, req: &LlmCallRequest) -> AxResult<Vec<LlmChunk>>;

    // -- memory --

    /// Store an entry. `taint` is the host-authored tag for writes from
    /// tainted sessions; implementations persist it verbatim.
    async fn memory_write(
        &self,
        ctx: &CallContext,
        scope: &str,
        content: &str,
        tags: &[String],
        taint: Option<TaintTag>,
    ) -> AxResult<String>;

    async fn memory_read(&self, ctx: &CallContext, id: &str) -> AxResult<MemoryEntry>;

    async fn memory_query(
        &self,
        ctx: &CallContext,
        req: &MemoryQueryRequest,
    ) -> AxResult<Vec<MemoryEntry>>;

    async fn memory_delete(&self, ctx: &CallContext, id: &str) -> AxResult<()>;

    async fn memory_list(
        &self,
        ctx: &CallContext,
        req: &MemoryListRequest,
    ) -> AxResult<Vec<MemoryEntry>>;

    // -- web / browser --

    async fn web_fetch(&self, ctx: &CallContext, url: &str) -> AxResult<String>;

    async fn web_search(
        &self,
        ctx: &CallContext,
        query: &str,
        max_results: usize,
    ) -> AxResult<String>;

    /// Run a browser operation. The returned value is relayed to the agent;
    /// for navigate/snapshot the server records its text into the taint
    /// budget.
    async fn browser(&self, ctx: &CallContext, op: &BrowserOp) -> AxResult<Value>;

    // -- skills --

    async fn skill_list(&self, ctx: &CallContext) -> AxResult<Vec<String>>;

    async fn skill_read(&self, ctx: &CallContext, name: &str) -> AxResult<String>;

    async fn skill_propose(
        &self,
        ctx: &CallContext,
        req: &SkillProposeRequest,
    ) -> AxResult<SkillVerdict>;

    // -- scheduler --

    async fn scheduler_add_cron(
        &self,
        ctx: &CallContext,
        req: &SchedulerAddCronRequest,
    ) -> AxResult<CronJobId>;

    async fn scheduler_remove_cron(&self, ctx: &CallContext, id: CronJobId) -> AxResult<()>;

    async fn scheduler_list_jobs(&self, ctx: &CallContext) -> AxResult<Vec<CronJob>>;

    async fn scheduler_run_at(
        &self,
        ctx: &CallContext,
        req: &SchedulerRunAtRequest,
    ) -> AxResult<CronJobId>;

    // -- delegation --

    /// Run a child agent turn under the same session. Taint propagates by
    /// construction because the child shares the parent's session id.
    async fn delegate(
        &self,
        ctx: &CallContext,
        agent_type: &str,
        message: &str,
    ) -> AxResult<String>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! Inert implementations shared by the crate's tests.

    use super::*;
    use ax_types::AxError;
    use std::sync::Mutex;

    /// Services where every operation succeeds with an empty result.
    #[derive(Default)]
    pub struct NullServices;

    #[async_trait]
    impl HostServices for NullServices {
        async fn llm_call(
            &self,
            _ctx: &CallContext,
            _req: &LlmCallRequest,
        ) -> AxResult<Vec<LlmChunk>> {
            Ok(vec![LlmChunk::Done {
                input_tokens: 0,
                output_tokens: 0,
            }])
        }

        async fn memory_write(
            &self,
            _ctx: &CallContext,
            _scope: &str,
            _content: &str,
            _tags: &[String],
            _taint: Option<TaintTag>,
        ) -> AxResult<String> {
            Ok("m0".into())
        }

        async fn memory_read(&self, _ctx: &CallContext, id: &str) -> AxResult<MemoryEntry> {
            Err(AxError::NotFound(format!("memory entry {id}")))
        }

        async fn memory_query(
            &self,
            _ctx: &CallContext,
            _req: &MemoryQueryRequest,
        ) -> AxResult<Vec<MemoryEntry>> {
            Ok(vec![])
        }

        async fn memory_delete(&self, _ctx: &CallContext, _id: &str) -> AxResult<()> {
            Ok(())
        }

        async fn memory_list(
            &self,
            _ctx: &CallContext,
            _req: &MemoryListRequest,
        ) -> AxResult<Vec<MemoryEntry>> {
            Ok(vec![])
        }

        async fn web_fetch(&self, _ctx: &CallContext, _url: &str) -> AxResult<String> {
            Ok(String::new())
        }

        async fn web_search(
            &self,
            _ctx: &CallContext,
            _query: &str,
            _max: usize,
        ) -> AxResult<String> {
            Ok(String::new())
        }

        async fn browser(&self, _ctx: &CallContext, _op: &BrowserOp) -> AxResult<Value> {
            Ok(Value::Null)
        }

        async fn skill_list(&self, _ctx: &CallContext) -> AxResult<Vec<String>> {
            Ok(vec![])
        }

        async fn skill_read(&self, _ctx: &CallContext, name: &str) -> AxResult<String> {
            Err(AxError::NotFound(format!("skill {name}")))
        }

        async fn skill_propose(
            &self,
            _ctx: &CallContext,
            _req: &SkillProposeRequest,
        ) -> AxResult<SkillVerdict> {
            Ok(SkillVerdict::NeedsReview)
        }

        async fn scheduler_add_cron(
            &self,
            _ctx: &CallContext,
            _req: &SchedulerAddCronRequest,
        ) -> AxResult<CronJobId> {
            Ok(CronJobId::new())
        }

        async fn scheduler_remove_cron(&self, _ctx: &CallContext, _id: CronJobId) -> AxResult<()> {
            Ok(())
        }

        async fn scheduler_list_jobs(&self, _ctx: &CallContext) -> AxResult<Vec<CronJob>> {
            Ok(vec![])
        }

        async fn scheduler_run_at(
            &self,
            _ctx: &CallContext,
            _req: &SchedulerRunAtRequest,
        ) -> AxResult<CronJobId> {
            Ok(CronJobId::new())
        }

        async fn delegate(
            &self,
            _ctx: &CallContext,
            _agent_type: &str,
            _message: &str,
        ) -> AxResult<String> {
            Ok(String::new())
        }
    }

    /// Audit sink backed by a vector.
    #[derive(Default)]
    pub struct VecAudit {
        pub records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for VecAudit {
        fn record(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }

        fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
            let records = self.records.lock().unwrap();
            records
                .iter()
                .rev()
                .filter(|r| filter.matches(r))
                .take(filter.limit.unwrap_or(100))
                .cloned()
                .collect()
        }
    }
}
