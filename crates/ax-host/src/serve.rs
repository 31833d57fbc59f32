//! Host assembly: build every subsystem in `main`-style and run the
//! listeners plus the scheduler ticker.
//!
//! All process-wide state (secret store, audit sink, taint tracker, proxy
//! router) is created here and threaded into constructors as explicit
//! handles.

use crate::api::{self, ApiState};
use crate::audit::NdjsonAuditLog;
use crate::bootstrap::BootstrapGate;
use crate::channels::ChannelRegistry;
use crate::config::{load_config, StateLayout};
use crate::dedup::EventDedup;
use crate::llm::ProxyLlmClient;
use crate::router::{RequestRouter, RouterDeps, RouterOutcome, TurnRequest};
use crate::sandbox::provider_for;
use crate::scanner::{InboundScanner, OutboundScanner};
use crate::scheduler::{resolve_delivery, ResolvedDelivery, Scheduler};
use crate::secrets::EnvSecretStore;
use crate::services::{AxHostServices, HttpWebProvider, UnconfiguredBrowser};
use crate::skills::{SkillScreener, SkillStore};
use crate::stores::{ConversationStore, MemoryStore, SessionStore};
use crate::workspace::WorkspaceManager;
use ax_ipc::IpcServer;
use ax_proxy::{routes::default_routes, CredentialProxy};
use ax_taint::{SessionTaintTracker, TaintBudget};
use ax_types::{AxError, AxResult, SessionId};
use chrono::{Timelike, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{error, info, warn};

/// Everything the serve loop owns.
pub struct Host {
    pub router: Arc<RequestRouter>,
    pub api_state: Arc<ApiState>,
    pub ipc: Arc<IpcServer>,
    pub proxy: Arc<CredentialProxy>,
    pub scheduler: Arc<Scheduler>,
    pub channels: Arc<ChannelRegistry>,
    pub layout: StateLayout,
    pub agents: Vec<String>,
}

/// Build the host from the state root. Fatal errors (bad config, unusable
/// state dir) surface here and terminate startup.
pub fn build_host(root: PathBuf) -> AxResult<Host> {
    let config = load_config(&root)?;
    let layout = StateLayout::new(
        config
            .state_root
            .clone()
            .unwrap_or_else(|| root.clone()),
    );
    layout.ensure()?;

    let agents = discover_agents(&layout);
    let default_agent = agents.first().cloned().unwrap_or_else(|| "main".into());

    let secrets = Arc::new(EnvSecretStore::load(layout.env_file()));
    let budget = Arc::new(TaintBudget::new());
    let tracker = Arc::new(SessionTaintTracker::new());
    let audit = Arc::new(
        NdjsonAuditLog::open(layout.audit_log())
            .map_err(|e| AxError::Config(format!("cannot open audit log: {e}")))?,
    );

    let scheduler = Arc::new(Scheduler::new(layout.cron_jobs()));
    if let Err(e) = scheduler.load() {
        warn!(error = %e, "Job store unreadable, starting empty");
    }

    let services = Arc::new(AxHostServices {
        llm: Arc::new(ProxyLlmClient::new(layout.proxy_socket(), "claude-sonnet-4-5")),
        memory: Arc::new(MemoryStore::open(&layout.memory_db())?),
        web: Arc::new(HttpWebProvider::new()),
        browser: Arc::new(UnconfiguredBrowser),
        screener: Arc::new(SkillScreener::new()),
        skill_store: Arc::new(SkillStore::new(layout.skills_dir(&default_agent))),
        scheduler: scheduler.clone(),
        delegation: std::sync::OnceLock::new(),
    });

    let ipc = Arc::new(IpcServer::new(
        services.clone(),
        audit.clone(),
        budget.clone(),
        tracker.clone(),
        config.profile.taint_threshold(),
    ));

    let proxy = Arc::new(CredentialProxy::new(default_routes(), secrets));
    let sessions = Arc::new(SessionStore::new());
    let channels = Arc::new(ChannelRegistry::new());

    let router = Arc::new(RequestRouter::new(RouterDeps {
        sandbox: Arc::from(provider_for(config.providers.sandbox)),
        config,
        layout: layout.clone(),
        sessions,
        conversations: Arc::new(ConversationStore::open(&layout.conversations_db())?),
        inbound: Arc::new(InboundScanner::new()),
        outbound: Arc::new(OutboundScanner::new()),
        workspace: Arc::new(WorkspaceManager::new(layout.workspaces_root())),
        ipc: ipc.clone(),
        budget,
        tracker,
        dedup: Arc::new(EventDedup::default()),
        gate: Arc::new(BootstrapGate::new(layout.agents_dir())),
        audit,
        channels: channels.clone(),
        agent_program: agent_program(),
    }));

    // Close the delegation loop now that the router exists.
    let _ = services.delegation.set(router.clone());

    let api_state = Arc::new(ApiState {
        router: router.clone(),
        agents: agents.clone(),
    });

    Ok(Host {
        router,
        api_state,
        ipc,
        proxy,
        scheduler,
        channels,
        layout,
        agents,
    })
}

/// Run the host until one of the listeners fails.
pub async fn run(host: Host) -> AxResult<()> {
    let ipc_listener = bind_unix(&host.layout.ipc_socket())?;
    let proxy_listener = bind_unix(&host.layout.proxy_socket())?;
    let api_listener = bind_unix(&host.layout.api_socket())?;
    info!(root = %host.layout.root.display(), "Host listening");

    let ipc = host.ipc.clone();
    let ipc_task = tokio::spawn(async move { ipc.serve(ipc_listener).await });

    let proxy = host.proxy.clone();
    let proxy_task = tokio::spawn(async move { proxy.serve(proxy_listener).await });

    let api_state = host.api_state.clone();
    let api_task = tokio::spawn(async move { api::serve(api_state, api_listener).await });

    let ticker = tokio::spawn(scheduler_loop(
        host.router.clone(),
        host.scheduler.clone(),
        host.channels.clone(),
    ));

    tokio::select! {
        result = proxy_task => {
            error!("Proxy listener exited");
            result
                .map_err(|e| AxError::Internal(format!("proxy task: {e}")))?
                .map_err(AxError::Io)?;
        }
        result = api_task => {
            error!("API listener exited");
            result
                .map_err(|e| AxError::Internal(format!("api task: {e}")))?
                .map_err(AxError::Io)?;
        }
        _ = ipc_task => {
            error!("IPC listener exited");
        }
        _ = ticker => {
            error!("Scheduler ticker exited");
        }
    }
    Err(AxError::Internal("host listener stopped".into()))
}

/// The minute ticker: fire due jobs, resolve deliveries, post results.
async fn scheduler_loop(
    router: Arc<RequestRouter>,
    scheduler: Arc<Scheduler>,
    channels: Arc<ChannelRegistry>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let now = Utc::now();

        if let Some((start, end)) = router.deps().config.scheduler.active_hours {
            let hour = now.hour() as u8;
            let active = if start <= end {
                hour >= start && hour < end
            } else {
                hour >= start || hour < end
            };
            if !active {
                continue;
            }
        }

        for job in scheduler.due_jobs(now) {
            info!(id = %job.id, agent = %job.agent_id, "Firing scheduled job");
            let outcome = router
                .handle_turn(TurnRequest {
                    agent_id: job.agent_id.clone(),
                    session_id: Some(SessionId::generate()),
                    message: job.prompt.clone(),
                    user_id: None,
                    channel: None,
                })
                .await;

            let text = match outcome {
                Ok(RouterOutcome::Reply { text, .. }) => text,
                Ok(other) => {
                    warn!(id = %job.id, ?other, "Scheduled turn did not reply");
                    continue;
                }
                Err(e) => {
                    warn!(id = %job.id, error = %e, "Scheduled turn failed");
                    continue;
                }
            };

            match resolve_delivery(
                &job.delivery,
                &job.agent_id,
                &router.deps().sessions,
                &channels,
            ) {
                ResolvedDelivery::Channel(address) => {
                    if let Some(adapter) = channels.get(&address.provider) {
                        if let Err(e) = adapter.send(&address, &text).await {
                            warn!(error = %e, "Scheduled delivery failed");
                        }
                    }
                }
                ResolvedDelivery::None => {}
            }
        }
    }
}

/// Bind a Unix listener, clearing any stale socket file first.
fn bind_unix(path: &std::path::Path) -> AxResult<UnixListener> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    UnixListener::bind(path)
        .map_err(|e| AxError::Config(format!("cannot bind {}: {e}", path.display())))
}

/// Agent ids: subdirectories of `agents/`, defaulting to `main`.
fn discover_agents(layout: &StateLayout) -> Vec<String> {
    let mut agents = Vec::new();
    if let Ok(entries) = std::fs::read_dir(layout.agents_dir()) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    agents.push(name.to_string());
                }
            }
        }
    }
    agents.sort();
    if agents.is_empty() {
        agents.push("main".into());
    }
    agents
}

/// The agent binary: explicit override, or `ax-agent` next to the host
/// executable, or whatever `PATH` resolves.
fn agent_program() -> PathBuf {
    if let Ok(program) = std::env::var("AX_AGENT_BIN") {
        return PathBuf::from(program);
    }
    if let Ok(exe) = std::env::current_exe() {
        let sibling = exe.with_file_name("ax-agent");
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from("ax-agent")
}
