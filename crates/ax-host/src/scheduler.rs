//! The cron scheduler: job store, minute ticker, and delivery resolution.
//!
//! Jobs persist in a JSON file (atomic tmp+rename). A ticker fires once a
//! minute; a job is due when its cron expression includes the current
//! minute. Duplicate firings within one minute are suppressed with a
//! minute-key: the job id plus the minute-floored timestamp.

use crate::channels::ChannelRegistry;
use crate::stores::SessionStore;
use ax_types::address::{Delivery, DeliveryTarget, SessionAddress};
use ax_types::scheduler::{CronJob, CronJobId};
use ax_types::{AxError, AxResult};
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A one-shot job created by `scheduler_run_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneShotJob {
    pub id: CronJobId,
    pub at: DateTime<Utc>,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default = "default_delivery")]
    pub delivery: Delivery,
}

fn default_delivery() -> Delivery {
    Delivery::None
}

/// On-disk shape of the job store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedJobs {
    cron: Vec<CronJob>,
    one_shot: Vec<OneShotJob>,
}

/// A job due for execution this tick.
#[derive(Debug, Clone)]
pub struct DueJob {
    pub id: CronJobId,
    pub agent_id: String,
    pub prompt: String,
    pub max_tokens: Option<u64>,
    pub delivery: Delivery,
}

/// The scheduler state: jobs plus the same-minute dedup set.
pub struct Scheduler {
    cron: DashMap<CronJobId, CronJob>,
    one_shot: DashMap<CronJobId, OneShotJob>,
    fired: DashMap<(CronJobId, i64), ()>,
    persist_path: PathBuf,
}

impl Scheduler {
    pub fn new(persist_path: PathBuf) -> Self {
        Self {
            cron: DashMap::new(),
            one_shot: DashMap::new(),
            fired: DashMap::new(),
            persist_path,
        }
    }

    // -- persistence --------------------------------------------------------

    /// Load persisted jobs. Missing file → empty store.
    pub fn load(&self) -> AxResult<usize> {
        let data = match std::fs::read_to_string(&self.persist_path) {
            Ok(d) => d,
            Err(_) => return Ok(0),
        };
        let persisted: PersistedJobs = serde_json::from_str(&data)
            .map_err(|e| AxError::Internal(format!("parse job store: {e}")))?;
        let count = persisted.cron.len() + persisted.one_shot.len();
        for job in persisted.cron {
            self.cron.insert(job.id, job);
        }
        for job in persisted.one_shot {
            self.one_shot.insert(job.id, job);
        }
        info!(count, "Loaded scheduled jobs");
        Ok(count)
    }

    /// Persist all jobs atomically.
    pub fn persist(&self) -> AxResult<()> {
        let persisted = PersistedJobs {
            cron: self.cron.iter().map(|r| r.value().clone()).collect(),
            one_shot: self.one_shot.iter().map(|r| r.value().clone()).collect(),
        };
        let data = serde_json::to_string_pretty(&persisted)?;
        let tmp = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes())
            .map_err(|e| AxError::Internal(format!("write job store: {e}")))?;
        std::fs::rename(&tmp, &self.persist_path)
            .map_err(|e| AxError::Internal(format!("rename job store: {e}")))?;
        Ok(())
    }

    // -- CRUD ---------------------------------------------------------------

    /// Add a cron job after validation.
    pub fn add_cron(&self, job: CronJob) -> AxResult<CronJobId> {
        let existing = self
            .cron
            .iter()
            .filter(|r| r.value().agent_id == job.agent_id)
            .count();
        job.validate(existing).map_err(AxError::Validation)?;
        let id = job.id;
        self.cron.insert(id, job);
        self.persist()?;
        Ok(id)
    }

    /// Add a one-shot job.
    pub fn add_one_shot(&self, job: OneShotJob) -> AxResult<CronJobId> {
        if job.at <= Utc::now() {
            return Err(AxError::Validation("scheduled time must be in the future".into()));
        }
        let id = job.id;
        self.one_shot.insert(id, job);
        self.persist()?;
        Ok(id)
    }

    /// Remove a job by id (cron or one-shot).
    pub fn remove(&self, id: CronJobId) -> AxResult<()> {
        let removed = self.cron.remove(&id).is_some() || self.one_shot.remove(&id).is_some();
        if !removed {
            return Err(AxError::NotFound(format!("job {id}")));
        }
        self.persist()
    }

    /// All cron jobs for an agent.
    pub fn list(&self, agent_id: &str) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self
            .cron
            .iter()
            .filter(|r| r.value().agent_id == agent_id)
            .map(|r| r.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    // -- ticking ------------------------------------------------------------

    /// Jobs due at `now`. Each due cron job is also stamped with the
    /// minute-key so a second tick in the same minute yields nothing; due
    /// one-shots are consumed.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let minute_key = now.timestamp() / 60;
        let mut due = Vec::new();

        for mut entry in self.cron.iter_mut() {
            let job = entry.value_mut();
            if !cron_matches(&job.schedule, now) {
                continue;
            }
            if self.fired.insert((job.id, minute_key), ()).is_some() {
                debug!(id = %job.id, "Suppressed duplicate firing in the same minute");
                continue;
            }
            job.last_run = Some(now);
            due.push(DueJob {
                id: job.id,
                agent_id: job.agent_id.clone(),
                prompt: job.prompt.clone(),
                max_tokens: job.max_tokens,
                delivery: job.delivery.clone(),
            });
        }

        let ready: Vec<CronJobId> = self
            .one_shot
            .iter()
            .filter(|r| r.value().at <= now)
            .map(|r| *r.key())
            .collect();
        for id in ready {
            if let Some((_, job)) = self.one_shot.remove(&id) {
                due.push(DueJob {
                    id: job.id,
                    agent_id: job.agent_id,
                    prompt: job.prompt,
                    max_tokens: None,
                    delivery: job.delivery,
                });
            }
        }

        // Old minute-keys are useless after the minute passes.
        self.fired.retain(|(_, key), _| *key >= minute_key - 1);

        if !due.is_empty() {
            let _ = self.persist();
        }
        due
    }
}

/// Whether a 5-field cron expression includes the given minute.
///
/// The expression is converted to the 7-field form the `cron` crate
/// expects; seconds are pinned to zero and matching happens against the
/// minute-truncated timestamp. The day-of-week field is renumbered from
/// standard cron (0-7, Sunday is 0 or 7) to the crate's Quartz-style
/// 1-7 with Sunday as 1.
pub fn cron_matches(expr: &str, now: DateTime<Utc>) -> bool {
    let trimmed = expr.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        warn!(expr, "Cron expression does not have 5 fields");
        return false;
    }
    let dow = normalize_dow(fields[4]);
    let seven_field = format!(
        "0 {} {} {} {} {dow} *",
        fields[0], fields[1], fields[2], fields[3]
    );
    let schedule = match cron::Schedule::from_str(&seven_field) {
        Ok(s) => s,
        Err(e) => {
            warn!(expr, error = %e, "Unparseable cron expression");
            return false;
        }
    };
    let minute = now.with_second(0).and_then(|t| t.with_nanosecond(0));
    match minute {
        Some(minute) => schedule.includes(minute),
        None => false,
    }
}

/// Renumber a standard-cron day-of-week field for the `cron` crate.
///
/// Plain numbers in list/range positions are mapped `d → (d % 7) + 1`
/// (so 0 and 7 are both Sunday → 1, Monday 1 → 2). Step divisors and
/// `*`/`?` are left alone.
fn normalize_dow(field: &str) -> String {
    let map_num = |token: &str| -> String {
        match token.parse::<u8>() {
            Ok(d) => ((d % 7) + 1).to_string(),
            Err(_) => token.to_string(),
        }
    };
    field
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((b, s)) => (b, Some(s)),
                None => (part, None),
            };
            let mapped_base = match base.split_once('-') {
                Some((a, b)) => {
                    let (a, b) = (map_num(a), map_num(b));
                    // A range that wraps past Sunday after renumbering
                    // (e.g. standard 5-7, Fri-Sun) splits in two.
                    match (a.parse::<u8>(), b.parse::<u8>()) {
                        (Ok(lo), Ok(hi)) if lo > hi => format!("{lo}-7,1-{hi}"),
                        _ => format!("{a}-{b}"),
                    }
                }
                None => {
                    if base == "*" || base == "?" {
                        base.to_string()
                    } else {
                        map_num(base)
                    }
                }
            };
            match step {
                Some(s) => format!("{mapped_base}/{s}"),
                None => mapped_base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Delivery resolution
// ---------------------------------------------------------------------------

/// A fully-resolved delivery destination.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedDelivery {
    /// Nothing to deliver (mode none, no history, or unknown provider).
    None,
    /// Send to this address via the registered adapter.
    Channel(SessionAddress),
}

/// Resolve a delivery at fire time.
///
/// `"last"` looks up the agent's most recent channel interaction in the
/// session store; no history resolves to `None`. An address whose provider
/// has no registered adapter also resolves to `None` — delivery targets are
/// never derived from agent output, and an unknown provider must not make
/// the fire fail.
pub fn resolve_delivery(
    delivery: &Delivery,
    agent_id: &str,
    sessions: &SessionStore,
    channels: &ChannelRegistry,
) -> ResolvedDelivery {
    let address = match delivery {
        Delivery::None => return ResolvedDelivery::None,
        Delivery::Channel { target } => match target {
            DeliveryTarget::Last(_) => match sessions.last_channel(agent_id) {
                Some(addr) => addr,
                None => {
                    debug!(agent_id, "No channel history for 'last' delivery");
                    return ResolvedDelivery::None;
                }
            },
            DeliveryTarget::Address(addr) => addr.clone(),
        },
    };

    if !channels.is_registered(&address.provider) {
        warn!(provider = %address.provider, "Delivery to unregistered provider dropped");
        return ResolvedDelivery::None;
    }
    ResolvedDelivery::Channel(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LoopbackAdapter;
    use ax_types::address::LastMarker;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn scheduler() -> (Scheduler, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (Scheduler::new(tmp.path().join("cron_jobs.json")), tmp)
    }

    fn job(schedule: &str) -> CronJob {
        CronJob {
            id: CronJobId::new(),
            schedule: schedule.into(),
            agent_id: "main".into(),
            prompt: "Weekly summary".into(),
            max_tokens: None,
            delivery: Delivery::None,
            created_at: Utc::now(),
            last_run: None,
        }
    }

    #[test]
    fn cron_matches_monday_nine() {
        // Monday 2026-08-03 09:00 UTC.
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 22).unwrap();
        assert!(cron_matches("0 9 * * 1", monday));
        let tuesday = Utc.with_ymd_and_hms(2026, 8, 4, 9, 0, 0).unwrap();
        assert!(!cron_matches("0 9 * * 1", tuesday));
        let monday_ten = Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap();
        assert!(!cron_matches("0 9 * * 1", monday_ten));
    }

    #[test]
    fn cron_matches_every_minute() {
        let t = Utc.with_ymd_and_hms(2026, 8, 2, 12, 34, 56).unwrap();
        assert!(cron_matches("* * * * *", t));
    }

    #[test]
    fn unparseable_expr_never_matches() {
        assert!(!cron_matches("nonsense", Utc::now()));
    }

    #[test]
    fn dow_renumbering_matches_standard_cron() {
        // 2026-08-02 is a Sunday.
        let sunday = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        assert!(cron_matches("0 9 * * 0", sunday));
        assert!(cron_matches("0 9 * * 7", sunday));
        assert!(!cron_matches("0 9 * * 1", sunday));

        // Weekday range Mon-Fri.
        let wednesday = Utc.with_ymd_and_hms(2026, 8, 5, 9, 0, 0).unwrap();
        assert!(cron_matches("0 9 * * 1-5", wednesday));
        assert!(!cron_matches("0 9 * * 1-5", sunday));

        // Wrapping range Fri-Sun.
        let friday = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        assert!(cron_matches("0 9 * * 5-7", friday));
        assert!(cron_matches("0 9 * * 5-7", sunday));
        assert!(!cron_matches("0 9 * * 5-7", wednesday));
    }

    #[test]
    fn normalize_dow_field_shapes() {
        assert_eq!(normalize_dow("*"), "*");
        assert_eq!(normalize_dow("0"), "1");
        assert_eq!(normalize_dow("7"), "1");
        assert_eq!(normalize_dow("1"), "2");
        assert_eq!(normalize_dow("1-5"), "2-6");
        assert_eq!(normalize_dow("5-7"), "6-7,1");
        assert_eq!(normalize_dow("1,3,5"), "2,4,6");
        assert_eq!(normalize_dow("*/2"), "*/2");
    }

    #[test]
    fn add_validate_and_list() {
        let (sched, _tmp) = scheduler();
        let id = sched.add_cron(job("0 9 * * 1")).unwrap();
        let listed = sched.list("main");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        let mut bad = job("not cron");
        bad.schedule = "not cron".into();
        assert!(sched.add_cron(bad).is_err());
    }

    #[test]
    fn remove_missing_is_not_found() {
        let (sched, _tmp) = scheduler();
        assert!(matches!(
            sched.remove(CronJobId::new()),
            Err(AxError::NotFound(_))
        ));
    }

    #[test]
    fn due_jobs_fire_once_per_minute() {
        let (sched, _tmp) = scheduler();
        sched.add_cron(job("* * * * *")).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 5).unwrap();
        let first = sched.due_jobs(now);
        assert_eq!(first.len(), 1);

        // Second tick in the same minute: suppressed by the minute-key.
        let later_same_minute = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 45).unwrap();
        assert!(sched.due_jobs(later_same_minute).is_empty());

        // Next minute fires again.
        let next_minute = Utc.with_ymd_and_hms(2026, 8, 3, 9, 1, 5).unwrap();
        assert_eq!(sched.due_jobs(next_minute).len(), 1);
    }

    #[test]
    fn one_shot_fires_once_and_is_consumed() {
        let (sched, _tmp) = scheduler();
        let at = Utc::now() + chrono::Duration::seconds(30);
        sched
            .add_one_shot(OneShotJob {
                id: CronJobId::new(),
                at,
                agent_id: "main".into(),
                prompt: "ping".into(),
                delivery: Delivery::None,
            })
            .unwrap();

        assert!(sched.due_jobs(at - chrono::Duration::seconds(10)).is_empty());
        let due = sched.due_jobs(at + chrono::Duration::seconds(1));
        assert_eq!(due.len(), 1);
        assert!(sched.due_jobs(at + chrono::Duration::seconds(2)).is_empty());
    }

    #[test]
    fn one_shot_in_past_rejected() {
        let (sched, _tmp) = scheduler();
        let result = sched.add_one_shot(OneShotJob {
            id: CronJobId::new(),
            at: Utc::now() - chrono::Duration::seconds(1),
            agent_id: "main".into(),
            prompt: "late".into(),
            delivery: Delivery::None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn persistence_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cron_jobs.json");
        let id = {
            let sched = Scheduler::new(path.clone());
            sched.add_cron(job("0 9 * * 1")).unwrap()
        };
        let sched = Scheduler::new(path);
        assert_eq!(sched.load().unwrap(), 1);
        assert_eq!(sched.list("main")[0].id, id);
    }

    // -- delivery resolution ------------------------------------------------

    fn registry_with_loopback() -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(LoopbackAdapter::default()));
        registry
    }

    #[test]
    fn last_resolves_to_most_recent_channel() {
        let sessions = SessionStore::new();
        sessions.record_channel_interaction("main", SessionAddress::dm("loopback", "U1"));
        let registry = registry_with_loopback();

        let delivery = Delivery::Channel {
            target: DeliveryTarget::Last(LastMarker),
        };
        match resolve_delivery(&delivery, "main", &sessions, &registry) {
            ResolvedDelivery::Channel(addr) => {
                assert_eq!(addr.provider, "loopback");
                assert_eq!(addr.ids.peer.as_deref(), Some("U1"));
            }
            other => panic!("expected channel, got {other:?}"),
        }
    }

    #[test]
    fn last_without_history_is_none() {
        let sessions = SessionStore::new();
        let registry = registry_with_loopback();
        let delivery = Delivery::Channel {
            target: DeliveryTarget::Last(LastMarker),
        };
        assert_eq!(
            resolve_delivery(&delivery, "main", &sessions, &registry),
            ResolvedDelivery::None
        );
    }

    #[test]
    fn unregistered_provider_is_none() {
        let sessions = SessionStore::new();
        sessions.record_channel_interaction("main", SessionAddress::dm("slack", "U1"));
        let registry = registry_with_loopback(); // slack not registered

        let delivery = Delivery::Channel {
            target: DeliveryTarget::Last(LastMarker),
        };
        assert_eq!(
            resolve_delivery(&delivery, "main", &sessions, &registry),
            ResolvedDelivery::None
        );

        let explicit = Delivery::Channel {
            target: DeliveryTarget::Address(SessionAddress::dm("discord", "U2")),
        };
        assert_eq!(
            resolve_delivery(&explicit, "main", &sessions, &registry),
            ResolvedDelivery::None
        );
    }

    #[test]
    fn none_mode_is_none() {
        let sessions = SessionStore::new();
        let registry = registry_with_loopback();
        assert_eq!(
            resolve_delivery(&Delivery::None, "main", &sessions, &registry),
            ResolvedDelivery::None
        );
    }
}
