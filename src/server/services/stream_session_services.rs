use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nanoid::nanoid;
use tracing::{debug, info};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct SessionLimits {
    /// concurrent playback slots per user, always at least 1
    pub max_per_user: usize,
    /// concurrent slots across everyone, 0 means unbounded
    pub max_global: usize,
    /// a session untouched this long no longer counts toward any cap
    pub idle_ttl: Duration,
    /// background sweep period
    pub sweep_interval: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_per_user: 1,
            max_global: 0,
            idle_ttl: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

impl From<&AppConfig> for SessionLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_per_user: config.max_streams_per_user.max(1),
            max_global: config.max_global_streams,
            idle_ttl: Duration::from_secs(config.stream_session_ttl_seconds.max(15)),
            sweep_interval: Duration::from_secs(config.stream_session_cleanup_seconds.max(5)),
        }
    }
}

/// one admitted, currently-counted playback slot
#[derive(Debug, Clone)]
struct StreamSession {
    sid: String,
    stream_key: String,
    fingerprint: String,
    last_seen_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    UserLimit { active: usize, max: usize },
    GlobalLimit { active: usize, max: usize },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::UserLimit { active, max } => {
                write!(f, "user_limit: too many simultaneous streams ({active}/{max})")
            }
            DenialReason::GlobalLimit { active, max } => {
                write!(f, "global_limit: proxy viewer capacity reached ({active}/{max})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireDecision {
    Admitted { sid: String, created: bool },
    Denied(DenialReason),
}

/// bounds concurrent playback. The trick is telling "the same player asking
/// for the next segment" apart from "a second viewer": a request reusing an
/// existing session's sid hint, or matching an existing (stream, fingerprint)
/// pair, refreshes that session instead of eating a new slot.
///
/// the fingerprint (ip + user-agent) is a heuristic, not an identity - two
/// viewers behind one NAT with the same player can collapse into one counted
/// session. Inherited behavior, deliberately not "fixed" here.
pub struct StreamSessionService {
    limits: SessionLimits,
    // user id -> sid -> session, one lock serializes every admission decision
    sessions: Mutex<HashMap<String, HashMap<String, StreamSession>>>,
}

impl StreamSessionService {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, session: &StreamSession, now: Instant) -> bool {
        now.saturating_duration_since(session.last_seen_at) > self.limits.idle_ttl
    }

    fn drop_expired(&self, table: &mut HashMap<String, HashMap<String, StreamSession>>) {
        let now = Instant::now();
        table.retain(|_, user_sessions| {
            user_sessions.retain(|_, session| !self.is_expired(session, now));
            !user_sessions.is_empty()
        });
    }

    pub fn try_acquire(
        &self,
        user_id: &str,
        stream_key: &str,
        fingerprint: &str,
        sid_hint: &str,
    ) -> AcquireDecision {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        self.drop_expired(&mut table);

        let now = Instant::now();
        let user_sessions = table.entry(user_id.to_string()).or_default();

        // 1) sid hint wins: the same player may switch streams without
        // consuming an extra slot
        let hint = sid_hint.trim();
        if !hint.is_empty() {
            if let Some(existing) = user_sessions.get_mut(hint) {
                existing.stream_key = stream_key.to_string();
                existing.fingerprint = fingerprint.to_string();
                existing.last_seen_at = now;
                return AcquireDecision::Admitted {
                    sid: existing.sid.clone(),
                    created: false,
                };
            }
        }

        // 2) same content, same player - normal hls re-polling lands here
        if let Some(existing) = user_sessions
            .values_mut()
            .find(|s| s.stream_key == stream_key && s.fingerprint == fingerprint)
        {
            existing.last_seen_at = now;
            return AcquireDecision::Admitted {
                sid: existing.sid.clone(),
                created: false,
            };
        }

        // 3) global cap before the per-user cap, matching the reasons clients see
        let active_user = user_sessions.len();
        let active_global: usize = table.values().map(HashMap::len).sum();

        if self.limits.max_global > 0 && active_global >= self.limits.max_global {
            return AcquireDecision::Denied(DenialReason::GlobalLimit {
                active: active_global,
                max: self.limits.max_global,
            });
        }

        if active_user >= self.limits.max_per_user {
            return AcquireDecision::Denied(DenialReason::UserLimit {
                active: active_user,
                max: self.limits.max_per_user,
            });
        }

        // 4) fresh slot
        let sid = nanoid!(32);
        let user_sessions = table
            .get_mut(user_id)
            .expect("user entry inserted above");
        user_sessions.insert(
            sid.clone(),
            StreamSession {
                sid: sid.clone(),
                stream_key: stream_key.to_string(),
                fingerprint: fingerprint.to_string(),
                last_seen_at: now,
            },
        );

        debug!("session {} created for user {}", sid, user_id);
        AcquireDecision::Admitted { sid, created: true }
    }

    /// refresh a session's idle clock, false when it's gone
    pub fn touch(&self, user_id: &str, sid: &str) -> bool {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        self.drop_expired(&mut table);

        table
            .get_mut(user_id)
            .and_then(|user_sessions| user_sessions.get_mut(sid))
            .map(|session| session.last_seen_at = Instant::now())
            .is_some()
    }

    /// immediate removal, used when a long-lived relay connection closes.
    /// manifest playback never calls this - there is no single connection to
    /// watch, the ttl sweep reclaims those slots instead
    pub fn release(&self, user_id: &str, sid: &str) -> bool {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        let Some(user_sessions) = table.get_mut(user_id) else {
            return false;
        };

        let removed = user_sessions.remove(sid).is_some();
        if user_sessions.is_empty() {
            table.remove(user_id);
        }
        if removed {
            debug!("session {} released for user {}", sid, user_id);
        }
        removed
    }

    pub fn active_sessions(&self) -> usize {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        self.drop_expired(&mut table);
        table.values().map(HashMap::len).sum()
    }

    pub fn active_sessions_for(&self, user_id: &str) -> usize {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        self.drop_expired(&mut table);
        table.get(user_id).map_or(0, HashMap::len)
    }

    pub fn sweep(&self) {
        let mut table = self.sessions.lock().expect("session mutex poisoned");
        self.drop_expired(&mut table);
    }

    pub fn spawn_sweeper(self: &Arc<Self>) {
        let sessions = Arc::clone(self);
        let period = sessions.limits.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sessions.sweep();
            }
        });
        info!("session sweeper running every {:?}", period);
    }
}
