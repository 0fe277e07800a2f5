use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct IpGuardConfig {
    /// rolling window failures are counted over
    pub fail_window: Duration,
    /// failures within the window before a block is issued
    pub max_fails: u32,
    /// how long a triggered block lasts
    pub block_duration: Duration,
    /// how often the background sweep runs
    pub sweep_interval: Duration,
}

impl Default for IpGuardConfig {
    fn default() -> Self {
        Self {
            fail_window: Duration::from_secs(300),
            max_fails: 12,
            block_duration: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for IpGuardConfig {
    // floors keep a fat-fingered env file from turning the guard into a
    // self-inflicted denial of service
    fn from(config: &AppConfig) -> Self {
        Self {
            fail_window: Duration::from_secs(config.security_fail_window_seconds.max(30)),
            max_fails: config.security_max_fails.max(3),
            block_duration: Duration::from_secs(config.security_block_seconds.max(30)),
            sweep_interval: Duration::from_secs(config.security_cleanup_seconds.max(15)),
        }
    }
}

#[derive(Default)]
struct IpState {
    fails: Vec<Instant>,
    blocked_until: Option<Instant>,
}

impl IpState {
    fn prune(&mut self, window: Duration, now: Instant) {
        self.fails
            .retain(|ts| now.saturating_duration_since(*ts) < window);
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }
}

/// sliding-window failure counter per client ip. Best-effort abuse mitigation
/// on top of credential checks, not a replacement for them - a blocked ip is
/// rejected before we even look at its bearer token.
pub struct IpGuardService {
    config: IpGuardConfig,
    state: Mutex<HashMap<String, IpState>>,
}

fn normalize_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

impl IpGuardService {
    pub fn new(config: IpGuardConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_failed_attempt(&self, ip: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("ip guard mutex poisoned");
        let entry = state.entry(normalize_ip(ip)).or_default();

        entry.prune(self.config.fail_window, now);
        entry.fails.push(now);

        if entry.fails.len() >= self.config.max_fails as usize {
            entry.blocked_until = Some(now + self.config.block_duration);
            entry.fails.clear();
            warn!(
                "ip {} blocked for {:?} after repeated auth failures",
                ip, self.config.block_duration
            );
        }
    }

    /// one success forgives earlier failures, but an already-active block stays
    pub fn register_successful_auth(&self, ip: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("ip guard mutex poisoned");
        if let Some(entry) = state.get_mut(&normalize_ip(ip)) {
            entry.prune(self.config.fail_window, now);
            entry.fails.clear();
        }
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("ip guard mutex poisoned");
        match state.get_mut(&normalize_ip(ip)) {
            Some(entry) => {
                entry.prune(self.config.fail_window, now);
                entry.blocked_until.is_some_and(|until| until > now)
            }
            None => false,
        }
    }

    /// drops records with no failures and no active block so the table
    /// doesn't grow with every ip that ever touched us
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("ip guard mutex poisoned");
        state.retain(|_, entry| {
            entry.prune(self.config.fail_window, now);
            entry.blocked_until.is_some() || !entry.fails.is_empty()
        });
    }

    pub fn tracked_ips(&self) -> usize {
        self.state.lock().expect("ip guard mutex poisoned").len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) {
        let guard = Arc::clone(self);
        let period = guard.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick fires immediately, skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                guard.sweep();
                debug!("ip guard sweep done, {} ips tracked", guard.tracked_ips());
            }
        });
        info!("ip guard sweeper running every {:?}", period);
    }
}
