use common::BackoffConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Exponent ceiling; past this the delay has long since hit the cap.
const MAX_EXPONENT: u32 = 16;

/// Per-host retry delay escalation plus the temporary skip list for hosts
/// caught actively rate-limiting. In-memory only; each run starts cold.
#[derive(Debug)]
pub struct BackoffController {
    base: Duration,
    multiplier: u32,
    cap: Duration,
    skip_cooldown: Duration,
    /// Extra exponent applied to a host after explicit rate-limit signals
    escalation: HashMap<String, u32>,
    skip_until: HashMap<String, Instant>,
}

impl BackoffController {
    pub fn new(base: Duration, multiplier: u32, cap: Duration, skip_cooldown: Duration) -> Self {
        Self {
            base,
            multiplier: multiplier.max(1),
            cap,
            skip_cooldown,
            escalation: HashMap::new(),
            skip_until: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &BackoffConfig) -> Self {
        Self::new(cfg.base(), cfg.multiplier(), cfg.cap(), cfg.skip_cooldown())
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before retrying `host` after failed attempt `attempt` (1-based):
    /// `min(base * multiplier^(attempt-1+escalation), cap)`.
    pub fn failure_delay(&self, host: &str, attempt: u32) -> Duration {
        let escalation = self.escalation.get(host).copied().unwrap_or(0);
        let exponent = attempt.saturating_sub(1).saturating_add(escalation).min(MAX_EXPONENT);
        // The factor can exceed u32 even at the clamped exponent; anything
        // that overflows is past the cap anyway.
        let delay = self
            .multiplier
            .checked_pow(exponent)
            .map(|factor| self.base.saturating_mul(factor))
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }

    /// Explicit 403/429-equivalent seen from `host`; future delays escalate.
    pub fn record_rate_limit(&mut self, host: &str) {
        *self.escalation.entry(host.to_string()).or_insert(0) += 1;
    }

    /// A successful fetch clears any standing backoff and cooldown.
    pub fn record_success(&mut self, host: &str) {
        self.escalation.remove(host);
        self.skip_until.remove(host);
    }

    /// Places `host` on the skip list for the configured cooldown, so
    /// follow-up attempts fail fast without spending a retry budget.
    pub fn place_on_skip_list(&mut self, host: &str, now: Instant) {
        self.skip_until.insert(host.to_string(), now + self.skip_cooldown);
    }

    /// Remaining cooldown for `host`, or None when it is not skip-listed.
    pub fn skip_remaining(&self, host: &str, now: Instant) -> Option<Duration> {
        self.skip_until.get(host).and_then(|until| {
            let rest = until.saturating_duration_since(now);
            if rest > Duration::ZERO {
                Some(rest)
            } else {
                None
            }
        })
    }
}
