use common::ThrottleConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Throttling class of a host. Defensive providers are observed to rate-limit
/// across their whole customer base, so the class carries its own global
/// spacing on top of the per-host one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    General,
    Defensive,
}

impl ServiceClass {
    /// A host is defensive when it equals or is a subdomain of any entry in
    /// the configured suffix list.
    pub fn classify(host: &str, defensive_hosts: &[String]) -> Self {
        let host = host.to_lowercase();
        for suffix in defensive_hosts {
            let suffix = suffix.to_lowercase();
            if host == suffix || host.ends_with(&format!(".{}", suffix)) {
                return ServiceClass::Defensive;
            }
        }
        ServiceClass::General
    }
}

/// Per-host and per-class cooldown tracker. Created cold at the start of each
/// run and owned by the orchestrator; `clearance_delay` is a pure read and
/// the caller records the actual contact time after waiting, so consecutive
/// contacts to one host always end up at least the minimum spacing apart.
#[derive(Debug)]
pub struct DomainThrottle {
    host_spacing: Duration,
    class_spacing: Duration,
    last_contact: HashMap<String, Instant>,
    last_defensive_contact: Option<Instant>,
}

impl DomainThrottle {
    pub fn new(host_spacing: Duration, class_spacing: Duration) -> Self {
        Self {
            host_spacing,
            class_spacing,
            last_contact: HashMap::new(),
            last_defensive_contact: None,
        }
    }

    pub fn from_config(cfg: &ThrottleConfig) -> Self {
        Self::new(cfg.host_spacing(), cfg.defensive_spacing())
    }

    /// How long the caller must wait before contacting `host` at `now`: the
    /// larger of the host-specific remainder and, for defensive hosts, the
    /// class-global remainder. Zero when the host is clear.
    pub fn clearance_delay(&self, host: &str, class: ServiceClass, now: Instant) -> Duration {
        let host_wait = self
            .last_contact
            .get(host)
            .map(|last| remaining(*last, self.host_spacing, now))
            .unwrap_or(Duration::ZERO);

        let class_wait = match class {
            ServiceClass::Defensive => self
                .last_defensive_contact
                .map(|last| remaining(last, self.class_spacing, now))
                .unwrap_or(Duration::ZERO),
            ServiceClass::General => Duration::ZERO,
        };

        host_wait.max(class_wait)
    }

    /// Records the actual contact time. Must be called after the clearance
    /// wait, on every attempt, success or failure.
    pub fn record_contact(&mut self, host: &str, class: ServiceClass, at: Instant) {
        self.last_contact.insert(host.to_string(), at);
        if class == ServiceClass::Defensive {
            self.last_defensive_contact = Some(at);
        }
    }
}

fn remaining(last: Instant, spacing: Duration, now: Instant) -> Duration {
    (last + spacing).saturating_duration_since(now)
}
