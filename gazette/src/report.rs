use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One failed source and why, in processing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub name: String,
    pub reason: String,
}

/// Per-run summary handed to the external notification collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub successful: usize,
    pub failed: usize,
    pub new_article_count: usize,
    pub failures: Vec<SourceFailure>,
}

impl RunReport {
    pub fn record_success(&mut self, name: &str, items: usize, new: usize) {
        self.successful += 1;
        self.new_article_count += new;
        info!(source = %name, items, new, "source ingested");
    }

    pub fn record_failure(&mut self, name: &str, reason: String) {
        self.failed += 1;
        warn!(source = %name, reason = %reason, "source failed");
        self.failures.push(SourceFailure {
            name: name.to_string(),
            reason,
        });
    }

    pub fn log_summary(&self) {
        info!(
            successful = self.successful,
            failed = self.failed,
            new_articles = self.new_article_count,
            "run complete"
        );
    }
}
