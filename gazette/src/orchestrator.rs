use crate::backoff::BackoffController;
use crate::fetch::{FetchOutcome, FetchRetrier, Transport};
use crate::identity;
use crate::normalize;
use crate::report::RunReport;
use crate::throttle::{DomainThrottle, ServiceClass};
use chrono::Utc;
use common::{ArticleRecord, Config, FeedSource, Publication};
use feed_rs::model::{Entry, Feed};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Aggregated result of one ingestion run.
#[derive(Debug)]
pub struct RunOutcome {
    pub new_records: Vec<ArticleRecord>,
    pub report: RunReport,
}

/// Sequences the catalog, drives the fetch retrier per source and aggregates
/// new article records. Owns the throttle and backoff state for the run.
pub struct Orchestrator {
    retrier: FetchRetrier,
    throttle: DomainThrottle,
    backoff: BackoffController,
    defensive_hosts: Vec<String>,
    interleave_every: usize,
    max_items: usize,
}

impl Orchestrator {
    pub fn new(cfg: &Config, transport: Arc<dyn Transport>) -> Self {
        let throttle_cfg = cfg.throttle();
        let backoff_cfg = cfg.backoff();
        let fetch_cfg = cfg.fetch();
        Self {
            retrier: FetchRetrier::new(transport, &backoff_cfg, &fetch_cfg),
            throttle: DomainThrottle::from_config(&throttle_cfg),
            backoff: BackoffController::from_config(&backoff_cfg),
            defensive_hosts: throttle_cfg.defensive_hosts.clone(),
            interleave_every: throttle_cfg.interleave_every(),
            max_items: fetch_cfg.max_items_per_source(),
        }
    }

    /// Processes every catalog source sequentially in interleaved order and
    /// returns the new records plus the per-source report, in that order.
    ///
    /// A source failure never aborts the run. The shutdown flag is checked
    /// between sources; whatever was aggregated before it flipped is still
    /// returned for merging. `existing_ids` and `existing_slugs` come from
    /// the archive so neither ids nor slugs collide across runs.
    pub async fn run(
        &mut self,
        catalog: &[FeedSource],
        existing_ids: &HashSet<String>,
        existing_slugs: &HashSet<String>,
        shutdown: &AtomicBool,
    ) -> RunOutcome {
        let order = interleave(catalog, &self.defensive_hosts, self.interleave_every);
        info!(sources = order.len(), "starting ingestion run");

        let mut known_ids = existing_ids.clone();
        let mut seen_slugs = existing_slugs.clone();
        let mut new_records = Vec::new();
        let mut report = RunReport::default();

        for source in order {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested; stopping before remaining sources");
                break;
            }

            let host = source.host().unwrap_or_default();
            let class = ServiceClass::classify(&host, &self.defensive_hosts);

            match self
                .retrier
                .fetch_one(source, class, &mut self.throttle, &mut self.backoff)
                .await
            {
                FetchOutcome::Success { feed } => {
                    let (items, records) =
                        self.collect_records(source, feed, &mut known_ids, &mut seen_slugs);
                    report.record_success(&source.name, items, records.len());
                    new_records.extend(records);
                }
                FetchOutcome::RateLimited { .. } => {
                    report.record_failure(&source.name, "rate limited".to_string());
                }
                FetchOutcome::TransientError { cause } => {
                    report.record_failure(&source.name, cause.to_string());
                }
                FetchOutcome::PermanentSkip { reason } => {
                    report.record_failure(&source.name, reason);
                }
            }
        }

        RunOutcome {
            new_records,
            report,
        }
    }

    /// Converts parsed feed entries into article records, bounded to the
    /// per-source maximum (newest first when the payload is larger) and
    /// skipping ids already known from the archive or earlier this run.
    fn collect_records(
        &self,
        source: &FeedSource,
        feed: Feed,
        known_ids: &mut HashSet<String>,
        seen_slugs: &mut HashSet<String>,
    ) -> (usize, Vec<ArticleRecord>) {
        let mut entries = feed.entries;
        let item_count = entries.len();
        if entries.len() > self.max_items {
            entries.sort_by(|a, b| b.published.cmp(&a.published));
            entries.truncate(self.max_items);
        }

        let mut records = Vec::new();
        for entry in entries {
            if let Some(record) = build_record(source, entry, known_ids, seen_slugs) {
                records.push(record);
            }
        }
        (item_count, records)
    }
}

/// One canonical record from one feed entry, or None when the entry carries
/// nothing to identify it by or its id is already known.
fn build_record(
    source: &FeedSource,
    entry: Entry,
    known_ids: &mut HashSet<String>,
    seen_slugs: &mut HashSet<String>,
) -> Option<ArticleRecord> {
    let title_raw = entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_default();
    let title = normalize::clean_text(&title_raw);
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let guid = entry.id.clone();

    if link.trim().is_empty() && guid.trim().is_empty() && title.is_empty() {
        debug!(source = %source.slug, "skipping entry with no link, guid or title");
        return None;
    }

    let id = identity::article_id(
        &source.slug,
        Some(link.as_str()),
        Some(guid.as_str()),
        &title,
    );
    if !known_ids.insert(id.clone()) {
        return None;
    }

    let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

    let body_raw = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .unwrap_or_default();
    let text = normalize::clean_text(&body_raw);
    let word_count = normalize::word_count(&text);

    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .filter(|n| !n.trim().is_empty())
        .or_else(|| source.author.clone())
        .unwrap_or_else(|| "Staff".to_string());

    let is_paid = paid_heuristic(&link, &text, &source.category);
    let slug = identity::unique_slug(&title, &id, seen_slugs);

    Some(ArticleRecord {
        id,
        title,
        canonical_link: link,
        author,
        published_at,
        content: normalize::truncate_text(&text, normalize::CONTENT_MAX_CHARS),
        excerpt: normalize::truncate_text(&text, normalize::EXCERPT_MAX_CHARS),
        word_count,
        read_time_minutes: normalize::read_time_minutes(word_count),
        is_paid,
        publication: Publication {
            name: source.name.clone(),
            slug: source.slug.clone(),
            category: source.category.clone(),
        },
        slug,
    })
}

/// Paywall heuristic over the link, the normalized body and the source
/// category. Deliberately coarse; downstream consumers treat it as a hint.
fn paid_heuristic(link: &str, text: &str, category: &str) -> bool {
    if category.eq_ignore_ascii_case("paid") || link.contains("/subscribe") {
        return true;
    }
    let lowered = text.to_lowercase();
    lowered.contains("subscribers only")
        || lowered.contains("subscriber-only")
        || lowered.contains("for paid subscribers")
}

/// Catalog processing order: one defensive-class source after every
/// `every` general sources, so the general class is not starved behind the
/// defensive class's long cooldowns. Relative order within each class is
/// preserved; leftovers of either class trail at the end.
fn interleave<'a>(
    catalog: &'a [FeedSource],
    defensive_hosts: &[String],
    every: usize,
) -> Vec<&'a FeedSource> {
    let mut general: VecDeque<&FeedSource> = VecDeque::new();
    let mut defensive: VecDeque<&FeedSource> = VecDeque::new();
    for source in catalog {
        let host = source.host().unwrap_or_default();
        match ServiceClass::classify(&host, defensive_hosts) {
            ServiceClass::Defensive => defensive.push_back(source),
            ServiceClass::General => general.push_back(source),
        }
    }

    let mut order = Vec::with_capacity(catalog.len());
    let mut since_defensive = 0;
    while !(general.is_empty() && defensive.is_empty()) {
        let take_defensive =
            !defensive.is_empty() && (since_defensive >= every || general.is_empty());
        if take_defensive {
            if let Some(source) = defensive.pop_front() {
                order.push(source);
            }
            since_defensive = 0;
        } else if let Some(source) = general.pop_front() {
            order.push(source);
            since_defensive += 1;
        }
    }
    order
}
