use async_trait::async_trait;
use common::{ArchiveConfig, BackoffConfig, Config, FeedSource, FetchConfig, ThrottleConfig};
use gazette::archive;
use gazette::backoff::BackoffController;
use gazette::fetch::{FetchError, FetchOutcome, FetchRetrier, HttpTransport, Transport};
use gazette::orchestrator::Orchestrator;
use gazette::throttle::{DomainThrottle, ServiceClass};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned behavior for one endpoint of the in-memory transport.
enum Canned {
    Feed(String),
    NetworkError,
    RateLimit,
}

/// In-memory transport: answers by URL and counts every call.
struct MapTransport {
    endpoints: HashMap<String, Canned>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MapTransport {
    fn new(endpoints: HashMap<String, Canned>) -> Self {
        Self {
            endpoints,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MapTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        match self.endpoints.get(url) {
            Some(Canned::Feed(xml)) => Ok(xml.clone().into_bytes()),
            Some(Canned::NetworkError) => Err(FetchError::Network("connection reset".to_string())),
            Some(Canned::RateLimit) => Err(FetchError::RateLimited { retry_after: None }),
            None => Err(FetchError::Network("unknown endpoint".to_string())),
        }
    }
}

fn source(slug: &str, host: &str) -> FeedSource {
    FeedSource {
        name: format!("The {}", slug),
        url: format!("https://{}/feed.xml", host),
        slug: slug.to_string(),
        category: "tech".to_string(),
        author: None,
    }
}

/// RSS payload with `n` items, links scoped by `prefix` so ids are unique.
fn feed_xml(prefix: &str, n: usize) -> String {
    let mut items = String::new();
    for i in 0..n {
        items.push_str(&format!(
            r#"<item>
                <title>{} story {}</title>
                <link>https://{}/posts/{}</link>
                <guid>{}-{}</guid>
                <description>&lt;p&gt;Body of story {} with some words.&lt;/p&gt;</description>
                <pubDate>Mon, 0{} Jan 2024 12:00:00 GMT</pubDate>
            </item>"#,
            prefix,
            i,
            prefix,
            i,
            prefix,
            i,
            i,
            (i % 8) + 1,
        ));
    }
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{}</title>{}</channel></rss>"#,
        prefix, items
    )
}

/// Config with zeroed delays so tests run without real waiting.
fn fast_config(sources: Vec<FeedSource>) -> Config {
    Config {
        sources,
        throttle: Some(ThrottleConfig {
            host_spacing_seconds: Some(0),
            defensive_spacing_seconds: Some(0),
            defensive_hosts: vec![],
            interleave_every: None,
        }),
        backoff: Some(BackoffConfig {
            base_seconds: Some(0),
            multiplier: Some(2),
            cap_seconds: Some(1),
            max_attempts: Some(3),
            skip_cooldown_seconds: Some(3600),
        }),
        fetch: Some(FetchConfig {
            timeout_seconds: Some(5),
            max_items_per_source: Some(50),
            jitter_millis: Some(0),
        }),
        archive: Some(ArchiveConfig {
            dir: None,
            display_limit: Some(500),
        }),
    }
}

#[tokio::test]
async fn mixed_run_reports_per_source_outcomes() {
    let catalog = vec![
        source("alpha", "alpha.example.com"),
        source("broken", "broken.example.com"),
        source("beta", "beta.example.com"),
    ];
    let transport = Arc::new(MapTransport::new(HashMap::from([
        (catalog[0].url.clone(), Canned::Feed(feed_xml("alpha.example.com", 5))),
        (catalog[1].url.clone(), Canned::NetworkError),
        (catalog[2].url.clone(), Canned::Feed(feed_xml("beta.example.com", 7))),
    ])));
    let config = fast_config(catalog.clone());

    let mut orchestrator = Orchestrator::new(&config, transport.clone());
    let shutdown = AtomicBool::new(false);
    let outcome = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;

    assert_eq!(outcome.report.successful, 2);
    assert_eq!(outcome.report.failed, 1);
    assert_eq!(outcome.report.new_article_count, 12);
    assert_eq!(outcome.new_records.len(), 12);
    assert_eq!(outcome.report.failures.len(), 1);
    assert_eq!(outcome.report.failures[0].name, "The broken");
    assert!(outcome.report.failures[0].reason.contains("network error"));

    // The failing source burned its whole retry budget
    assert_eq!(transport.calls_for(&catalog[1].url), 3);
    // Records carry publication metadata and derived fields
    let rec = &outcome.new_records[0];
    assert!(!rec.slug.is_empty());
    assert!(rec.read_time_minutes >= 1);
    assert!(rec.content.contains("Body of story"));
}

#[tokio::test]
async fn reingesting_the_same_payload_yields_zero_new_records() {
    let catalog = vec![source("alpha", "alpha.example.com")];
    let transport = Arc::new(MapTransport::new(HashMap::from([(
        catalog[0].url.clone(),
        Canned::Feed(feed_xml("alpha.example.com", 5)),
    )])));
    let config = fast_config(catalog.clone());
    let shutdown = AtomicBool::new(false);

    let mut orchestrator = Orchestrator::new(&config, transport.clone());
    let first = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;
    assert_eq!(first.report.new_article_count, 5);

    // Merge into an empty archive, then run a second time against it, the
    // way two consecutive invocations would.
    let (archive_map, display) = archive::merge(BTreeMap::new(), &first.new_records, 500);
    assert_eq!(display.len(), 5);
    let existing: HashSet<String> = archive_map.keys().cloned().collect();
    let slugs: HashSet<String> = archive_map.values().map(|r| r.slug.clone()).collect();

    let mut orchestrator = Orchestrator::new(&config, transport);
    let second = orchestrator.run(&catalog, &existing, &slugs, &shutdown).await;
    assert_eq!(second.report.successful, 1);
    assert_eq!(second.report.new_article_count, 0);

    // Re-merging the same batch leaves the archive identical
    let (archive_twice, display_twice) = archive::merge(archive_map.clone(), &first.new_records, 500);
    assert_eq!(archive_twice, archive_map);
    assert_eq!(display_twice, display);
}

#[tokio::test]
async fn slugs_stay_unique_across_runs() {
    fn single_item_feed(link: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>gamma</title>
            <item>
                <title>Weekly Roundup</title>
                <link>{}</link>
                <description>One paragraph.</description>
                <pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
            </item>
            </channel></rss>"#,
            link
        )
    }

    let catalog = vec![source("gamma", "gamma.example.com")];
    let config = fast_config(catalog.clone());
    let shutdown = AtomicBool::new(false);

    let transport = Arc::new(MapTransport::new(HashMap::from([(
        catalog[0].url.clone(),
        Canned::Feed(single_item_feed("https://gamma.example.com/posts/1")),
    )])));
    let mut orchestrator = Orchestrator::new(&config, transport);
    let first = orchestrator
        .run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown)
        .await;
    assert_eq!(first.new_records[0].slug, "weekly-roundup");

    let (archive_map, _) = archive::merge(BTreeMap::new(), &first.new_records, 500);
    let existing: HashSet<String> = archive_map.keys().cloned().collect();
    let slugs: HashSet<String> = archive_map.values().map(|r| r.slug.clone()).collect();

    // A later run sees a different article that reuses the same headline.
    let transport = Arc::new(MapTransport::new(HashMap::from([(
        catalog[0].url.clone(),
        Canned::Feed(single_item_feed("https://gamma.example.com/posts/2")),
    )])));
    let mut orchestrator = Orchestrator::new(&config, transport);
    let second = orchestrator.run(&catalog, &existing, &slugs, &shutdown).await;
    assert_eq!(second.report.new_article_count, 1);
    assert_eq!(second.new_records[0].slug, "weekly-roundup-2");

    let (merged, _) = archive::merge(archive_map, &second.new_records, 500);
    let merged_slugs: HashSet<&str> = merged.values().map(|r| r.slug.as_str()).collect();
    assert_eq!(merged_slugs.len(), merged.len());
}

#[tokio::test]
async fn rate_limited_host_is_skipped_without_network_calls_on_the_next_pass() {
    let catalog = vec![source("limited", "limited.example.com")];
    let transport = Arc::new(MapTransport::new(HashMap::from([(
        catalog[0].url.clone(),
        Canned::RateLimit,
    )])));
    let config = fast_config(catalog.clone());
    let shutdown = AtomicBool::new(false);

    let mut orchestrator = Orchestrator::new(&config, transport.clone());
    let first = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;
    assert_eq!(first.report.failed, 1);
    assert_eq!(first.report.failures[0].reason, "rate limited");
    assert_eq!(transport.calls_for(&catalog[0].url), 3);

    // Same orchestrator, follow-up pass: cooldown short-circuits the fetch
    let second = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;
    assert_eq!(second.report.failed, 1);
    assert!(second.report.failures[0].reason.contains("cooldown"));
    assert_eq!(transport.calls_for(&catalog[0].url), 3);
}

#[tokio::test]
async fn shutdown_flag_keeps_partial_results() {
    let catalog = vec![
        source("alpha", "alpha.example.com"),
        source("beta", "beta.example.com"),
    ];
    let transport = Arc::new(MapTransport::new(HashMap::from([
        (catalog[0].url.clone(), Canned::Feed(feed_xml("alpha.example.com", 3))),
        (catalog[1].url.clone(), Canned::Feed(feed_xml("beta.example.com", 3))),
    ])));
    let config = fast_config(catalog.clone());

    // Flag already set: the run stops before any source, losing nothing
    // that was aggregated (here: nothing), and still returns a report.
    let shutdown = AtomicBool::new(true);
    let mut orchestrator = Orchestrator::new(&config, transport);
    let outcome = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;
    assert_eq!(outcome.report.successful + outcome.report.failed, 0);
    assert!(outcome.new_records.is_empty());
}

#[tokio::test]
async fn http_transport_fetches_and_parses_over_the_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(feed_xml("wire.example.com", 2))
        .create_async()
        .await;

    let src = FeedSource {
        name: "Wire".to_string(),
        url: format!("{}/feed.xml", server.url()),
        slug: "wire".to_string(),
        category: "tech".to_string(),
        author: None,
    };

    let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).expect("transport"));
    let retrier = FetchRetrier::new(
        transport,
        &BackoffConfig {
            base_seconds: Some(0),
            multiplier: Some(2),
            cap_seconds: Some(1),
            max_attempts: Some(2),
            skip_cooldown_seconds: Some(3600),
        },
        &FetchConfig {
            timeout_seconds: Some(5),
            max_items_per_source: Some(50),
            jitter_millis: Some(0),
        },
    );
    let mut throttle = DomainThrottle::new(Duration::ZERO, Duration::ZERO);
    let mut backoff = BackoffController::new(
        Duration::ZERO,
        2,
        Duration::from_secs(1),
        Duration::from_secs(3600),
    );

    let outcome = retrier
        .fetch_one(&src, ServiceClass::General, &mut throttle, &mut backoff)
        .await;
    match outcome {
        FetchOutcome::Success { feed } => assert_eq!(feed.entries.len(), 2),
        other => panic!("expected success, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn http_429_exhausts_retries_and_reports_rate_limited() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed.xml")
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(3)
        .create_async()
        .await;

    let src = FeedSource {
        name: "Limited".to_string(),
        url: format!("{}/feed.xml", server.url()),
        slug: "limited".to_string(),
        category: "tech".to_string(),
        author: None,
    };

    let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).expect("transport"));
    let retrier = FetchRetrier::new(
        transport,
        &BackoffConfig {
            base_seconds: Some(0),
            multiplier: Some(2),
            cap_seconds: Some(1),
            max_attempts: Some(3),
            skip_cooldown_seconds: Some(3600),
        },
        &FetchConfig {
            timeout_seconds: Some(5),
            max_items_per_source: Some(50),
            jitter_millis: Some(0),
        },
    );
    let mut throttle = DomainThrottle::new(Duration::ZERO, Duration::ZERO);
    let mut backoff = BackoffController::new(
        Duration::ZERO,
        2,
        Duration::from_secs(1),
        Duration::from_secs(3600),
    );

    let outcome = retrier
        .fetch_one(&src, ServiceClass::General, &mut throttle, &mut backoff)
        .await;
    assert!(matches!(outcome, FetchOutcome::RateLimited { .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn full_run_persists_and_reloads_across_invocations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive_path = dir.path().join("archive.json");
    let display_path = dir.path().join("display.json");

    let catalog = vec![source("alpha", "alpha.example.com")];
    let transport = Arc::new(MapTransport::new(HashMap::from([(
        catalog[0].url.clone(),
        Canned::Feed(feed_xml("alpha.example.com", 4)),
    )])));
    let config = fast_config(catalog.clone());
    let shutdown = AtomicBool::new(false);

    // First invocation: ingest, merge, persist
    let mut orchestrator = Orchestrator::new(&config, transport.clone());
    let outcome = orchestrator.run(&catalog, &HashSet::new(), &HashSet::new(), &shutdown).await;
    let (merged, display) = archive::merge(BTreeMap::new(), &outcome.new_records, 500);
    let now = chrono::Utc::now();
    let total = merged.len();
    common::save_archive(
        &archive_path,
        &common::ArchiveFile {
            articles: merged,
            last_updated: Some(now),
            total_articles: total,
        },
    )
    .await
    .expect("save archive");
    common::save_display(
        &display_path,
        &common::DisplayFile {
            total_articles: display.len(),
            articles: display,
            last_updated: Some(now),
        },
    )
    .await
    .expect("save display");

    // Second invocation: reload, ingest the identical payload, merge again
    let reloaded = common::load_archive(&archive_path).await.expect("reload");
    assert_eq!(reloaded.articles.len(), 4);
    let existing: HashSet<String> = reloaded.articles.keys().cloned().collect();
    let slugs: HashSet<String> = reloaded.articles.values().map(|r| r.slug.clone()).collect();

    let mut orchestrator = Orchestrator::new(&config, transport);
    let second = orchestrator.run(&catalog, &existing, &slugs, &shutdown).await;
    assert_eq!(second.report.new_article_count, 0);

    let (merged_again, display_again) =
        archive::merge(reloaded.articles.clone(), &second.new_records, 500);
    assert_eq!(merged_again, reloaded.articles);
    assert_eq!(display_again.len(), 4);
}
