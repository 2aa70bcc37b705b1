use common::ArticleRecord;
use std::collections::BTreeMap;

/// Merges freshly ingested records into the archive and recomputes the
/// bounded display set.
///
/// The union is keyed by record id with first-write-wins: the id is a pure
/// function of immutable content, so a collision is the same logical article
/// and the stored record is never overwritten. Merging the same batch twice
/// yields the identical archive and display set as merging it once.
pub fn merge(
    archive: BTreeMap<String, ArticleRecord>,
    new_records: &[ArticleRecord],
    display_limit: usize,
) -> (BTreeMap<String, ArticleRecord>, Vec<ArticleRecord>) {
    let mut merged = archive;
    for record in new_records {
        merged
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
    }

    let display = display_set(&merged, display_limit);
    (merged, display)
}

/// The `limit` most recent records by published time, descending; ties break
/// on id so the ordering is deterministic.
pub fn display_set(archive: &BTreeMap<String, ArticleRecord>, limit: usize) -> Vec<ArticleRecord> {
    let mut all: Vec<&ArticleRecord> = archive.values().collect();
    all.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    all.into_iter().take(limit).cloned().collect()
}
