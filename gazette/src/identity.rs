use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Longest slug emitted before the uniqueness suffix is applied.
const SLUG_MAX_CHARS: usize = 80;

/// Derives the stable content-addressed article id from the source slug and
/// the item's canonical link, falling back to its guid and then its title.
///
/// The id must reproduce across runs for the same item, so the hash input is
/// exactly `"{source_slug}\n{key}"` with no other state mixed in.
pub fn article_id(
    source_slug: &str,
    link: Option<&str>,
    guid: Option<&str>,
    title: &str,
) -> String {
    let key = link
        .filter(|s| !s.trim().is_empty())
        .or_else(|| guid.filter(|s| !s.trim().is_empty()))
        .unwrap_or(title);

    let mut hasher = Sha256::new();
    hasher.update(source_slug.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Lowercase url-safe slug: alphanumeric runs joined by single hyphens.
/// May be empty when the title holds no alphanumeric characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
        if slug.chars().count() >= SLUG_MAX_CHARS {
            break;
        }
    }

    slug
}

/// Slug for one record within a batch: slugified title, the record id when
/// the title slugifies to nothing, and a `-2`, `-3`, ... counter suffix on
/// collision. Never returns an empty or already-seen slug.
pub fn unique_slug(title: &str, id: &str, seen: &mut HashSet<String>) -> String {
    let base = {
        let s = slugify(title);
        if s.is_empty() {
            id.to_string()
        } else {
            s
        }
    };

    let mut candidate = base.clone();
    let mut counter = 2;
    while !seen.insert(candidate.clone()) {
        candidate = format!("{}-{}", base, counter);
        counter += 1;
    }
    candidate
}
