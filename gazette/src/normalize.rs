use scraper::node::Node;
use scraper::Html;

/// Truncation bound for the stored article body.
pub const CONTENT_MAX_CHARS: usize = 1200;
/// Truncation bound for the short excerpt.
pub const EXCERPT_MAX_CHARS: usize = 280;

/// Average adult reading speed used for read-time derivation.
const WORDS_PER_MINUTE: usize = 200;

/// Elements whose entire subtree is dropped: executable or embedded content
/// that never contributes article text (tracking iframes included).
const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "iframe", "embed", "object", "noscript", "template", "svg",
];

/// Reduces a raw feed payload field to plain text: drops script/style/iframe/
/// embed subtrees, strips the remaining tags, decodes HTML entities and
/// collapses whitespace runs to single spaces.
///
/// Pure and deterministic; already-clean input passes through unchanged.
/// Entities are decoded exactly once, by the HTML parser, so a body that
/// quotes markup literally (`&amp;amp;` in the payload) keeps its `&amp;`.
/// Doubly-encoded feeds come out with their markup as visible text rather
/// than being decoded a second time.
pub fn clean_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(raw);
    let mut out = String::new();

    // Explicit-stack preorder walk, dropping stripped subtrees whole
    let mut stack: Vec<_> = {
        let mut kids: Vec<_> = fragment.tree.root().children().collect();
        kids.reverse();
        kids
    };
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if STRIPPED_TAGS.contains(&el.name()) => {}
            _ => {
                let mut kids: Vec<_> = node.children().collect();
                kids.reverse();
                stack.extend(kids);
            }
        }
    }

    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates on a word boundary within `max_chars` characters, appending an
/// ellipsis when anything was cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    let truncated = match cut.rfind(' ') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}…", truncated.trim_end())
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Minutes to read `words` words, rounded up, never zero.
pub fn read_time_minutes(words: usize) -> u32 {
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}
