//! Embedded file references in free text.
//!
//! Two syntaxes are recognised:
//! - bare: `file:<id><remainder>`, the remainder running up to whitespace, a
//!   quote, a tag delimiter or an entity
//! - tagged: `<link file:<id><remainder>>text</link>`, where the link text is
//!   closed by the nearest `</link>`
//!
//! `&lt;` and `&gt;` are accepted wherever `<` and `>` are, so content that
//! went through an HTML escaper is matched the same way.

use super::duplicates::DuplicateMap;
use crate::models::SyntaxKind;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::sync::OnceLock;

pub const FILE_PREFIX: &str = "file:";

const BARE_PATTERN: &str = r#"file:(?P<id>[0-9]+)(?P<rest>[^\s"'<>&]*)"#;

// The opening tag's remainder may contain anything except its own closing
// delimiter, in either literal or entity form. An `&` inside it never starts
// `&gt;` and never swallows `>`; a trailing `&`, `&g` or `&gt` is allowed
// right before the delimiter.
const TAGGED_PATTERN: &str = r#"(?s)(?:<|&lt;)link\s+file:(?P<id>[0-9]+)(?P<rest>(?:[^>&]|&+(?:[^g>&]|g[^t>&]|gt[^;>&]))*?(?:&+(?:gt?)?)?)(?:>|&gt;)(?P<text>.*?)(?:<|&lt;)/link(?:>|&gt;)"#;

fn compiled(kind: SyntaxKind) -> &'static Regex {
    static BARE: OnceLock<Regex> = OnceLock::new();
    static TAGGED: OnceLock<Regex> = OnceLock::new();

    match kind {
        SyntaxKind::Bare => {
            BARE.get_or_init(|| Regex::new(BARE_PATTERN).expect("Invalid bare link pattern"))
        }
        SyntaxKind::Tagged => {
            TAGGED.get_or_init(|| Regex::new(TAGGED_PATTERN).expect("Invalid tagged link pattern"))
        }
    }
}

/// One embedded reference found in a text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch<'a> {
    /// The full occurrence, delimiters included
    pub matched: &'a str,
    /// Byte span of `matched` within the scanned content
    pub span: Range<usize>,
    pub id: i64,
    /// Byte span of the id digits within `matched`
    pub id_span: Range<usize>,
    pub remainder: &'a str,
    /// Enclosed text, tagged syntax only
    pub link_text: Option<&'a str>,
}

impl LinkMatch<'_> {
    /// The occurrence with its id replaced and every other byte kept.
    pub fn with_id(&self, id: i64) -> String {
        format!(
            "{}{}{}",
            &self.matched[..self.id_span.start],
            id,
            &self.matched[self.id_span.end..]
        )
    }
}

/// Finds embedded references of one syntax.
#[derive(Debug, Clone, Copy)]
pub struct LinkMatcher {
    kind: SyntaxKind,
}

impl LinkMatcher {
    pub fn new(kind: SyntaxKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SyntaxKind {
        self.kind
    }

    /// Substring a row must contain to possibly carry this syntax. Used to
    /// narrow the rows fetched from the store, so it must not be stricter
    /// than the pattern: the tagged syntax allows any whitespace between
    /// `link` and `file:`.
    pub fn needle(&self) -> &'static str {
        FILE_PREFIX
    }

    /// All non-overlapping occurrences, left to right. Digit runs too long
    /// for an i64 cannot name a record and are skipped.
    pub fn find_all<'a>(&self, content: &'a str) -> Vec<LinkMatch<'a>> {
        compiled(self.kind)
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let id = caps.name("id")?;
                let rest = caps.name("rest")?;
                let parsed: i64 = id.as_str().parse().ok()?;

                Some(LinkMatch {
                    matched: whole.as_str(),
                    span: whole.range(),
                    id: parsed,
                    id_span: (id.start() - whole.start())..(id.end() - whole.start()),
                    remainder: rest.as_str(),
                    link_text: caps.name("text").map(|text| text.as_str()),
                })
            })
            .collect()
    }
}

/// Result of rewriting one field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub content: String,
    /// Occurrences whose id was remapped
    pub remapped: usize,
    /// Distinct (duplicate, canonical) pairs that were applied
    pub pairs: Vec<(i64, i64)>,
}

impl RewriteOutcome {
    fn unchanged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            remapped: 0,
            pairs: Vec::new(),
        }
    }

    pub fn is_changed(&self, original: &str) -> bool {
        self.content != original
    }
}

/// Rewrites duplicate ids embedded in text to their canonical ids.
#[derive(Debug, Clone, Copy)]
pub struct TextReferenceRewriter {
    matcher: LinkMatcher,
}

impl TextReferenceRewriter {
    pub fn new(kind: SyntaxKind) -> Self {
        Self {
            matcher: LinkMatcher::new(kind),
        }
    }

    pub fn matcher(&self) -> &LinkMatcher {
        &self.matcher
    }

    /// Replace every occurrence whose id is a duplicate. Replacements are
    /// keyed by matched text, so repeated identical occurrences all change,
    /// but only whole occurrences are touched: `file:52` is left alone when
    /// only `file:5` is mapped.
    pub fn rewrite(&self, content: &str, map: &DuplicateMap) -> RewriteOutcome {
        let matches = self.matcher.find_all(content);

        let mut replacements: HashMap<&str, String> = HashMap::new();
        let mut pairs = BTreeSet::new();
        let mut remapped = 0;

        for found in &matches {
            let Some(canonical) = map.canonical_for(found.id) else {
                continue;
            };
            replacements
                .entry(found.matched)
                .or_insert_with(|| found.with_id(canonical));
            pairs.insert((found.id, canonical));
            remapped += 1;
        }

        if replacements.is_empty() {
            return RewriteOutcome::unchanged(content);
        }

        let mut rewritten = String::with_capacity(content.len());
        let mut cursor = 0;
        for found in &matches {
            if let Some(replacement) = replacements.get(found.matched) {
                rewritten.push_str(&content[cursor..found.span.start]);
                rewritten.push_str(replacement);
                cursor = found.span.end;
            }
        }
        rewritten.push_str(&content[cursor..]);

        RewriteOutcome {
            content: rewritten,
            remapped,
            pairs: pairs.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConsolidationMode;

    fn map(pairs: &[(i64, i64)]) -> DuplicateMap {
        DuplicateMap::from_pairs(ConsolidationMode::Internal, pairs.iter().copied())
    }

    #[test]
    fn test_bare_matches() {
        let matcher = LinkMatcher::new(SyntaxKind::Bare);

        // (input, expected [(matched, id, remainder)])
        let cases: Vec<(&str, Vec<(&str, i64, &str)>)> = vec![
            ("file:5 see also", vec![("file:5", 5, "")]),
            ("file:12?download=1 _blank", vec![("file:12?download=1", 12, "?download=1")]),
            ("\"file:3\" and file:4,", vec![("file:3", 3, ""), ("file:4,", 4, ",")]),
            ("<a href=\"file:9/x.pdf\">", vec![("file:9/x.pdf", 9, "/x.pdf")]),
            ("&lt;file:8&gt;", vec![("file:8", 8, "")]),
            ("file:x file: 12", vec![]),
            ("no references here", vec![]),
        ];

        for (input, expected) in cases {
            let found: Vec<(&str, i64, &str)> = matcher
                .find_all(input)
                .iter()
                .map(|m| (m.matched, m.id, m.remainder))
                .collect();
            assert_eq!(found, expected, "input: {input}");
        }
    }

    #[test]
    fn test_tagged_matches() {
        let matcher = LinkMatcher::new(SyntaxKind::Tagged);

        // (input, expected [(id, remainder, link text)])
        let cases: Vec<(&str, Vec<(i64, &str, &str)>)> = vec![
            (
                r#"<link file:5 - "mytext">Click</link>"#,
                vec![(5, r#" - "mytext""#, "Click")],
            ),
            (
                "&lt;link file:5 _blank&gt;Click&lt;/link&gt;",
                vec![(5, " _blank", "Click")],
            ),
            (
                "&lt;link file:6 - &quot;t&quot;&gt;A&lt;/link&gt;",
                vec![(6, " - &quot;t&quot;", "A")],
            ),
            ("<link file:7&gt;mixed</link>", vec![(7, "", "mixed")]),
            (
                "<link file:1>one</link> and <link file:2>two</link>",
                vec![(1, "", "one"), (2, "", "two")],
            ),
            ("<link file:3>multi\nline</link>", vec![(3, "", "multi\nline")]),
            (
                r#"<link file:5 Q&>Click</link> and <link file:6>Other</link>"#,
                vec![(5, " Q&", "Click"), (6, "", "Other")],
            ),
            (
                "<link file:5 a&&gt;x</link> <link file:6 b&amp;c>y</link>",
                vec![(5, " a&", "x"), (6, " b&amp;c", "y")],
            ),
            ("<link file:7 &gt>z</link>", vec![(7, " &gt", "z")]),
            ("<link\nfile:8>wrapped</link>", vec![(8, "", "wrapped")]),
            ("<link file:4>never closed", vec![]),
            ("<link page:4>not a file</link>", vec![]),
        ];

        for (input, expected) in cases {
            let found: Vec<(i64, &str, &str)> = matcher
                .find_all(input)
                .iter()
                .map(|m| (m.id, m.remainder, m.link_text.unwrap_or_default()))
                .collect();
            assert_eq!(found, expected, "input: {input}");
        }
    }

    #[test]
    fn test_bare_rewrite_round_trip() {
        let rewriter = TextReferenceRewriter::new(SyntaxKind::Bare);

        let outcome = rewriter.rewrite("file:5 see also", &map(&[(5, 2)]));
        assert_eq!(outcome.content, "file:2 see also");
        assert_eq!(outcome.remapped, 1);
        assert_eq!(outcome.pairs, vec![(5, 2)]);

        let untouched = rewriter.rewrite("file:5 see also", &map(&[]));
        assert_eq!(untouched.content, "file:5 see also");
        assert_eq!(untouched.remapped, 0);
        assert!(!untouched.is_changed("file:5 see also"));
    }

    #[test]
    fn test_tagged_rewrite_preserves_link_text() {
        let rewriter = TextReferenceRewriter::new(SyntaxKind::Tagged);
        let input = r#"<p><link file:5 - "mytext">Click</link></p>"#;

        let outcome = rewriter.rewrite(input, &map(&[(5, 2)]));
        assert_eq!(outcome.content, r#"<p><link file:2 - "mytext">Click</link></p>"#);
        assert_eq!(outcome.remapped, 1);

        let escaped = "&lt;link file:5 _blank&gt;Click file:5&lt;/link&gt;";
        let outcome = rewriter.rewrite(escaped, &map(&[(5, 2)]));
        assert_eq!(
            outcome.content,
            "&lt;link file:2 _blank&gt;Click file:5&lt;/link&gt;"
        );
    }

    #[test]
    fn test_repeated_occurrences_are_all_replaced() {
        let rewriter = TextReferenceRewriter::new(SyntaxKind::Bare);
        let outcome = rewriter.rewrite("file:5 then file:5 then file:6", &map(&[(5, 2), (6, 3)]));

        assert_eq!(outcome.content, "file:2 then file:2 then file:3");
        assert_eq!(outcome.remapped, 3);
        assert_eq!(outcome.pairs, vec![(5, 2), (6, 3)]);
    }

    #[test]
    fn test_longer_ids_sharing_a_prefix_are_untouched() {
        let rewriter = TextReferenceRewriter::new(SyntaxKind::Bare);
        let outcome = rewriter.rewrite("file:5 file:52 file:5", &map(&[(5, 2)]));

        assert_eq!(outcome.content, "file:2 file:52 file:2");
        assert_eq!(outcome.remapped, 2);
    }

    #[test]
    fn test_unmapped_ids_are_not_counted() {
        let rewriter = TextReferenceRewriter::new(SyntaxKind::Tagged);
        let input = "<link file:5>a</link><link file:8>b</link>";
        let outcome = rewriter.rewrite(input, &map(&[(8, 1)]));

        assert_eq!(outcome.content, "<link file:5>a</link><link file:1>b</link>");
        assert_eq!(outcome.remapped, 1);
        assert_eq!(outcome.pairs, vec![(8, 1)]);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let duplicates = map(&[(5, 2), (9, 4)]);
        for (kind, input) in [
            (SyntaxKind::Bare, "file:5 and file:9?x=1"),
            (SyntaxKind::Tagged, "<link file:5>a</link> &lt;link file:9&gt;b&lt;/link&gt;"),
        ] {
            let rewriter = TextReferenceRewriter::new(kind);
            let first = rewriter.rewrite(input, &duplicates);
            assert!(first.is_changed(input));

            let second = rewriter.rewrite(&first.content, &duplicates);
            assert_eq!(second.content, first.content);
            assert_eq!(second.remapped, 0);
            assert!(!second.is_changed(&first.content));
        }
    }

    #[test]
    fn test_needle_admits_every_tagged_spelling() {
        let matcher = LinkMatcher::new(SyntaxKind::Tagged);
        for input in [
            "<link file:1>a</link>",
            "<link  file:2>b</link>",
            "<link\tfile:3>c</link>",
            "&lt;link\nfile:4&gt;d&lt;/link&gt;",
        ] {
            assert_eq!(matcher.find_all(input).len(), 1, "input: {input:?}");
            assert!(input.contains(matcher.needle()), "input: {input:?}");
        }
        assert_eq!(LinkMatcher::new(SyntaxKind::Bare).needle(), "file:");
    }
}
