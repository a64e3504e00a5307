//! Heuristic wikitext cleanup applied before byte encoding.

use std::sync::OnceLock;

use regex::Regex;

struct Patterns {
    template: Regex,
    reference: Regex,
    tag: Regex,
    link_brackets: Regex,
    blank_lines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        template: Regex::new(r"(?s)\{\{.*?\}\}").expect("template pattern"),
        reference: Regex::new(r"(?s)<ref.*?>.*?</ref>").expect("reference pattern"),
        tag: Regex::new(r"<.*?>").expect("tag pattern"),
        link_brackets: Regex::new(r"\[\[|\]\]").expect("link pattern"),
        blank_lines: Regex::new(r"\n{2,}").expect("blank line pattern"),
    })
}

/// Strips templates, references, markup tags and link brackets, collapses runs of blank
/// lines, and trims surrounding whitespace.
///
/// Nested templates are only partially removed: the shortest `{{ ... }}` match wins.
#[must_use]
pub fn clean_wikitext(text: &str) -> String {
    let p = patterns();
    let text = p.template.replace_all(text, "");
    let text = p.reference.replace_all(&text, "");
    let text = p.tag.replace_all(&text, "");
    let text = p.link_brackets.replace_all(&text, "");
    let text = p.blank_lines.replace_all(&text, "\n\n");
    text.trim().to_string()
}
