//! Page records extracted from the dump and the rule deciding which get tokenized.

/// Namespace of encyclopedia articles proper.
pub const ARTICLE_NAMESPACE: i64 = 0;

/// One `<page>` element of the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    /// Page title.
    pub title: String,
    /// Numeric namespace; `-1` when the page carried no `<ns>` element.
    pub namespace: i64,
    /// Whether the page carried a `<redirect>` element.
    pub is_redirect: bool,
    /// Raw wikitext of the latest revision.
    pub body: String,
}

impl Article {
    /// Returns `true` for main-namespace, non-redirect, non-list pages whose raw body has at
    /// least `min_chars` characters.
    #[must_use]
    pub fn qualifies(&self, min_chars: usize) -> bool {
        self.namespace == ARTICLE_NAMESPACE
            && !self.is_redirect
            && !is_list_title(&self.title)
            && self.body.chars().count() >= min_chars
    }
}

fn is_list_title(title: &str) -> bool {
    const PREFIX: &str = "list of";
    title
        .get(..PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, body_len: usize) -> Article {
        Article {
            title: title.into(),
            namespace: 0,
            is_redirect: false,
            body: "x".repeat(body_len),
        }
    }

    #[test]
    fn list_pages_are_rejected_case_insensitively() {
        assert!(article("Test", 250).qualifies(200));
        assert!(!article("List of Things", 250).qualifies(200));
        assert!(!article("LIST OF rivers", 250).qualifies(200));
        assert!(article("Listing", 250).qualifies(200));
    }

    #[test]
    fn short_redirect_and_foreign_namespace_pages_are_rejected() {
        assert!(!article("Short", 199).qualifies(200));
        let redirect = Article {
            is_redirect: true,
            ..article("Moved", 250)
        };
        assert!(!redirect.qualifies(200));
        let talk = Article {
            namespace: 1,
            ..article("Talk page", 250)
        };
        assert!(!talk.qualifies(200));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let body = "é".repeat(200);
        let page = Article {
            body,
            ..article("Accents", 0)
        };
        assert!(page.qualifies(200));
        assert!(!page.qualifies(201));
    }
}
