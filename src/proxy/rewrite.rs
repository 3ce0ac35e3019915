//! Path rewriting for matched rules.
//!
//! A rule without a rewrite forwards the path untouched. A rule with one
//! replaces the first match of the rule's own compiled pattern, so the
//! rewrite always acts on exactly what the matcher saw. The replacement
//! uses `regex` syntax: `$1` and `${name}` expand capture groups.

use std::borrow::Cow;

use super::routing::Rule;

#[must_use]
pub fn rewrite<'a>(rule: &Rule, path: &'a str) -> Cow<'a, str> {
    let Some(replacement) = rule.rewrite.as_deref() else {
        return Cow::Borrowed(path);
    };

    let rewritten = rule.path.replace(path, replacement);
    if rewritten.starts_with('/') {
        rewritten
    } else {
        Cow::Owned(format!("/{rewritten}"))
    }
}
