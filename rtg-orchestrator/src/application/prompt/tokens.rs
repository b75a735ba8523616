//! Placeholder syntax: normalization and substitution
//!
//! The canonical syntax is `{{TOKEN}}` (optionally `{{TOKEN:arg}}`). Legacy
//! spellings are rewritten to it once, by [`normalize`], before any
//! substitution runs.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Tokens filled by the general pass
pub const GENERAL_TOKENS: &[&str] = &[
    "GENERATED_AT",
    "AUTHOR",
    "ENV",
    "CI_EXAMPLE",
    "PROJECT_KEY",
    "RESILIENCY_TARGET",
    "PROJECTS_JSON",
    "PROJECT_JSON",
    "PROJECTS_COUNT",
    "PROJECT_NAMES_CSV",
    "COMPONENTS_JSON",
    "COMPONENTS_COUNT",
    "COMPONENT_TABLE",
    "THREATS_JSON",
    "THREAT_MODEL_TABLE",
    "VULNERABILITIES_JSON",
    "VULNERABILITY_TABLE",
    "THREAT_SAFEGUARDS_JSON",
    "STATISTICS_JSON",
    "PIPELINE_STEPS_JSON",
    "TERRAFORM_TAGS_JSON",
    "AWS_ACCOUNTS_JSON",
];

/// Tokens filled by the type-specific passes
pub const TYPE_SPECIFIC_TOKENS: &[&str] = &[
    "PROJECT_DATA_JSON",
    "PROJECT_TABLE",
    "COMPONENT_DATA_JSON",
    "COMPONENT_TABLE",
    "SAFEGUARD_DATA_JSON",
    "SAFEGUARD_TABLE",
    "THREAT_MODEL_DATA_JSON",
    "STATUS_SUMMARY",
    "THREAT_MODEL_TABLE",
    "RECENT_ACTIVITY_TABLE",
];

pub const SEVERITY_BADGE: &str = "SEVERITY_BADGE";

/// Names recognised in bare form. Only names containing `_` qualify, so
/// ordinary words such as "author" or "env" in prose are never rewritten.
fn bare_tokens() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = GENERAL_TOKENS
        .iter()
        .chain(TYPE_SPECIFIC_TOKENS)
        .copied()
        .filter(|t| t.contains('_'))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names
}

static LEGACY_FORMS: Lazy<Regex> = Lazy::new(|| {
    let alternation = bare_tokens().join("|");
    Regex::new(&format!(
        r"\{{\{{[^{{}}]*\}}\}}|`({alt})`|\b({alt})\b",
        alt = alternation
    ))
    .expect("legacy token regex is valid")
});

static CANONICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Z0-9_]+)\s*(?::\s*([^{}]*?))?\s*\}\}").expect("token regex is valid")
});

static ANY_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}]+\}\}").expect("placeholder regex is valid"));

/// Rewrite every accepted placeholder spelling to `{{TOKEN}}`.
///
/// Handles HTML entity and full-width curly braces, `` `TOKEN` ``, bare
/// `TOKEN` at word boundaries, and the `<ISO-timestamp>` / `<username>`
/// markers. Existing `{{...}}` spans are left untouched.
pub fn normalize(text: &str) -> String {
    let text = text
        .replace("&#123;", "{")
        .replace("&#125;", "}")
        .replace("&lbrace;", "{")
        .replace("&rbrace;", "}")
        .replace('\u{FF5B}', "{")
        .replace('\u{FF5D}', "}")
        .replace("<ISO-timestamp>", "{{GENERATED_AT}}")
        .replace("<username>", "{{AUTHOR}}");

    LEGACY_FORMS
        .replace_all(&text, |caps: &Captures<'_>| {
            match caps.get(1).or_else(|| caps.get(2)) {
                Some(name) => format!("{{{{{}}}}}", name.as_str()),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Ordered mapping from token name to replacement text
#[derive(Debug, Clone, Default)]
pub struct TokenMap(BTreeMap<String, String>);

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: &str, value: impl Into<String>) {
        self.0.insert(token.to_string(), value.into());
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replace canonical placeholders found in `map`, except those in `skip`.
///
/// `{{SEVERITY_BADGE:Level}}` renders as `[Level]`. Unknown placeholders
/// are left in place.
pub fn substitute(text: &str, map: &TokenMap, skip: &[&str]) -> String {
    CANONICAL
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            if name == SEVERITY_BADGE {
                if let Some(level) = caps.get(2) {
                    return format!("[{}]", level.as_str().trim());
                }
            }
            if skip.contains(&name) || caps.get(2).is_some() {
                return caps[0].to_string();
            }
            match map.get(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Distinct placeholders still present, in order of first appearance
pub fn unresolved(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ANY_PLACEHOLDER
        .find_iter(text)
        .map(|m| m.as_str().split_whitespace().collect::<String>())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn map() -> TokenMap {
        let mut map = TokenMap::new();
        map.insert("PROJECT_KEY", "payments-api");
        map.insert("AUTHOR", "ana");
        map.insert("GENERATED_AT", "2026-03-04T10:15:30Z");
        map
    }

    #[rstest]
    #[case("Key: {{PROJECT_KEY}}")]
    #[case("Key: {{ PROJECT_KEY }}")]
    #[case("Key: `PROJECT_KEY`")]
    #[case("Key: PROJECT_KEY")]
    #[case("Key: &#123;&#123;PROJECT_KEY&#125;&#125;")]
    #[case("Key: &lbrace;&lbrace;PROJECT_KEY&rbrace;&rbrace;")]
    #[case("Key: \u{FF5B}\u{FF5B}PROJECT_KEY\u{FF5D}\u{FF5D}")]
    fn test_every_syntax_resolves_identically(#[case] template: &str) {
        let out = substitute(&normalize(template), &map(), &[]);
        assert_eq!(out, "Key: payments-api");
    }

    #[test]
    fn test_full_width_square_brackets_are_kept() {
        let text = "Scope \u{FF3B}internal\u{FF3D} only";
        assert_eq!(normalize(text), text);
        let nested = "\u{FF3B}\u{FF3B}PROJECT_KEY\u{FF3D}\u{FF3D}";
        assert_eq!(
            normalize(nested),
            "\u{FF3B}\u{FF3B}{{PROJECT_KEY}}\u{FF3D}\u{FF3D}"
        );
    }

    #[test]
    fn test_legacy_markers() {
        let out = substitute(&normalize("By <username> at <ISO-timestamp>"), &map(), &[]);
        assert_eq!(out, "By ana at 2026-03-04T10:15:30Z");
    }

    #[test]
    fn test_bare_words_need_boundaries() {
        assert_eq!(normalize("MY_PROJECT_KEY_X"), "MY_PROJECT_KEY_X");
        assert_eq!(normalize("the author wrote"), "the author wrote");
        assert_eq!(normalize("PROJECTS_JSON."), "{{PROJECTS_JSON}}.");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let template = "A `PROJECT_JSON` B PROJECTS_JSON C {{ AUTHOR }} D <username>";
        let once = normalize(template);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let template = "Report PROJECT_KEY by {{AUTHOR}} {{UNKNOWN_THING}}";
        let once = substitute(&normalize(template), &map(), &[]);
        let twice = substitute(&normalize(&once), &map(), &[]);
        assert_eq!(once, twice);
        assert_eq!(once, "Report payments-api by ana {{UNKNOWN_THING}}");
    }

    #[test]
    fn test_severity_badge_macro() {
        assert_eq!(
            substitute("{{SEVERITY_BADGE: High }} and {{SEVERITY_BADGE:Low}}", &map(), &[]),
            "[High] and [Low]"
        );
    }

    #[test]
    fn test_skipped_tokens_survive() {
        let out = substitute("{{PROJECT_KEY}} {{AUTHOR}}", &map(), &["PROJECT_KEY"]);
        assert_eq!(out, "{{PROJECT_KEY}} ana");
    }

    #[test]
    fn test_unresolved_is_distinct() {
        assert_eq!(
            unresolved("{{A_B}} x {{ A_B }} {{C}}"),
            vec!["{{A_B}}".to_string(), "{{C}}".to_string()]
        );
    }
}
