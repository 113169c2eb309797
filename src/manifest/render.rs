//! Placeholder substitution

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Replace every occurrence of each key with its value.
///
/// Keys are applied in map order. Keys absent from `text` are ignored and
/// placeholders without a value are left as they are.
pub fn render(text: &str, values: &BTreeMap<String, String>) -> String {
    values
        .iter()
        .fold(text.to_string(), |acc, (key, value)| acc.replace(key.as_str(), value))
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[A-Za-z0-9_]+\}\}").expect("valid regex"))
}

/// `{{NAME}}` tokens still present in `text`, deduplicated in order of appearance
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in placeholder().find_iter(text) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
    }
    found
}
