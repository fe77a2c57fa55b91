use crate::models::cell_text;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// `{{name}}` tokens in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let name = &caps[1];
        if !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    }
    found
}

/// Placeholders that do not name any dataset column.
pub fn unknown_placeholders(text: &str, columns: &[String]) -> Vec<String> {
    placeholders(text)
        .into_iter()
        .filter(|p| !columns.iter().any(|c| c == p))
        .collect()
}

/// Substitute placeholders with values from one dataset row. Unknown
/// placeholders are left as written.
pub fn render(text: &str, row: &Value) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match row.get(&caps[1]) {
            Some(value) => cell_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}
