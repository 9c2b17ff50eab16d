//! `{placeholder}` handling for story templates.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(.*?)\}").expect("placeholder pattern is valid"));

/// Unique field names in order of first appearance.
pub fn fields(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[0].replace(['{', '}'], ""))
        .filter(|field| !field.is_empty() && seen.insert(field.clone()))
        .collect()
}

/// Replaces every `{field}` with its value in a single pass.
///
/// Values are never scanned again, so a value that itself looks like a
/// placeholder is inserted verbatim.
pub fn substitute(template: &str, inputs: &BTreeMap<String, String>) -> String {
    if inputs.is_empty() {
        return template.to_owned();
    }
    let lookup = |caps: &Captures| -> String {
        inputs
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_owned())
    };
    match field_pattern(inputs.keys()) {
        Ok(pattern) => pattern.replace_all(template, lookup).into_owned(),
        Err(e) => {
            warn!(error = %e, "falling back to placeholder scan");
            PLACEHOLDER.replace_all(template, lookup).into_owned()
        }
    }
}

/// `\{(a|b\.c|...)\}` over the escaped field names, longest first.
fn field_pattern<'a>(names: impl Iterator<Item = &'a String>) -> Result<Regex, regex::Error> {
    let mut names: Vec<&String> = names.collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = names
        .into_iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\{{({alternation})\}}"))
}

/// Inputs for `template`: exactly its fields, keeping values of fields that
/// survive and defaulting new ones to the empty string.
pub fn rederive_inputs(
    template: &str,
    previous: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    fields(template)
        .into_iter()
        .map(|field| {
            let value = previous.get(&field).cloned().unwrap_or_default();
            (field, value)
        })
        .collect()
}
