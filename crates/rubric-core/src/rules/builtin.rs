//! Built-in rule functions.
//!
//! Each function reads the fragment (the extracted elements, or the whole
//! response as a single element) and returns a verdict with an explanation.

use std::collections::HashSet;

use super::patterns::{ends_with_punctuation, word_count};
use super::{Bounds, Pattern, RuleOutcome};

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn joined(fragment: &[String]) -> String {
    fragment.join("\n")
}

/// Every keyword appears somewhere in the fragment.
pub fn keywords(fragment: &[String], keywords: &[String]) -> RuleOutcome {
    let text = joined(fragment);
    let missing: Vec<&str> = keywords
        .iter()
        .filter(|k| !contains_ci(&text, k))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        RuleOutcome::pass(format!("All keywords present: {}", keywords.join(", ")))
    } else {
        RuleOutcome::fail(format!("Missing keywords: {}", missing.join(", ")))
    }
}

/// At least `min` of the keywords appear.
pub fn any_keywords(fragment: &[String], keywords: &[String], min: usize) -> RuleOutcome {
    let text = joined(fragment);
    let found: Vec<&str> = keywords
        .iter()
        .filter(|k| contains_ci(&text, k))
        .map(String::as_str)
        .collect();

    let summary = format!("Found {} of required {}: [{}]", found.len(), min, found.join(", "));
    if found.len() >= min {
        RuleOutcome::pass(summary)
    } else {
        RuleOutcome::fail(summary)
    }
}

/// None of the keywords appear.
pub fn non_keywords(fragment: &[String], keywords: &[String]) -> RuleOutcome {
    let text = joined(fragment);
    let present: Vec<&str> = keywords
        .iter()
        .filter(|k| contains_ci(&text, k))
        .map(String::as_str)
        .collect();

    if present.is_empty() {
        RuleOutcome::pass("No forbidden keywords present")
    } else {
        RuleOutcome::fail(format!("Forbidden keywords present: {}", present.join(", ")))
    }
}

/// A forbidden notation does not appear.
pub fn non_notation(fragment: &[String], notation: &str) -> RuleOutcome {
    if fragment.iter().any(|s| s.contains(notation)) {
        RuleOutcome::fail(format!("Forbidden notation {notation:?} present"))
    } else {
        RuleOutcome::pass(format!("Notation {notation:?} not present"))
    }
}

pub fn item_count(fragment: &[String], bounds: Bounds) -> RuleOutcome {
    let count = fragment.len();
    let summary = format!("Item count {count}, expected {bounds}");
    if bounds.contains(count) {
        RuleOutcome::pass(summary)
    } else {
        RuleOutcome::fail(summary)
    }
}

/// Every element's word count is within bounds.
pub fn each_length(fragment: &[String], bounds: Bounds) -> RuleOutcome {
    let offending: Vec<String> = fragment
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let n = word_count(s);
            (!bounds.contains(n)).then(|| format!("[{i}] has {n}"))
        })
        .collect();

    if offending.is_empty() {
        RuleOutcome::pass(format!("All {} elements within {bounds} words", fragment.len()))
    } else {
        RuleOutcome::fail(format!("Elements outside {bounds} words: {}", offending.join("; ")))
    }
}

/// The summed word count is within bounds.
pub fn total_length(fragment: &[String], bounds: Bounds) -> RuleOutcome {
    let total: usize = fragment.iter().map(|s| word_count(s)).sum();
    let summary = format!("Total length {total} words, expected {bounds}");
    if bounds.contains(total) {
        RuleOutcome::pass(summary)
    } else {
        RuleOutcome::fail(summary)
    }
}

/// Some element fully matches the pattern.
pub fn regex_any(fragment: &[String], pattern: &Pattern) -> RuleOutcome {
    match fragment.iter().position(|s| pattern.matches_fully(s.trim())) {
        Some(i) => RuleOutcome::pass(format!("Element [{i}] matches /{}/", pattern.as_str())),
        None => RuleOutcome::fail(format!("No element matches /{}/", pattern.as_str())),
    }
}

/// No element matches the pattern at its start.
pub fn non_regex(fragment: &[String], pattern: &Pattern) -> RuleOutcome {
    let offending: Vec<String> = fragment
        .iter()
        .enumerate()
        .filter(|(_, s)| pattern.matches_prefix(s))
        .map(|(i, _)| format!("[{i}]"))
        .collect();

    if offending.is_empty() {
        RuleOutcome::pass(format!("No element matches /{}/", pattern.as_str()))
    } else {
        RuleOutcome::fail(format!(
            "Elements matching forbidden /{}/: {}",
            pattern.as_str(),
            offending.join(", ")
        ))
    }
}

pub fn starts_with_each(fragment: &[String], prefix: &str) -> RuleOutcome {
    let prefix = prefix.trim().to_lowercase();
    every_element(fragment, &format!("start with {prefix:?}"), |s| {
        s.trim().to_lowercase().starts_with(&prefix)
    })
}

pub fn ends_with_each(fragment: &[String], suffix: &str) -> RuleOutcome {
    let suffix = suffix.trim().to_lowercase();
    every_element(fragment, &format!("end with {suffix:?}"), |s| {
        s.trim().to_lowercase().ends_with(&suffix)
    })
}

pub fn no_end_punctuation(fragment: &[String]) -> RuleOutcome {
    every_element(fragment, "end without punctuation", |s| !ends_with_punctuation(s))
}

/// No element appears more than once.
pub fn repeat_each(fragment: &[String]) -> RuleOutcome {
    let mut seen = HashSet::new();
    let repeated: Vec<&str> = fragment
        .iter()
        .map(|s| s.trim())
        .filter(|s| !seen.insert(*s))
        .collect();

    if repeated.is_empty() {
        RuleOutcome::pass(format!("All {} elements are distinct", fragment.len()))
    } else {
        RuleOutcome::fail(format!("Repeated elements: {}", repeated.join(", ")))
    }
}

/// The response parses as a list.
pub fn list_schema(response: &str) -> RuleOutcome {
    match crate::extraction::parse_list(response) {
        Ok(list) => RuleOutcome::pass(format!("Response is a list of {} elements", list.len())),
        Err(e) => RuleOutcome::fail(format!("Response is not a list: {e}")),
    }
}

fn every_element(fragment: &[String], requirement: &str, check: impl Fn(&str) -> bool) -> RuleOutcome {
    let offending: Vec<String> = fragment
        .iter()
        .enumerate()
        .filter(|(_, s)| !check(s))
        .map(|(i, _)| format!("[{i}]"))
        .collect();

    if offending.is_empty() {
        RuleOutcome::pass(format!("All {} elements {requirement}", fragment.len()))
    } else {
        RuleOutcome::fail(format!("Elements that do not {requirement}: {}", offending.join(", ")))
    }
}
