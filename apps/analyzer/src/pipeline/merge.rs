//! Merge/dedup for results produced by parallel, independently failing tasks.
//!
//! Every merge here is commutative (as a set) and idempotent, with the empty
//! input as identity, so fan-out completion order never matters.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Union of string lists, deduplicated case-insensitively. The first-seen
/// casing wins; blank entries are dropped.
pub fn merge_lists<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for list in lists {
        for item in list {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(trimmed.to_lowercase()) {
                merged.push(trimmed.to_string());
            }
        }
    }

    merged
}

/// Pairwise form of [`merge_lists`].
pub fn merge_pair(a: &[String], b: &[String]) -> Vec<String> {
    merge_lists([a, b])
}

/// Merges section maps produced for consecutive chunks of one document.
/// A title seen twice has its bodies concatenated, separated by a blank line.
pub fn merge_sections(into: &mut Map<String, Value>, part: Map<String, Value>) {
    for (title, body) in part {
        let body = match body {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        if body.trim().is_empty() {
            continue;
        }
        match into.get_mut(&title) {
            Some(Value::String(existing)) if !existing.is_empty() => {
                let joined = format!("{}\n\n{}", existing.trim_end(), body.trim_start());
                *existing = joined;
            }
            _ => {
                into.insert(title, Value::String(body));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn as_set(items: &[String]) -> HashSet<String> {
        items.iter().map(|s| s.to_lowercase()).collect()
    }

    #[test]
    fn test_dedup_keeps_first_seen_casing() {
        let merged = merge_pair(&list(&["Rust", "Kafka"]), &list(&["rust", "KAFKA", "Go"]));
        assert_eq!(merged, list(&["Rust", "Kafka", "Go"]));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = list(&["Python", "SQL"]);
        let b = list(&["sql", "Docker"]);
        let ab = merge_pair(&a, &b);
        assert_eq!(merge_pair(&ab, &a), ab);
    }

    #[test]
    fn test_merge_is_commutative_as_sets() {
        let a = list(&["Python", "SQL", "AWS"]);
        let b = list(&["sql", "Docker"]);
        assert_eq!(as_set(&merge_pair(&a, &b)), as_set(&merge_pair(&b, &a)));
    }

    #[test]
    fn test_empty_list_is_identity() {
        let a = list(&["Terraform", "Go"]);
        assert_eq!(merge_pair(&a, &[]), a);
        assert_eq!(merge_pair(&[], &a), a);
        assert!(merge_pair(&[], &[]).is_empty());
    }

    #[test]
    fn test_blank_entries_dropped() {
        let merged = merge_pair(&list(&["  ", "Rust "]), &list(&[""]));
        assert_eq!(merged, list(&["Rust"]));
    }

    #[test]
    fn test_merge_sections_concatenates_duplicate_titles() {
        let mut sections = Map::new();
        merge_sections(
            &mut sections,
            json!({"Experience": "Acme 2020-2022\n"}).as_object().unwrap().clone(),
        );
        merge_sections(
            &mut sections,
            json!({"Experience": "\nGlobex 2022-", "Skills": "Rust", "Empty": ""})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(sections["Experience"], json!("Acme 2020-2022\n\nGlobex 2022-"));
        assert_eq!(sections["Skills"], json!("Rust"));
        assert!(!sections.contains_key("Empty"));
    }
}
