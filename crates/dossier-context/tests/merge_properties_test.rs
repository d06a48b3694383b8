//! Behavioural properties of merge and diff over realistic documents.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};

use dossier_context::{diff_contexts, merge, merge_at};
use dossier_core::{AIResponse, Entities};

fn response_with(people: &[&str], projects: &[&str], summary: &str) -> AIResponse {
    AIResponse {
        version: "v1".to_string(),
        summary: summary.to_string(),
        entities: Entities {
            people: people.iter().map(|s| s.to_string()).collect(),
            projects: projects.iter().map(|s| s.to_string()).collect(),
            technologies: vec!["Docker".to_string()],
        },
        confidence: Some(0.9),
        context_update: true,
        reasoning: "mentions deployment".to_string(),
        raw: String::new(),
    }
}

fn string_set(value: &JsonValue) -> HashSet<String> {
    value
        .as_array()
        .expect("list")
        .iter()
        .map(|v| v.as_str().expect("string").to_string())
        .collect()
}

#[test]
fn merging_the_same_response_twice_adds_no_changes() {
    let base = json!({"people": ["Ana"], "summary": "old"});
    let resp = response_with(&["Jane"], &["deploy-svc"], "paired on deploy");

    let first = merge(&base, &resp).unwrap();
    assert!(!first.changes.is_empty());

    let second = merge(&first.merged, &resp).unwrap();
    assert!(second.changes.is_empty(), "changes: {:?}", second.changes);
    assert!(second.conflicts.is_empty());
}

#[test]
fn disjoint_additions_commute() {
    let a = response_with(&["A"], &[], "");
    let b = response_with(&["B"], &[], "");

    let ab = merge(&merge(&json!({}), &a).unwrap().merged, &b).unwrap();
    let ba = merge(&merge(&json!({}), &b).unwrap().merged, &a).unwrap();

    assert_eq!(ab.merged["people"], json!(["A", "B"]));
    assert_eq!(string_set(&ab.merged["people"]), string_set(&ba.merged["people"]));
    assert!(ab.conflicts.is_empty());
    assert!(ba.conflicts.is_empty());
}

#[test]
fn invalid_names_never_fail_the_merge() {
    let long = "p".repeat(300);
    let resp = response_with(&["", "   ", &long], &["\t"], "");

    let result = merge(&json!({"people": ["Ana"]}), &resp).unwrap();

    assert_eq!(result.merged["people"], json!(["Ana"]));
    assert!(result.merged.get("projects").is_none());
    assert_eq!(result.conflicts.len(), 4);
    assert!(result.conflicts.contains(&format!("people:invalid:{long}")));
    assert!(result.conflicts.contains(&"projects:invalid:\t".to_string()));
}

#[test]
fn diff_of_a_merge_matches_its_changes_plus_meta() {
    let base = json!({"people": ["Ana"], "team": "platform"});
    let resp = response_with(&["Jane"], &["deploy-svc"], "paired");

    let result = merge_at(&base, &resp, Utc::now()).unwrap();
    let diff = diff_contexts(&base, &result.merged).unwrap();

    let changed: HashSet<&str> = result.changes.iter().map(|c| c.key.as_str()).collect();
    let diffed: HashSet<&str> = diff.iter().map(|c| c.key.as_str()).collect();

    assert!(diffed.contains("_meta"));
    assert!(!changed.contains("_meta"));
    assert_eq!(
        diffed.difference(&changed).copied().collect::<Vec<_>>(),
        vec!["_meta"]
    );
}
