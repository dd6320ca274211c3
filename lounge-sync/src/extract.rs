use lounge_core::types::Tier;
use serde_json::Value;

/// Key names an email address may hide under. The CRM does not fix the
/// payload shape contractually, so extraction is a best-effort deep search.
const EMAIL_KEYS: &[&str] = &["email", "emailAddress", "loginEmail"];

/// Key names that hold membership labels.
const LABEL_KEYS: &[&str] = &["labels", "labelKeys", "tags"];

/// Recursion guard for hostile or cyclic-looking payloads.
const MAX_DEPTH: usize = 16;

/// Depth-first search for the first plausible email address under an
/// accepted key, anywhere in the tree. Order-independent with respect to
/// payload nesting; deterministic for a given document.
pub fn find_email(value: &Value) -> Option<String> {
    find_email_at(value, 0)
}

fn find_email_at(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in EMAIL_KEYS {
                if let Some(Value::String(candidate)) = map.get(*key) {
                    if candidate.contains('@') {
                        return Some(candidate.clone());
                    }
                }
            }
            map.values().find_map(|v| find_email_at(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_email_at(v, depth + 1)),
        _ => None,
    }
}

/// Collects every label string found under any accepted label key, at any
/// depth. Labels may arrive as arrays of strings or single strings.
pub fn collect_labels(value: &Value) -> Vec<String> {
    let mut labels = Vec::new();
    collect_labels_at(value, 0, &mut labels);
    labels
}

fn collect_labels_at(value: &Value, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if LABEL_KEYS.contains(&key.as_str()) {
                    push_label_strings(child, out);
                } else {
                    collect_labels_at(child, depth + 1, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_labels_at(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn push_label_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(label) => out.push(label.clone()),
        Value::Array(items) => {
            for item in items {
                if let Value::String(label) = item {
                    out.push(label.clone());
                }
            }
        }
        _ => {}
    }
}

/// Maps CRM labels to a tier by case-insensitive substring. PREMIUM wins
/// over STANDARD when both appear; neither resolves to FREE.
pub fn resolve_tier(labels: &[String]) -> Tier {
    let joined = labels.join("|").to_uppercase();
    if joined.contains("PREMIUM") {
        Tier::Premium
    } else if joined.contains("STANDARD") {
        Tier::Standard
    } else {
        Tier::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_email_in_nested_contact_shape() {
        let payload = json!({
            "data": {
                "contact": {
                    "emails": [{"email": "member@example.com"}],
                    "labels": ["PREMIUM"]
                }
            }
        });
        assert_eq!(find_email(&payload).as_deref(), Some("member@example.com"));
    }

    #[test]
    fn finds_email_in_flat_shape() {
        let payload = json!({"emailAddress": "flat@example.com", "labels": ["STANDARD"]});
        assert_eq!(find_email(&payload).as_deref(), Some("flat@example.com"));
    }

    #[test]
    fn rejects_non_address_strings_and_empty_payloads() {
        assert_eq!(find_email(&json!({"email": "not-an-address"})), None);
        assert_eq!(find_email(&json!({})), None);
        assert_eq!(find_email(&json!(null)), None);
    }

    #[test]
    fn collects_labels_from_all_accepted_keys() {
        let payload = json!({
            "emails": [{"email": "x@y.com"}],
            "labelKeys": ["premium_member"],
            "info": {"tags": ["beta"], "labels": "legacy"}
        });
        let mut labels = collect_labels(&payload);
        labels.sort();
        assert_eq!(labels, ["beta", "legacy", "premium_member"]);
    }

    #[test]
    fn premium_beats_standard() {
        let both = vec!["standard_member".to_string(), "premium_member".to_string()];
        assert_eq!(resolve_tier(&both), Tier::Premium);
        let standard = vec!["Standard".to_string()];
        assert_eq!(resolve_tier(&standard), Tier::Standard);
        assert_eq!(resolve_tier(&[]), Tier::Free);
        let unrelated = vec!["newsletter".to_string()];
        assert_eq!(resolve_tier(&unrelated), Tier::Free);
    }
}
