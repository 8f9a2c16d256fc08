use serde_json::{json, Map, Value};

/// Field-level diff between two value snapshots.
///
/// A key counts as changed when it is present in `new` and its value differs
/// from `old` (including keys absent from `old`). Keys present only in `old`
/// are ignored. Non-object snapshots produce an empty diff.
pub fn changed_fields(old: &Value, new: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        return out;
    };
    for (key, new_value) in new_map {
        match old_map.get(key) {
            Some(old_value) if old_value == new_value => {}
            old_value => {
                out.insert(
                    key.clone(),
                    json!({
                        "old": old_value.cloned().unwrap_or(Value::Null),
                        "new": new_value.clone(),
                    }),
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_changed_and_added_keys_only() {
        let old = json!({"status": "pending", "notes": "x", "total": 64});
        let new = json!({"status": "approved", "total": 64});
        let diff = changed_fields(&old, &new);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["status"]["old"], "pending");
        assert_eq!(diff["status"]["new"], "approved");
        // "notes" exists only in old: ignored, not reported as removed
        assert!(!diff.contains_key("notes"));
    }

    #[test]
    fn key_missing_from_old_diffs_against_null() {
        let old = json!({});
        let new = json!({"approved_by": "ops"});
        let diff = changed_fields(&old, &new);
        assert_eq!(diff["approved_by"]["old"], Value::Null);
        assert_eq!(diff["approved_by"]["new"], "ops");
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let snap = json!({"a": 1, "b": [1, 2]});
        assert!(changed_fields(&snap, &snap).is_empty());
    }

    #[test]
    fn non_object_snapshots_diff_empty() {
        assert!(changed_fields(&json!(null), &json!({"a": 1})).is_empty());
        assert!(changed_fields(&json!({"a": 1}), &json!(3)).is_empty());
    }
}
