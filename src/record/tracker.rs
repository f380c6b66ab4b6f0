use crate::core::Value;
use std::collections::BTreeSet;

/// Fields modified since the record was loaded or last saved.
///
/// A field joins the set only when the assigned value differs from the
/// current one, and stays in it until `clear` even if later reverted.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    dirty: BTreeSet<String>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an assignment; returns whether the value actually changed.
    pub fn observe(&mut self, field: &str, current: &Value, next: &Value) -> bool {
        if current == next {
            return false;
        }
        self.dirty.insert(field.to_string());
        true
    }

    pub fn is_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.dirty.iter().map(String::as_str).collect()
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_same_value_is_not_dirty() {
        let mut tracker = ChangeTracker::new();
        assert!(!tracker.observe("name", &Value::from("a"), &Value::from("a")));
        assert!(!tracker.has_changes());

        assert!(tracker.observe("name", &Value::from("a"), &Value::from("b")));
        assert_eq!(tracker.changed_fields(), vec!["name"]);
    }

    #[test]
    fn test_integer_to_float_counts_as_change() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.observe("score", &Value::Integer(1), &Value::Float(1.0)));
    }

    #[test]
    fn test_revert_keeps_field_dirty() {
        let mut tracker = ChangeTracker::new();
        tracker.observe("n", &Value::Integer(1), &Value::Integer(2));
        tracker.observe("n", &Value::Integer(2), &Value::Integer(1));
        assert!(tracker.is_dirty("n"));

        tracker.clear();
        assert!(!tracker.has_changes());
    }

    proptest! {
        #[test]
        fn prop_dirty_set_is_fields_ever_changed(
            ops in prop::collection::vec((0usize..4, 0i64..3), 0..40)
        ) {
            let names = ["a", "b", "c", "d"];
            let mut values: HashMap<&str, Value> =
                names.iter().map(|n| (*n, Value::Integer(0))).collect();
            let mut tracker = ChangeTracker::new();
            let mut expected = BTreeSet::new();

            for (idx, raw) in ops {
                let field = names[idx];
                let next = Value::Integer(raw);
                if values[field] != next {
                    expected.insert(field.to_string());
                }
                tracker.observe(field, &values[field], &next);
                values.insert(field, next);
            }

            let actual: BTreeSet<String> =
                tracker.changed_fields().into_iter().map(str::to_string).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
