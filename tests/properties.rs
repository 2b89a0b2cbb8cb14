//! Property tests for diffing and replay

use a3s_audit::diff::{apply, apply_to_value, diff, fields_of};
use a3s_audit::reconstruct::replay;
use a3s_audit::{Actor, AuditAction, EventRecord};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn flat_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}", leaf(), 0..6).prop_map(to_object)
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z0-9 ]{0,8}".prop_map(Value::from),
    ]
}

fn to_object(map: BTreeMap<String, Value>) -> Value {
    Value::Object(map.into_iter().collect::<Map<String, Value>>())
}

proptest! {
    #[test]
    fn test_applying_diff_yields_new_fields(old in flat_object(), new in flat_object()) {
        let mut fields = fields_of(&old);
        apply(&mut fields, &diff(&old, &new));
        prop_assert_eq!(fields, fields_of(&new));
    }

    #[test]
    fn test_diff_lists_only_changed_fields(old in flat_object(), new in flat_object()) {
        let changes = diff(&old, &new);
        for change in &changes {
            prop_assert_ne!(&change.old_value, &change.new_value);
        }
        let mut names: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        let len = names.len();
        names.dedup();
        prop_assert_eq!(names.len(), len);
    }

    #[test]
    fn test_scalar_diff_round_trip(old in leaf(), new in leaf()) {
        prop_assert_eq!(apply_to_value(&old, &diff(&old, &new)), new);
    }

    #[test]
    fn test_replay_matches_every_prefix(values in prop::collection::vec(flat_object(), 1..8)) {
        let actor = Actor::new("u-prop", "Prop");
        let mut records = Vec::new();
        let mut expected = Vec::new();

        let mut create = EventRecord::new("entry", AuditAction::Create, &actor, diff(&Value::Null, &values[0]));
        create.id = 1;
        records.push(create);
        expected.push(values[0].clone());

        for pair in values.windows(2) {
            let changes = diff(&pair[0], &pair[1]);
            if changes.is_empty() {
                continue;
            }
            let mut update = EventRecord::new("entry", AuditAction::Update, &actor, changes);
            update.id = records.len() as u64 + 1;
            records.push(update);
            expected.push(pair[1].clone());
        }

        for (n, want) in expected.iter().enumerate() {
            let got = replay(&records[..=n]).into_value();
            prop_assert_eq!(got.as_ref(), Some(want));
        }

        // Order of input does not matter
        let mut reversed: Vec<&EventRecord> = records.iter().collect();
        reversed.reverse();
        prop_assert_eq!(replay(reversed).into_value(), expected.last().cloned());
    }
}
