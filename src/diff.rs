//! Field-level diffing of entry values
//!
//! An entry value is treated as a flat map of fields. Non-object values
//! (settings are frequently plain scalars) are modelled as a one-field map
//! under [`SCALAR_FIELD`]. `null` means "absent" on either side, both for
//! whole entries and for individual fields.

use crate::types::FieldChange;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Reserved field name holding a scalar entry's value
pub const SCALAR_FIELD: &str = "$value";

/// Decompose an entry value into its field map
pub fn fields_of(value: &Value) -> Map<String, Value> {
    match value {
        Value::Null => Map::new(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        other => {
            let mut map = Map::new();
            map.insert(SCALAR_FIELD.to_string(), other.clone());
            map
        }
    }
}

/// Whether an object entry uses the reserved scalar field name
///
/// Such an entry would be indistinguishable from a scalar once diffed.
pub fn uses_reserved_field(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key(SCALAR_FIELD))
}

/// Rebuild an entry value from its field map
pub fn value_from_fields(mut fields: Map<String, Value>) -> Value {
    if fields.len() == 1 {
        if let Some(scalar) = fields.remove(SCALAR_FIELD) {
            return scalar;
        }
    }
    Value::Object(fields)
}

/// Compute the field changes turning `old` into `new`
///
/// Every field present on either side is compared; a field present on one
/// side only yields a change with `null` for the missing side. Output is
/// sorted by field name.
pub fn diff(old: &Value, new: &Value) -> Vec<FieldChange> {
    let old_fields = fields_of(old);
    let new_fields = fields_of(new);

    let names: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let before = old_fields.get(name).cloned().unwrap_or(Value::Null);
            let after = new_fields.get(name).cloned().unwrap_or(Value::Null);
            (before != after).then(|| FieldChange::new(name.clone(), before, after))
        })
        .collect()
}

/// Apply field changes to a field map in order
///
/// A `null` new value removes the field.
pub fn apply(fields: &mut Map<String, Value>, changes: &[FieldChange]) {
    for change in changes {
        if change.new_value.is_null() {
            fields.remove(&change.field);
        } else {
            fields.insert(change.field.clone(), change.new_value.clone());
        }
    }
}

/// Apply a diff to a whole entry value
pub fn apply_to_value(value: &Value, changes: &[FieldChange]) -> Value {
    let mut fields = fields_of(value);
    apply(&mut fields, changes);
    if fields.is_empty() && !value.is_object() {
        return Value::Null;
    }
    value_from_fields(fields)
}
