//! Record pipeline: ordered transforms applied before append
//!
//! Each stage takes a record and returns the (possibly modified) record or
//! an error, which stops the pipeline. Stages share nothing but the
//! read-only `StageContext`.

use crate::error::{AuditError, Result};
use crate::types::{AuditAction, EventRecord};

/// Read-only context handed to every stage
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Case-insensitive substrings marking a key as sensitive
    pub sensitive_keys: &'a [String],
}

type StageFn = dyn Fn(EventRecord, &StageContext<'_>) -> Result<EventRecord> + Send + Sync;

/// Ordered sequence of record transforms with early exit on error
pub struct RecordPipeline {
    stages: Vec<(&'static str, Box<StageFn>)>,
}

impl RecordPipeline {
    /// Pipeline with no stages
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// normalize → validate → classify → trace
    pub fn standard() -> Self {
        Self::empty()
            .with_stage("normalize", normalize)
            .with_stage("validate", validate)
            .with_stage("classify", classify)
            .with_stage("trace", trace)
    }

    /// Append a stage
    pub fn with_stage(
        mut self,
        name: &'static str,
        stage: impl Fn(EventRecord, &StageContext<'_>) -> Result<EventRecord> + Send + Sync + 'static,
    ) -> Self {
        self.stages.push((name, Box::new(stage)));
        self
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(name, _)| *name).collect()
    }

    /// Run every stage in order
    pub fn run(&self, record: EventRecord, ctx: &StageContext<'_>) -> Result<EventRecord> {
        self.stages
            .iter()
            .try_fold(record, |record, (name, stage)| {
                stage(record, ctx).inspect_err(|e| {
                    tracing::debug!(stage = name, error = %e, "Record pipeline stopped");
                })
            })
    }
}

impl Default for RecordPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Trim the key and drop field changes that change nothing
pub fn normalize(mut record: EventRecord, _ctx: &StageContext<'_>) -> Result<EventRecord> {
    let trimmed = record.entry_key.trim();
    if trimmed.len() != record.entry_key.len() {
        record.entry_key = trimmed.to_string();
    }
    record.diff.retain(|c| c.old_value != c.new_value);
    Ok(record)
}

/// Reject records whose shape does not match their action
pub fn validate(record: EventRecord, _ctx: &StageContext<'_>) -> Result<EventRecord> {
    let reject = |reason: &str| Err(AuditError::validation(&record.entry_key, reason));

    if record.entry_key.is_empty() {
        return reject("entry key is empty");
    }
    if record.actor_id.trim().is_empty() {
        return reject("actor id is empty");
    }

    match record.action {
        action if action.is_update_shaped() && record.diff.is_empty() => {
            return reject(&format!("{} with empty diff", action));
        }
        AuditAction::Create if record.diff.is_empty() => {
            return reject("CREATE without a value");
        }
        AuditAction::Create if record.diff.iter().any(|c| !c.old_value.is_null()) => {
            return reject("CREATE diff must only add fields");
        }
        AuditAction::Delete if record.diff.iter().any(|c| !c.new_value.is_null()) => {
            return reject("DELETE diff must only remove fields");
        }
        AuditAction::Export if !record.diff.is_empty() => {
            return reject("EXPORT carries no diff");
        }
        _ => {}
    }

    let mut fields: Vec<&str> = record.diff.iter().map(|c| c.field.as_str()).collect();
    fields.sort_unstable();
    if fields.windows(2).any(|w| w[0] == w[1]) {
        return reject("diff contains a field more than once");
    }

    Ok(record)
}

/// Force-mark records for sensitive keys; never clears the flag
pub fn classify(mut record: EventRecord, ctx: &StageContext<'_>) -> Result<EventRecord> {
    if !record.sensitive {
        let key = record.entry_key.to_lowercase();
        record.sensitive = ctx
            .sensitive_keys
            .iter()
            .any(|pattern| !pattern.is_empty() && key.contains(&pattern.to_lowercase()));
    }
    Ok(record)
}

/// Log the record about to be appended
pub fn trace(record: EventRecord, _ctx: &StageContext<'_>) -> Result<EventRecord> {
    tracing::debug!(
        entry_key = %record.entry_key,
        action = %record.action,
        fields = record.diff.len(),
        sensitive = record.sensitive,
        "Record passed pipeline"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, FieldChange};
    use serde_json::{json, Value};

    fn ctx(keys: &[String]) -> StageContext<'_> {
        StageContext { sensitive_keys: keys }
    }

    fn record(key: &str, action: AuditAction, diff: Vec<FieldChange>) -> EventRecord {
        EventRecord::new(key, action, &Actor::new("u-1", "Alice"), diff)
    }

    fn change(old: Value, new: Value) -> FieldChange {
        FieldChange::new("$value", old, new)
    }

    #[test]
    fn test_standard_stage_order() {
        assert_eq!(
            RecordPipeline::standard().stage_names(),
            vec!["normalize", "validate", "classify", "trace"]
        );
    }

    #[test]
    fn test_normalize_trims_and_drops_noops() {
        let rec = record(
            "  theme ",
            AuditAction::Update,
            vec![change(json!(1), json!(1)), FieldChange::new("b", json!(1), json!(2))],
        );
        let rec = normalize(rec, &ctx(&[])).unwrap();
        assert_eq!(rec.entry_key, "theme");
        assert_eq!(rec.diff.len(), 1);
        assert_eq!(rec.diff[0].field, "b");
    }

    #[test]
    fn test_update_with_empty_diff_rejected() {
        let pipeline = RecordPipeline::standard();
        let rec = record("theme", AuditAction::Update, vec![change(json!(1), json!(1))]);

        let err = pipeline.run(rec, &ctx(&[])).unwrap_err();
        assert!(matches!(err, AuditError::Validation { .. }));
    }

    #[test]
    fn test_action_shape_rules() {
        let c = ctx(&[]);
        assert!(validate(record("k", AuditAction::Create, vec![change(json!(1), json!(2))]), &c).is_err());
        assert!(validate(record("k", AuditAction::Delete, vec![change(json!(1), json!(2))]), &c).is_err());
        assert!(validate(record("k", AuditAction::Export, vec![change(Value::Null, json!(2))]), &c).is_err());
        assert!(validate(record("k", AuditAction::Create, vec![]), &c).is_err());
        assert!(validate(record("k", AuditAction::Create, vec![change(Value::Null, json!(2))]), &c).is_ok());
        assert!(validate(record("k", AuditAction::Delete, vec![change(json!(1), Value::Null)]), &c).is_ok());
        assert!(validate(record("", AuditAction::Create, vec![]), &c).is_err());
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let rec = record(
            "k",
            AuditAction::Update,
            vec![change(json!(1), json!(2)), change(json!(2), json!(3))],
        );
        assert!(validate(rec, &ctx(&[])).is_err());
    }

    #[test]
    fn test_classify_marks_sensitive_keys() {
        let keys = vec!["API_KEY".to_string()];
        let rec = classify(record("openai_api_key", AuditAction::Create, vec![]), &ctx(&keys)).unwrap();
        assert!(rec.sensitive);

        let rec = classify(record("theme", AuditAction::Create, vec![]), &ctx(&keys)).unwrap();
        assert!(!rec.sensitive);

        let explicit = record("theme", AuditAction::Create, vec![]).sensitive(true);
        assert!(classify(explicit, &ctx(&keys)).unwrap().sensitive);
    }

    #[test]
    fn test_custom_stage_early_exit() {
        let pipeline = RecordPipeline::empty()
            .with_stage("deny", |rec, _| Err(AuditError::validation(&rec.entry_key, "denied")))
            .with_stage("unreachable", |_, _| panic!("stage after failure must not run"));

        let err = pipeline
            .run(record("k", AuditAction::Create, vec![]), &ctx(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
