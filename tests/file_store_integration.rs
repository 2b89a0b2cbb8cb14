//! File store integration tests
//!
//! Runs the facade over `FileAuditStore` and checks that history, ids and
//! point-in-time values survive a restart, including after purges.

use a3s_audit::{
    Actor, AuditAction, AuditConfig, AuditFacade, ChannelRegistry, FileAuditStore, Pagination,
    RecordOptions,
};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

async fn open_audit(path: &Path) -> AuditFacade {
    let store = FileAuditStore::open(path).unwrap();
    AuditFacade::open(store, ChannelRegistry::new(), AuditConfig::default())
        .await
        .unwrap()
}

fn operator() -> Actor {
    Actor::new("u-ops", "Operations")
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    {
        let audit = open_audit(&path).await;
        audit
            .record_change(&operator(), "max_tasks", AuditAction::Create, None, Some(&json!(5)), RecordOptions::default().at(1_000))
            .await
            .unwrap();
        audit
            .record_change(&operator(), "max_tasks", AuditAction::Update, Some(&json!(5)), Some(&json!(8)), RecordOptions::default().at(2_000))
            .await
            .unwrap();
    }

    let audit = open_audit(&path).await;
    let history = audit.history_for("max_tasks", Pagination::default()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, AuditAction::Update);
    assert_eq!(audit.value_as_of("max_tasks", 1_999).await.unwrap().into_value(), Some(json!(5)));

    // Ids continue where the previous process stopped
    let next = audit
        .record_change(&operator(), "max_tasks", AuditAction::Update, Some(&json!(8)), Some(&json!(9)), RecordOptions::default())
        .await
        .unwrap();
    assert_eq!(next.id, 3);
    assert!(audit.verify_consistency("max_tasks", Some(&json!(9))).await.unwrap());
}

#[tokio::test]
async fn test_ids_not_reused_after_purge_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    {
        let audit = open_audit(&path).await;
        for ts in [1_000, 2_000, 3_000] {
            audit
                .record_change(
                    &operator(),
                    &format!("key_{}", ts),
                    AuditAction::Create,
                    None,
                    Some(&json!(ts)),
                    RecordOptions::default().at(ts),
                )
                .await
                .unwrap();
        }

        // Everything is older than a day
        assert_eq!(audit.purge_older_than(Duration::from_secs(86_400)).await.unwrap(), 3);
        assert_eq!(audit.info().await.unwrap().records, 0);
    }

    let audit = open_audit(&path).await;
    assert_eq!(audit.info().await.unwrap().records, 0);
    let rec = audit
        .record_change(&operator(), "key_new", AuditAction::Create, None, Some(&json!(1)), RecordOptions::default())
        .await
        .unwrap();
    assert_eq!(rec.id, 4);
}

#[tokio::test]
async fn test_sensitive_flag_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    {
        let audit = open_audit(&path).await;
        audit
            .record_change(&operator(), "api_token", AuditAction::Create, None, Some(&json!("tok-1")), RecordOptions::default())
            .await
            .unwrap();
    }

    let audit = open_audit(&path).await;
    let history = audit.history_for("api_token", Pagination::first(1)).await.unwrap();
    assert!(history[0].sensitive);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 1);
}
