//! End-to-end reconciliation against the in-memory permission store.

use permsync::{
    CycleStatus, ReconciliationEngine,
    permission::InMemoryPermissions,
    reconcile::{GrantAction, RoleRanking},
};

use crate::helpers::{grant, rule, tree};

fn engine() -> ReconciliationEngine {
    ReconciliationEngine::new(vec![
        rule(&["eng@example.com"], &[], "Editor", &["Main Org."]),
        rule(&["ops@example.com"], &[], "Admin", &["Main Org.", "Ops"]),
    ])
}

fn directory_tree() -> permsync::GroupTree {
    tree(&[
        ("eng@example.com", &["bob@example.com", "leads@example.com"]),
        ("leads@example.com", &["carol@example.com"]),
        ("ops@example.com", &["dave@example.com"]),
    ])
}

#[tokio::test]
async fn test_nested_member_is_the_only_addition() {
    let tree = tree(&[
        ("eng", &["bob", "leads"]),
        ("leads", &["carol"]),
    ]);
    let engine = ReconciliationEngine::new(vec![rule(&["eng"], &[], "Editor", &["Main Org."])]);
    let permissions = InMemoryPermissions::new([grant("bob", "Editor", "Main Org.")]);

    assert_eq!(
        tree.list_group_members("eng", true).unwrap(),
        vec!["bob", "carol"]
    );
    let plan = engine.plan(&tree, &permissions.grants());
    assert_eq!(plan.additions, vec![grant("carol", "Editor", "Main Org.")]);
    assert!(plan.removals.is_empty());

    let summary = engine.reconcile(&tree, &permissions).await.unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.removed, 0);
    assert_eq!(
        permissions.applied(),
        vec![grant("carol", "Editor", "Main Org.")]
    );
}

#[tokio::test]
async fn test_reconcile_adds_and_removes() {
    let permissions = InMemoryPermissions::new([
        // Still wanted.
        grant("bob@example.com", "Editor", "Main Org."),
        // Left the group.
        grant("mallory@example.com", "Editor", "Main Org."),
        // Role nobody manages.
        grant("erin@example.com", "Viewer", "Main Org."),
        // Scope nobody manages.
        grant("frank@example.com", "Editor", "Sandbox"),
    ]);

    let summary = engine()
        .reconcile(&directory_tree(), &permissions)
        .await
        .unwrap();

    assert_eq!(summary.status, CycleStatus::Success);
    assert_eq!(summary.added, 3);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.failed, 0);
    assert!(!summary.dry_run);

    assert_eq!(
        permissions.applied(),
        vec![
            grant("carol@example.com", "Editor", "Main Org."),
            grant("dave@example.com", "Admin", "Main Org."),
            grant("dave@example.com", "Admin", "Ops"),
        ]
    );
    assert_eq!(
        permissions.revoked(),
        vec![grant("mallory@example.com", "Editor", "Main Org.")]
    );
    assert!(permissions.grants().contains(&grant("erin@example.com", "Viewer", "Main Org.")));
    assert!(permissions.grants().contains(&grant("frank@example.com", "Editor", "Sandbox")));
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let permissions =
        InMemoryPermissions::new([grant("mallory@example.com", "Editor", "Main Org.")]);
    let engine = engine();
    let tree = directory_tree();

    engine.reconcile(&tree, &permissions).await.unwrap();
    let applied = permissions.applied().len();
    let revoked = permissions.revoked().len();

    let second = engine.reconcile(&tree, &permissions).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.planned_additions, 0);
    assert_eq!(second.planned_removals, 0);
    assert_eq!(permissions.applied().len(), applied);
    assert_eq!(permissions.revoked().len(), revoked);
}

#[tokio::test]
async fn test_partial_failure_continues() {
    let permissions =
        InMemoryPermissions::new([grant("mallory@example.com", "Editor", "Main Org.")]);
    permissions.fail_on(grant("carol@example.com", "Editor", "Main Org."));

    let summary = engine()
        .reconcile(&directory_tree(), &permissions)
        .await
        .unwrap();

    assert_eq!(summary.status, CycleStatus::PartialFailure);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.added, 3);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.failures[0].action, GrantAction::Apply);
    assert_eq!(
        summary.failures[0].grant,
        grant("carol@example.com", "Editor", "Main Org.")
    );

    // The failed grant is retried on the next pass.
    let retry = engine()
        .reconcile(&directory_tree(), &permissions)
        .await
        .unwrap();
    assert_eq!(retry.planned_additions, 1);
    assert_eq!(retry.status, CycleStatus::TotalFailure);
}

#[tokio::test]
async fn test_unreachable_permission_system_fails_the_pass() {
    let permissions = InMemoryPermissions::default();
    permissions.set_unreachable(true);

    let err = engine()
        .reconcile(&directory_tree(), &permissions)
        .await
        .unwrap_err();
    assert!(err.is_permission_fetch_failed());
    assert!(permissions.applied().is_empty());
}

#[tokio::test]
async fn test_dry_run_applies_nothing() {
    let permissions =
        InMemoryPermissions::new([grant("mallory@example.com", "Editor", "Main Org.")]);
    let summary = engine()
        .with_dry_run(true)
        .reconcile(&directory_tree(), &permissions)
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.planned_additions, 4);
    assert_eq!(summary.planned_removals, 1);
    assert_eq!(summary.added, 0);
    assert!(permissions.applied().is_empty());
    assert!(permissions.revoked().is_empty());
}

#[tokio::test]
async fn test_ignored_subjects_are_untouched() {
    let permissions = InMemoryPermissions::new([grant("admin@example.com", "Editor", "Main Org.")]);
    let engine = engine().with_ignored_subjects(["Admin@Example.com"]);

    let summary = engine.reconcile(&directory_tree(), &permissions).await.unwrap();
    assert_eq!(summary.removed, 0);
    assert!(permissions.grants().contains(&grant("admin@example.com", "Editor", "Main Org.")));
}

#[tokio::test]
async fn test_ranking_replaces_lower_role() {
    let tree = tree(&[
        ("eng@example.com", &["bob@example.com"]),
        ("admins@example.com", &["bob@example.com"]),
    ]);
    let engine = ReconciliationEngine::new(vec![
        rule(&["eng@example.com"], &[], "Editor", &["Main Org."]),
        rule(&["admins@example.com"], &[], "Admin", &["Main Org."]),
    ])
    .with_role_ranking(RoleRanking::new(["Viewer", "Editor", "Admin"]));
    let permissions = InMemoryPermissions::new([grant("bob@example.com", "Editor", "Main Org.")]);

    let plan = engine.plan(&tree, &permissions.grants());
    assert_eq!(plan.additions, vec![grant("bob@example.com", "Admin", "Main Org.")]);
    assert_eq!(plan.removals, vec![grant("bob@example.com", "Editor", "Main Org.")]);
}

#[test]
fn test_managed_scope_comes_from_rules() {
    let engine = engine().with_ignored_subjects(["root"]);
    let managed = engine.managed_scope();
    assert_eq!(
        managed.scopes().iter().collect::<Vec<_>>(),
        vec!["Main Org.", "Ops"]
    );
    assert_eq!(managed.roles().iter().collect::<Vec<_>>(), vec!["Admin", "Editor"]);
    assert!(managed.owns(&grant("x", "Editor", "Ops")));
    assert!(!managed.owns(&grant("x", "Viewer", "Ops")));
    assert!(!managed.owns(&grant("root", "Editor", "Ops")));
}
