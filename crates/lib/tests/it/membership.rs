//! GroupTree properties: cycle safety, mutual consistency and determinism.

use std::collections::BTreeSet;

use permsync::{GroupTree, directory::StaticDirectory};

use crate::helpers::{directory, owned, tree};

#[test]
fn test_two_group_cycle_terminates() {
    let tree = tree(&[("a", &["b", "alice"]), ("b", &["a", "bob"])]);

    assert_eq!(tree.list_group_members("a", true).unwrap(), vec!["alice", "bob"]);
    assert_eq!(tree.list_group_members("b", true).unwrap(), vec!["alice", "bob"]);
    assert_eq!(tree.list_user_groups("alice"), vec!["a", "b"]);
}

#[test]
fn test_self_membership_is_ignored() {
    let tree = tree(&[("loop", &["loop", "zed"])]);
    assert_eq!(tree.list_group_members("loop", true).unwrap(), vec!["zed"]);
    assert_eq!(tree.list_user_groups("zed"), vec!["loop"]);
}

#[test]
fn test_long_cycle_with_shared_members() {
    // g0 -> g1 -> ... -> g49 -> g0, every group also holds a shared user.
    let n = 50;
    let groups: Vec<(String, Vec<String>)> = (0..n)
        .map(|i| {
            (
                format!("g{i}"),
                vec![format!("g{}", (i + 1) % n), "shared".to_string(), format!("u{i}")],
            )
        })
        .collect();
    let tree = GroupTree::from_groups(groups).unwrap();

    let members = tree.list_group_members("g17", true).unwrap();
    assert_eq!(members.len(), n + 1);
    assert!(members.contains(&"shared".to_string()));
    assert_eq!(tree.list_user_groups("u3").len(), n);
}

#[test]
fn test_direct_members_keep_fetch_order_and_include_groups() {
    let tree = tree(&[("eng", &["zoe", "leads", "adam", "zoe"]), ("leads", &["carol"])]);
    assert_eq!(
        tree.list_group_members("eng", false).unwrap(),
        vec!["zoe", "leads", "adam"]
    );
}

#[test]
fn test_recursive_members_exclude_groups() {
    let tree = tree(&[("eng", &["leads", "bob"]), ("leads", &["carol"])]);
    let members = tree.list_group_members("eng", true).unwrap();
    assert_eq!(members, vec!["bob", "carol"]);
}

#[test]
fn test_leaf_groups_resolve_to_their_direct_members() {
    let tree = tree(&[
        ("eng", &["leads", "bob"]),
        ("leads", &["zed", "carol", "amy"]),
        ("ops", &["dave", "Dave", "erin"]),
        ("empty", &[]),
    ]);

    let mut leaves = 0;
    for group in tree.groups() {
        if group.members().iter().any(|m| tree.contains_group(m)) {
            continue;
        }
        leaves += 1;
        let direct: BTreeSet<String> = tree
            .list_group_members(group.id(), false)
            .unwrap()
            .into_iter()
            .collect();
        let recursive: BTreeSet<String> = tree
            .list_group_members(group.id(), true)
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(direct, recursive, "{}", group.id());
    }
    assert_eq!(leaves, 3);
}

#[test]
fn test_unknown_member_reference_is_a_user() {
    let tree = tree(&[("eng", &["deleted-group@example.com"])]);
    assert_eq!(
        tree.list_group_members("eng", true).unwrap(),
        vec!["deleted-group@example.com"]
    );
}

#[test]
fn test_unknown_group_is_not_found() {
    let tree = tree(&[("eng", &["bob"])]);
    let err = tree.list_group_members("ops", false).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.group(), Some("ops"));
}

#[test]
fn test_unknown_user_has_no_groups() {
    let tree = tree(&[("eng", &["bob"])]);
    assert!(tree.list_user_groups("nobody").is_empty());
}

#[test]
fn test_identifiers_are_case_insensitive() {
    let tree = tree(&[("Eng@Example.com", &["Bob@Example.com"])]);
    assert_eq!(
        tree.list_group_members("ENG@example.COM", true).unwrap(),
        vec!["bob@example.com"]
    );
    assert_eq!(tree.list_user_groups("BOB@example.com"), vec!["eng@example.com"]);
}

#[test]
fn test_membership_queries_are_mutually_consistent() {
    let tree = tree(&[
        ("root", &["a", "b", "u1"]),
        ("a", &["c", "u2"]),
        ("b", &["c", "root", "u3"]),
        ("c", &["u4", "a"]),
        ("island", &["u5"]),
    ]);

    for user in tree.users() {
        for group in tree.list_user_groups(user) {
            let members = tree.list_group_members(&group, true).unwrap();
            assert!(members.iter().any(|m| m == user), "{user} missing from {group}");
        }
    }

    for group in tree.groups() {
        for user in tree.list_group_members(group.id(), true).unwrap() {
            assert!(
                tree.list_user_groups(&user).iter().any(|g| g == group.id()),
                "{} missing from groups of {user}",
                group.id()
            );
        }
    }
}

#[test]
fn test_results_do_not_depend_on_input_order() {
    let groups = owned(&[
        ("root", &["a", "b", "u1"]),
        ("a", &["c", "u2"]),
        ("b", &["c", "root", "u3"]),
        ("c", &["u4", "a"]),
    ]);
    let forward = GroupTree::from_groups(groups.clone()).unwrap();
    let reversed = GroupTree::from_groups(groups.into_iter().rev()).unwrap();

    for group in ["root", "a", "b", "c"] {
        let first = forward.list_group_members(group, true).unwrap();
        assert_eq!(first, reversed.list_group_members(group, true).unwrap());
        // Repeated queries return the same answer.
        assert_eq!(first, forward.list_group_members(group, true).unwrap());
    }
    for user in ["u1", "u2", "u3", "u4"] {
        assert_eq!(forward.list_user_groups(user), reversed.list_user_groups(user));
    }
}

#[test]
fn test_duplicate_group_entries_are_merged() {
    let tree = tree(&[("eng", &["bob"]), ("ENG", &["carol", "bob"])]);
    assert_eq!(tree.group_count(), 1);
    assert_eq!(tree.list_group_members("eng", false).unwrap(), vec!["bob", "carol"]);
}

#[test]
fn test_counts_and_parents() {
    let tree = tree(&[("eng", &["leads", "bob"]), ("leads", &["carol", "bob"])]);
    assert_eq!(tree.group_count(), 2);
    assert_eq!(tree.user_count(), 2);
    let users: BTreeSet<&str> = tree.users();
    assert_eq!(users.into_iter().collect::<Vec<_>>(), vec!["bob", "carol"]);
    let leads = tree.group("leads").unwrap();
    assert_eq!(leads.parents().collect::<Vec<_>>(), vec!["eng"]);
}

#[tokio::test]
async fn test_build_from_directory() {
    let directory = directory(&[("eng", &["bob", "leads"]), ("leads", &["carol"])]);
    let tree = GroupTree::build(directory.as_ref()).await.unwrap();
    assert_eq!(tree.list_group_members("eng", true).unwrap(), vec!["bob", "carol"]);
}

#[tokio::test]
async fn test_build_fails_when_directory_fails() {
    let directory = directory(&[("eng", &["bob"])]);
    directory.set_failing(true);
    let err = GroupTree::build(directory.as_ref()).await.unwrap_err();
    assert!(err.is_directory_fetch_failed());
    assert_eq!(err.module(), "directory");
}

#[tokio::test]
async fn test_build_rejects_group_without_identifier() {
    let directory = StaticDirectory::new(owned(&[("  ", &["bob"])]));
    let err = GroupTree::build(&directory).await.unwrap_err();
    assert!(err.is_invalid_data());
}

#[tokio::test]
async fn test_build_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groups.json");
    std::fs::write(
        &path,
        r#"{"groups":[{"id":"eng","members":["bob","leads"]},{"id":"leads","members":["carol"]}]}"#,
    )
    .unwrap();

    let directory = StaticDirectory::load_from_file(&path).await.unwrap();
    let tree = GroupTree::build(&directory).await.unwrap();
    assert_eq!(tree.list_user_groups("carol"), vec!["eng", "leads"]);
}

#[tokio::test]
async fn test_snapshot_file_is_reread_on_every_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groups.json");
    std::fs::write(&path, r#"{"groups":[{"id":"eng","members":["bob"]}]}"#).unwrap();
    let directory = StaticDirectory::load_from_file(&path).await.unwrap();
    let first = GroupTree::build(&directory).await.unwrap();
    assert_eq!(first.list_group_members("eng", true).unwrap(), vec!["bob"]);

    std::fs::write(&path, r#"{"groups":[{"id":"eng","members":["carol"]}]}"#).unwrap();
    let second = GroupTree::build(&directory).await.unwrap();
    assert_eq!(second.list_group_members("eng", true).unwrap(), vec!["carol"]);

    // A broken edit fails the build instead of serving stale data.
    std::fs::write(&path, "not json").unwrap();
    let err = GroupTree::build(&directory).await.unwrap_err();
    assert!(err.is_directory_fetch_failed());
}

#[tokio::test]
async fn test_missing_snapshot_file_is_a_fetch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = StaticDirectory::load_from_file(dir.path().join("missing.json"))
        .await
        .unwrap_err();
    assert!(err.is_directory_fetch_failed());
}
