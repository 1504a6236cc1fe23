//! Group membership snapshot and transitive resolution.
//!
//! A [`GroupTree`] is built once per sync cycle from the directory's groups and
//! their direct members. Groups can list other groups as members, and those
//! references may form cycles; every traversal in this module keeps an explicit
//! visited set so each group is expanded at most once per query.
//!
//! Member references that do not name a group in the snapshot are treated as
//! users. Identifiers are normalized to lowercase when the tree is built and
//! when it is queried.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use crate::{Result, directory::DirectoryClient};

pub mod errors;

pub use errors::MembershipError;

/// Normalize a group or user identifier for storage and lookup.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// A directory group inside a [`GroupTree`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: String,
    /// Direct members in fetch order, deduplicated.
    members: Vec<String>,
    /// Groups that list this group as a direct member.
    parents: BTreeSet<String>,
}

impl Group {
    /// The group's normalized identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Direct members, users and subgroups alike, in fetch order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Groups that contain this group directly.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parents.iter().map(String::as_str)
    }
}

/// Immutable snapshot of the directory's membership graph.
#[derive(Debug, Clone, Default)]
pub struct GroupTree {
    groups: BTreeMap<String, Group>,
    /// Reverse index: member identifier -> groups listing it directly.
    memberships: HashMap<String, BTreeSet<String>>,
}

impl GroupTree {
    /// Fetch every group and its direct members from `directory` and build a
    /// new snapshot.
    ///
    /// Fails with a directory error if any fetch fails, or with
    /// [`MembershipError::InvalidData`] if the directory returns a group
    /// without an identifier.
    pub async fn build(directory: &dyn DirectoryClient) -> Result<Self> {
        let group_ids = directory.list_groups().await?;
        debug!(groups = group_ids.len(), "Fetched group list from directory");

        let mut groups = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            if id.trim().is_empty() {
                return Err(MembershipError::InvalidData {
                    reason: "directory returned a group with an empty identifier".to_string(),
                }
                .into());
            }
            let members = directory.list_direct_members(&id).await?;
            groups.push((id, members));
        }

        let tree = Self::from_groups(groups)?;
        info!(
            groups = tree.group_count(),
            users = tree.user_count(),
            "Built group tree"
        );
        Ok(tree)
    }

    /// Build a snapshot from `(group, direct members)` pairs.
    ///
    /// Duplicate group entries are merged and duplicate members are dropped,
    /// keeping the first occurrence.
    pub fn from_groups<I>(groups: I) -> std::result::Result<Self, MembershipError>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut direct: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();

        for (id, members) in groups {
            let id = normalize_id(&id);
            if id.is_empty() {
                return Err(MembershipError::InvalidData {
                    reason: "group with an empty identifier".to_string(),
                });
            }

            let list = direct.entry(id.clone()).or_default();
            let seen = seen.entry(id.clone()).or_default();
            for member in members {
                let member = normalize_id(&member);
                if member.is_empty() {
                    return Err(MembershipError::InvalidData {
                        reason: format!("group {id} lists a member with an empty identifier"),
                    });
                }
                if seen.insert(member.clone()) {
                    list.push(member);
                }
            }
        }

        let mut memberships: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (id, members) in &direct {
            for member in members {
                memberships
                    .entry(member.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }

        let groups = direct
            .into_iter()
            .map(|(id, members)| {
                let parents = memberships.get(&id).cloned().unwrap_or_default();
                let group = Group {
                    id: id.clone(),
                    members,
                    parents,
                };
                (id, group)
            })
            .collect();

        Ok(Self {
            groups,
            memberships,
        })
    }

    /// List the members of `group`.
    ///
    /// Without `recurse`, returns the direct members (users and subgroups) in
    /// fetch order. With `recurse`, expands subgroups transitively and returns
    /// only user identifiers, sorted and deduplicated.
    pub fn list_group_members(
        &self,
        group: &str,
        recurse: bool,
    ) -> std::result::Result<Vec<String>, MembershipError> {
        let key = normalize_id(group);
        let root = self
            .groups
            .get(&key)
            .ok_or(MembershipError::GroupNotFound { group: key })?;

        if !recurse {
            return Ok(root.members.clone());
        }

        let mut users = BTreeSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(root.id.as_str());
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            for member in &current.members {
                match self.groups.get(member) {
                    Some(subgroup) => {
                        if visited.insert(subgroup.id.as_str()) {
                            stack.push(subgroup);
                        }
                    }
                    None => {
                        users.insert(member.as_str());
                    }
                }
            }
        }

        Ok(users.into_iter().map(str::to_string).collect())
    }

    /// List every group `user` belongs to, directly or through nested groups.
    ///
    /// Returns an empty list for identifiers that appear in no group.
    pub fn list_user_groups(&self, user: &str) -> Vec<String> {
        let key = normalize_id(user);
        let mut found: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .memberships
            .get(&key)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();

        while let Some(group) = stack.pop() {
            if !found.insert(group) {
                continue;
            }
            if let Some(parents) = self.memberships.get(group) {
                stack.extend(
                    parents
                        .iter()
                        .map(String::as_str)
                        .filter(|p| !found.contains(p)),
                );
            }
        }

        found.into_iter().map(str::to_string).collect()
    }

    /// Look up a group by identifier.
    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(&normalize_id(id))
    }

    /// Check whether `id` names a group in this snapshot.
    pub fn contains_group(&self, id: &str) -> bool {
        self.groups.contains_key(&normalize_id(id))
    }

    /// All groups, ordered by identifier.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Every member identifier that is not itself a group, sorted.
    pub fn users(&self) -> BTreeSet<&str> {
        self.memberships
            .keys()
            .filter(|id| !self.groups.contains_key(*id))
            .map(String::as_str)
            .collect()
    }

    /// Number of groups in the snapshot.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of distinct users referenced by any group.
    pub fn user_count(&self) -> usize {
        self.memberships
            .keys()
            .filter(|id| !self.groups.contains_key(*id))
            .count()
    }

    /// True if the snapshot holds no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
