//! Declarative grant rules.
//!
//! A rule says "everyone matching these group or user patterns gets `role` in
//! each of these scopes". Patterns are case-insensitive globs (`*@example.com`,
//! `team-*@example.com`); a pattern without wildcards matches exactly one
//! identifier.
//!
//! Rule evaluation is a pure function of the rule and a [`GroupTree`]; it never
//! talks to the directory or the permission system.

use std::collections::BTreeSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    config::ConfigError,
    membership::{GroupTree, normalize_id},
    permission::Grant,
};

/// Rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Group patterns; every recursive user member of a matching group is a subject.
    #[serde(default)]
    pub groups: Vec<String>,
    /// User patterns matched against users known to the directory.
    #[serde(default)]
    pub users: Vec<String>,
    /// Role granted to every subject.
    pub role: String,
    /// Scopes the role is granted in.
    pub scopes: Vec<String>,
}

/// A set of compiled patterns plus the literal ones among them.
#[derive(Debug, Clone)]
struct PatternSet {
    globs: GlobSet,
    literals: Vec<String>,
    patterns: Vec<String>,
}

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let mut literals = Vec::new();
        let mut normalized = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = normalize_id(pattern);
            if pattern.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "rule contains an empty pattern".to_string(),
                });
            }
            if is_literal(&pattern) {
                literals.push(pattern.clone());
            }
            let glob = GlobBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            builder.add(glob);
            normalized.push(pattern);
        }

        let globs = builder.build().map_err(|source| ConfigError::Pattern {
            pattern: normalized.join(", "),
            source,
        })?;
        Ok(Self {
            globs,
            literals,
            patterns: normalized,
        })
    }

    fn is_match(&self, id: &str) -> bool {
        self.globs.is_match(id)
    }
}

fn is_literal(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '[', ']', '{', '}', '\\'])
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    groups: PatternSet,
    users: PatternSet,
    role: String,
    scopes: Vec<String>,
}

impl Rule {
    /// Compile a rule from its configuration form.
    pub fn compile(config: &RuleConfig) -> Result<Self, ConfigError> {
        if config.groups.is_empty() && config.users.is_empty() {
            return Err(ConfigError::Invalid {
                reason: format!("rule for role {} matches no groups or users", config.role),
            });
        }
        if config.role.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "rule has an empty role".to_string(),
            });
        }
        if config.scopes.is_empty() || config.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                reason: format!("rule for role {} needs at least one non-empty scope", config.role),
            });
        }

        Ok(Self {
            groups: PatternSet::compile(&config.groups)?,
            users: PatternSet::compile(&config.users)?,
            role: config.role.trim().to_string(),
            scopes: config.scopes.iter().map(|s| s.trim().to_string()).collect(),
        })
    }

    /// The role this rule grants.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The scopes this rule grants in.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Group patterns, normalized.
    pub fn group_patterns(&self) -> &[String] {
        &self.groups.patterns
    }

    /// User patterns, normalized.
    pub fn user_patterns(&self) -> &[String] {
        &self.users.patterns
    }

    /// Resolve the users this rule applies to.
    ///
    /// Subjects are always individual users: groups are expanded recursively
    /// and never appear in the result.
    pub fn subjects(&self, tree: &GroupTree) -> BTreeSet<String> {
        let mut subjects = BTreeSet::new();

        for literal in &self.groups.literals {
            if !tree.contains_group(literal) {
                warn!(
                    group = %literal,
                    role = %self.role,
                    "Rule references a group missing from the directory"
                );
            }
        }

        for group in tree.groups().filter(|g| self.groups.is_match(g.id())) {
            // The group comes from the tree itself, so the lookup cannot miss.
            if let Ok(members) = tree.list_group_members(group.id(), true) {
                subjects.extend(members);
            }
        }

        subjects.extend(
            tree.users()
                .into_iter()
                .filter(|user| self.users.is_match(user))
                .map(str::to_string),
        );
        subjects.extend(
            self.users
                .literals
                .iter()
                .filter(|user| !tree.contains_group(user))
                .cloned(),
        );

        subjects
    }

    /// Every grant this rule produces against `tree`.
    pub fn grants(&self, tree: &GroupTree) -> impl Iterator<Item = Grant> + '_ {
        let subjects = self.subjects(tree);
        subjects.into_iter().flat_map(move |subject| {
            self.scopes
                .iter()
                .map(move |scope| Grant::new(subject.clone(), self.role.clone(), scope.clone()))
        })
    }
}

/// Compile every rule, failing on the first invalid one.
pub fn compile_rules(configs: &[RuleConfig]) -> Result<Vec<Rule>, ConfigError> {
    configs.iter().map(Rule::compile).collect()
}
