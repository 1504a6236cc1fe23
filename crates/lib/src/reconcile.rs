//! Reconciliation of desired grants against the permission system.
//!
//! Each cycle the engine:
//!
//! 1. Expands every [`Rule`] against the current [`GroupTree`] into the desired
//!    set of grants. Grants from different rules accumulate across scopes;
//!    within one scope a subject keeps only its highest-ranked role.
//! 2. Reads the current grants from the [`PermissionClient`].
//! 3. Diffs the two. Removals are limited to grants the engine owns: a scope
//!    and role referenced by some rule, for a subject that is not ignored.
//! 4. Applies all additions, then all removals. A failing operation is
//!    recorded and the remaining operations still run.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};

use crate::{
    Result,
    membership::{GroupTree, normalize_id},
    permission::{Grant, PermissionClient, PermissionError},
    rules::Rule,
};

/// Ordering of roles from least to most privileged.
///
/// The desired state keeps only the highest-ranked role per
/// `(subject, scope)`, since the permission system holds one role per scope.
/// Ranked roles beat unranked ones; between two unranked roles the one from
/// the earlier rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRanking {
    roles: Vec<String>,
}

impl Default for RoleRanking {
    /// Grafana's org roles.
    fn default() -> Self {
        Self::new(["Viewer", "Editor", "Admin"])
    }
}

impl RoleRanking {
    /// Build a ranking from roles listed lowest first.
    pub fn new(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Position of `role` in the ranking, if ranked.
    pub fn rank(&self, role: &str) -> Option<usize> {
        self.roles.iter().position(|r| r == role)
    }

    /// Ranked roles, lowest first.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

/// The part of the permission system the engine is allowed to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedScope {
    scopes: BTreeSet<String>,
    roles: BTreeSet<String>,
    ignored_subjects: BTreeSet<String>,
}

impl ManagedScope {
    /// Derive the managed scopes and roles from `rules`.
    pub fn from_rules<I, S>(rules: &[Rule], ignored_subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            scopes: rules
                .iter()
                .flat_map(|r| r.scopes().iter().cloned())
                .collect(),
            roles: rules.iter().map(|r| r.role().to_string()).collect(),
            ignored_subjects: ignored_subjects
                .into_iter()
                .map(|s| normalize_id(s.as_ref()))
                .collect(),
        }
    }

    /// True if the engine never touches grants of `subject`.
    pub fn is_ignored(&self, subject: &str) -> bool {
        self.ignored_subjects.contains(&normalize_id(subject))
    }

    /// True if the engine may revoke `grant`.
    pub fn owns(&self, grant: &Grant) -> bool {
        self.scopes.contains(&grant.scope)
            && self.roles.contains(&grant.role)
            && !self.is_ignored(&grant.subject)
    }

    /// Managed scopes.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Managed roles.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }
}

/// Operations needed to move the current state to the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Grants to apply, sorted.
    pub additions: Vec<Grant>,
    /// Grants to revoke, sorted.
    pub removals: Vec<Grant>,
}

impl ReconcilePlan {
    /// Diff `desired` against `current`, only removing grants `managed` owns.
    pub fn compute(
        desired: &BTreeSet<Grant>,
        current: &BTreeSet<Grant>,
        managed: &ManagedScope,
    ) -> Self {
        Self {
            additions: desired.difference(current).cloned().collect(),
            removals: current
                .difference(desired)
                .filter(|grant| managed.owns(grant))
                .cloned()
                .collect(),
        }
    }

    /// True if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

/// Overall result of applying a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every operation succeeded (or there was nothing to do).
    Success,
    /// Some operations failed, some succeeded.
    PartialFailure,
    /// Every attempted operation failed.
    TotalFailure,
}

/// Which kind of operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantAction {
    Apply,
    Revoke,
}

/// A single failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantFailure {
    pub action: GrantAction,
    pub grant: Grant,
    pub reason: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Grants successfully applied.
    pub added: usize,
    /// Grants successfully revoked.
    pub removed: usize,
    /// Operations that failed.
    pub failed: usize,
    pub failures: Vec<GrantFailure>,
    pub status: CycleStatus,
    /// Set when the plan was only logged, not applied.
    pub dry_run: bool,
    pub planned_additions: usize,
    pub planned_removals: usize,
}

impl CycleSummary {
    fn from_outcomes(
        plan: &ReconcilePlan,
        added: usize,
        removed: usize,
        failures: Vec<GrantFailure>,
    ) -> Self {
        let failed = failures.len();
        let status = if failed == 0 {
            CycleStatus::Success
        } else if added + removed == 0 {
            CycleStatus::TotalFailure
        } else {
            CycleStatus::PartialFailure
        };
        Self {
            added,
            removed,
            failed,
            failures,
            status,
            dry_run: false,
            planned_additions: plan.additions.len(),
            planned_removals: plan.removals.len(),
        }
    }
}

/// Turns rules and resolved membership into grant operations.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    rules: Vec<Rule>,
    managed: ManagedScope,
    ranking: RoleRanking,
    dry_run: bool,
}

impl ReconciliationEngine {
    /// Create an engine owning the scopes and roles referenced by `rules`.
    pub fn new(rules: Vec<Rule>) -> Self {
        let managed = ManagedScope::from_rules(&rules, std::iter::empty::<&str>());
        Self {
            rules,
            managed,
            ranking: RoleRanking::default(),
            dry_run: false,
        }
    }

    /// Never grant to or revoke from these subjects.
    pub fn with_ignored_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.managed = ManagedScope::from_rules(&self.rules, subjects);
        self
    }

    /// Replace the default Grafana role ranking.
    pub fn with_role_ranking(mut self, ranking: RoleRanking) -> Self {
        self.ranking = ranking;
        self
    }

    /// Compute and report plans without applying them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The compiled rules.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The grants the engine may change.
    pub fn managed_scope(&self) -> &ManagedScope {
        &self.managed
    }

    /// Expand every rule against `tree` into the desired grants, one role per
    /// subject and scope.
    pub fn desired_state(&self, tree: &GroupTree) -> BTreeSet<Grant> {
        let grants = self
            .rules
            .iter()
            .flat_map(|rule| rule.grants(tree))
            .filter(|grant| !self.managed.is_ignored(&grant.subject));

        let ranking = &self.ranking;
        let mut best: BTreeMap<(String, String), Grant> = BTreeMap::new();
        for grant in grants {
            let key = (grant.subject.clone(), grant.scope.clone());
            match best.get(&key) {
                Some(held) if ranking.rank(&held.role) >= ranking.rank(&grant.role) => {}
                _ => {
                    best.insert(key, grant);
                }
            }
        }
        best.into_values().collect()
    }

    /// Diff the desired state for `tree` against `current`.
    pub fn plan(&self, tree: &GroupTree, current: &BTreeSet<Grant>) -> ReconcilePlan {
        ReconcilePlan::compute(&self.desired_state(tree), current, &self.managed)
    }

    /// Run a full reconciliation pass against `client`.
    ///
    /// Fails only if the current grants cannot be read; individual grant
    /// failures are reported in the returned [`CycleSummary`].
    pub async fn reconcile(
        &self,
        tree: &GroupTree,
        client: &dyn PermissionClient,
    ) -> Result<CycleSummary> {
        async move {
            let current = client.list_current_grants().await.map_err(|e| {
                if e.is_permission_fetch_failed() {
                    e
                } else {
                    PermissionError::FetchFailed {
                        reason: e.to_string(),
                    }
                    .into()
                }
            })?;

            let plan = self.plan(tree, &current);
            info!(
                current = current.len(),
                additions = plan.additions.len(),
                removals = plan.removals.len(),
                "Computed reconcile plan"
            );

            if self.dry_run {
                for grant in &plan.additions {
                    info!(%grant, "Dry run: would apply grant");
                }
                for grant in &plan.removals {
                    info!(%grant, "Dry run: would revoke grant");
                }
                let mut summary = CycleSummary::from_outcomes(&plan, 0, 0, Vec::new());
                summary.dry_run = true;
                return Ok(summary);
            }

            Ok(self.apply_plan(&plan, client).await)
        }
        .instrument(info_span!("reconcile"))
        .await
    }

    /// Apply `plan`: additions first, then removals, continuing past failures.
    pub async fn apply_plan(
        &self,
        plan: &ReconcilePlan,
        client: &dyn PermissionClient,
    ) -> CycleSummary {
        let mut failures = Vec::new();
        let mut added = 0;
        let mut removed = 0;

        for grant in &plan.additions {
            match client.apply_grant(grant).await {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!(%grant, "Failed to apply grant: {e}");
                    failures.push(GrantFailure {
                        action: GrantAction::Apply,
                        grant: grant.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        for grant in &plan.removals {
            match client.revoke_grant(grant).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(%grant, "Failed to revoke grant: {e}");
                    failures.push(GrantFailure {
                        action: GrantAction::Revoke,
                        grant: grant.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let summary = CycleSummary::from_outcomes(plan, added, removed, failures);
        info!(
            added = summary.added,
            removed = summary.removed,
            failed = summary.failed,
            status = ?summary.status,
            "Applied reconcile plan"
        );
        summary
    }
}
