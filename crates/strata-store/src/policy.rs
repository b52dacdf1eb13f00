//! Declarative row visibility policies evaluated at the storage boundary.
//!
//! Each table carries exactly one policy per command. A tenant session only
//! sees, and may only write, rows whose tenant columns equal its own scope.
//! The bootstrap session bypasses policy evaluation entirely.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use strata_core::{Result, Scope, StrataError, TenantScope};

/// A policy-protected table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    GraphObjects,
    GraphRelationships,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::GraphObjects, Table::GraphRelationships];

    pub fn name(self) -> &'static str {
        match self {
            Self::GraphObjects => "graph_objects",
            Self::GraphRelationships => "graph_relationships",
        }
    }
}

/// The statement kind a policy governs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Select,
    Insert,
    Update,
    Delete,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Select,
        Command::Insert,
        Command::Update,
        Command::Delete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Row predicate of a policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyExpr {
    /// `organization_id = session.organization_id AND project_id = session.project_id`
    SessionTenant,
    /// Matches no row.
    Deny,
}

impl PolicyExpr {
    fn admits(self, session: &TenantScope, row: &TenantScope) -> bool {
        match self {
            Self::SessionTenant => session == row,
            Self::Deny => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VisibilityPolicy {
    pub name: String,
    pub table: Table,
    pub command: Command,
    pub expr: PolicyExpr,
}

impl VisibilityPolicy {
    /// The standard tenant policy for `(table, command)`, named
    /// `<table>_<command>`.
    pub fn tenant(table: Table, command: Command) -> Self {
        Self {
            name: format!("{}_{}", table.name(), command.name()),
            table,
            command,
            expr: PolicyExpr::SessionTenant,
        }
    }
}

/// The set of installed policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyCatalog {
    policies: Vec<VisibilityPolicy>,
}

impl PolicyCatalog {
    /// The expected manifest: four tenant policies on each table.
    pub fn standard() -> Self {
        let policies = Table::ALL
            .iter()
            .flat_map(|&table| {
                Command::ALL
                    .iter()
                    .map(move |&command| VisibilityPolicy::tenant(table, command))
            })
            .collect();
        Self { policies }
    }

    pub fn policies(&self) -> &[VisibilityPolicy] {
        &self.policies
    }

    pub fn install(&mut self, policy: VisibilityPolicy) {
        self.policies.push(policy);
    }

    /// Remove a policy by name. Returns whether one was removed.
    pub fn drop_policy(&mut self, name: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|p| p.name != name);
        self.policies.len() != before
    }

    /// Whether a session under `scope` may run `command` against a row owned
    /// by `row`. Commands without a policy are denied.
    pub fn permits(&self, table: Table, command: Command, scope: &Scope, row: &TenantScope) -> bool {
        let session = match scope {
            Scope::Bootstrap => return true,
            Scope::Tenant(s) => s,
        };
        self.policies
            .iter()
            .filter(|p| p.table == table && p.command == command)
            .any(|p| p.expr.admits(session, row))
    }

    /// Compare against `expected`. Any added, removed, renamed or altered
    /// policy, or a table without exactly four policies, is drift.
    pub fn verify(&self, expected: &PolicyCatalog) -> Result<()> {
        let installed: BTreeSet<&VisibilityPolicy> = self.policies.iter().collect();
        let wanted: BTreeSet<&VisibilityPolicy> = expected.policies.iter().collect();

        let mut problems = Vec::new();
        for p in wanted.difference(&installed) {
            problems.push(format!("missing policy {} on {}", p.name, p.table.name()));
        }
        for p in installed.difference(&wanted) {
            problems.push(format!("unexpected policy {} on {}", p.name, p.table.name()));
        }
        for table in Table::ALL {
            let count = self.policies.iter().filter(|p| p.table == table).count();
            if count != Command::ALL.len() {
                problems.push(format!(
                    "{} has {count} policies, expected {}",
                    table.name(),
                    Command::ALL.len()
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StrataError::PolicyDrift(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_has_four_policies_per_table() {
        let catalog = PolicyCatalog::standard();
        assert_eq!(catalog.policies().len(), 8);
        assert!(catalog
            .policies()
            .iter()
            .any(|p| p.name == "graph_objects_select"));
        assert!(catalog
            .policies()
            .iter()
            .any(|p| p.name == "graph_relationships_delete"));
        catalog.verify(&PolicyCatalog::standard()).unwrap();
    }

    #[test]
    fn drift_is_detected() {
        let expected = PolicyCatalog::standard();

        let mut dropped = PolicyCatalog::standard();
        assert!(dropped.drop_policy("graph_objects_update"));
        let err = dropped.verify(&expected).unwrap_err();
        assert!(matches!(err, StrataError::PolicyDrift(_)));
        assert!(err.to_string().contains("missing policy graph_objects_update"));

        let mut added = PolicyCatalog::standard();
        added.install(VisibilityPolicy {
            name: "graph_objects_select_all".into(),
            table: Table::GraphObjects,
            command: Command::Select,
            expr: PolicyExpr::SessionTenant,
        });
        assert!(added.verify(&expected).is_err());

        let mut renamed = PolicyCatalog::standard();
        renamed.drop_policy("graph_relationships_insert");
        let mut p = VisibilityPolicy::tenant(Table::GraphRelationships, Command::Insert);
        p.name = "rel_insert".into();
        renamed.install(p);
        let err = renamed.verify(&expected).unwrap_err();
        assert!(err.to_string().contains("unexpected policy rel_insert"));
    }

    #[test]
    fn tenant_sessions_see_only_their_rows() {
        let catalog = PolicyCatalog::standard();
        let a = TenantScope::random();
        let b = TenantScope::random();

        let session = Scope::Tenant(a);
        assert!(catalog.permits(Table::GraphObjects, Command::Select, &session, &a));
        assert!(!catalog.permits(Table::GraphObjects, Command::Select, &session, &b));
        assert!(catalog.permits(Table::GraphObjects, Command::Select, &Scope::Bootstrap, &b));

        let mut missing = PolicyCatalog::standard();
        missing.drop_policy("graph_objects_insert");
        assert!(!missing.permits(Table::GraphObjects, Command::Insert, &session, &a));
    }
}
