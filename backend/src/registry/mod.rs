//! Dataset registry: role classification for one upload session.
//!
//! Roles come from an ordered list of (role, keyword) rules. For each rule,
//! in priority order, the first table (in submission order) whose file name
//! contains the keyword and has no role yet takes that role. Everything else
//! stays [`Role::Unclassified`]: excluded from the transform stages but still
//! exported.

use std::collections::HashSet;

use crate::error::IngestError;
use crate::models::{Role, SourceTable};

/// A classification rule: the role and the predicate its file name must satisfy.
pub struct RoleRule {
    pub role: Role,
    pub keyword: &'static str,
}

impl RoleRule {
    pub fn matches(&self, filename: &str) -> bool {
        filename
            .to_ascii_uppercase()
            .contains(&self.keyword.to_ascii_uppercase())
    }
}

/// Rules in priority order.
pub fn rules() -> Vec<RoleRule> {
    Role::CLASSIFIED
        .iter()
        .filter_map(|&role| role.keyword().map(|keyword| RoleRule { role, keyword }))
        .collect()
}

/// Assign a role to each file name, in submission order.
pub fn classify_names<S: AsRef<str>>(names: &[S]) -> Vec<Role> {
    let mut roles = vec![Role::Unclassified; names.len()];
    for rule in rules() {
        let hit = names
            .iter()
            .enumerate()
            .find(|(i, name)| roles[*i] == Role::Unclassified && rule.matches(AsRef::<str>::as_ref(*name)));
        if let Some((i, _)) = hit {
            roles[i] = rule.role;
        }
    }
    roles
}

/// Classify freshly parsed tables by their stored names.
pub fn classify(mut tables: Vec<SourceTable>) -> RoleMap {
    let names: Vec<&str> = tables.iter().map(|t| t.stored_name.as_str()).collect();
    let roles = classify_names(&names);
    for (table, role) in tables.iter_mut().zip(roles) {
        table.role = role;
    }
    RoleMap { tables }
}

/// Role-keyed view over a session's source tables.
///
/// Holds at most one table per classified role.
#[derive(Debug, Clone, Default)]
pub struct RoleMap {
    tables: Vec<SourceTable>,
}

impl RoleMap {
    /// Rebuild from tables whose roles were assigned at ingestion.
    ///
    /// A role claimed twice keeps its first holder; later claimants are
    /// demoted to [`Role::Unclassified`].
    pub fn from_classified(mut tables: Vec<SourceTable>) -> Self {
        let mut taken = HashSet::new();
        for table in &mut tables {
            if table.role != Role::Unclassified && !taken.insert(table.role) {
                table.role = Role::Unclassified;
            }
        }
        Self { tables }
    }

    pub fn get(&self, role: Role) -> Option<&SourceTable> {
        if role == Role::Unclassified {
            return None;
        }
        self.tables.iter().find(|t| t.role == role)
    }

    pub fn fact(&self) -> Option<&SourceTable> {
        self.get(Role::Fact)
    }

    /// All tables in submission order.
    pub fn tables(&self) -> &[SourceTable] {
        &self.tables
    }

    /// Every table other than the fact table, in submission order.
    pub fn non_fact(&self) -> impl Iterator<Item = &SourceTable> {
        self.tables.iter().filter(|t| t.role != Role::Fact)
    }
}

/// Rejects repeated file names within one batch.
#[derive(Debug, Default)]
pub struct DuplicateGuard {
    seen: HashSet<String>,
}

impl DuplicateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the first occurrence of a (sanitized) name, reject the rest.
    pub fn admit(&mut self, stored_name: &str) -> Result<(), IngestError> {
        if self.seen.insert(stored_name.to_string()) {
            Ok(())
        } else {
            Err(IngestError::DuplicateFile(stored_name.to_string()))
        }
    }
}
