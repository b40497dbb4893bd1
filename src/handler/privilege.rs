//! Privilege checks for schema modification

use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    ModifySchema,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::ModifySchema => "modify-schema",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers whether a principal holds a privilege.
pub trait PrivilegeChecker: Send + Sync {
    fn has_privilege(&self, principal: &str, privilege: Privilege) -> bool;
}

/// Fixed grants, keyed by case-insensitive principal name.
#[derive(Debug, Clone, Default)]
pub struct StaticPrivileges {
    grants: HashMap<String, HashSet<Privilege>>,
}

impl StaticPrivileges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, principal: &str, privilege: Privilege) -> Self {
        self.grants
            .entry(principal.to_ascii_lowercase())
            .or_default()
            .insert(privilege);
        self
    }
}

impl PrivilegeChecker for StaticPrivileges {
    fn has_privilege(&self, principal: &str, privilege: Privilege) -> bool {
        self.grants
            .get(&principal.to_ascii_lowercase())
            .is_some_and(|p| p.contains(&privilege))
    }
}
