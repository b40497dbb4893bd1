//! Modify operation states
//!
//! ```text
//! RECEIVED -> PRIVILEGE_CHECKED -> PARSED -> VALIDATED -> APPLIED -> PERSISTED -> COMPLETE
//! ```
//!
//! A failure before APPLIED leaves the repository untouched.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationState {
    Received,
    PrivilegeChecked,
    Parsed,
    Validated,
    Applied,
    Persisted,
    Complete,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Received => "RECEIVED",
            OperationState::PrivilegeChecked => "PRIVILEGE_CHECKED",
            OperationState::Parsed => "PARSED",
            OperationState::Validated => "VALIDATED",
            OperationState::Applied => "APPLIED",
            OperationState::Persisted => "PERSISTED",
            OperationState::Complete => "COMPLETE",
        }
    }

    /// Whether the repository may already reflect the request.
    pub fn is_applied(&self) -> bool {
        *self >= OperationState::Applied
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_boundary() {
        assert!(!OperationState::Validated.is_applied());
        assert!(OperationState::Applied.is_applied());
        assert!(OperationState::Complete.is_applied());
    }
}
