//! Access context for craft operations
//!
//! Fabrication runs with internal privilege; anything else is refused before
//! the segment is touched.

/// Who is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    /// The service itself (supervisor, CLI)
    Internal,
    /// An outside caller with no fabrication rights
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    role: AccessRole,
}

impl Access {
    /// Full privilege, used by the supervisor
    pub fn internal() -> Self {
        Self {
            role: AccessRole::Internal,
        }
    }

    pub fn external() -> Self {
        Self {
            role: AccessRole::External,
        }
    }

    pub fn role(&self) -> AccessRole {
        self.role
    }

    pub fn require_internal(&self) -> crate::CraftResult<()> {
        match self.role {
            AccessRole::Internal => Ok(()),
            AccessRole::External => Err(crate::CraftError::Forbidden(
                "crafting requires internal access".to_string(),
            )),
        }
    }
}
