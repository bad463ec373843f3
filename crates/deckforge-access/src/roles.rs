use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use deckforge_types::{DeckError, Result};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Executive")]
    Executive,
    #[serde(rename = "Senior Manager")]
    SeniorManager,
    #[serde(rename = "Analyst")]
    Analyst,
    #[serde(rename = "Junior Staff")]
    JuniorStaff,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Executive,
        Role::SeniorManager,
        Role::Analyst,
        Role::JuniorStaff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Executive => "Executive",
            Role::SeniorManager => "Senior Manager",
            Role::Analyst => "Analyst",
            Role::JuniorStaff => "Junior Staff",
        }
    }

    /// Exports for this role have sensitive data masked.
    pub fn requires_masking(&self) -> bool {
        matches!(self, Role::JuniorStaff)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DeckError;

    /// Case-insensitive; `_`, `-` and repeated whitespace count as one space.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().to_lowercase() == normalized)
            .ok_or_else(|| DeckError::ConfigError(format!("unknown role '{}'", s.trim())))
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who is making a request. Passed explicitly into every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

impl Identity {
    pub fn new(subject: impl Into<String>, role: Role) -> Result<Self> {
        let subject = subject.into().trim().to_string();
        if subject.is_empty() {
            return Err(DeckError::ConfigError("user must not be empty".into()));
        }
        Ok(Self { subject, role })
    }
}

// ---------------------------------------------------------------------------
// Action / AccessPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Generate,
    IndexDocuments,
    Export,
    ReadMemory,
    ClearMemory,
    ManageUsers,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Generate => "generate",
            Action::IndexDocuments => "index_documents",
            Action::Export => "export",
            Action::ReadMemory => "read_memory",
            Action::ClearMemory => "clear_memory",
            Action::ManageUsers => "manage_users",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which roles may perform which actions.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn allowed_roles(&self, action: Action) -> &'static [Role] {
        const CONTRIBUTORS: &[Role] = &[Role::Executive, Role::SeniorManager, Role::Analyst];
        match action {
            Action::Generate | Action::IndexDocuments => CONTRIBUTORS,
            Action::Export | Action::ReadMemory | Action::ClearMemory => &Role::ALL,
            Action::ManageUsers => &[Role::Executive],
        }
    }

    pub fn is_allowed(&self, role: Role, action: Action) -> bool {
        self.allowed_roles(action).contains(&role)
    }

    pub fn authorize(&self, identity: &Identity, action: Action) -> Result<()> {
        if self.is_allowed(identity.role, action) {
            Ok(())
        } else {
            Err(DeckError::AccessDenied {
                role: identity.role.to_string(),
                action: action.to_string(),
            })
        }
    }
}
