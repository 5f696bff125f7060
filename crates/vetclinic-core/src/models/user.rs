use std::fmt;

use serde::{Deserialize, Serialize};

/// Clinic staff role as reported by the API.
///
/// Only used for client-side gating (hiding actions a user cannot
/// perform); the server still authorizes every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Veterinarian,
    Receptionist,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Veterinarian => "veterinarian",
            Role::Receptionist => "receptionist",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "admin" | "administrator" => Role::Admin,
            "veterinarian" | "vet" => Role::Veterinarian,
            "receptionist" => Role::Receptionist,
            _ => Role::Other(value.trim().to_string()),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "UserWire")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
}

/// Accepts either a `roles` array or a single `role` string.
#[derive(Deserialize)]
struct UserWire {
    id: i64,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(default)]
    role: Option<Role>,
}

impl From<UserWire> for User {
    fn from(wire: UserWire) -> Self {
        let mut roles = wire.roles;
        if let Some(role) = wire.role {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self {
            id: wire.id,
            username: wire.username,
            email: wire.email.filter(|e| !e.is_empty()),
            first_name: wire.first_name.filter(|n| !n.is_empty()),
            last_name: wire.last_name.filter(|n| !n.is_empty()),
            roles,
        }
    }
}

impl User {
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(&Role::Admin)
    }

    /// "First Last", falling back to the username.
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.username.clone()
        } else {
            full
        }
    }
}
