use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DomainError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Role assigned to accounts that do not declare one.
pub const DEFAULT_ROLE: &str = "user";

pub const USERS_TABLE: &str = "users";
pub const INCIDENTS_TABLE: &str = "cyber_incidents";
pub const DATASETS_TABLE: &str = "datasets_metadata";
pub const TICKETS_TABLE: &str = "it_tickets";

/// Descriptor for one relational table: its full column list plus the subset
/// a bulk load is allowed to provide (everything except the store-assigned
/// `id` and the defaulted `created_at`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub loadable_columns: &'static [&'static str],
}

pub const TABLES: &[TableSpec] = &[
    TableSpec {
        name: USERS_TABLE,
        columns: &["id", "username", "password_hash", "role"],
        loadable_columns: &["username", "password_hash", "role"],
    },
    TableSpec {
        name: INCIDENTS_TABLE,
        columns: &[
            "id",
            "date",
            "incident_type",
            "severity",
            "status",
            "description",
            "reported_by",
        ],
        loadable_columns: &[
            "date",
            "incident_type",
            "severity",
            "status",
            "description",
            "reported_by",
        ],
    },
    TableSpec {
        name: DATASETS_TABLE,
        columns: &[
            "id",
            "dataset_name",
            "category",
            "source",
            "last_updated",
            "record_count",
            "file_size_mb",
            "created_at",
        ],
        loadable_columns: &[
            "dataset_name",
            "category",
            "source",
            "last_updated",
            "record_count",
            "file_size_mb",
        ],
    },
    TableSpec {
        name: TICKETS_TABLE,
        columns: &[
            "id",
            "ticket_id",
            "priority",
            "status",
            "category",
            "subject",
            "description",
            "created_date",
            "resolved_date",
            "assigned_to",
            "created_at",
        ],
        loadable_columns: &[
            "ticket_id",
            "priority",
            "status",
            "category",
            "subject",
            "description",
            "created_date",
            "resolved_date",
            "assigned_to",
        ],
    },
];

/// Look up a table descriptor by name.
///
/// Table names reaching SQL text MUST come from the returned descriptor, not
/// from caller input.
///
/// # Errors
/// Returns [`DomainError::UnknownTable`] when no table carries that name.
pub fn table_spec(name: &str) -> Result<&'static TableSpec, DomainError> {
    TABLES
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| DomainError::UnknownTable(name.to_string()))
}

/// A stored user account. `password_hash` is an opaque PHC digest and is
/// excluded from both `Debug` output and serialization.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

impl Debug for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// The outward shape of a user account: everything except the digest.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Incident {
    pub id: i64,
    pub date: String,
    pub incident_type: String,
    pub severity: String,
    pub status: String,
    pub description: Option<String>,
    pub reported_by: Option<String>,
}

/// Input for a new incident row; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewIncident {
    pub date: String,
    pub incident_type: String,
    pub severity: String,
    pub status: String,
    pub description: Option<String>,
    pub reported_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TypeCount {
    pub incident_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// One parsed line of the legacy credential file.
#[derive(Clone, Eq, PartialEq)]
pub struct CredentialRecord {
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

impl Debug for CredentialRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Parse one legacy credential line: `username,password_hash[,role]`.
///
/// Returns `None` for blank lines and for lines with fewer than two
/// non-empty leading fields. An omitted or empty role falls back to
/// [`DEFAULT_ROLE`]; fields past the third are ignored.
#[must_use]
pub fn parse_credential_line(line: &str) -> Option<CredentialRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut fields = line.split(',');
    let username = fields.next()?.trim();
    let password_hash = fields.next()?.trim();
    if username.is_empty() || password_hash.is_empty() {
        return None;
    }

    let role = fields
        .next()
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .unwrap_or(DEFAULT_ROLE);

    Some(CredentialRecord {
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        role: role.to_string(),
    })
}
