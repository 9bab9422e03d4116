use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use intelbase_core::{
    Incident, NewIncident, StatusCount, TypeCount, UserSummary, DATASETS_TABLE, DEFAULT_ROLE,
    INCIDENTS_TABLE, TABLES, TICKETS_TABLE,
};
use intelbase_store_sqlite::{LoadReport, MigrationReport, SqliteStore};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::error;

/// Where the store lives and where the ingestion sources are expected.
///
/// Built once at process start and immutable afterwards; no component reads
/// paths from anywhere else.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub db_path: PathBuf,
    pub incidents_csv: PathBuf,
    pub datasets_csv: PathBuf,
    pub tickets_csv: PathBuf,
    pub legacy_users_file: PathBuf,
}

impl PlatformConfig {
    /// Conventional layout: one data directory holding the three CSV files
    /// and the legacy credential file.
    #[must_use]
    pub fn from_data_dir(db_path: &Path, data_dir: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            incidents_csv: data_dir.join("cyber_incidents.csv"),
            datasets_csv: data_dir.join("datasets_metadata.csv"),
            tickets_csv: data_dir.join("it_tickets.csv"),
            legacy_users_file: data_dir.join("users.txt"),
        }
    }
}

/// Outcome of a registration or login attempt. Expected failures (duplicate
/// username, unknown username, wrong password, malformed stored digest) are
/// `ok = false` values, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthOutcome {
    pub ok: bool,
    pub message: String,
    pub role: Option<String>,
}

impl AuthOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            role: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

/// Post-ingestion snapshot: every account (without digests) plus the row
/// count of each platform table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub users: Vec<UserSummary>,
    pub table_counts: Vec<TableCount>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineReport {
    pub loads: Vec<LoadReport>,
    pub migration: MigrationReport,
    pub verification: VerifyReport,
}

/// The platform's operation surface.
///
/// Every public operation opens its own store connection and releases it
/// before returning, on success and error paths alike. Operations are never
/// composed into a shared transaction: a crash between two calls leaves the
/// store in an intermediate but individually-consistent state.
#[derive(Debug, Clone)]
pub struct PlatformApi {
    config: PlatformConfig,
}

impl PlatformApi {
    #[must_use]
    pub fn new(config: PlatformConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let store = SqliteStore::open(&self.config.db_path)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create the platform tables if missing.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or the DDL fails;
    /// callers treat this as fatal.
    pub fn ensure_schema(&self) -> Result<()> {
        self.open_store().map(|_| ())
    }

    /// Bulk-load one CSV source into one catalog table.
    ///
    /// # Errors
    /// Returns an error for an unknown table, an unreadable source, or a
    /// malformed file; a missing source is a zero-row report instead.
    pub fn load_table(&self, source: &Path, table: &str) -> Result<LoadReport> {
        let mut store = self.open_store()?;
        store.load_table(source, table)
    }

    /// Migrate the legacy credential file into the users table.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, or the
    /// store fails.
    pub fn migrate_users(&self, source: &Path) -> Result<MigrationReport> {
        let mut store = self.open_store()?;
        store.migrate_users(source)
    }

    // ── Authentication ───────────────────────────────────────────────────

    /// Register a new account under a salted one-way digest of `password`.
    ///
    /// The plaintext password is neither stored nor logged. A duplicate
    /// username is an `ok = false` outcome that leaves the existing row
    /// untouched.
    ///
    /// # Errors
    /// Returns an error when the store fails or the digest cannot be
    /// computed.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        role: Option<&str>,
    ) -> Result<AuthOutcome> {
        let username = username.trim();
        if username.is_empty() {
            return Ok(AuthOutcome::rejected("username must not be empty"));
        }
        if password.is_empty() {
            return Ok(AuthOutcome::rejected("password must not be empty"));
        }

        let store = self.open_store()?;
        if store.get_user_by_username(username)?.is_some() {
            return Ok(AuthOutcome::rejected(format!(
                "username '{username}' already exists"
            )));
        }

        let role = role.unwrap_or(DEFAULT_ROLE);
        let digest = hash_password(password)?;
        store.insert_user(username, &digest, role)?;

        Ok(AuthOutcome {
            ok: true,
            message: format!("user '{username}' registered"),
            role: Some(role.to_string()),
        })
    }

    /// Verify a password against the stored digest.
    ///
    /// Unknown username, wrong password, and a malformed stored digest are
    /// three distinct `ok = false` outcomes.
    ///
    /// # Errors
    /// Returns an error when the store lookup fails.
    pub fn login(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        let store = self.open_store()?;
        let Some(user) = store.get_user_by_username(username)? else {
            return Ok(AuthOutcome::rejected("username not found"));
        };

        let parsed = match PasswordHash::new(&user.password_hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(
                    username = user.username.as_str(),
                    %err,
                    "stored credential digest is malformed"
                );
                return Ok(AuthOutcome::rejected(format!(
                    "stored credential digest for '{}' is malformed",
                    user.username
                )));
            }
        };

        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(AuthOutcome::rejected("invalid password"));
        }

        Ok(AuthOutcome {
            ok: true,
            message: format!("welcome, {}! role: {}", user.username, user.role),
            role: Some(user.role),
        })
    }

    // ── Incidents ────────────────────────────────────────────────────────

    /// Insert one incident, returning its store-assigned id.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn insert_incident(&self, incident: &NewIncident) -> Result<i64> {
        self.open_store()?.insert_incident(incident)
    }

    /// Set an incident's status; 0 affected rows means "not found".
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn update_incident_status(&self, incident_id: i64, new_status: &str) -> Result<usize> {
        self.open_store()?
            .update_incident_status(incident_id, new_status)
    }

    /// Delete an incident; 0 affected rows means "not found".
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn delete_incident(&self, incident_id: i64) -> Result<usize> {
        self.open_store()?.delete_incident(incident_id)
    }

    /// List all incidents, newest id first.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn list_incidents(&self) -> Result<Vec<Incident>> {
        self.open_store()?.list_incidents()
    }

    /// Count incidents grouped by type, descending by count.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn incident_counts_by_type(&self) -> Result<Vec<TypeCount>> {
        self.open_store()?.incident_counts_by_type()
    }

    /// Count `High` severity incidents grouped by status.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn high_severity_counts_by_status(&self) -> Result<Vec<StatusCount>> {
        self.open_store()?.high_severity_counts_by_status()
    }

    /// Incident types with strictly more than `threshold` incidents.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn incident_types_above(&self, threshold: i64) -> Result<Vec<TypeCount>> {
        self.open_store()?.incident_types_above(threshold)
    }

    /// List all accounts without digests.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.open_store()?.list_users()
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    /// Snapshot the migrated accounts and per-table row counts.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub fn verify(&self) -> Result<VerifyReport> {
        let store = self.open_store()?;
        let users = store.list_users()?;
        let table_counts = TABLES
            .iter()
            .map(|spec| {
                Ok(TableCount {
                    table: spec.name.to_string(),
                    rows: store.table_row_count(spec.name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(VerifyReport {
            users,
            table_counts,
            generated_at: now_rfc3339()?,
        })
    }

    /// Run the full demo pipeline: schema setup, the three domain CSV
    /// loads, legacy credential migration, then verification.
    ///
    /// Schema setup is the only fatal step. A failed CSV load or migration
    /// is logged and reported as zero rows for that source; the run
    /// continues.
    ///
    /// # Errors
    /// Returns an error when schema setup or the final verification fails.
    pub fn run_pipeline(&self) -> Result<PipelineReport> {
        self.ensure_schema()?;

        let sources = [
            (&self.config.incidents_csv, INCIDENTS_TABLE),
            (&self.config.datasets_csv, DATASETS_TABLE),
            (&self.config.tickets_csv, TICKETS_TABLE),
        ];
        let mut loads = Vec::with_capacity(sources.len());
        for (source, table) in sources {
            match self.load_table(source, table) {
                Ok(report) => loads.push(report),
                Err(err) => {
                    error!(
                        table,
                        source = %source.display(),
                        %err,
                        "bulk load failed, treating file as zero rows"
                    );
                    loads.push(LoadReport::empty(table, source));
                }
            }
        }

        let migration = match self.migrate_users(&self.config.legacy_users_file) {
            Ok(report) => report,
            Err(err) => {
                error!(
                    source = %self.config.legacy_users_file.display(),
                    %err,
                    "credential migration failed, continuing without it"
                );
                MigrationReport::default()
            }
        };

        let verification = self.verify()?;
        Ok(PipelineReport {
            loads,
            migration,
            verification,
        })
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(digest.to_string())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
