use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use intelbase_core::{
    parse_credential_line, table_spec, Incident, NewIncident, StatusCount, TableSpec, TypeCount,
    User, UserSummary,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

// Additive-only DDL. Re-running it against a populated store is a no-op;
// nothing here drops or alters.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  role TEXT DEFAULT 'user'
);

CREATE TABLE IF NOT EXISTS cyber_incidents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date TEXT NOT NULL,
  incident_type TEXT NOT NULL,
  severity TEXT NOT NULL,
  status TEXT DEFAULT 'open',
  description TEXT,
  reported_by TEXT
);

CREATE TABLE IF NOT EXISTS datasets_metadata (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  dataset_name TEXT NOT NULL,
  category TEXT,
  source TEXT,
  last_updated TEXT,
  record_count INTEGER,
  file_size_mb REAL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS it_tickets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ticket_id TEXT NOT NULL UNIQUE,
  priority TEXT,
  status TEXT DEFAULT 'open',
  category TEXT,
  subject TEXT NOT NULL,
  description TEXT,
  created_date TEXT,
  resolved_date TEXT,
  assigned_to TEXT,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

/// Result of one bulk CSV load.
///
/// `sha256` carries the hex digest of the source file when it was read, and
/// is `None` when the source was absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadReport {
    pub table: String,
    pub source: String,
    pub rows_loaded: usize,
    pub sha256: Option<String>,
}

impl LoadReport {
    /// A zero-row report for a source that was absent or whose load failed.
    #[must_use]
    pub fn empty(table: &str, source: &Path) -> Self {
        Self {
            table: table.to_string(),
            source: source.display().to_string(),
            rows_loaded: 0,
            sha256: None,
        }
    }
}

/// Result of one legacy credential migration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped_existing: usize,
    pub skipped_malformed: usize,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create the four platform tables if they do not already exist.
    ///
    /// Idempotent; never drops or alters. Tolerates a database file left by
    /// a prior run.
    ///
    /// # Errors
    /// Returns an error when the DDL batch fails; callers treat this as
    /// fatal to startup.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("failed to create platform tables")
    }

    // ── Bulk CSV load ────────────────────────────────────────────────────

    /// Append every row of a CSV source into `table`.
    ///
    /// The header's column set must equal the table's loadable column set
    /// (order-insensitive). All rows land in one transaction: a malformed
    /// row or constraint violation anywhere in the file rolls the whole
    /// file back. A missing source is not an error; it yields a zero-row
    /// report and a warning.
    ///
    /// Re-loading the same source appends the rows again under fresh ids —
    /// bulk load is strictly additive and deliberately not deduplicated.
    ///
    /// # Errors
    /// Returns an error for an unknown table, an unreadable source, a
    /// header mismatch, or any row that fails to parse or insert.
    pub fn load_table(&mut self, source: &Path, table: &str) -> Result<LoadReport> {
        let spec = table_spec(table)?;

        if !source.exists() {
            warn!(
                table = spec.name,
                source = %source.display(),
                "bulk load source not found, nothing loaded"
            );
            return Ok(LoadReport::empty(spec.name, source));
        }

        let bytes = fs::read(source)
            .with_context(|| format!("failed to read bulk load source {}", source.display()))?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read CSV header from {}", source.display()))?
            .clone();
        let positions = match_header_columns(spec, &headers, source)?;

        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.name,
            spec.loadable_columns.join(", "),
            placeholders(spec.loadable_columns.len()),
        );

        let tx = self
            .conn
            .transaction()
            .context("failed to start bulk load transaction")?;
        let mut rows_loaded = 0_usize;
        {
            let mut stmt = tx
                .prepare(&insert_sql)
                .with_context(|| format!("failed to prepare bulk insert into {}", spec.name))?;
            for (index, row) in reader.records().enumerate() {
                // Header row is line 1; data rows start at line 2.
                let line = index + 2;
                let row = row.with_context(|| {
                    format!("malformed row at line {line} of {}", source.display())
                })?;
                let values = positions
                    .iter()
                    .map(|&position| row.get(position).filter(|field| !field.is_empty()));
                stmt.execute(rusqlite::params_from_iter(values)).with_context(|| {
                    format!(
                        "failed to append row at line {line} of {} into {}",
                        source.display(),
                        spec.name
                    )
                })?;
                rows_loaded += 1;
            }
        }
        tx.commit().context("failed to commit bulk load transaction")?;

        Ok(LoadReport {
            table: spec.name.to_string(),
            source: source.display().to_string(),
            rows_loaded,
            sha256: Some(digest),
        })
    }

    // ── Legacy credential migration ──────────────────────────────────────

    /// Migrate a line-oriented legacy credential file into `users`.
    ///
    /// Insertion is `INSERT OR IGNORE` keyed on `username`: a line whose
    /// username already exists contributes nothing and never overwrites the
    /// stored digest or role. Malformed lines are skipped and logged, never
    /// aborting the file. Running the same file twice leaves the user table
    /// unchanged and reports zero migrated.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, or the
    /// surrounding transaction fails.
    pub fn migrate_users(&mut self, source: &Path) -> Result<MigrationReport> {
        if !source.exists() {
            warn!(
                source = %source.display(),
                "legacy credential file not found, no users migrated"
            );
            return Ok(MigrationReport::default());
        }

        let body = fs::read_to_string(source).with_context(|| {
            format!("failed to read legacy credential file {}", source.display())
        })?;

        let mut report = MigrationReport::default();
        let tx = self
            .conn
            .transaction()
            .context("failed to start credential migration transaction")?;
        for (index, raw_line) in body.lines().enumerate() {
            if raw_line.trim().is_empty() {
                continue;
            }
            let Some(record) = parse_credential_line(raw_line) else {
                warn!(
                    line = index + 1,
                    source = %source.display(),
                    "skipped malformed credential line"
                );
                report.skipped_malformed += 1;
                continue;
            };

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
                params![record.username, record.password_hash, record.role],
            );
            match inserted {
                Ok(0) => report.skipped_existing += 1,
                Ok(_) => report.migrated += 1,
                Err(err) => {
                    warn!(
                        line = index + 1,
                        username = record.username.as_str(),
                        %err,
                        "failed to migrate credential line"
                    );
                    report.skipped_malformed += 1;
                }
            }
        }
        tx.commit()
            .context("failed to commit credential migration transaction")?;

        Ok(report)
    }

    // ── Users ────────────────────────────────────────────────────────────

    /// Fetch one user row by username.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, password_hash, role FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        role: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up user {username}"))
    }

    /// Insert one user row and return its store-assigned id.
    ///
    /// # Errors
    /// Returns an error when the insert fails, including on a duplicate
    /// username; registration checks existence first.
    pub fn insert_user(&self, username: &str, password_hash: &str, role: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
                params![username, password_hash, role],
            )
            .with_context(|| format!("failed to insert user {username}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all user accounts without their digests, oldest first.
    ///
    /// # Errors
    /// Returns an error when the listing query fails.
    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, role FROM users ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    role: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Incidents ────────────────────────────────────────────────────────

    /// Insert one incident and return its store-assigned id.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_incident(&self, incident: &NewIncident) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO cyber_incidents
                   (date, incident_type, severity, status, description, reported_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    incident.date,
                    incident.incident_type,
                    incident.severity,
                    incident.status,
                    incident.description,
                    incident.reported_by,
                ],
            )
            .context("failed to insert incident")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Set the status of one incident, reporting how many rows changed.
    ///
    /// Returns 0 when the id does not exist; callers detect "not found"
    /// from the count, not from an error.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_incident_status(&self, incident_id: i64, new_status: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE cyber_incidents SET status = ?1 WHERE id = ?2",
                params![new_status, incident_id],
            )
            .with_context(|| format!("failed to update status of incident {incident_id}"))
    }

    /// Delete one incident by id, reporting how many rows changed (0 or 1).
    ///
    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_incident(&self, incident_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM cyber_incidents WHERE id = ?1",
                params![incident_id],
            )
            .with_context(|| format!("failed to delete incident {incident_id}"))
    }

    /// List all incidents, newest id first.
    ///
    /// # Errors
    /// Returns an error when the listing query fails.
    pub fn list_incidents(&self) -> Result<Vec<Incident>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, incident_type, severity, status, description, reported_by
             FROM cyber_incidents
             ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Incident {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    incident_type: row.get(2)?,
                    severity: row.get(3)?,
                    status: row.get(4)?,
                    description: row.get(5)?,
                    reported_by: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Aggregates ───────────────────────────────────────────────────────
    //
    // Ties within equal counts are left in store-defined order.

    /// Count incidents grouped by type, descending by count.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn incident_counts_by_type(&self) -> Result<Vec<TypeCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_type, COUNT(*) AS count
             FROM cyber_incidents
             GROUP BY incident_type
             ORDER BY count DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TypeCount {
                    incident_type: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Count incidents of severity `High` grouped by status, descending by
    /// count.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn high_severity_counts_by_status(&self) -> Result<Vec<StatusCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) AS count
             FROM cyber_incidents
             WHERE severity = 'High'
             GROUP BY status
             ORDER BY count DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StatusCount {
                    status: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Incident types whose count is strictly greater than `threshold`,
    /// descending by count.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn incident_types_above(&self, threshold: i64) -> Result<Vec<TypeCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_type, COUNT(*) AS count
             FROM cyber_incidents
             GROUP BY incident_type
             HAVING COUNT(*) > ?1
             ORDER BY count DESC",
        )?;
        let rows = stmt
            .query_map(params![threshold], |row| {
                Ok(TypeCount {
                    incident_type: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Count the rows of one catalog table.
    ///
    /// # Errors
    /// Returns an error for an unknown table name or a failed count query.
    pub fn table_row_count(&self, table: &str) -> Result<i64> {
        let spec = table_spec(table)?;
        let query = format!("SELECT COUNT(*) FROM {}", spec.name);
        self.conn
            .query_row(&query, [], |row| row.get(0))
            .with_context(|| format!("failed to count rows of {}", spec.name))
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map each loadable column of `spec` to its position in the CSV header.
///
/// The header must carry exactly the loadable column set; extra, missing,
/// and repeated names are input-format errors, never silently coerced.
fn match_header_columns(
    spec: &TableSpec,
    headers: &csv::StringRecord,
    source: &Path,
) -> Result<Vec<usize>> {
    let header_names = headers.iter().map(str::trim).collect::<Vec<_>>();

    let missing = spec
        .loadable_columns
        .iter()
        .copied()
        .filter(|column| !header_names.contains(column))
        .collect::<Vec<_>>();
    let unexpected = header_names
        .iter()
        .copied()
        .filter(|name| !spec.loadable_columns.iter().any(|column| column == name))
        .collect::<Vec<_>>();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(anyhow!(
            "CSV header of {} does not match the {} column set (missing: [{}], unexpected: [{}])",
            source.display(),
            spec.name,
            missing.join(", "),
            unexpected.join(", "),
        ));
    }
    if header_names.len() != spec.loadable_columns.len() {
        return Err(anyhow!(
            "CSV header of {} repeats a column name",
            source.display()
        ));
    }

    spec.loadable_columns
        .iter()
        .map(|column| {
            header_names
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| anyhow!("column {column} vanished from matched header"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use intelbase_core::{DATASETS_TABLE, INCIDENTS_TABLE, TICKETS_TABLE};

    fn unique_temp_dir(prefix: &str) -> Result<PathBuf> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn open_memory_store() -> Result<SqliteStore> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        Ok(store)
    }

    fn sample_incident(incident_type: &str, severity: &str) -> NewIncident {
        NewIncident {
            date: "2025-11-22".to_string(),
            incident_type: incident_type.to_string(),
            severity: severity.to_string(),
            status: "Open".to_string(),
            description: None,
            reported_by: None,
        }
    }

    const INCIDENTS_CSV: &str = "\
date,incident_type,severity,status,description,reported_by
2025-10-01,DDoS Attack,High,open,Traffic spike on edge nodes,amara
2025-10-02,Phishing,Medium,open,,nils
2025-10-03,Malware,Critical,contained,Endpoint quarantine engaged,amara
";

    const TICKETS_CSV: &str = "\
ticket_id,priority,status,category,subject,description,created_date,resolved_date,assigned_to
TCK-1001,High,open,network,VPN outage,Site-to-site VPN down,2025-10-01,,li
TCK-1002,Low,closed,hardware,Keyboard replacement,,2025-10-02,2025-10-03,omar
";

    #[test]
    fn ensure_schema_can_run_repeatedly() -> Result<()> {
        let store = open_memory_store()?;
        store.ensure_schema()?;
        store.ensure_schema()?;

        let id = store.insert_incident(&sample_incident("DDoS Attack", "High"))?;
        assert!(id > 0);
        Ok(())
    }

    #[test]
    fn incident_create_update_delete_round_trip() -> Result<()> {
        let store = open_memory_store()?;

        let id = store.insert_incident(&NewIncident {
            date: "2025-11-22".to_string(),
            incident_type: "DDoS Attack".to_string(),
            severity: "Critical".to_string(),
            status: "Open".to_string(),
            description: Some("Large volume of traffic detected.".to_string()),
            reported_by: Some("demouser".to_string()),
        })?;

        assert_eq!(store.update_incident_status(id, "Resolved")?, 1);
        assert_eq!(store.delete_incident(id)?, 1);
        assert!(store.list_incidents()?.iter().all(|incident| incident.id != id));
        Ok(())
    }

    #[test]
    fn update_on_missing_id_affects_zero_rows() -> Result<()> {
        let store = open_memory_store()?;
        assert_eq!(store.update_incident_status(9999, "Resolved")?, 0);
        assert!(store.list_incidents()?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_twice_reports_one_then_zero() -> Result<()> {
        let store = open_memory_store()?;
        let id = store.insert_incident(&sample_incident("Phishing", "Low"))?;
        assert_eq!(store.delete_incident(id)?, 1);
        assert_eq!(store.delete_incident(id)?, 0);
        Ok(())
    }

    #[test]
    fn incidents_list_newest_id_first() -> Result<()> {
        let store = open_memory_store()?;
        let first = store.insert_incident(&sample_incident("Phishing", "Low"))?;
        let second = store.insert_incident(&sample_incident("Malware", "High"))?;

        let ids = store
            .list_incidents()?
            .iter()
            .map(|incident| incident.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![second, first]);
        Ok(())
    }

    #[test]
    fn counts_by_type_descend_by_count() -> Result<()> {
        let store = open_memory_store()?;
        store.insert_incident(&sample_incident("DDoS", "High"))?;
        store.insert_incident(&sample_incident("DDoS", "Low"))?;
        store.insert_incident(&sample_incident("Phish", "High"))?;

        let counts = store.incident_counts_by_type()?;
        assert_eq!(
            counts,
            vec![
                TypeCount {
                    incident_type: "DDoS".to_string(),
                    count: 2,
                },
                TypeCount {
                    incident_type: "Phish".to_string(),
                    count: 1,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn high_severity_counts_ignore_other_severities() -> Result<()> {
        let store = open_memory_store()?;
        for status in ["open", "open", "resolved"] {
            let mut incident = sample_incident("Intrusion", "High");
            incident.status = status.to_string();
            store.insert_incident(&incident)?;
        }
        store.insert_incident(&sample_incident("Intrusion", "Low"))?;

        let counts = store.high_severity_counts_by_status()?;
        assert_eq!(
            counts,
            vec![
                StatusCount {
                    status: "open".to_string(),
                    count: 2,
                },
                StatusCount {
                    status: "resolved".to_string(),
                    count: 1,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn types_above_threshold_filter_strictly() -> Result<()> {
        let store = open_memory_store()?;
        store.insert_incident(&sample_incident("DDoS", "High"))?;
        store.insert_incident(&sample_incident("DDoS", "Low"))?;
        store.insert_incident(&sample_incident("Phish", "High"))?;

        let above_one = store.incident_types_above(1)?;
        assert_eq!(above_one.len(), 1);
        assert_eq!(above_one[0].incident_type, "DDoS");

        // Strictly greater than: a count of 2 does not clear a threshold of 2.
        assert!(store.incident_types_above(2)?.is_empty());
        Ok(())
    }

    #[test]
    fn csv_load_appends_and_reload_duplicates() -> Result<()> {
        let dir = unique_temp_dir("intelbase-load")?;
        let source = dir.join("cyber_incidents.csv");
        fs::write(&source, INCIDENTS_CSV)?;

        let mut store = open_memory_store()?;
        let report = store.load_table(&source, INCIDENTS_TABLE)?;
        assert_eq!(report.rows_loaded, 3);
        assert!(report.sha256.is_some());
        assert_eq!(store.table_row_count(INCIDENTS_TABLE)?, 3);

        // Same file again: strictly additive, rows duplicate under new ids.
        let again = store.load_table(&source, INCIDENTS_TABLE)?;
        assert_eq!(again.rows_loaded, 3);
        assert_eq!(store.table_row_count(INCIDENTS_TABLE)?, 6);

        let ids = store
            .list_incidents()?
            .iter()
            .map(|incident| incident.id)
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(ids.len(), 6);
        Ok(())
    }

    #[test]
    fn csv_empty_fields_land_as_null() -> Result<()> {
        let dir = unique_temp_dir("intelbase-null")?;
        let source = dir.join("cyber_incidents.csv");
        fs::write(&source, INCIDENTS_CSV)?;

        let mut store = open_memory_store()?;
        store.load_table(&source, INCIDENTS_TABLE)?;

        let incidents = store.list_incidents()?;
        let phishing = incidents
            .iter()
            .find(|incident| incident.incident_type == "Phishing")
            .ok_or_else(|| anyhow!("phishing row missing after load"))?;
        assert_eq!(phishing.description, None);
        Ok(())
    }

    #[test]
    fn csv_header_mismatch_fails_without_partial_insert() -> Result<()> {
        let dir = unique_temp_dir("intelbase-header")?;
        let source = dir.join("cyber_incidents.csv");
        fs::write(
            &source,
            "date,incident_type,severity,status,description\n2025-10-01,DDoS,High,open,x\n",
        )?;

        let mut store = open_memory_store()?;
        let err = store.load_table(&source, INCIDENTS_TABLE);
        assert!(err.is_err());
        assert_eq!(store.table_row_count(INCIDENTS_TABLE)?, 0);

        fs::write(
            &source,
            "date,incident_type,severity,status,description,reported_by,extra\n\
             2025-10-01,DDoS,High,open,x,y,z\n",
        )?;
        let err = store.load_table(&source, INCIDENTS_TABLE);
        assert!(err.is_err());
        assert_eq!(store.table_row_count(INCIDENTS_TABLE)?, 0);
        Ok(())
    }

    #[test]
    fn csv_malformed_row_rolls_back_the_whole_file() -> Result<()> {
        let dir = unique_temp_dir("intelbase-ragged")?;
        let source = dir.join("cyber_incidents.csv");
        fs::write(
            &source,
            "date,incident_type,severity,status,description,reported_by\n\
             2025-10-01,DDoS,High,open,x,amara\n\
             2025-10-02,Phishing,Medium\n\
             2025-10-03,Malware,Critical,open,y,nils\n",
        )?;

        let mut store = open_memory_store()?;
        let err = store.load_table(&source, INCIDENTS_TABLE);
        assert!(err.is_err());
        // All-or-nothing per file: the good leading row must not survive.
        assert_eq!(store.table_row_count(INCIDENTS_TABLE)?, 0);
        Ok(())
    }

    #[test]
    fn missing_source_yields_zero_row_report() -> Result<()> {
        let dir = unique_temp_dir("intelbase-missing")?;
        let source = dir.join("absent.csv");

        let mut store = open_memory_store()?;
        let report = store.load_table(&source, DATASETS_TABLE)?;
        assert_eq!(report, LoadReport::empty(DATASETS_TABLE, &source));
        assert_eq!(store.table_row_count(DATASETS_TABLE)?, 0);
        Ok(())
    }

    #[test]
    fn unknown_table_is_rejected_before_touching_the_source() -> Result<()> {
        let mut store = open_memory_store()?;
        let err = store.load_table(Path::new("whatever.csv"), "no_such_table");
        assert!(err.is_err());
        assert!(store.table_row_count("no_such_table").is_err());
        Ok(())
    }

    #[test]
    fn ticket_reload_fails_wholesale_on_unique_ticket_id() -> Result<()> {
        let dir = unique_temp_dir("intelbase-tickets")?;
        let source = dir.join("it_tickets.csv");
        fs::write(&source, TICKETS_CSV)?;

        let mut store = open_memory_store()?;
        let report = store.load_table(&source, TICKETS_TABLE)?;
        assert_eq!(report.rows_loaded, 2);

        // ticket_id is UNIQUE: the duplicate row fails and the all-or-nothing
        // policy rolls the whole second load back.
        let err = store.load_table(&source, TICKETS_TABLE);
        assert!(err.is_err());
        assert_eq!(store.table_row_count(TICKETS_TABLE)?, 2);
        Ok(())
    }

    #[test]
    fn migration_skips_duplicates_and_is_idempotent() -> Result<()> {
        let dir = unique_temp_dir("intelbase-migrate")?;
        let source = dir.join("users.txt");
        fs::write(
            &source,
            "alice,$2b$12$aaa,analyst\n\
             \n\
             bob,$2b$12$bbb\n\
             not_a_credential_line\n",
        )?;

        let mut store = open_memory_store()?;
        let first = store.migrate_users(&source)?;
        assert_eq!(
            first,
            MigrationReport {
                migrated: 2,
                skipped_existing: 0,
                skipped_malformed: 1,
            }
        );
        let after_first = store.list_users()?;

        let second = store.migrate_users(&source)?;
        assert_eq!(
            second,
            MigrationReport {
                migrated: 0,
                skipped_existing: 2,
                skipped_malformed: 1,
            }
        );
        assert_eq!(store.list_users()?, after_first);

        let bob = store
            .get_user_by_username("bob")?
            .ok_or_else(|| anyhow!("bob missing after migration"))?;
        assert_eq!(bob.role, "user");
        Ok(())
    }

    #[test]
    fn migration_never_overwrites_an_existing_user() -> Result<()> {
        let dir = unique_temp_dir("intelbase-existing")?;
        let source = dir.join("users.txt");
        fs::write(&source, "alice,$2b$12$from_legacy,admin\n")?;

        let mut store = open_memory_store()?;
        store.insert_user("alice", "$argon2id$v=19$current", "analyst")?;

        let report = store.migrate_users(&source)?;
        assert_eq!(report.migrated, 0);
        assert_eq!(report.skipped_existing, 1);

        let alice = store
            .get_user_by_username("alice")?
            .ok_or_else(|| anyhow!("alice vanished"))?;
        assert_eq!(alice.password_hash, "$argon2id$v=19$current");
        assert_eq!(alice.role, "analyst");
        Ok(())
    }

    #[test]
    fn migration_missing_file_reports_zero() -> Result<()> {
        let dir = unique_temp_dir("intelbase-nofile")?;
        let mut store = open_memory_store()?;
        let report = store.migrate_users(&dir.join("users.txt"))?;
        assert_eq!(report, MigrationReport::default());
        assert!(store.list_users()?.is_empty());
        Ok(())
    }

    #[test]
    fn migration_lines_keep_going_past_a_bad_one() -> Result<()> {
        let dir = unique_temp_dir("intelbase-badline")?;
        let source = dir.join("users.txt");
        fs::write(
            &source,
            "broken\n\
             carol,$2b$12$ccc,auditor\n",
        )?;

        let mut store = open_memory_store()?;
        let report = store.migrate_users(&source)?;
        assert_eq!(report.migrated, 1);
        assert_eq!(report.skipped_malformed, 1);
        assert!(store.get_user_by_username("carol")?.is_some());
        Ok(())
    }
}
