//! SQLite persistence for accounts, jobs, usage and payments.
//!
//! One connection behind a mutex. Every write that touches the balance runs
//! in an IMMEDIATE transaction so concurrent writers queue on the database
//! lock instead of failing half way.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::budget::round_currency;
use crate::job::{ClassificationJob, JobStatus};
use crate::ledger::{self, parse_timestamp, parse_uuid, UsageRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database connection is unavailable after a panic")]
    Poisoned,

    #[error("Job {0} not found")]
    JobNotFound(Uuid),
}

/// A balance credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    user_id TEXT PRIMARY KEY,
    balance REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    input_texts TEXT,
    categories TEXT,
    examples TEXT,
    result TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id);

CREATE TABLE IF NOT EXISTS usage_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cost REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records(user_id);

CREATE TRIGGER IF NOT EXISTS usage_records_no_update
BEFORE UPDATE ON usage_records
BEGIN
    SELECT RAISE(ABORT, 'usage records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS usage_records_no_delete
BEFORE DELETE ON usage_records
BEGIN
    SELECT RAISE(ABORT, 'usage records are append-only');
END;

CREATE TABLE IF NOT EXISTS payments (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    amount REAL NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id);
";

const JOB_COLUMNS: &str = "id, user_id, status, input_texts, categories, examples, result, \
                           error_message, created_at, updated_at";

pub struct Store {
    conn: Mutex<Connection>,
    initial_balance: f64,
}

impl Store {
    /// Open (or create) the database file. New accounts start at
    /// `initial_balance`.
    pub fn open(path: &Path, initial_balance: f64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!("Opened database at {}", path.display());
        Self::init(conn, initial_balance)
    }

    pub fn open_in_memory(initial_balance: f64) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, initial_balance)
    }

    fn init(conn: Connection, initial_balance: f64) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            initial_balance,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn ensure_account(&self, conn: &Connection, user_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let created = conn.execute(
            "INSERT OR IGNORE INTO accounts (user_id, balance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![user_id, self.initial_balance, now],
        )?;
        if created > 0 {
            tracing::info!(
                "Created account for {} with balance {:.4}",
                user_id,
                self.initial_balance
            );
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────

    pub fn balance(&self, user_id: &str) -> Result<f64, StoreError> {
        let conn = self.lock()?;
        self.ensure_account(&conn, user_id)?;
        let balance = conn.query_row(
            "SELECT balance FROM accounts WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// Add funds and record the payment. Returns the new balance.
    pub fn credit(
        &self,
        user_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<(f64, Payment), StoreError> {
        let mut conn = self.lock()?;
        self.ensure_account(&conn, user_id)?;

        let payment = Payment {
            id: Uuid::new_v4(),
            amount: round_currency(amount),
            description: description.to_string(),
            created_at: Utc::now(),
        };

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO payments (id, user_id, amount, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payment.id.to_string(),
                user_id,
                payment.amount,
                payment.description,
                payment.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE accounts SET balance = ROUND(balance + ?1, 4), updated_at = ?2
             WHERE user_id = ?3",
            params![payment.amount, payment.created_at.to_rfc3339(), user_id],
        )?;
        let balance: f64 = tx.query_row(
            "SELECT balance FROM accounts WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok((balance, payment))
    }

    /// Payments, newest first.
    pub fn payments(&self, user_id: &str) -> Result<Vec<Payment>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, amount, description, created_at FROM payments
             WHERE user_id = ?1 ORDER BY rowid DESC",
        )?;
        let payments = stmt
            .query_map(params![user_id], |row| {
                let id: String = row.get(0)?;
                let created_at: String = row.get(3)?;
                Ok(Payment {
                    id: parse_uuid(0, &id)?,
                    amount: row.get(1)?,
                    description: row.get(2)?,
                    created_at: parse_timestamp(3, &created_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payments)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────

    /// The user's most recently created job.
    pub fn current_job(&self, user_id: &str) -> Result<Option<ClassificationJob>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE user_id = ?1 ORDER BY rowid DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![user_id],
                read_job_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn job(&self, user_id: &str, id: Uuid) -> Result<ClassificationJob, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE id = ?1 AND user_id = ?2",
                    JOB_COLUMNS
                ),
                params![id.to_string(), user_id],
                read_job_row,
            )
            .optional()?;
        row.ok_or(StoreError::JobNotFound(id))?.into_job()
    }

    /// All of the user's jobs, newest first.
    pub fn jobs(&self, user_id: &str) -> Result<Vec<ClassificationJob>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE user_id = ?1 ORDER BY rowid DESC",
            JOB_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], read_job_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub fn insert_job(&self, job: &ClassificationJob) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let columns = JobColumns::encode(job)?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                JOB_COLUMNS
            ),
            params![
                job.id.to_string(),
                job.user_id,
                job.status.as_str(),
                columns.input_texts,
                columns.categories,
                columns.examples,
                columns.result,
                job.error_message,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn save_job(&self, job: &ClassificationJob) -> Result<(), StoreError> {
        let conn = self.lock()?;
        update_job(&conn, job)
    }

    /// Persist a completed job, append its usage record and debit the cost,
    /// all or nothing. Returns the new balance.
    pub fn complete_job(
        &self,
        job: &ClassificationJob,
        record: &UsageRecord,
    ) -> Result<f64, StoreError> {
        let mut conn = self.lock()?;
        self.ensure_account(&conn, &job.user_id)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ledger::append(&tx, &job.user_id, record)?;
        let balance = ledger::debit(&tx, &job.user_id, record.cost)?;
        update_job(&tx, job)?;
        tx.commit()?;

        Ok(balance)
    }

    /// Fail every job left in Submitted by a previous process.
    pub fn fail_interrupted_jobs(&self, message: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, error_message = ?2, updated_at = ?3 WHERE status = ?4",
            params![
                JobStatus::Failed.as_str(),
                message,
                Utc::now().to_rfc3339(),
                JobStatus::Submitted.as_str(),
            ],
        )?;
        Ok(changed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Usage
    // ─────────────────────────────────────────────────────────────────────

    pub fn usage_records(&self, user_id: &str) -> Result<Vec<UsageRecord>, StoreError> {
        let conn = self.lock()?;
        Ok(ledger::history(&conn, user_id)?)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn update_job(conn: &Connection, job: &ClassificationJob) -> Result<(), StoreError> {
    let columns = JobColumns::encode(job)?;
    let changed = conn.execute(
        "UPDATE jobs SET status = ?1, input_texts = ?2, categories = ?3, examples = ?4,
             result = ?5, error_message = ?6, updated_at = ?7
         WHERE id = ?8 AND user_id = ?9",
        params![
            job.status.as_str(),
            columns.input_texts,
            columns.categories,
            columns.examples,
            columns.result,
            job.error_message,
            job.updated_at.to_rfc3339(),
            job.id.to_string(),
            job.user_id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::JobNotFound(job.id));
    }
    Ok(())
}

/// JSON-encoded record sets of a job.
struct JobColumns {
    input_texts: Option<String>,
    categories: Option<String>,
    examples: Option<String>,
    result: Option<String>,
}

impl JobColumns {
    fn encode(job: &ClassificationJob) -> Result<Self, serde_json::Error> {
        Ok(Self {
            input_texts: job.input_texts.as_ref().map(serde_json::to_string).transpose()?,
            categories: job.categories.as_ref().map(serde_json::to_string).transpose()?,
            examples: job.examples.as_ref().map(serde_json::to_string).transpose()?,
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
        })
    }
}

/// A jobs row as stored.
struct JobRow {
    id: String,
    user_id: String,
    status: String,
    input_texts: Option<String>,
    categories: Option<String>,
    examples: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: row.get(2)?,
        input_texts: row.get(3)?,
        categories: row.get(4)?,
        examples: row.get(5)?,
        result: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    value: Option<String>,
) -> Result<Option<T>, serde_json::Error> {
    value.map(|v| serde_json::from_str(&v)).transpose()
}

impl JobRow {
    fn into_job(self) -> Result<ClassificationJob, StoreError> {
        let status = self.status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(ClassificationJob {
            id: parse_uuid(0, &self.id)?,
            user_id: self.user_id,
            status,
            input_texts: decode(self.input_texts)?,
            categories: decode(self.categories)?,
            examples: decode(self.examples)?,
            result: decode(self.result)?,
            error_message: self.error_message,
            created_at: parse_timestamp(8, &self.created_at)?,
            updated_at: parse_timestamp(9, &self.updated_at)?,
        })
    }
}
