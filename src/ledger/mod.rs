//! Usage ledger: per-user, append-only token accounting.
//!
//! Writes take a borrowed connection so the caller can put the append, the
//! debit and the job's result into one transaction. `usage_records` rows are
//! protected from UPDATE and DELETE by triggers created with the schema.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::{round_currency, Pricing};
use crate::classify::Usage;

/// One metered classification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub job_id: Uuid,
}

impl UsageRecord {
    /// Price `usage` at both rates.
    pub fn new(job_id: Uuid, usage: Usage, pricing: &Pricing) -> Self {
        Self {
            timestamp: Utc::now(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: pricing
                .cost(usage.input_tokens, usage.output_tokens)
                .total_cost,
            job_id,
        }
    }
}

/// Running totals over a user's history, oldest record first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub history: Vec<UsageRecord>,
}

impl UsageSummary {
    pub fn from_history(history: Vec<UsageRecord>) -> Self {
        let total_input_tokens = history.iter().map(|r| r.input_tokens).sum();
        let total_output_tokens = history.iter().map(|r| r.output_tokens).sum();
        let total_cost = round_currency(history.iter().map(|r| r.cost).sum());
        Self {
            total_input_tokens,
            total_output_tokens,
            total_cost,
            history,
        }
    }
}

pub(crate) fn append(
    conn: &Connection,
    user_id: &str,
    record: &UsageRecord,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO usage_records (user_id, job_id, timestamp, input_tokens, output_tokens, cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            record.job_id.to_string(),
            record.timestamp.to_rfc3339(),
            record.input_tokens as i64,
            record.output_tokens as i64,
            record.cost,
        ],
    )?;
    Ok(())
}

/// Subtract `amount` from the balance and return the new balance.
///
/// There is no floor; an account can go negative on its last job.
pub(crate) fn debit(conn: &Connection, user_id: &str, amount: f64) -> rusqlite::Result<f64> {
    let changed = conn.execute(
        "UPDATE accounts SET balance = ROUND(balance - ?1, 4), updated_at = ?2 WHERE user_id = ?3",
        params![amount, Utc::now().to_rfc3339(), user_id],
    )?;
    if changed != 1 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    conn.query_row(
        "SELECT balance FROM accounts WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

pub(crate) fn history(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<UsageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, input_tokens, output_tokens, cost, job_id
         FROM usage_records WHERE user_id = ?1 ORDER BY seq",
    )?;

    let records = stmt
        .query_map(params![user_id], |row| {
            let timestamp: String = row.get(0)?;
            let job_id: String = row.get(4)?;
            Ok(UsageRecord {
                timestamp: parse_timestamp(0, &timestamp)?,
                input_tokens: row.get::<_, i64>(1)? as u64,
                output_tokens: row.get::<_, i64>(2)? as u64,
                cost: row.get(3)?,
                job_id: parse_uuid(4, &job_id)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

pub(crate) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_priced_at_both_rates() {
        let record = UsageRecord::new(Uuid::new_v4(), Usage::new(1000, 200), &Pricing::default());
        assert_eq!(record.cost, 0.009);
    }

    #[test]
    fn test_summary_totals() {
        let pricing = Pricing::default();
        let job = Uuid::new_v4();
        let summary = UsageSummary::from_history(vec![
            UsageRecord::new(job, Usage::new(1000, 200), &pricing),
            UsageRecord::new(job, Usage::new(3000, 100), &pricing),
        ]);

        assert_eq!(summary.total_input_tokens, 4000);
        assert_eq!(summary.total_output_tokens, 300);
        assert_eq!(summary.total_cost, 0.026);
        assert_eq!(summary.history.len(), 2);
    }

    #[test]
    fn test_empty_summary() {
        let summary = UsageSummary::from_history(Vec::new());
        assert_eq!(summary, UsageSummary::default());
    }
}
