//! The labeling service: one handle that owns the store, pricing, the token
//! estimator and the classification backend.
//!
//! Every operation is scoped to a user id. Handlers share a single
//! `Arc<Labeler>`; nothing is kept in ambient state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rust_xlsxwriter::XlsxError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::budget::{estimate_cost, CostEstimate, Pricing, TokenEstimator};
use crate::classify::{
    validate_mapping, ClassificationRequest, ClassificationService, ClassifyError,
};
use crate::ingest::{self, sheet, IngestError};
use crate::job::{ClassificationJob, JobStatus};
use crate::ledger::{UsageRecord, UsageSummary};
use crate::records::{LabeledItem, RecordKind};
use crate::store::{Payment, Store, StoreError};

/// Rows of a result shown in job views.
pub const PREVIEW_ROWS: usize = 5;

const TOP_UP_DESCRIPTION: &str = "Account top-up";
const INTERRUPTED_MESSAGE: &str =
    "The service restarted while this job was running. Please submit it again.";

#[derive(Debug, Error)]
pub enum LabelerError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("Please upload the {} file before submitting", kinds(.0))]
    IncompleteInputs(Vec<RecordKind>),

    #[error("Insufficient balance: {balance:.4} available, {required:.4} required")]
    InsufficientBalance { balance: f64, required: f64 },

    #[error("A classification job is already running for this account")]
    JobInFlight,

    #[error("Failed to record usage for job {job_id}: {source}")]
    LedgerWrite { job_id: Uuid, source: StoreError },

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {0} has no labeled result")]
    NoResult(Uuid),

    #[error("Top-up amount must be a positive number")]
    InvalidAmount,

    #[error(transparent)]
    Store(StoreError),

    #[error("Failed to build the export workbook: {0}")]
    Export(#[from] XlsxError),

    #[error("Classification task for job {job_id} stopped: {reason}")]
    Interrupted { job_id: Uuid, reason: String },
}

fn kinds(kinds: &[RecordKind]) -> String {
    kinds
        .iter()
        .map(RecordKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<StoreError> for LabelerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::JobNotFound(id) => Self::JobNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl LabelerError {
    /// Text safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Classify(e) => e.user_message(),
            Self::LedgerWrite { .. } => {
                "Your results could not be saved. You have not been charged; please try again."
                    .to_string()
            }
            Self::Store(_) | Self::Export(_) | Self::Interrupted { .. } => {
                "An internal error occurred. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub job_id: Uuid,
    pub kind: RecordKind,
    pub rows: usize,
    pub estimate: CostEstimate,
}

/// Cost estimate for the current job against the user's balance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub job_id: Option<Uuid>,
    pub estimate: CostEstimate,
    pub balance: f64,
    pub missing: Vec<RecordKind>,
    pub can_submit: bool,
}

/// A completed submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job: JobView,
    pub usage: UsageRecord,
    pub balance: f64,
}

/// A job plus derived fields for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: ClassificationJob,
    pub missing: Vec<RecordKind>,
    pub result_count: usize,
    pub preview: Vec<LabeledItem>,
}

impl From<ClassificationJob> for JobView {
    fn from(job: ClassificationJob) -> Self {
        let missing = job.missing();
        let result_count = job.result.as_ref().map_or(0, |r| r.len());
        let preview = job
            .result
            .as_ref()
            .map(|r| r.preview(PREVIEW_ROWS).to_vec())
            .unwrap_or_default();
        Self {
            job,
            missing,
            result_count,
            preview,
        }
    }
}

/// Compact listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub input_count: usize,
    pub category_count: usize,
    pub example_count: usize,
    pub result_count: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ClassificationJob> for JobSummary {
    fn from(job: &ClassificationJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            input_count: job.input_texts.as_ref().map_or(0, |s| s.len()),
            category_count: job.categories.as_ref().map_or(0, |s| s.len()),
            example_count: job.examples.as_ref().map_or(0, |s| s.len()),
            result_count: job.result.as_ref().map_or(0, |r| r.len()),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: String,
    pub balance: f64,
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUp {
    pub balance: f64,
    pub payment: Payment,
}

/// A rendered export.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Releases the user's in-flight slot when dropped.
struct InFlightGuard {
    users: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut users) = self.users.lock() {
            users.remove(&self.user_id);
        }
    }
}

pub struct Labeler {
    store: Arc<Store>,
    service: Arc<dyn ClassificationService>,
    estimator: Arc<dyn TokenEstimator>,
    pricing: Pricing,
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Held across every load, mutate and save of a current job.
    job_writes: Mutex<()>,
}

impl Labeler {
    pub fn new(
        store: Arc<Store>,
        service: Arc<dyn ClassificationService>,
        estimator: Arc<dyn TokenEstimator>,
        pricing: Pricing,
    ) -> Self {
        Self {
            store,
            service,
            estimator,
            pricing,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            job_writes: Mutex::new(()),
        }
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    // ─────────────────────────────────────────────────────────────────────
    // Current job
    // ─────────────────────────────────────────────────────────────────────

    /// Validate an upload and store it on the user's current job.
    pub fn ingest(
        &self,
        user_id: &str,
        kind: RecordKind,
        bytes: &[u8],
    ) -> Result<UploadReceipt, LabelerError> {
        let ingested = ingest::ingest(kind, bytes).map_err(|e| {
            tracing::info!("Rejected {} upload from {}: {}", kind, user_id, e);
            e
        })?;

        let _writes = self.lock_jobs()?;
        let mut job = self.editable_job(user_id)?;
        job.set_records(ingested.records);
        self.store.save_job(&job)?;

        tracing::info!(
            "Stored {} {} rows on job {} for {}",
            ingested.rows,
            kind,
            job.id,
            user_id
        );

        Ok(UploadReceipt {
            job_id: job.id,
            kind,
            rows: ingested.rows,
            estimate: self.estimate_job(&job),
        })
    }

    /// Estimate the current job and compare it with the balance.
    pub fn estimate(&self, user_id: &str) -> Result<Quote, LabelerError> {
        let _writes = self.lock_jobs()?;
        let job = self.store.current_job(user_id)?;
        let balance = self.store.balance(user_id)?;

        let Some(mut job) = job else {
            return Ok(Quote {
                job_id: None,
                estimate: CostEstimate::default(),
                balance,
                missing: RecordKind::ALL.to_vec(),
                can_submit: false,
            });
        };

        let estimate = self.estimate_job(&job);
        let missing = job.missing();
        if missing.is_empty() && job.status == JobStatus::Draft {
            job.mark_estimated();
            self.store.save_job(&job)?;
        }

        Ok(Quote {
            job_id: Some(job.id),
            estimate,
            balance,
            can_submit: missing.is_empty()
                && job.is_editable()
                && balance_covers(balance, estimate.cost.input_cost),
            missing,
        })
    }

    /// Classify the current job, bill the usage and store the result.
    ///
    /// Blocked before any model call when the balance is exhausted or does
    /// not cover the estimate. A completed job is resubmitted as a new job.
    ///
    /// Once the job is marked Submitted the model call and the ledger write
    /// run on a spawned task, so dropping the returned future does not
    /// abandon the job.
    pub async fn submit(self: &Arc<Self>, user_id: &str) -> Result<Submission, LabelerError> {
        let guard = self.claim(user_id)?;
        let (job, request) = self.begin_submission(user_id)?;
        let job_id = job.id;

        let labeler = Arc::clone(self);
        let user = user_id.to_string();
        let run = tokio::spawn(async move {
            let _guard = guard;
            labeler.run_submission(&user, job, request).await
        });

        match run.await {
            Ok(outcome) => outcome,
            Err(e) => Err(self.fail_interrupted(user_id, job_id, e.to_string())),
        }
    }

    /// Gate, pick the job to run and mark it Submitted.
    fn begin_submission(
        &self,
        user_id: &str,
    ) -> Result<(ClassificationJob, ClassificationRequest), LabelerError> {
        let _writes = self.lock_jobs()?;

        let current = self
            .store
            .current_job(user_id)?
            .ok_or_else(|| LabelerError::IncompleteInputs(RecordKind::ALL.to_vec()))?;
        if current.status == JobStatus::Submitted {
            return Err(LabelerError::JobInFlight);
        }
        let request = current.request().map_err(LabelerError::IncompleteInputs)?;

        let estimate = self.estimate_job(&current);
        let balance = self.store.balance(user_id)?;
        if !balance_covers(balance, estimate.cost.input_cost) {
            tracing::info!(
                "Blocked submission for {}: balance {:.4}, estimate {:.4}",
                user_id,
                balance,
                estimate.cost.input_cost
            );
            return Err(LabelerError::InsufficientBalance {
                balance,
                required: estimate.cost.input_cost,
            });
        }

        warn_unknown_categories(&request);

        let mut job = if current.status == JobStatus::Completed {
            let next = current.carry_over();
            self.store.insert_job(&next)?;
            tracing::info!("Resubmitting job {} as {}", current.id, next.id);
            next
        } else {
            current
        };

        job.mark_submitted();
        self.store.save_job(&job)?;
        tracing::info!(
            "Submitted job {} for {}: {} input texts, {} categories, {} examples",
            job.id,
            user_id,
            request.input_texts.len(),
            request.categories.len(),
            request.examples.len()
        );

        Ok((job, request))
    }

    /// Model call, mapping check and ledger write for a Submitted job.
    async fn run_submission(
        &self,
        user_id: &str,
        mut job: ClassificationJob,
        request: ClassificationRequest,
    ) -> Result<Submission, LabelerError> {
        let response = match self.service.classify(&request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_job(job, e.into())),
        };

        let usage = response.usage;
        let result = match validate_mapping(response.results, &request.input_texts) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    "Job {} response rejected ({} input / {} output tokens not billed)",
                    job.id,
                    usage.input_tokens,
                    usage.output_tokens
                );
                return Err(self.fail_job(job, ClassifyError::from(e).into()));
            }
        };

        job.complete(result);
        let record = UsageRecord::new(job.id, usage, &self.pricing);

        match self.store.complete_job(&job, &record) {
            Ok(balance) => {
                tracing::info!(
                    "Completed job {} for {}: {} input / {} output tokens, cost {:.4}, balance {:.4}",
                    job.id,
                    user_id,
                    record.input_tokens,
                    record.output_tokens,
                    record.cost,
                    balance
                );
                Ok(Submission {
                    job: job.into(),
                    usage: record,
                    balance,
                })
            }
            Err(source) => {
                tracing::error!(
                    "Ledger write failed for {} on job {}: {} input / {} output tokens, cost {:.4} unrecorded: {}",
                    user_id,
                    job.id,
                    record.input_tokens,
                    record.output_tokens,
                    record.cost,
                    source
                );
                let err = LabelerError::LedgerWrite {
                    job_id: job.id,
                    source,
                };
                job.fail(err.user_message());
                if let Err(e) = self.store.save_job(&job) {
                    tracing::error!("Failed to mark job {} failed: {}", job.id, e);
                }
                Err(err)
            }
        }
    }

    /// Empty the current job. Completed jobs stay in history untouched.
    pub fn clear(&self, user_id: &str) -> Result<JobView, LabelerError> {
        let _writes = self.lock_jobs()?;
        let job = match self.store.current_job(user_id)? {
            Some(job) if job.status == JobStatus::Submitted => {
                return Err(LabelerError::JobInFlight)
            }
            Some(mut job) if job.status != JobStatus::Completed => {
                job.clear_records();
                self.store.save_job(&job)?;
                job
            }
            _ => {
                let job = ClassificationJob::new(user_id);
                self.store.insert_job(&job)?;
                job
            }
        };

        tracing::info!("Cleared data for {} (current job {})", user_id, job.id);
        Ok(job.into())
    }

    pub fn current_job(&self, user_id: &str) -> Result<Option<JobView>, LabelerError> {
        Ok(self.store.current_job(user_id)?.map(JobView::from))
    }

    // ─────────────────────────────────────────────────────────────────────
    // History and export
    // ─────────────────────────────────────────────────────────────────────

    pub fn job(&self, user_id: &str, job_id: Uuid) -> Result<JobView, LabelerError> {
        Ok(self.store.job(user_id, job_id)?.into())
    }

    pub fn jobs(&self, user_id: &str) -> Result<Vec<JobSummary>, LabelerError> {
        Ok(self
            .store
            .jobs(user_id)?
            .iter()
            .map(JobSummary::from)
            .collect())
    }

    /// Render a job's labeled result as an xlsx file.
    pub fn export(&self, user_id: &str, job_id: Uuid) -> Result<ExportFile, LabelerError> {
        let job = self.store.job(user_id, job_id)?;
        let result = job.result.as_ref().ok_or(LabelerError::NoResult(job_id))?;
        let bytes = sheet::write_labeled_result(result)?;

        tracing::debug!("Exported {} rows of job {} ({} bytes)", result.len(), job_id, bytes.len());

        Ok(ExportFile {
            file_name: job.export_file_name(),
            bytes,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Account
    // ─────────────────────────────────────────────────────────────────────

    pub fn account(&self, user_id: &str) -> Result<Account, LabelerError> {
        Ok(Account {
            user_id: user_id.to_string(),
            balance: self.store.balance(user_id)?,
            pricing: self.pricing,
        })
    }

    pub fn usage(&self, user_id: &str) -> Result<UsageSummary, LabelerError> {
        Ok(UsageSummary::from_history(self.store.usage_records(user_id)?))
    }

    pub fn top_up(&self, user_id: &str, amount: f64) -> Result<TopUp, LabelerError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LabelerError::InvalidAmount);
        }
        let (balance, payment) = self.store.credit(user_id, amount, TOP_UP_DESCRIPTION)?;
        tracing::info!(
            "Credited {:.4} to {}, balance now {:.4}",
            payment.amount,
            user_id,
            balance
        );
        Ok(TopUp { balance, payment })
    }

    pub fn payments(&self, user_id: &str) -> Result<Vec<Payment>, LabelerError> {
        Ok(self.store.payments(user_id)?)
    }

    /// Fail jobs left Submitted by a previous process. Their record sets are
    /// kept so they can be resubmitted.
    pub fn recover_interrupted(&self) -> Result<usize, LabelerError> {
        let _writes = self.lock_jobs()?;
        let count = self.store.fail_interrupted_jobs(INTERRUPTED_MESSAGE)?;
        if count > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", count);
        }
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn claim(&self, user_id: &str) -> Result<InFlightGuard, LabelerError> {
        let mut users = self
            .in_flight
            .lock()
            .map_err(|_| LabelerError::Store(StoreError::Poisoned))?;
        if !users.insert(user_id.to_string()) {
            return Err(LabelerError::JobInFlight);
        }
        Ok(InFlightGuard {
            users: Arc::clone(&self.in_flight),
            user_id: user_id.to_string(),
        })
    }

    fn lock_jobs(&self) -> Result<MutexGuard<'_, ()>, LabelerError> {
        self.job_writes
            .lock()
            .map_err(|_| LabelerError::Store(StoreError::Poisoned))
    }

    /// The job uploads should go to, creating one when needed.
    fn editable_job(&self, user_id: &str) -> Result<ClassificationJob, LabelerError> {
        match self.store.current_job(user_id)? {
            Some(job) if job.status == JobStatus::Submitted => Err(LabelerError::JobInFlight),
            Some(job) if job.status == JobStatus::Completed => {
                let next = job.carry_over();
                self.store.insert_job(&next)?;
                Ok(next)
            }
            Some(job) => Ok(job),
            None => {
                let job = ClassificationJob::new(user_id);
                self.store.insert_job(&job)?;
                tracing::debug!("Created job {} for {}", job.id, user_id);
                Ok(job)
            }
        }
    }

    fn estimate_job(&self, job: &ClassificationJob) -> CostEstimate {
        estimate_cost(
            self.estimator.as_ref(),
            &self.pricing,
            job.input_texts.as_ref(),
            job.categories.as_ref(),
            job.examples.as_ref(),
        )
    }

    fn fail_job(&self, mut job: ClassificationJob, err: LabelerError) -> LabelerError {
        tracing::error!("Job {} for {} failed: {}", job.id, job.user_id, err);
        job.fail(err.user_message());
        if let Err(e) = self.store.save_job(&job) {
            tracing::error!("Failed to mark job {} failed: {}", job.id, e);
        }
        err
    }

    /// Fail a job whose task panicked, unless it already reached an end state.
    fn fail_interrupted(&self, user_id: &str, job_id: Uuid, reason: String) -> LabelerError {
        let err = LabelerError::Interrupted { job_id, reason };
        match self.store.job(user_id, job_id) {
            Ok(job) if job.status == JobStatus::Submitted => self.fail_job(job, err),
            Ok(_) => err,
            Err(e) => {
                tracing::error!("Failed to load interrupted job {}: {}", job_id, e);
                err
            }
        }
    }
}

/// New jobs need a positive balance that covers the estimated input cost.
fn balance_covers(balance: f64, input_cost: f64) -> bool {
    balance > 0.0 && input_cost <= balance
}

fn warn_unknown_categories(request: &ClassificationRequest) {
    for example in request.examples.entries() {
        if !request.categories.contains(&example.desired_category) {
            tracing::warn!(
                "Example {:?} names category {:?}, which is not in the category file",
                example.text,
                example.desired_category
            );
        }
    }
}
