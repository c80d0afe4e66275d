//! Classification jobs and their lifecycle.
//!
//! ```text
//! Draft ──estimate──▶ Estimated ──submit──▶ Submitted ──▶ Completed
//!   ▲                                          │
//!   └──────────── new upload ◀── Failed ◀──────┘
//! ```
//!
//! A job keeps its record sets across failures so it can be resubmitted.
//! Completed jobs are never edited: a new upload starts a fresh Draft that
//! carries the record sets over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ClassificationRequest;
use crate::records::{
    CategorySet, ExampleSet, InputTextSet, LabeledResult, RecordKind, RecordSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Draft,
    Estimated,
    Submitted,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Estimated => "estimated",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "estimated" => Ok(Self::Estimated),
            "submitted" => Ok(Self::Submitted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown job status '{}'", other)),
        }
    }
}

/// One classification job owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub input_texts: Option<InputTextSet>,
    pub categories: Option<CategorySet>,
    pub examples: Option<ExampleSet>,
    pub result: Option<LabeledResult>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClassificationJob {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: JobStatus::Draft,
            input_texts: None,
            categories: None,
            examples: None,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh Draft holding this job's record sets.
    pub fn carry_over(&self) -> Self {
        Self {
            input_texts: self.input_texts.clone(),
            categories: self.categories.clone(),
            examples: self.examples.clone(),
            ..Self::new(self.user_id.clone())
        }
    }

    /// Replace one record set. Any earlier estimate or failure no longer
    /// applies, so the job returns to Draft.
    pub fn set_records(&mut self, records: RecordSet) {
        match records {
            RecordSet::Inputs(set) => self.input_texts = Some(set),
            RecordSet::Categories(set) => self.categories = Some(set),
            RecordSet::Examples(set) => self.examples = Some(set),
        }
        self.status = JobStatus::Draft;
        self.error_message = None;
        self.touch();
    }

    /// Drop all record sets and any outcome.
    pub fn clear_records(&mut self) {
        self.input_texts = None;
        self.categories = None;
        self.examples = None;
        self.result = None;
        self.error_message = None;
        self.status = JobStatus::Draft;
        self.touch();
    }

    /// Record kinds not yet uploaded.
    pub fn missing(&self) -> Vec<RecordKind> {
        let mut missing = Vec::new();
        if self.input_texts.is_none() {
            missing.push(RecordKind::Input);
        }
        if self.categories.is_none() {
            missing.push(RecordKind::Category);
        }
        if self.examples.is_none() {
            missing.push(RecordKind::Example);
        }
        missing
    }

    pub fn request(&self) -> Result<ClassificationRequest, Vec<RecordKind>> {
        match (&self.input_texts, &self.categories, &self.examples) {
            (Some(input_texts), Some(categories), Some(examples)) => Ok(ClassificationRequest {
                input_texts: input_texts.clone(),
                categories: categories.clone(),
                examples: examples.clone(),
            }),
            _ => Err(self.missing()),
        }
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self.status, JobStatus::Submitted | JobStatus::Completed)
    }

    pub fn mark_estimated(&mut self) {
        if self.status == JobStatus::Draft {
            self.status = JobStatus::Estimated;
            self.touch();
        }
    }

    pub fn mark_submitted(&mut self) {
        self.status = JobStatus::Submitted;
        self.error_message = None;
        self.touch();
    }

    pub fn complete(&mut self, result: LabeledResult) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error_message = None;
        self.touch();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error_message = Some(message.into());
        self.touch();
    }

    /// Download name for the labeled spreadsheet.
    pub fn export_file_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!("labeled_data_{}.xlsx", &id[..8])
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Category, Example, LabeledItem};

    fn inputs() -> RecordSet {
        RecordSet::Inputs(InputTextSet::new(vec!["Hello".into()]).unwrap())
    }

    #[test]
    fn test_missing_kinds_in_order() {
        let mut job = ClassificationJob::new("u1");
        assert_eq!(
            job.missing(),
            vec![RecordKind::Input, RecordKind::Category, RecordKind::Example]
        );

        job.set_records(inputs());
        assert_eq!(job.request().unwrap_err(), vec![RecordKind::Category, RecordKind::Example]);
    }

    #[test]
    fn test_lifecycle() {
        let mut job = ClassificationJob::new("u1");
        job.set_records(inputs());
        job.set_records(RecordSet::Categories(
            CategorySet::new(vec![Category::new("Greeting", "says hi")]).unwrap(),
        ));
        job.set_records(RecordSet::Examples(
            ExampleSet::new(vec![Example::new("Hi", "Greeting")]).unwrap(),
        ));
        assert!(job.request().is_ok());

        job.mark_estimated();
        assert_eq!(job.status, JobStatus::Estimated);

        job.mark_submitted();
        assert!(!job.is_editable());

        job.fail("timed out");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.is_editable());
        assert!(job.input_texts.is_some());

        job.mark_submitted();
        job.complete(LabeledResult::new(vec![LabeledItem::new("Hello", "Greeting")]));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_carry_over_is_new_draft() {
        let mut job = ClassificationJob::new("u1");
        job.set_records(inputs());
        job.mark_submitted();
        job.complete(LabeledResult::default());

        let next = job.carry_over();
        assert_ne!(next.id, job.id);
        assert_eq!(next.status, JobStatus::Draft);
        assert_eq!(next.input_texts, job.input_texts);
        assert!(next.result.is_none());
    }

    #[test]
    fn test_clear_records() {
        let mut job = ClassificationJob::new("u1");
        job.set_records(inputs());
        job.fail("boom");
        job.clear_records();
        assert_eq!(job.missing().len(), 3);
        assert_eq!(job.status, JobStatus::Draft);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_status_round_trip_and_file_name() {
        for status in [
            JobStatus::Draft,
            JobStatus::Estimated,
            JobStatus::Submitted,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }

        let job = ClassificationJob::new("u1");
        let name = job.export_file_name();
        assert!(name.starts_with("labeled_data_"));
        assert!(name.ends_with(".xlsx"));
        assert_eq!(name.len(), "labeled_data_".len() + 8 + ".xlsx".len());
    }
}
