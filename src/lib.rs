//! # text-labeler
//!
//! A usage-metered text classification service.
//!
//! Users upload three spreadsheets (texts to label, categories with
//! descriptions, labeled examples), see a cost estimate, and submit the job.
//! A language model assigns one category per text; the result can be
//! downloaded as a spreadsheet and the tokens spent are debited from a
//! prepaid balance.
//!
//! ## Pipeline
//!
//! ```text
//!   xlsx uploads ──▶ ingest ──▶ ClassificationJob (store)
//!                                   │
//!                          estimate │ submit
//!                                   ▼
//!            ┌────────────── ClassificationService ──────────────┐
//!            │  build_prompt ─▶ ClassificationInvoker ─▶ parser  │
//!            └───────────────────────┬───────────────────────────┘
//!                                    ▼
//!                     validate_mapping ─▶ ledger (debit + record)
//!                                    │
//!                                    ▼
//!                            xlsx export
//! ```
//!
//! ## Modules
//! - `records`: Typed record sets and labeled results
//! - `ingest`: Spreadsheet parsing and header validation
//! - `budget`: Token estimation and pricing
//! - `classify`: Prompt, model invocation, response parsing
//! - `llm`: OpenAI-compatible chat client
//! - `job`: Job lifecycle
//! - `ledger`: Usage records and totals
//! - `store`: SQLite persistence
//! - `labeler`: The service tying it together
//! - `api`: HTTP endpoints

pub mod api;
pub mod budget;
pub mod classify;
pub mod config;
pub mod ingest;
pub mod job;
pub mod labeler;
pub mod ledger;
pub mod llm;
pub mod records;
pub mod store;

pub use config::Config;
pub use labeler::Labeler;
