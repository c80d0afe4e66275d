//! Record sets produced by spreadsheet ingest and consumed by the pipeline.
//!
//! The wire names (`categoryDescription`, `exampleInputText`, ...) are the
//! ones used by the classification service envelope and by the job store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which of the three uploads a spreadsheet represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Input,
    Category,
    Example,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [Self::Input, Self::Category, Self::Example];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Category => "category",
            Self::Example => "example",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "inputs" => Ok(Self::Input),
            "category" | "categories" => Ok(Self::Category),
            "example" | "examples" => Ok(Self::Example),
            other => Err(format!(
                "Unknown file kind '{}' (expected input, category or example)",
                other
            )),
        }
    }
}

/// Error returned when a record set would be constructed empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("record set must contain at least one entry")]
pub struct EmptyRecordSet;

/// Ordered texts to classify. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct InputTextSet(Vec<String>);

impl InputTextSet {
    pub fn new(texts: Vec<String>) -> Result<Self, EmptyRecordSet> {
        if texts.is_empty() {
            return Err(EmptyRecordSet);
        }
        Ok(Self(texts))
    }

    pub fn texts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for InputTextSet {
    type Error = EmptyRecordSet;

    fn try_from(texts: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(texts)
    }
}

impl From<InputTextSet> for Vec<String> {
    fn from(set: InputTextSet) -> Self {
        set.0
    }
}

/// A category name and the description the model uses to recognise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category: String,
    #[serde(rename = "categoryDescription")]
    pub description: String,
}

impl Category {
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
        }
    }
}

/// Categories available to the classifier. Never empty.
///
/// Category names are expected to be unique but duplicates are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Category>", into = "Vec<Category>")]
pub struct CategorySet(Vec<Category>);

impl CategorySet {
    pub fn new(entries: Vec<Category>) -> Result<Self, EmptyRecordSet> {
        if entries.is_empty() {
            return Err(EmptyRecordSet);
        }
        Ok(Self(entries))
    }

    pub fn entries(&self) -> &[Category] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.0.iter().any(|c| c.category == category)
    }
}

impl TryFrom<Vec<Category>> for CategorySet {
    type Error = EmptyRecordSet;

    fn try_from(entries: Vec<Category>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<CategorySet> for Vec<Category> {
    fn from(set: CategorySet) -> Self {
        set.0
    }
}

/// A labeled example: a text and the category the user expects for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    #[serde(rename = "exampleInputText")]
    pub text: String,
    #[serde(rename = "desiredCategory")]
    pub desired_category: String,
}

impl Example {
    pub fn new(text: impl Into<String>, desired_category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            desired_category: desired_category.into(),
        }
    }
}

/// Few-shot examples sent along with the categories. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Example>", into = "Vec<Example>")]
pub struct ExampleSet(Vec<Example>);

impl ExampleSet {
    pub fn new(entries: Vec<Example>) -> Result<Self, EmptyRecordSet> {
        if entries.is_empty() {
            return Err(EmptyRecordSet);
        }
        Ok(Self(entries))
    }

    pub fn entries(&self) -> &[Example] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<Example>> for ExampleSet {
    type Error = EmptyRecordSet;

    fn try_from(entries: Vec<Example>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<ExampleSet> for Vec<Example> {
    fn from(set: ExampleSet) -> Self {
        set.0
    }
}

/// One validated record set, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSet {
    Inputs(InputTextSet),
    Categories(CategorySet),
    Examples(ExampleSet),
}

impl RecordSet {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Inputs(_) => RecordKind::Input,
            Self::Categories(_) => RecordKind::Category,
            Self::Examples(_) => RecordKind::Example,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Inputs(set) => set.len(),
            Self::Categories(set) => set.len(),
            Self::Examples(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single classified text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledItem {
    pub text: String,
    pub category: String,
}

impl LabeledItem {
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
        }
    }
}

/// Classification output, aligned one-to-one with the job's input texts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabeledResult(Vec<LabeledItem>);

impl LabeledResult {
    pub fn new(items: Vec<LabeledItem>) -> Self {
        Self(items)
    }

    pub fn items(&self) -> &[LabeledItem] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First `limit` rows, for result previews.
    pub fn preview(&self, limit: usize) -> &[LabeledItem] {
        &self.0[..self.0.len().min(limit)]
    }
}
