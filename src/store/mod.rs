//! Row-store seam for report card aggregation.
//!
//! The aggregators only read through [`RowStore`]; generated documents are
//! written back through [`ReportCardSink`]. `SqliteStore` implements both for
//! the daemon, tests use the in-memory store.

mod sqlite;

#[cfg(test)]
pub mod memory;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grade::GradeBand;
use crate::report_card::ReportCardData;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store connection lock poisoned")]
    LockPoisoned,
    #[cfg(test)]
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: String,
    pub student_name: String,
    pub admission_no: Option<String>,
    pub class: Option<String>,
    pub section: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub contact: Option<String>,
    pub roll_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRow {
    pub id: String,
    pub exam_name: String,
    pub academic_year: Option<String>,
    pub start_date: Option<String>,
}

/// Branding fields, passed through to the document untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolRow {
    pub school_code: String,
    pub school_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
    pub principal_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub id: Option<String>,
    pub name: String,
    pub color: Option<String>,
}

impl SubjectRef {
    /// Grouping key: the subject id, or its name when the id is missing.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectMarkRow {
    pub exam_id: String,
    pub subject: SubjectRef,
    pub max_marks: Option<f64>,
    pub marks_obtained: Option<f64>,
    pub percentage: Option<f64>,
    pub grade: Option<String>,
    pub remarks: Option<String>,
}

/// Precomputed totals for one `(student, exam)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExamSummaryRow {
    pub total_marks: Option<f64>,
    pub total_max_marks: Option<f64>,
    pub percentage: Option<f64>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoScholasticRow {
    pub area: String,
    pub grade: Option<String>,
    pub remarks: Option<String>,
}

/// Reads the aggregators depend on. Implementations own filtering and ordering
/// as documented per method.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn student(
        &self,
        school_code: &str,
        student_id: &str,
    ) -> Result<Option<StudentRow>, StoreError>;

    async fn exam(&self, school_code: &str, exam_id: &str) -> Result<Option<ExamRow>, StoreError>;

    async fn school(&self, school_code: &str) -> Result<Option<SchoolRow>, StoreError>;

    /// Exams among `exam_ids`, ordered by start date ascending.
    async fn exams_by_ids(
        &self,
        school_code: &str,
        exam_ids: &[String],
    ) -> Result<Vec<ExamRow>, StoreError>;

    /// Mark rows for one exam, in creation order.
    async fn subject_marks(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<SubjectMarkRow>, StoreError>;

    /// Mark rows for several exams, ordered by `(exam_id, created_at)`.
    async fn subject_marks_for_exams(
        &self,
        school_code: &str,
        student_id: &str,
        exam_ids: &[String],
    ) -> Result<Vec<SubjectMarkRow>, StoreError>;

    async fn exam_summary(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Option<ExamSummaryRow>, StoreError>;

    /// Active bands for the school whose academic year is unset or equals
    /// `academic_year`, by `display_order` descending.
    async fn grade_scales(
        &self,
        school_code: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<GradeBand>, StoreError>;

    /// Status of every attendance mark dated within `[from, to]`.
    async fn attendance_statuses(
        &self,
        school_code: &str,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, StoreError>;

    async fn co_scholastic(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<CoScholasticRow>, StoreError>;
}

/// Persistence for generated documents, keyed by `(school, student, exam)`.
#[async_trait]
pub trait ReportCardSink: Send + Sync {
    async fn upsert_report_card(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
        exam_ids: &[String],
        data: &ReportCardData,
    ) -> Result<(), StoreError>;
}
