//! Report card aggregation.
//!
//! Builds one [`ReportCardData`] per request from store reads. Independent
//! reads are joined; reads that need the exam's academic year wait for the
//! exam lookup. The document is either fully built or not returned at all.

use std::collections::HashMap;
use std::future::Future;

use chrono::{Datelike, NaiveDate};
use futures::join;
use indexmap::IndexMap;
use serde::Serialize;

use crate::grade::{
    bands_or_default, grade_or_resolved, pass_fail, percent_or_from_marks, resolve_grade,
    safe_percentage, GradeBand, PassFail, NO_GRADE,
};
use crate::store::{
    CoScholasticRow, ExamRow, ExamSummaryRow, RowStore, SchoolRow, StoreError, StudentRow,
    SubjectMarkRow, SubjectRef,
};

const DEFAULT_SECTION: &str = "A";
const PRESENT: &str = "present";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkEntry {
    pub subject: SubjectRef,
    pub max_marks: f64,
    pub marks_obtained: Option<f64>,
    pub percentage: Option<f64>,
    pub grade: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// One exam's result for a subject inside a multi-exam report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamMarkSlot {
    pub exam_id: String,
    pub exam_name: String,
    pub max_marks: f64,
    pub marks_obtained: Option<f64>,
    pub percentage: Option<f64>,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiExamSubject {
    pub subject: SubjectRef,
    pub exams: Vec<ExamMarkSlot>,
    pub overall_max_marks: f64,
    pub overall_marks_obtained: Option<f64>,
    pub overall_percentage: Option<f64>,
    pub overall_grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_marks: f64,
    pub total_max_marks: f64,
    pub percentage: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub present_days: u32,
    pub total_days: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportCardData {
    pub school: SchoolRow,
    pub student: StudentRow,
    pub exam: ExamRow,
    pub marks: Vec<MarkEntry>,
    #[serde(rename = "multiExamMarks", skip_serializing_if = "Option::is_none")]
    pub multi_exam_marks: Option<Vec<MultiExamSubject>>,
    #[serde(rename = "examsList", skip_serializing_if = "Option::is_none")]
    pub exams_list: Option<Vec<ExamRow>>,
    pub summary: Summary,
    pub attendance: Option<AttendanceSummary>,
    #[serde(rename = "coScholastic")]
    pub co_scholastic: Option<Vec<CoScholasticRow>>,
    #[serde(rename = "gradeScales")]
    pub grade_scales: Vec<GradeBand>,
    pub result: PassFail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
}

/// Awaits a best-effort read. Any failure becomes `fallback`.
pub async fn try_optional<T, F>(read: F, fallback: T) -> T
where
    F: Future<Output = Result<T, StoreError>>,
{
    match read.await {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "optional read failed, using fallback");
            fallback
        }
    }
}

/// April 1 to March 31 of the academic year that starts in `start_year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcademicYearWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl AcademicYearWindow {
    pub fn starting(start_year: i32) -> Self {
        // Apr 1 / Mar 31 exist in every year chrono can represent here.
        let from = NaiveDate::from_ymd_opt(start_year, 4, 1).unwrap_or_default();
        let to = NaiveDate::from_ymd_opt(start_year + 1, 3, 31).unwrap_or_default();
        Self { from, to }
    }

    /// Window for an academic year label such as `"2024-25"`. Labels without
    /// four leading digits use `fallback_year`.
    pub fn for_label(academic_year: Option<&str>, fallback_year: i32) -> Self {
        Self::starting(academic_year.and_then(leading_year).unwrap_or(fallback_year))
    }
}

fn leading_year(label: &str) -> Option<i32> {
    let head = label.trim().get(..4)?;
    if head.chars().all(|c| c.is_ascii_digit()) {
        head.parse().ok()
    } else {
        None
    }
}

fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// `None` when nothing was marked, so "no data" stays distinct from 0%.
pub fn summarize_attendance(statuses: &[String]) -> Option<AttendanceSummary> {
    if statuses.is_empty() {
        return None;
    }
    let present = statuses
        .iter()
        .filter(|s| s.trim().eq_ignore_ascii_case(PRESENT))
        .count();
    let total = statuses.len();
    Some(AttendanceSummary {
        present_days: present as u32,
        total_days: total as u32,
        percentage: safe_percentage(present as f64, total as f64),
    })
}

fn promoted_to(student: &StudentRow) -> Option<String> {
    let class = student.class.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
    let section = student
        .section
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SECTION);
    Some(format!("{class}-{section}"))
}

fn mark_entry(row: SubjectMarkRow, bands: &[GradeBand]) -> MarkEntry {
    let percentage = percent_or_from_marks(row.percentage, row.marks_obtained, row.max_marks);
    MarkEntry {
        grade: grade_or_resolved(row.grade.as_deref(), percentage, bands),
        subject: row.subject,
        max_marks: row.max_marks.unwrap_or(0.0),
        marks_obtained: row.marks_obtained,
        percentage,
        remarks: row.remarks,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    obtained: f64,
    max: f64,
}

impl Totals {
    fn of(marks: &[MarkEntry]) -> Self {
        marks.iter().fold(Self::default(), |acc, m| Self {
            obtained: acc.obtained + m.marks_obtained.unwrap_or(0.0),
            max: acc.max + m.max_marks,
        })
    }

    fn summary(self, bands: &[GradeBand]) -> Summary {
        let percentage = safe_percentage(self.obtained, self.max);
        Summary {
            total_marks: self.obtained,
            total_max_marks: self.max,
            percentage,
            grade: resolve_grade(percentage, bands),
        }
    }

    /// Stored summary values win; fields the row leaves empty are derived.
    fn summary_with(self, stored: ExamSummaryRow, bands: &[GradeBand]) -> Summary {
        let total_marks = stored.total_marks.unwrap_or(self.obtained);
        let total_max_marks = stored.total_max_marks.unwrap_or(self.max);
        let percentage = stored
            .percentage
            .unwrap_or_else(|| safe_percentage(total_marks, total_max_marks));
        Summary {
            total_marks,
            total_max_marks,
            percentage,
            grade: grade_or_resolved(stored.grade.as_deref(), Some(percentage), bands),
        }
    }
}

/// Report card for one student and one exam. `Ok(None)` when the student,
/// exam or school does not exist.
pub async fn fetch_report_card<S>(
    store: &S,
    school_code: &str,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<ReportCardData>, StoreError>
where
    S: RowStore + ?Sized,
{
    let (student, exam, school) = join!(
        store.student(school_code, student_id),
        store.exam(school_code, exam_id),
        store.school(school_code),
    );
    let (Some(student), Some(exam), Some(school)) = (student?, exam?, school?) else {
        return Ok(None);
    };

    let academic_year = exam.academic_year.as_deref();
    let (marks, stored_summary, bands) = join!(
        store.subject_marks(school_code, student_id, exam_id),
        store.exam_summary(school_code, student_id, exam_id),
        store.grade_scales(school_code, academic_year),
    );
    let bands = bands_or_default(bands?);
    let marks: Vec<MarkEntry> = marks?
        .into_iter()
        .map(|row| mark_entry(row, &bands))
        .collect();
    let totals = Totals::of(&marks);
    let summary = match stored_summary? {
        Some(stored) => totals.summary_with(stored, &bands),
        None => totals.summary(&bands),
    };

    let window = AcademicYearWindow::for_label(academic_year, current_year());
    let (attendance, co_scholastic) = join!(
        try_optional(
            async {
                let statuses = store
                    .attendance_statuses(school_code, student_id, window.from, window.to)
                    .await?;
                Ok::<_, StoreError>(summarize_attendance(&statuses))
            },
            None,
        ),
        try_optional(
            async {
                let rows = store.co_scholastic(school_code, student_id, exam_id).await?;
                Ok::<_, StoreError>((!rows.is_empty()).then_some(rows))
            },
            None,
        ),
    );

    Ok(Some(ReportCardData {
        result: pass_fail(summary.percentage),
        promoted_to: promoted_to(&student),
        school,
        student,
        exam,
        marks,
        multi_exam_marks: None,
        exams_list: None,
        summary,
        attendance,
        co_scholastic,
        grade_scales: bands,
    }))
}

struct SubjectAccumulator {
    subject: SubjectRef,
    per_exam: HashMap<String, ExamMarkSlot>,
    overall_max: f64,
    overall_obtained: Option<f64>,
}

/// Groups mark rows by subject in first-seen order. A null mark adds nothing
/// to the obtained total, so a subject with no marks keeps `None`.
fn group_by_subject(
    rows: Vec<SubjectMarkRow>,
    exam_names: &HashMap<&str, &str>,
    bands: &[GradeBand],
) -> IndexMap<String, SubjectAccumulator> {
    let mut subjects: IndexMap<String, SubjectAccumulator> = IndexMap::new();
    for row in rows {
        let acc = subjects
            .entry(row.subject.key().to_string())
            .or_insert_with(|| SubjectAccumulator {
                subject: row.subject.clone(),
                per_exam: HashMap::new(),
                overall_max: 0.0,
                overall_obtained: None,
            });

        let max_marks = row.max_marks.unwrap_or(0.0);
        acc.overall_max += max_marks;
        if let Some(obtained) = row.marks_obtained {
            acc.overall_obtained = Some(acc.overall_obtained.unwrap_or(0.0) + obtained);
        }

        let percentage = percent_or_from_marks(row.percentage, row.marks_obtained, row.max_marks);
        let exam_name = exam_names
            .get(row.exam_id.as_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| row.exam_id.clone());
        acc.per_exam.insert(
            row.exam_id.clone(),
            ExamMarkSlot {
                grade: grade_or_resolved(row.grade.as_deref(), percentage, bands),
                exam_id: row.exam_id,
                exam_name,
                max_marks,
                marks_obtained: row.marks_obtained,
                percentage,
            },
        );
    }
    subjects
}

/// One slot per requested exam id, in request order, with placeholders for
/// exams the subject has no row in.
fn project_subjects(
    subjects: IndexMap<String, SubjectAccumulator>,
    exam_ids: &[String],
    exam_names: &HashMap<&str, &str>,
    bands: &[GradeBand],
) -> Vec<MultiExamSubject> {
    subjects
        .into_values()
        .map(|acc| {
            let exams = exam_ids
                .iter()
                .map(|exam_id| {
                    acc.per_exam
                        .get(exam_id)
                        .cloned()
                        .unwrap_or_else(|| ExamMarkSlot {
                            exam_id: exam_id.clone(),
                            exam_name: exam_names
                                .get(exam_id.as_str())
                                .map(|n| n.to_string())
                                .unwrap_or_else(|| exam_id.clone()),
                            max_marks: 0.0,
                            marks_obtained: None,
                            percentage: None,
                            grade: NO_GRADE.to_string(),
                        })
                })
                .collect();
            let overall_percentage = acc
                .overall_obtained
                .map(|obtained| safe_percentage(obtained, acc.overall_max));
            MultiExamSubject {
                overall_grade: overall_percentage
                    .map(|p| resolve_grade(p, bands))
                    .unwrap_or_else(|| NO_GRADE.to_string()),
                subject: acc.subject,
                exams,
                overall_max_marks: acc.overall_max,
                overall_marks_obtained: acc.overall_obtained,
                overall_percentage,
            }
        })
        .collect()
}

fn flatten_overall(subjects: &[MultiExamSubject]) -> Vec<MarkEntry> {
    subjects
        .iter()
        .map(|s| MarkEntry {
            subject: s.subject.clone(),
            max_marks: s.overall_max_marks,
            marks_obtained: s.overall_marks_obtained,
            percentage: s.overall_percentage,
            grade: s.overall_grade.clone(),
            remarks: None,
        })
        .collect()
}

/// Combined report card across several exams. A single id is the same as
/// [`fetch_report_card`]; an empty list is `Ok(None)`.
pub async fn fetch_report_card_multi_exam<S>(
    store: &S,
    school_code: &str,
    student_id: &str,
    exam_ids: &[String],
) -> Result<Option<ReportCardData>, StoreError>
where
    S: RowStore + ?Sized,
{
    match exam_ids {
        [] => return Ok(None),
        [only] => return fetch_report_card(store, school_code, student_id, only).await,
        _ => {}
    }

    let (student, school, exams) = join!(
        store.student(school_code, student_id),
        store.school(school_code),
        store.exams_by_ids(school_code, exam_ids),
    );
    let (Some(student), Some(school)) = (student?, school?) else {
        return Ok(None);
    };
    // Start-date order: the first exam sets the academic year and leads the
    // combined name.
    let exams = exams?;
    let Some(first) = exams.first() else {
        return Ok(None);
    };
    let academic_year = first.academic_year.clone();
    let combined = ExamRow {
        id: exam_ids.join(","),
        exam_name: exams
            .iter()
            .map(|e| e.exam_name.as_str())
            .collect::<Vec<_>>()
            .join(" + "),
        academic_year: academic_year.clone(),
        start_date: first.start_date.clone(),
    };

    let (rows, bands) = join!(
        store.subject_marks_for_exams(school_code, student_id, exam_ids),
        store.grade_scales(school_code, academic_year.as_deref()),
    );
    let bands = bands_or_default(bands?);
    let exam_names: HashMap<&str, &str> = exams
        .iter()
        .map(|e| (e.id.as_str(), e.exam_name.as_str()))
        .collect();
    let grouped = group_by_subject(rows?, &exam_names, &bands);
    let multi_exam_marks = project_subjects(grouped, exam_ids, &exam_names, &bands);
    let marks = flatten_overall(&multi_exam_marks);
    let summary = Totals::of(&marks).summary(&bands);

    let window = AcademicYearWindow::for_label(academic_year.as_deref(), current_year());
    let attendance = try_optional(
        async {
            let statuses = store
                .attendance_statuses(school_code, student_id, window.from, window.to)
                .await?;
            Ok::<_, StoreError>(summarize_attendance(&statuses))
        },
        None,
    )
    .await;

    Ok(Some(ReportCardData {
        result: pass_fail(summary.percentage),
        promoted_to: promoted_to(&student),
        school,
        student,
        exam: combined,
        marks,
        multi_exam_marks: Some(multi_exam_marks),
        exams_list: Some(exams),
        summary,
        attendance,
        // Not computed for combined reports.
        co_scholastic: None,
        grade_scales: bands,
    }))
}
