//! In-memory row store for unit tests. Insertion order stands in for
//! `created_at`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    CoScholasticRow, ExamRow, ExamSummaryRow, ReportCardSink, RowStore, SchoolRow, StoreError,
    StudentRow, SubjectMarkRow, SubjectRef,
};
use crate::grade::GradeBand;
use crate::report_card::ReportCardData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Student(String),
    Attendance,
    CoScholastic,
    Sink(String),
}

/// One step in the life of a read: entered, then finished after yielding once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    Start(&'static str),
    End(&'static str),
}

/// Pending on the first poll, so a concurrent sibling gets polled before
/// this read finishes.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub struct ScaleRow {
    band: GradeBand,
    display_order: i64,
    is_active: bool,
    academic_year: Option<String>,
}

impl ScaleRow {
    pub fn new(grade: &str, min: f64, max: f64, display_order: i64, year: Option<&str>) -> Self {
        Self {
            band: GradeBand::percent(grade, min, max),
            display_order,
            is_active: true,
            academic_year: year.map(str::to_string),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

pub fn student(id: &str, name: &str, class: Option<&str>, section: Option<&str>) -> StudentRow {
    StudentRow {
        id: id.to_string(),
        student_name: name.to_string(),
        admission_no: Some(format!("ADM-{id}")),
        class: class.map(str::to_string),
        section: section.map(str::to_string),
        father_name: None,
        mother_name: None,
        contact: None,
        roll_number: None,
    }
}

pub fn exam(id: &str, name: &str, year: Option<&str>, start: Option<&str>) -> ExamRow {
    ExamRow {
        id: id.to_string(),
        exam_name: name.to_string(),
        academic_year: year.map(str::to_string),
        start_date: start.map(str::to_string),
    }
}

pub fn mark(
    exam_id: &str,
    subject_id: Option<&str>,
    subject: &str,
    obtained: Option<f64>,
    max: Option<f64>,
) -> SubjectMarkRow {
    SubjectMarkRow {
        exam_id: exam_id.to_string(),
        subject: SubjectRef {
            id: subject_id.map(str::to_string),
            name: subject.to_string(),
            color: None,
        },
        max_marks: max,
        marks_obtained: obtained,
        percentage: None,
        grade: None,
        remarks: None,
    }
}

pub struct MemoryStore {
    school: SchoolRow,
    students: Vec<StudentRow>,
    exams: Vec<ExamRow>,
    marks: Vec<(String, SubjectMarkRow)>,
    summaries: Vec<(String, String, ExamSummaryRow)>,
    scales: Vec<ScaleRow>,
    attendance: Vec<(String, NaiveDate, String)>,
    co_scholastic: Vec<(String, String, CoScholasticRow)>,
    failures: Vec<Failure>,
    events: Mutex<Vec<ReadEvent>>,
    pub saved: Mutex<Vec<(String, String, Vec<String>, ReportCardData)>>,
}

impl MemoryStore {
    pub fn new(school_code: &str) -> Self {
        Self {
            school: SchoolRow {
                school_code: school_code.to_string(),
                school_name: "Green Valley Public School".to_string(),
                address: Some("12 Lake Road".to_string()),
                phone: None,
                email: None,
                logo_url: None,
                principal_name: Some("R. Menon".to_string()),
            },
            students: Vec::new(),
            exams: Vec::new(),
            marks: Vec::new(),
            summaries: Vec::new(),
            scales: Vec::new(),
            attendance: Vec::new(),
            co_scholastic: Vec::new(),
            failures: Vec::new(),
            events: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn with_student(mut self, row: StudentRow) -> Self {
        self.students.push(row);
        self
    }

    pub fn with_exam(mut self, row: ExamRow) -> Self {
        self.exams.push(row);
        self
    }

    pub fn with_mark(mut self, student_id: &str, row: SubjectMarkRow) -> Self {
        self.marks.push((student_id.to_string(), row));
        self
    }

    pub fn with_summary(mut self, student_id: &str, exam_id: &str, row: ExamSummaryRow) -> Self {
        self.summaries
            .push((student_id.to_string(), exam_id.to_string(), row));
        self
    }

    pub fn with_band(mut self, row: ScaleRow) -> Self {
        self.scales.push(row);
        self
    }

    pub fn with_attendance(mut self, student_id: &str, date: &str, status: &str) -> Self {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("attendance date");
        self.attendance
            .push((student_id.to_string(), date, status.to_string()));
        self
    }

    pub fn with_co_scholastic(
        mut self,
        student_id: &str,
        exam_id: &str,
        area: &str,
        grade: Option<&str>,
    ) -> Self {
        self.co_scholastic.push((
            student_id.to_string(),
            exam_id.to_string(),
            CoScholasticRow {
                area: area.to_string(),
                grade: grade.map(str::to_string),
                remarks: None,
            },
        ));
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    /// Read names in the order they were entered.
    pub fn reads(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ReadEvent::Start(name) => Some(name),
                ReadEvent::End(_) => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ReadEvent> {
        self.events.lock().expect("events lock").clone()
    }

    async fn record(&self, name: &'static str) {
        self.events.lock().expect("events lock").push(ReadEvent::Start(name));
        YieldOnce(false).await;
        self.events.lock().expect("events lock").push(ReadEvent::End(name));
    }

    fn school_matches(&self, school_code: &str) -> bool {
        self.school.school_code == school_code
    }

    fn fails(&self, failure: &Failure) -> bool {
        self.failures.contains(failure)
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn student(
        &self,
        school_code: &str,
        student_id: &str,
    ) -> Result<Option<StudentRow>, StoreError> {
        self.record("student").await;
        if self.fails(&Failure::Student(student_id.to_string())) {
            return Err(StoreError::Unavailable(format!("student {student_id}")));
        }
        if !self.school_matches(school_code) {
            return Ok(None);
        }
        Ok(self.students.iter().find(|s| s.id == student_id).cloned())
    }

    async fn exam(&self, school_code: &str, exam_id: &str) -> Result<Option<ExamRow>, StoreError> {
        self.record("exam").await;
        if !self.school_matches(school_code) {
            return Ok(None);
        }
        Ok(self.exams.iter().find(|e| e.id == exam_id).cloned())
    }

    async fn school(&self, school_code: &str) -> Result<Option<SchoolRow>, StoreError> {
        self.record("school").await;
        Ok(self
            .school_matches(school_code)
            .then(|| self.school.clone()))
    }

    async fn exams_by_ids(
        &self,
        school_code: &str,
        exam_ids: &[String],
    ) -> Result<Vec<ExamRow>, StoreError> {
        self.record("exams_by_ids").await;
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        let mut rows: Vec<ExamRow> = self
            .exams
            .iter()
            .filter(|e| exam_ids.contains(&e.id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.start_date.is_none(), &a.start_date).cmp(&(b.start_date.is_none(), &b.start_date))
        });
        Ok(rows)
    }

    async fn subject_marks(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<SubjectMarkRow>, StoreError> {
        self.record("subject_marks").await;
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        Ok(self
            .marks
            .iter()
            .filter(|(sid, m)| sid == student_id && m.exam_id == exam_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn subject_marks_for_exams(
        &self,
        school_code: &str,
        student_id: &str,
        exam_ids: &[String],
    ) -> Result<Vec<SubjectMarkRow>, StoreError> {
        self.record("subject_marks_for_exams").await;
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        let mut rows: Vec<SubjectMarkRow> = self
            .marks
            .iter()
            .filter(|(sid, m)| sid == student_id && exam_ids.contains(&m.exam_id))
            .map(|(_, m)| m.clone())
            .collect();
        // Stable: insertion order is kept within an exam.
        rows.sort_by(|a, b| a.exam_id.cmp(&b.exam_id));
        Ok(rows)
    }

    async fn exam_summary(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Option<ExamSummaryRow>, StoreError> {
        self.record("exam_summary").await;
        if !self.school_matches(school_code) {
            return Ok(None);
        }
        Ok(self
            .summaries
            .iter()
            .find(|(sid, eid, _)| sid == student_id && eid == exam_id)
            .map(|(_, _, row)| row.clone()))
    }

    async fn grade_scales(
        &self,
        school_code: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<GradeBand>, StoreError> {
        self.record("grade_scales").await;
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        let mut rows: Vec<&ScaleRow> = self
            .scales
            .iter()
            .filter(|s| s.is_active)
            .filter(|s| match s.academic_year.as_deref() {
                None => true,
                Some(y) => Some(y) == academic_year,
            })
            .collect();
        rows.sort_by(|a, b| b.display_order.cmp(&a.display_order));
        Ok(rows.into_iter().map(|s| s.band.clone()).collect())
    }

    async fn attendance_statuses(
        &self,
        school_code: &str,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        self.record("attendance_statuses").await;
        if self.fails(&Failure::Attendance) {
            return Err(StoreError::Unavailable("attendance".into()));
        }
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        Ok(self
            .attendance
            .iter()
            .filter(|(sid, date, _)| sid == student_id && *date >= from && *date <= to)
            .map(|(_, _, status)| status.clone())
            .collect())
    }

    async fn co_scholastic(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<CoScholasticRow>, StoreError> {
        self.record("co_scholastic").await;
        if self.fails(&Failure::CoScholastic) {
            return Err(StoreError::Unavailable("co_scholastic".into()));
        }
        if !self.school_matches(school_code) {
            return Ok(Vec::new());
        }
        Ok(self
            .co_scholastic
            .iter()
            .filter(|(sid, eid, _)| sid == student_id && eid == exam_id)
            .map(|(_, _, row)| row.clone())
            .collect())
    }
}

#[async_trait]
impl ReportCardSink for MemoryStore {
    async fn upsert_report_card(
        &self,
        _school_code: &str,
        student_id: &str,
        exam_id: &str,
        exam_ids: &[String],
        data: &ReportCardData,
    ) -> Result<(), StoreError> {
        if self.fails(&Failure::Sink(student_id.to_string())) {
            return Err(StoreError::Unavailable(format!("sink {student_id}")));
        }
        let mut saved = self.saved.lock().map_err(|_| StoreError::LockPoisoned)?;
        saved.retain(|(sid, eid, _, _)| !(sid == student_id && eid == exam_id));
        saved.push((
            student_id.to_string(),
            exam_id.to_string(),
            exam_ids.to_vec(),
            data.clone(),
        ));
        Ok(())
    }
}
