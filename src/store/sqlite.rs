use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::json;

use super::{
    CoScholasticRow, ExamRow, ExamSummaryRow, ReportCardSink, RowStore, SchoolRow, StoreError,
    StudentRow, SubjectMarkRow, SubjectRef,
};
use crate::grade::GradeBand;
use crate::report_card::ReportCardData;

const MARK_COLUMNS: &str = "m.exam_id, m.subject_id, COALESCE(s.name, m.subject_name), s.color,
     m.max_marks, m.marks_obtained, m.percentage, m.grade, m.remarks";

/// Workspace database as a row store. Reads run synchronously under the lock,
/// so a fan-out of reads against one workspace completes in issue order.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Persisted document for one key, with its generation metadata.
    pub fn report_card(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT exam_ids, report_data, generated_at
                     FROM report_cards
                     WHERE school_code = ? AND student_id = ? AND exam_id = ?",
                    (school_code, student_id, exam_id),
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((exam_ids, report_data, generated_at)) = row else {
                return Ok(None);
            };
            let exam_ids: serde_json::Value = serde_json::from_str(&exam_ids)?;
            let report_data: serde_json::Value = serde_json::from_str(&report_data)?;
            Ok(Some(json!({
                "examIds": exam_ids,
                "generatedAt": generated_at,
                "reportData": report_data,
            })))
        })
    }
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

fn exam_from_row(r: &Row<'_>) -> rusqlite::Result<ExamRow> {
    Ok(ExamRow {
        id: r.get(0)?,
        exam_name: r.get(1)?,
        academic_year: r.get(2)?,
        start_date: r.get(3)?,
    })
}

fn mark_from_row(r: &Row<'_>) -> rusqlite::Result<SubjectMarkRow> {
    Ok(SubjectMarkRow {
        exam_id: r.get(0)?,
        subject: SubjectRef {
            id: r.get(1)?,
            name: r.get(2)?,
            color: r.get(3)?,
        },
        max_marks: r.get(4)?,
        marks_obtained: r.get(5)?,
        percentage: r.get(6)?,
        grade: r.get(7)?,
        remarks: r.get(8)?,
    })
}

#[async_trait]
impl RowStore for SqliteStore {
    async fn student(
        &self,
        school_code: &str,
        student_id: &str,
    ) -> Result<Option<StudentRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, student_name, admission_no, class, section,
                        father_name, mother_name, contact, roll_number
                 FROM students
                 WHERE id = ? AND school_code = ?",
                (student_id, school_code),
                |r| {
                    Ok(StudentRow {
                        id: r.get(0)?,
                        student_name: r.get(1)?,
                        admission_no: r.get(2)?,
                        class: r.get(3)?,
                        section: r.get(4)?,
                        father_name: r.get(5)?,
                        mother_name: r.get(6)?,
                        contact: r.get(7)?,
                        roll_number: r.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    async fn exam(&self, school_code: &str, exam_id: &str) -> Result<Option<ExamRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, exam_name, academic_year, start_date
                 FROM examinations
                 WHERE id = ? AND school_code = ?",
                (exam_id, school_code),
                exam_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    async fn school(&self, school_code: &str) -> Result<Option<SchoolRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT school_code, school_name, address, phone, email, logo_url, principal_name
                 FROM schools
                 WHERE school_code = ?",
                [school_code],
                |r| {
                    Ok(SchoolRow {
                        school_code: r.get(0)?,
                        school_name: r.get(1)?,
                        address: r.get(2)?,
                        phone: r.get(3)?,
                        email: r.get(4)?,
                        logo_url: r.get(5)?,
                        principal_name: r.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    async fn exams_by_ids(
        &self,
        school_code: &str,
        exam_ids: &[String],
    ) -> Result<Vec<ExamRow>, StoreError> {
        if exam_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            // NULL start dates sort last, as Postgres does for ASC.
            let sql = format!(
                "SELECT id, exam_name, academic_year, start_date
                 FROM examinations
                 WHERE school_code = ? AND id IN ({})
                 ORDER BY start_date IS NULL, start_date ASC, rowid",
                placeholders(exam_ids.len())
            );
            let mut bind: Vec<Value> = vec![Value::Text(school_code.to_string())];
            bind.extend(exam_ids.iter().map(|id| Value::Text(id.clone())));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bind), exam_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn subject_marks(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<SubjectMarkRow>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}
                 FROM student_subject_marks m
                 LEFT JOIN subjects s ON s.id = m.subject_id
                 WHERE m.school_code = ? AND m.student_id = ? AND m.exam_id = ?
                 ORDER BY m.created_at ASC, m.rowid",
                MARK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((school_code, student_id, exam_id), mark_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn subject_marks_for_exams(
        &self,
        school_code: &str,
        student_id: &str,
        exam_ids: &[String],
    ) -> Result<Vec<SubjectMarkRow>, StoreError> {
        if exam_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}
                 FROM student_subject_marks m
                 LEFT JOIN subjects s ON s.id = m.subject_id
                 WHERE m.school_code = ? AND m.student_id = ? AND m.exam_id IN ({})
                 ORDER BY m.exam_id ASC, m.created_at ASC, m.rowid",
                MARK_COLUMNS,
                placeholders(exam_ids.len())
            );
            let mut bind: Vec<Value> = vec![
                Value::Text(school_code.to_string()),
                Value::Text(student_id.to_string()),
            ];
            bind.extend(exam_ids.iter().map(|id| Value::Text(id.clone())));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bind), mark_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn exam_summary(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Option<ExamSummaryRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT total_marks, total_max_marks, percentage, grade
                 FROM student_exam_summary
                 WHERE school_code = ? AND student_id = ? AND exam_id = ?",
                (school_code, student_id, exam_id),
                |r| {
                    Ok(ExamSummaryRow {
                        total_marks: r.get(0)?,
                        total_max_marks: r.get(1)?,
                        percentage: r.get(2)?,
                        grade: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    async fn grade_scales(
        &self,
        school_code: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<GradeBand>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT grade, min_marks, max_marks, min_percentage, max_percentage
                 FROM grade_scales
                 WHERE school_code = ?
                   AND is_active = 1
                   AND (academic_year IS NULL OR academic_year = ?)
                 ORDER BY display_order DESC, rowid",
            )?;
            let rows = stmt
                .query_map((school_code, academic_year), |r| {
                    Ok(GradeBand {
                        grade: r.get(0)?,
                        min_marks: r.get(1)?,
                        max_marks: r.get(2)?,
                        min_percentage: r.get(3)?,
                        max_percentage: r.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn attendance_statuses(
        &self,
        school_code: &str,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status
                 FROM student_attendance
                 WHERE school_code = ? AND student_id = ?
                   AND attendance_date >= ? AND attendance_date <= ?
                 ORDER BY attendance_date",
            )?;
            let rows = stmt
                .query_map(
                    (
                        school_code,
                        student_id,
                        from.format("%Y-%m-%d").to_string(),
                        to.format("%Y-%m-%d").to_string(),
                    ),
                    |r| r.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn co_scholastic(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
    ) -> Result<Vec<CoScholasticRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT area, grade, remarks
                 FROM co_scholastic_grades
                 WHERE school_code = ? AND student_id = ? AND exam_id = ?
                 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map((school_code, student_id, exam_id), |r| {
                    Ok(CoScholasticRow {
                        area: r.get(0)?,
                        grade: r.get(1)?,
                        remarks: r.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl ReportCardSink for SqliteStore {
    async fn upsert_report_card(
        &self,
        school_code: &str,
        student_id: &str,
        exam_id: &str,
        exam_ids: &[String],
        data: &ReportCardData,
    ) -> Result<(), StoreError> {
        let report_data = serde_json::to_string(data)?;
        let exam_ids = serde_json::to_string(exam_ids)?;
        let generated_at = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO report_cards(
                    id, school_code, student_id, exam_id, exam_ids, report_data, generated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(school_code, student_id, exam_id) DO UPDATE SET
                    exam_ids = excluded.exam_ids,
                    report_data = excluded.report_data,
                    generated_at = excluded.generated_at",
                (
                    uuid::Uuid::new_v4().to_string(),
                    school_code,
                    student_id,
                    exam_id,
                    exam_ids,
                    report_data,
                    generated_at,
                ),
            )?;
            Ok(())
        })
    }
}
