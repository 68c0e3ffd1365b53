//! Writes for the rows report cards are built from: schools, students, exams,
//! subjects, marks, stored summaries, grade scales, attendance and
//! co-scholastic grades.

use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::params::{non_negative_f64, optional_f64, optional_str, required_str, store};
use crate::ipc::types::{AppState, Request};
use crate::store::{SqliteStore, StoreError};

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn db_err(req: &Request, e: StoreError) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

fn id_or_new(req: &Request) -> String {
    optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn school_exists(
    store: &SqliteStore,
    req: &Request,
    school_code: &str,
) -> Result<(), serde_json::Value> {
    let found = store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM schools WHERE school_code = ?",
                [school_code],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .map_err(|e| db_err(req, e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(err(
            &req.id,
            "not_found",
            "school not found",
            Some(json!({ "schoolCode": school_code })),
        )),
    }
}

fn row_exists(
    store: &SqliteStore,
    req: &Request,
    table: &'static str,
    id: &str,
    school_code: &str,
) -> Result<(), serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? AND school_code = ?", table);
    let found = store
        .with_conn(|conn| {
            conn.query_row(&sql, (id, school_code), |r| r.get::<_, i64>(0))
                .optional()
                .map_err(StoreError::from)
        })
        .map_err(|e| db_err(req, e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(err(
            &req.id,
            "not_found",
            format!("{} row not found", table),
            Some(json!({ "id": id, "schoolCode": school_code })),
        )),
    }
}

fn handle_schools_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let school_name = required_str(req, "schoolName")?;
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO schools(school_code, school_name, address, phone, email, logo_url, principal_name)
                 VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(school_code) DO UPDATE SET
                    school_name = excluded.school_name,
                    address = excluded.address,
                    phone = excluded.phone,
                    email = excluded.email,
                    logo_url = excluded.logo_url,
                    principal_name = excluded.principal_name",
                (
                    &school_code,
                    &school_name,
                    optional_str(req, "address"),
                    optional_str(req, "phone"),
                    optional_str(req, "email"),
                    optional_str(req, "logoUrl"),
                    optional_str(req, "principalName"),
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "schoolCode": school_code })))
}

fn handle_students_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_name = required_str(req, "studentName")?;
    school_exists(store, req, &school_code)?;
    let id = id_or_new(req);
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO students(
                    id, school_code, student_name, admission_no, class, section,
                    father_name, mother_name, contact, roll_number
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    school_code = excluded.school_code,
                    student_name = excluded.student_name,
                    admission_no = excluded.admission_no,
                    class = excluded.class,
                    section = excluded.section,
                    father_name = excluded.father_name,
                    mother_name = excluded.mother_name,
                    contact = excluded.contact,
                    roll_number = excluded.roll_number",
                (
                    &id,
                    &school_code,
                    &student_name,
                    optional_str(req, "admissionNo"),
                    optional_str(req, "class"),
                    optional_str(req, "section"),
                    optional_str(req, "fatherName"),
                    optional_str(req, "motherName"),
                    optional_str(req, "contact"),
                    optional_str(req, "rollNumber"),
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "id": id })))
}

fn handle_exams_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let exam_name = required_str(req, "examName")?;
    let start_date = match optional_str(req, "startDate") {
        Some(d) => Some(parse_date(req, "startDate", &d)?.format("%Y-%m-%d").to_string()),
        None => None,
    };
    school_exists(store, req, &school_code)?;
    let id = id_or_new(req);
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO examinations(id, school_code, exam_name, academic_year, start_date)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    school_code = excluded.school_code,
                    exam_name = excluded.exam_name,
                    academic_year = excluded.academic_year,
                    start_date = excluded.start_date",
                (
                    &id,
                    &school_code,
                    &exam_name,
                    optional_str(req, "academicYear"),
                    start_date,
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "id": id })))
}

fn handle_subjects_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let name = required_str(req, "name")?;
    school_exists(store, req, &school_code)?;
    let id = id_or_new(req);
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO subjects(id, school_code, name, color)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    school_code = excluded.school_code,
                    name = excluded.name,
                    color = excluded.color",
                (&id, &school_code, &name, optional_str(req, "color")),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "id": id })))
}

fn handle_marks_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_id = required_str(req, "examId")?;
    let subject_id = optional_str(req, "subjectId");
    let max_marks = non_negative_f64(req, "maxMarks")?;
    let marks_obtained = non_negative_f64(req, "marksObtained")?;
    let percentage = non_negative_f64(req, "percentage")?;
    if let (Some(obtained), Some(max)) = (marks_obtained, max_marks) {
        if obtained > max {
            return Err(err(
                &req.id,
                "bad_params",
                "marksObtained must not exceed maxMarks",
                Some(json!({ "marksObtained": obtained, "maxMarks": max })),
            ));
        }
    }
    row_exists(store, req, "students", &student_id, &school_code)?;
    row_exists(store, req, "examinations", &exam_id, &school_code)?;

    let subject_name = match (optional_str(req, "subjectName"), subject_id.as_deref()) {
        (Some(name), _) => name,
        (None, Some(sid)) => {
            let name: Option<String> = store
                .with_conn(|conn| {
                    conn.query_row(
                        "SELECT name FROM subjects WHERE id = ? AND school_code = ?",
                        (sid, &school_code),
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(StoreError::from)
                })
                .map_err(|e| db_err(req, e))?;
            name.ok_or_else(|| {
                err(
                    &req.id,
                    "not_found",
                    "subject not found",
                    Some(json!({ "subjectId": sid })),
                )
            })?
        }
        (None, None) => {
            return Err(err(
                &req.id,
                "bad_params",
                "missing subjectId or subjectName",
                None,
            ))
        }
    };
    let subject_key = subject_id.clone().unwrap_or_else(|| subject_name.clone());
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO student_subject_marks(
                    id, school_code, student_id, exam_id, subject_id, subject_name, subject_key,
                    max_marks, marks_obtained, percentage, grade, remarks, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(school_code, student_id, exam_id, subject_key) DO UPDATE SET
                    subject_name = excluded.subject_name,
                    max_marks = excluded.max_marks,
                    marks_obtained = excluded.marks_obtained,
                    percentage = excluded.percentage,
                    grade = excluded.grade,
                    remarks = excluded.remarks",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    &school_code,
                    &student_id,
                    &exam_id,
                    &subject_id,
                    &subject_name,
                    &subject_key,
                    max_marks,
                    marks_obtained,
                    percentage,
                    optional_str(req, "grade"),
                    optional_str(req, "remarks"),
                    created_at,
                ],
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "subjectKey": subject_key })))
}

fn handle_exam_summary_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_id = required_str(req, "examId")?;
    let total_marks = optional_f64(req, "totalMarks")?;
    let total_max_marks = optional_f64(req, "totalMaxMarks")?;
    let percentage = optional_f64(req, "percentage")?;
    row_exists(store, req, "students", &student_id, &school_code)?;
    row_exists(store, req, "examinations", &exam_id, &school_code)?;
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO student_exam_summary(
                    school_code, student_id, exam_id, total_marks, total_max_marks, percentage, grade
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(school_code, student_id, exam_id) DO UPDATE SET
                    total_marks = excluded.total_marks,
                    total_max_marks = excluded.total_max_marks,
                    percentage = excluded.percentage,
                    grade = excluded.grade",
                (
                    &school_code,
                    &student_id,
                    &exam_id,
                    total_marks,
                    total_max_marks,
                    percentage,
                    optional_str(req, "grade"),
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({})))
}

fn handle_grade_scales_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let grade = required_str(req, "grade")?;
    let min_marks = optional_f64(req, "minMarks")?;
    let max_marks = optional_f64(req, "maxMarks")?;
    let min_percentage = optional_f64(req, "minPercentage")?;
    let max_percentage = optional_f64(req, "maxPercentage")?;
    let display_order = req
        .params
        .get("displayOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    school_exists(store, req, &school_code)?;
    let id = id_or_new(req);
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO grade_scales(
                    id, school_code, grade, min_marks, max_marks, min_percentage, max_percentage,
                    display_order, is_active, academic_year
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    school_code = excluded.school_code,
                    grade = excluded.grade,
                    min_marks = excluded.min_marks,
                    max_marks = excluded.max_marks,
                    min_percentage = excluded.min_percentage,
                    max_percentage = excluded.max_percentage,
                    display_order = excluded.display_order,
                    is_active = excluded.is_active,
                    academic_year = excluded.academic_year",
                rusqlite::params![
                    &id,
                    &school_code,
                    &grade,
                    min_marks,
                    max_marks,
                    min_percentage,
                    max_percentage,
                    display_order,
                    is_active,
                    optional_str(req, "academicYear"),
                ],
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({ "id": id })))
}

fn parse_date(req: &Request, key: &str, raw: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            Some(json!({ key: raw })),
        )
    })
}

fn handle_attendance_mark(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let date = required_str(req, "date")?;
    let date = parse_date(req, "date", &date)?;
    let status = required_str(req, "status")?.to_ascii_lowercase();
    row_exists(store, req, "students", &student_id, &school_code)?;
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO student_attendance(school_code, student_id, attendance_date, status)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(school_code, student_id, attendance_date) DO UPDATE SET
                    status = excluded.status",
                (
                    &school_code,
                    &student_id,
                    date.format("%Y-%m-%d").to_string(),
                    &status,
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(
        &req.id,
        json!({ "date": date.format("%Y-%m-%d").to_string(), "status": status }),
    ))
}

fn handle_co_scholastic_upsert(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_id = required_str(req, "examId")?;
    let area = required_str(req, "area")?;
    row_exists(store, req, "students", &student_id, &school_code)?;
    row_exists(store, req, "examinations", &exam_id, &school_code)?;
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO co_scholastic_grades(school_code, student_id, exam_id, area, grade, remarks)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(school_code, student_id, exam_id, area) DO UPDATE SET
                    grade = excluded.grade,
                    remarks = excluded.remarks",
                (
                    &school_code,
                    &student_id,
                    &exam_id,
                    &area,
                    optional_str(req, "grade"),
                    optional_str(req, "remarks"),
                ),
            )?;
            Ok(())
        })
        .map_err(|e| db_err(req, e))?;
    Ok(ok(&req.id, json!({})))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&SqliteStore, &Request) -> HandlerResult = match req.method.as_str() {
        "schools.upsert" => handle_schools_upsert,
        "students.upsert" => handle_students_upsert,
        "exams.upsert" => handle_exams_upsert,
        "subjects.upsert" => handle_subjects_upsert,
        "marks.upsert" => handle_marks_upsert,
        "examSummary.upsert" => handle_exam_summary_upsert,
        "gradeScales.upsert" => handle_grade_scales_upsert,
        "attendance.mark" => handle_attendance_mark,
        "coScholastic.upsert" => handle_co_scholastic_upsert,
        _ => return None,
    };
    let resp = match store(state, req) {
        Ok(s) => handler(s, req).unwrap_or_else(|e| e),
        Err(e) => e,
    };
    Some(resp)
}
