use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "reportcards.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            school_code TEXT PRIMARY KEY,
            school_name TEXT NOT NULL,
            address TEXT,
            phone TEXT,
            email TEXT,
            logo_url TEXT,
            principal_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            student_name TEXT NOT NULL,
            admission_no TEXT,
            class TEXT,
            section TEXT,
            father_name TEXT,
            mother_name TEXT,
            contact TEXT,
            roll_number TEXT,
            FOREIGN KEY(school_code) REFERENCES schools(school_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS examinations(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            exam_name TEXT NOT NULL,
            academic_year TEXT,
            start_date TEXT,
            FOREIGN KEY(school_code) REFERENCES schools(school_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_examinations_school ON examinations(school_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT,
            FOREIGN KEY(school_code) REFERENCES schools(school_code)
        )",
        [],
    )?;

    // subject_key is the subject id, or the bare subject name for rows that
    // were entered without one.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subject_marks(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            subject_id TEXT,
            subject_name TEXT NOT NULL,
            subject_key TEXT NOT NULL,
            max_marks REAL,
            marks_obtained REAL,
            percentage REAL,
            grade TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES examinations(id),
            UNIQUE(school_code, student_id, exam_id, subject_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student_exam
         ON student_subject_marks(student_id, exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_exam_summary(
            school_code TEXT NOT NULL,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            total_marks REAL,
            total_max_marks REAL,
            percentage REAL,
            grade TEXT,
            PRIMARY KEY(school_code, student_id, exam_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES examinations(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_scales(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            grade TEXT NOT NULL,
            min_marks REAL,
            max_marks REAL,
            min_percentage REAL,
            max_percentage REAL,
            display_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            academic_year TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_scales_school ON grade_scales(school_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            school_code TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attendance_date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(school_code, student_id, attendance_date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS co_scholastic_grades(
            school_code TEXT NOT NULL,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            area TEXT NOT NULL,
            grade TEXT,
            remarks TEXT,
            PRIMARY KEY(school_code, student_id, exam_id, area),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES examinations(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_cards(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            exam_ids TEXT NOT NULL,
            report_data TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            UNIQUE(school_code, student_id, exam_id)
        )",
        [],
    )?;

    Ok(conn)
}
