use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("scolard.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_periods(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            order_number INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            UNIQUE(academic_year_id, order_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_periods_year ON academic_periods(academic_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            order_number INTEGER NOT NULL,
            annual_fees REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            coefficient REAL NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS level_subjects(
            level_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            is_mandatory INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(level_id, subject_id),
            FOREIGN KEY(level_id) REFERENCES levels(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            qualification TEXT,
            hire_date TEXT,
            status TEXT NOT NULL DEFAULT 'Actif',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            level_id TEXT NOT NULL,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 40,
            teacher_id TEXT,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(level_id) REFERENCES levels(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_year ON classes(academic_year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_level ON classes(level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            classroom TEXT,
            notes TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_class ON schedules(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_teacher ON schedules(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT,
            date_of_birth TEXT,
            parent_email TEXT,
            parent_phone TEXT,
            address TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            enrollment_date TEXT NOT NULL,
            total_fees REAL NOT NULL,
            paid_amount REAL NOT NULL DEFAULT 0,
            outstanding_amount REAL NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'Partiel',
            status TEXT NOT NULL DEFAULT 'Actif',
            status_reason TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_year ON enrollments(academic_year_id)",
        [],
    )?;
    // One open enrollment per student per academic year. Closed rows
    // (Transféré/Terminé) stay behind as history and don't count.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_open_unique
         ON enrollments(student_id, academic_year_id)
         WHERE status IN ('Actif', 'Suspendu')",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            amount REAL NOT NULL,
            payment_method TEXT NOT NULL,
            payment_type TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            reference_number TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'Confirmé',
            created_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_enrollment ON payments(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_period_id TEXT NOT NULL,
            grade REAL NOT NULL,
            coefficient REAL NOT NULL DEFAULT 1,
            evaluation_type TEXT NOT NULL,
            evaluation_title TEXT,
            evaluation_date TEXT NOT NULL,
            teacher_comment TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(academic_period_id) REFERENCES academic_periods(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_student_period
         ON grade_entries(student_id, academic_period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_class_period
         ON grade_entries(class_id, academic_period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_subject ON grade_entries(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bulletins(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_period_id TEXT NOT NULL,
            general_average REAL NOT NULL,
            class_rank INTEGER NOT NULL,
            total_students INTEGER NOT NULL,
            conduct_grade TEXT,
            decision TEXT,
            teacher_comment TEXT,
            generated_at TEXT NOT NULL,
            sent_to_parents INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(academic_period_id) REFERENCES academic_periods(id),
            UNIQUE(student_id, academic_period_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bulletins_class_period
         ON bulletins(class_id, academic_period_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Existing workspaces may predate the optimistic-concurrency column.
    ensure_enrollments_version(&conn)?;
    ensure_payments_created_at(&conn)?;
    ensure_classes_teacher_id(&conn)?;

    Ok(conn)
}

fn ensure_enrollments_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "enrollments", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE enrollments ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_payments_created_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "created_at")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE payments ADD COLUMN created_at TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    // Backfill from the payment date so replay ordering stays stable.
    conn.execute(
        "UPDATE payments SET created_at = payment_date WHERE created_at = ''",
        [],
    )?;
    Ok(())
}

fn ensure_classes_teacher_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "teacher_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN teacher_id TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Grace period (days) before an unpaid balance turns `En retard`.
pub fn grace_days(conn: &Connection) -> i64 {
    settings_get_json(conn, "ledger.graceDays")
        .ok()
        .flatten()
        .and_then(|v| v.as_i64())
        .filter(|d| *d >= 0)
        .unwrap_or(30)
}

/// Upper bound of the grading scale (grades run 0..=scale_max).
pub fn grade_scale_max(conn: &Connection) -> f64 {
    settings_get_json(conn, "grades.scaleMax")
        .ok()
        .flatten()
        .and_then(|v| v.as_f64())
        .filter(|m| *m > 0.0)
        .unwrap_or(20.0)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
