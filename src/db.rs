use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "pecheck.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            teacher_id TEXT,
            capacity INTEGER NOT NULL,
            cost REAL NOT NULL DEFAULT 0,
            min_attendance_for_grade INTEGER NOT NULL,
            max_attendance INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_teacher ON sections(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            location TEXT,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_section ON schedules(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            disenrolled_at TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            final_grade REAL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(student_id, section_id, semester_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_section_semester
         ON enrollments(section_id, semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            date TEXT NOT NULL,
            present INTEGER NOT NULL,
            notes TEXT,
            recorded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            UNIQUE(enrollment_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_enrollment ON attendance(enrollment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS normatives(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_normatives_section ON normatives(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS normative_results(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            normative_id TEXT NOT NULL,
            result TEXT NOT NULL,
            grade REAL NOT NULL,
            notes TEXT,
            recorded_by TEXT,
            recorded_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(normative_id) REFERENCES normatives(id),
            UNIQUE(enrollment_id, normative_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_normative_results_enrollment
         ON normative_results(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            amount REAL NOT NULL,
            paid INTEGER NOT NULL,
            notes TEXT,
            recorded_by TEXT,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_enrollment ON payments(enrollment_id)",
        [],
    )?;

    seed_admin(&conn)?;

    Ok(conn)
}

/// A fresh workspace gets a bootstrap moderator, mirroring the seeded admin
/// account of the hosted deployment; without one no session could ever be
/// opened to create real users.
fn seed_admin(conn: &Connection) -> anyhow::Result<()> {
    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if user_count == 0 {
        conn.execute(
            "INSERT INTO users(id, first_name, last_name, email, role, active, created_at)
             VALUES ('admin', 'Admin', 'Admin', 'admin@pecheck.local', 'moderator', 1,
                     datetime('now'))",
            [],
        )?;
    }
    Ok(())
}
