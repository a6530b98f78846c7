use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

pub fn now_utc() -> String {
    Utc::now().to_rfc3339()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(owner_id) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_owner ON classes(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_moderators(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(class_id, user_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(user_id) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_moderators_class ON class_moderators(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_moderators_user ON class_moderators(user_id)",
        [],
    )?;

    // student_id holds the barcode content; uniqueness per class is the
    // dedupe key for bulk roster imports.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(class_id, student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scan_types(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scan_types_class ON scan_types(class_id)",
        [],
    )?;

    // student_id is nullable: unmatched scans are still recorded with the
    // raw scanned value. type holds the legacy IN/OUT/CUSTOM text; type_id
    // points at the per-class scan_types row that replaced it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT,
            type TEXT,
            type_id TEXT,
            scanned_value TEXT NOT NULL,
            scanned_by TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(type_id) REFERENCES scan_types(id),
            FOREIGN KEY(scanned_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    // Workspaces created in the fixed-enumeration era lack type_id.
    ensure_attendance_type_id(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class ON attendance(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_type ON attendance(type_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_logs(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            action TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(user_id) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_logs_class ON class_logs(class_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_attendance_type_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "type_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance ADD COLUMN type_id TEXT", [])?;
    Ok(())
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
