//! SQLite schema for the registrar tables.
//!
//! Tables:
//! - `programs`, `subjects`, `class_schedules`: the catalog
//! - `users`, `students`: accounts and the student records linked to them
//! - `enrollments`, `enrollment_subjects`: submissions and their subject selections
//!
//! Foreign keys are declared for documentation only. [`apply`] turns `PRAGMA foreign_keys`
//! off for the connection, since the bundled SQLite enables it by default: catalog deletes
//! neither cascade nor get blocked by rows that still point at them.

use rusqlite::Connection;

/// Schema version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

pub const REGISTRAR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS programs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    code             TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name             TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS subjects (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    code             TEXT NOT NULL UNIQUE COLLATE NOCASE,
    title            TEXT NOT NULL,
    units            INTEGER NOT NULL,
    program_id       INTEGER NOT NULL REFERENCES programs(id),
    year_level       INTEGER NOT NULL,
    semester         TEXT NOT NULL,
    prerequisite_id  INTEGER REFERENCES subjects(id),
    CHECK (prerequisite_id IS NULL OR prerequisite_id != id)
);

CREATE TABLE IF NOT EXISTS class_schedules (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id       INTEGER NOT NULL REFERENCES subjects(id),
    semester         TEXT NOT NULL,
    day              TEXT NOT NULL,
    time_start       TEXT NOT NULL,
    time_end         TEXT NOT NULL,
    room             TEXT NOT NULL DEFAULT '',
    instructor       TEXT,
    section          TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    username         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash    TEXT NOT NULL,
    role             TEXT NOT NULL CHECK (role IN ('admin', 'registrar', 'cashier', 'student'))
);

CREATE TABLE IF NOT EXISTS students (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          INTEGER UNIQUE REFERENCES users(id),
    student_number   TEXT,
    first_name       TEXT NOT NULL,
    middle_name      TEXT NOT NULL DEFAULT '',
    last_name        TEXT NOT NULL,
    birthdate        TEXT,
    address          TEXT,
    contact          TEXT,
    program_id       INTEGER REFERENCES programs(id),
    year_level       INTEGER,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollments (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id       INTEGER NOT NULL REFERENCES students(id),
    semester         TEXT NOT NULL,
    school_year      TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'approved', 'rejected')),
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enrollments_status_created
    ON enrollments (status, created_at, id);

CREATE TABLE IF NOT EXISTS enrollment_subjects (
    enrollment_id    INTEGER NOT NULL REFERENCES enrollments(id),
    subject_id       INTEGER NOT NULL REFERENCES subjects(id),
    position         INTEGER NOT NULL,
    PRIMARY KEY (enrollment_id, subject_id)
);
"#;

/// Disable foreign key enforcement, create any missing tables, and stamp the schema
/// version. Must run outside a transaction.
pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", false)?;
    conn.execute_batch(REGISTRAR_SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
