//! rusqlite-backed store. One connection behind a mutex; every write runs inside a
//! `BEGIN IMMEDIATE` transaction that rolls back when the closure fails.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{
    ffi, params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};

use super::{
    schema, BatchError, EnrollmentRepository, ProgramRepository, RepositoryError,
    ScheduleRepository, StudentRepository, SubjectBatchRow, SubjectRepository, UserRepository,
};
use crate::access::Role;
use crate::catalog::prerequisites::check_prerequisite;
use crate::domain::{
    ClassSchedule, Enrollment, EnrollmentDraft, EnrollmentId, EnrollmentRecord, EnrollmentStatus,
    NewClassSchedule, NewProgram, NewSubject, NewUser, PendingEnrollment, Program, ProgramId,
    ScheduleId, Student, StudentId, StudentProfile, Subject, SubjectId, User, UserId,
};

const TIME_FORMAT: &str = "%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const SUBJECT_COLUMNS: &str =
    "id, code, title, units, program_id, year_level, semester, prerequisite_id";
const SCHEDULE_COLUMNS: &str =
    "id, subject_id, semester, day, time_start, time_end, room, instructor, section";
const STUDENT_COLUMNS: &str = "id, user_id, student_number, first_name, middle_name, last_name, \
     birthdate, address, contact, program_id, year_level, created_at";
const ENROLLMENT_COLUMNS: &str = "id, student_id, semester, school_year, status, created_at";

#[derive(Debug, thiserror::Error)]
#[error("unrecognised {column} value '{value}'")]
struct ColumnValueError {
    column: &'static str,
    value: String,
}

fn to_storage_err(err: rusqlite::Error) -> RepositoryError {
    let rusqlite::Error::SqliteFailure(failure, message) = &err else {
        return RepositoryError::Unavailable(err.to_string());
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return RepositoryError::Unavailable(err.to_string());
    }

    let detail = message.clone().unwrap_or_else(|| err.to_string());
    match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            RepositoryError::DuplicateKey(detail)
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepositoryError::DanglingReference(detail),
        _ => RepositoryError::ConstraintViolation(detail),
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    // Fixed-width so that text ordering matches time ordering.
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| conversion_err(idx, err))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(|err| conversion_err(idx, err))
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| NaiveDate::parse_from_str(&value, DATE_FORMAT))
        .transpose()
        .map_err(|err| conversion_err(idx, err))
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<EnrollmentStatus> {
    let raw: String = row.get(idx)?;
    EnrollmentStatus::parse(&raw).ok_or_else(|| {
        conversion_err(
            idx,
            ColumnValueError {
                column: "status",
                value: raw,
            },
        )
    })
}

fn program_from_row(row: &Row<'_>) -> rusqlite::Result<Program> {
    Ok(Program {
        id: ProgramId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
    })
}

fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: SubjectId(row.get(0)?),
        code: row.get(1)?,
        title: row.get(2)?,
        units: row.get(3)?,
        program_id: ProgramId(row.get(4)?),
        year_level: row.get(5)?,
        semester: row.get(6)?,
        prerequisite_id: row.get::<_, Option<i64>>(7)?.map(SubjectId),
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ClassSchedule> {
    Ok(ClassSchedule {
        id: ScheduleId(row.get(0)?),
        subject_id: SubjectId(row.get(1)?),
        semester: row.get(2)?,
        day: row.get(3)?,
        time_start: parse_time(row, 4)?,
        time_end: parse_time(row, 5)?,
        room: row.get(6)?,
        instructor: row.get(7)?,
        section: row.get(8)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: StudentId(row.get(0)?),
        user_id: row.get::<_, Option<i64>>(1)?.map(UserId),
        student_number: row.get(2)?,
        first_name: row.get(3)?,
        middle_name: row.get(4)?,
        last_name: row.get(5)?,
        birthdate: parse_date(row, 6)?,
        address: row.get(7)?,
        contact: row.get(8)?,
        program_id: row.get::<_, Option<i64>>(9)?.map(ProgramId),
        year_level: row.get(10)?,
        created_at: parse_timestamp(row, 11)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let raw_role: String = row.get(3)?;
    let role = Role::parse(&raw_role).ok_or_else(|| {
        conversion_err(
            3,
            ColumnValueError {
                column: "role",
                value: raw_role.clone(),
            },
        )
    })?;
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role,
    })
}

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: EnrollmentId(row.get(0)?),
        student_id: StudentId(row.get(1)?),
        semester: row.get(2)?,
        school_year: row.get(3)?,
        status: parse_status(row, 4)?,
        created_at: parse_timestamp(row, 5)?,
    })
}

fn exists(conn: &Connection, table: &str, id: i64) -> Result<bool, RepositoryError> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1");
    conn.query_row(&sql, params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(to_storage_err)
}

fn program_conflict(
    conn: &Connection,
    code: &str,
    name: &str,
    except: Option<ProgramId>,
) -> Result<Option<String>, RepositoryError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT code FROM programs
             WHERE (code = ?1 OR name = ?2) AND (?3 IS NULL OR id != ?3)
             LIMIT 1",
            params![code, name, except.map(|id| id.0)],
            |row| row.get(0),
        )
        .optional()
        .map_err(to_storage_err)?;

    Ok(existing.map(|existing_code| {
        if existing_code.eq_ignore_ascii_case(code) {
            format!("program code '{code}' already exists")
        } else {
            format!("program name '{name}' already exists")
        }
    }))
}

fn check_subject(
    conn: &Connection,
    id: Option<SubjectId>,
    code: &str,
    program_id: ProgramId,
    prerequisite_id: Option<SubjectId>,
) -> Result<(), RepositoryError> {
    let duplicate = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE code = ?1 AND (?2 IS NULL OR id != ?2)",
            params![code, id.map(|id| id.0)],
            |_| Ok(()),
        )
        .optional()
        .map_err(to_storage_err)?;
    if duplicate.is_some() {
        return Err(RepositoryError::DuplicateKey(format!(
            "subject code '{code}' already exists"
        )));
    }
    if !exists(conn, "programs", program_id.0)? {
        return Err(RepositoryError::missing("program", program_id.0));
    }
    if let Some(prerequisite) = prerequisite_id {
        check_prerequisite(id, prerequisite, |subject_id| {
            conn.query_row(
                "SELECT prerequisite_id FROM subjects WHERE id = ?1",
                params![subject_id.0],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map(|found| found.map(|prerequisite| prerequisite.map(SubjectId)))
            .map_err(to_storage_err)
        })?;
    }
    Ok(())
}

fn load_enrollment(
    conn: &Connection,
    id: EnrollmentId,
) -> Result<Option<EnrollmentRecord>, RepositoryError> {
    let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?1");
    let Some(enrollment) = conn
        .query_row(&sql, params![id.0], enrollment_from_row)
        .optional()
        .map_err(to_storage_err)?
    else {
        return Ok(None);
    };

    let mut statement = conn
        .prepare_cached(
            "SELECT subject_id FROM enrollment_subjects
             WHERE enrollment_id = ?1 ORDER BY position",
        )
        .map_err(to_storage_err)?;
    let subject_ids = statement
        .query_map(params![id.0], |row| row.get(0).map(SubjectId))
        .map_err(to_storage_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(to_storage_err)?;

    Ok(Some(EnrollmentRecord {
        enrollment,
        subject_ids,
    }))
}

fn query_all<T, F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<T>, RepositoryError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut statement = conn.prepare(sql).map_err(to_storage_err)?;
    let rows = statement
        .query_map([], map)
        .map_err(to_storage_err)?
        .collect::<rusqlite::Result<Vec<T>>>()
        .map_err(to_storage_err)?;
    Ok(rows)
}

fn delete_by_id(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: i64,
) -> Result<(), RepositoryError> {
    let sql = format!("DELETE FROM {table} WHERE id = ?1");
    let removed = conn.execute(&sql, params![id]).map_err(to_storage_err)?;
    if removed == 0 {
        return Err(RepositoryError::not_found(entity, id));
    }
    Ok(())
}

pub struct SqliteRegistrarStore {
    conn: Mutex<Connection>,
}

impl SqliteRegistrarStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(to_storage_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(to_storage_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(to_storage_err)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened registrar database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(to_storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, RepositoryError> {
        schema::apply(&conn).map_err(to_storage_err)?;
        tracing::debug!(version = schema::SCHEMA_VERSION, "registrar schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&Connection) -> Result<T, RepositoryError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection lock poisoned".into()))?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Returning `Err` rolls everything back.
    fn with_transaction<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, RepositoryError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection lock poisoned".into()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_storage_err)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(to_storage_err)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn insert_program(conn: &Connection, program: NewProgram) -> Result<Program, RepositoryError> {
    if let Some(conflict) = program_conflict(conn, &program.code, &program.name, None)? {
        return Err(RepositoryError::DuplicateKey(conflict));
    }
    conn.execute(
        "INSERT INTO programs (code, name) VALUES (?1, ?2)",
        params![program.code, program.name],
    )
    .map_err(to_storage_err)?;
    Ok(Program {
        id: ProgramId(conn.last_insert_rowid()),
        code: program.code,
        name: program.name,
    })
}

fn insert_subject(conn: &Connection, subject: NewSubject) -> Result<Subject, RepositoryError> {
    check_subject(
        conn,
        None,
        &subject.code,
        subject.program_id,
        subject.prerequisite_id,
    )?;
    conn.execute(
        "INSERT INTO subjects
         (code, title, units, program_id, year_level, semester, prerequisite_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            subject.code,
            subject.title,
            subject.units,
            subject.program_id.0,
            subject.year_level,
            subject.semester,
            subject.prerequisite_id.map(|id| id.0),
        ],
    )
    .map_err(to_storage_err)?;
    Ok(subject.with_id(SubjectId(conn.last_insert_rowid())))
}

impl SqliteRegistrarStore {
    /// Run one insert per entry inside a single transaction, remembering which entry
    /// failed so the caller can point at it.
    fn insert_batch<I, T, F>(&self, entries: Vec<I>, mut insert: F) -> Result<Vec<T>, BatchError>
    where
        F: FnMut(&Connection, &[T], I) -> Result<T, RepositoryError>,
    {
        let mut failed_row = 0;
        self.with_transaction(|tx| {
            let mut stored = Vec::with_capacity(entries.len());
            for (row, entry) in entries.into_iter().enumerate() {
                failed_row = row;
                let value = insert(tx, &stored, entry)?;
                stored.push(value);
            }
            Ok(stored)
        })
        .map_err(|source| BatchError {
            row: failed_row,
            source,
        })
    }
}

impl ProgramRepository for SqliteRegistrarStore {
    fn insert_program(&self, program: NewProgram) -> Result<Program, RepositoryError> {
        self.with_transaction(|tx| insert_program(tx, program))
    }

    fn insert_programs(&self, programs: Vec<NewProgram>) -> Result<Vec<Program>, BatchError> {
        self.insert_batch(programs, |conn, _, program| insert_program(conn, program))
    }

    fn update_program(&self, program: Program) -> Result<Program, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "programs", program.id.0)? {
                return Err(RepositoryError::not_found("program", program.id.0));
            }
            if let Some(conflict) =
                program_conflict(tx, &program.code, &program.name, Some(program.id))?
            {
                return Err(RepositoryError::DuplicateKey(conflict));
            }
            tx.execute(
                "UPDATE programs SET code = ?1, name = ?2 WHERE id = ?3",
                params![program.code, program.name, program.id.0],
            )
            .map_err(to_storage_err)?;
            Ok(program.clone())
        })
    }

    fn delete_program(&self, id: ProgramId) -> Result<(), RepositoryError> {
        self.with_transaction(|tx| delete_by_id(tx, "programs", "program", id.0))
    }

    fn fetch_program(&self, id: ProgramId) -> Result<Option<Program>, RepositoryError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, code, name FROM programs WHERE id = ?1",
                params![id.0],
                program_from_row,
            )
            .optional()
            .map_err(to_storage_err)
        })
    }

    fn list_programs(&self) -> Result<Vec<Program>, RepositoryError> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT id, code, name FROM programs ORDER BY name",
                program_from_row,
            )
        })
    }
}

impl SubjectRepository for SqliteRegistrarStore {
    fn insert_subject(&self, subject: NewSubject) -> Result<Subject, RepositoryError> {
        self.with_transaction(|tx| insert_subject(tx, subject))
    }

    fn insert_subjects(&self, subjects: Vec<SubjectBatchRow>) -> Result<Vec<Subject>, BatchError> {
        self.insert_batch(subjects, |conn, stored: &[Subject], row| {
            let mut subject = row.subject;
            if let Some(earlier) = row.prerequisite_row {
                let prerequisite = stored
                    .get(earlier)
                    .ok_or(RepositoryError::missing("batch row", earlier as i64))?;
                subject.prerequisite_id = Some(prerequisite.id);
            }
            insert_subject(conn, subject)
        })
    }

    fn update_subject(&self, subject: Subject) -> Result<Subject, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "subjects", subject.id.0)? {
                return Err(RepositoryError::not_found("subject", subject.id.0));
            }
            check_subject(
                tx,
                Some(subject.id),
                &subject.code,
                subject.program_id,
                subject.prerequisite_id,
            )?;
            tx.execute(
                "UPDATE subjects SET code = ?1, title = ?2, units = ?3, program_id = ?4,
                 year_level = ?5, semester = ?6, prerequisite_id = ?7
                 WHERE id = ?8",
                params![
                    subject.code,
                    subject.title,
                    subject.units,
                    subject.program_id.0,
                    subject.year_level,
                    subject.semester,
                    subject.prerequisite_id.map(|id| id.0),
                    subject.id.0,
                ],
            )
            .map_err(to_storage_err)?;
            Ok(subject.clone())
        })
    }

    fn delete_subject(&self, id: SubjectId) -> Result<(), RepositoryError> {
        self.with_transaction(|tx| delete_by_id(tx, "subjects", "subject", id.0))
    }

    fn fetch_subject(&self, id: SubjectId) -> Result<Option<Subject>, RepositoryError> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ?1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params![id.0], subject_from_row)
                .optional()
                .map_err(to_storage_err)
        })
    }

    fn list_subjects(&self) -> Result<Vec<Subject>, RepositoryError> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects ORDER BY code");
        self.with_conn(|conn| query_all(conn, &sql, subject_from_row))
    }
}

impl ScheduleRepository for SqliteRegistrarStore {
    fn insert_schedule(
        &self,
        schedule: NewClassSchedule,
    ) -> Result<ClassSchedule, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "subjects", schedule.subject_id.0)? {
                return Err(RepositoryError::missing("subject", schedule.subject_id.0));
            }
            tx.execute(
                "INSERT INTO class_schedules
                 (subject_id, semester, day, time_start, time_end, room, instructor, section)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    schedule.subject_id.0,
                    schedule.semester,
                    schedule.day,
                    schedule.time_start.format(TIME_FORMAT).to_string(),
                    schedule.time_end.format(TIME_FORMAT).to_string(),
                    schedule.room,
                    schedule.instructor,
                    schedule.section,
                ],
            )
            .map_err(to_storage_err)?;
            Ok(schedule.clone().with_id(ScheduleId(tx.last_insert_rowid())))
        })
    }

    fn update_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "class_schedules", schedule.id.0)? {
                return Err(RepositoryError::not_found("class schedule", schedule.id.0));
            }
            if !exists(tx, "subjects", schedule.subject_id.0)? {
                return Err(RepositoryError::missing("subject", schedule.subject_id.0));
            }
            tx.execute(
                "UPDATE class_schedules SET subject_id = ?1, semester = ?2, day = ?3,
                 time_start = ?4, time_end = ?5, room = ?6, instructor = ?7, section = ?8
                 WHERE id = ?9",
                params![
                    schedule.subject_id.0,
                    schedule.semester,
                    schedule.day,
                    schedule.time_start.format(TIME_FORMAT).to_string(),
                    schedule.time_end.format(TIME_FORMAT).to_string(),
                    schedule.room,
                    schedule.instructor,
                    schedule.section,
                    schedule.id.0,
                ],
            )
            .map_err(to_storage_err)?;
            Ok(schedule.clone())
        })
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<(), RepositoryError> {
        self.with_transaction(|tx| delete_by_id(tx, "class_schedules", "class schedule", id.0))
    }

    fn fetch_schedule(&self, id: ScheduleId) -> Result<Option<ClassSchedule>, RepositoryError> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM class_schedules WHERE id = ?1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params![id.0], schedule_from_row)
                .optional()
                .map_err(to_storage_err)
        })
    }

    fn list_schedules(&self) -> Result<Vec<ClassSchedule>, RepositoryError> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT cs.id, cs.subject_id, cs.semester, cs.day, cs.time_start, cs.time_end,
                        cs.room, cs.instructor, cs.section
                 FROM class_schedules cs
                 LEFT JOIN subjects s ON cs.subject_id = s.id
                 ORDER BY s.code, cs.semester, cs.day",
                schedule_from_row,
            )
        })
    }
}

impl StudentRepository for SqliteRegistrarStore {
    fn fetch_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params![id.0], student_from_row)
                .optional()
                .map_err(to_storage_err)
        })
    }

    fn student_for_user(&self, user_id: UserId) -> Result<Option<Student>, RepositoryError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = ?1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params![user_id.0], student_from_row)
                .optional()
                .map_err(to_storage_err)
        })
    }

    fn list_students(&self) -> Result<Vec<Student>, RepositoryError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY id DESC");
        self.with_conn(|conn| query_all(conn, &sql, student_from_row))
    }

    fn update_student(
        &self,
        id: StudentId,
        profile: StudentProfile,
    ) -> Result<Student, RepositoryError> {
        self.with_transaction(|tx| {
            let changed = tx
                .execute(
                    "UPDATE students SET student_number = ?1, first_name = ?2, middle_name = ?3,
                     last_name = ?4, birthdate = ?5, address = ?6, contact = ?7
                     WHERE id = ?8",
                    params![
                        profile.student_number,
                        profile.first_name,
                        profile.middle_name,
                        profile.last_name,
                        profile
                            .birthdate
                            .map(|date| date.format(DATE_FORMAT).to_string()),
                        profile.address,
                        profile.contact,
                        id.0,
                    ],
                )
                .map_err(to_storage_err)?;
            if changed == 0 {
                return Err(RepositoryError::not_found("student", id.0));
            }
            let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
            tx.query_row(&sql, params![id.0], student_from_row)
                .map_err(to_storage_err)
        })
    }
}

fn insert_student(
    conn: &Connection,
    user_id: Option<UserId>,
    profile: &StudentProfile,
) -> Result<Student, RepositoryError> {
    conn.execute(
        "INSERT INTO students
         (user_id, student_number, first_name, middle_name, last_name,
          birthdate, address, contact, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user_id.map(|id| id.0),
            profile.student_number,
            profile.first_name,
            profile.middle_name,
            profile.last_name,
            profile
                .birthdate
                .map(|date| date.format(DATE_FORMAT).to_string()),
            profile.address,
            profile.contact,
            timestamp(&Utc::now()),
        ],
    )
    .map_err(to_storage_err)?;

    let id = conn.last_insert_rowid();
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
    conn.query_row(&sql, params![id], student_from_row)
        .map_err(to_storage_err)
}

fn username_taken(
    conn: &Connection,
    username: &str,
    except: Option<UserId>,
) -> Result<bool, RepositoryError> {
    conn.query_row(
        "SELECT 1 FROM users WHERE username = ?1 AND (?2 IS NULL OR id != ?2)",
        params![username, except.map(|id| id.0)],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(to_storage_err)
}

fn insert_user(conn: &Connection, user: NewUser) -> Result<User, RepositoryError> {
    if username_taken(conn, &user.username, None)? {
        return Err(RepositoryError::DuplicateKey(format!(
            "username '{}' already exists",
            user.username
        )));
    }
    conn.execute(
        "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
        params![user.username, user.password_hash, user.role.label()],
    )
    .map_err(to_storage_err)?;
    Ok(User {
        id: UserId(conn.last_insert_rowid()),
        username: user.username,
        password_hash: user.password_hash,
        role: user.role,
    })
}

impl SqliteRegistrarStore {
    /// Seed a student row that is not linked to any account.
    pub fn insert_student(&self, profile: StudentProfile) -> Result<Student, RepositoryError> {
        self.with_transaction(|tx| insert_student(tx, None, &profile))
    }
}

impl UserRepository for SqliteRegistrarStore {
    fn insert_user(
        &self,
        user: NewUser,
        profile: Option<StudentProfile>,
    ) -> Result<(User, Option<Student>), RepositoryError> {
        self.with_transaction(|tx| {
            let stored = insert_user(tx, user)?;
            let student = match &profile {
                Some(profile) => Some(insert_student(tx, Some(stored.id), profile)?),
                None => None,
            };
            Ok((stored, student))
        })
    }

    fn insert_first_admin(&self, user: NewUser) -> Result<Option<User>, RepositoryError> {
        self.with_transaction(|tx| {
            let admin = tx
                .query_row(
                    "SELECT 1 FROM users WHERE role = ?1 LIMIT 1",
                    params![Role::Admin.label()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(to_storage_err)?;
            if admin.is_some() {
                return Ok(None);
            }
            insert_user(tx, user).map(Some)
        })
    }

    fn update_user(&self, user: User) -> Result<User, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "users", user.id.0)? {
                return Err(RepositoryError::not_found("user", user.id.0));
            }
            if username_taken(tx, &user.username, Some(user.id))? {
                return Err(RepositoryError::DuplicateKey(format!(
                    "username '{}' already exists",
                    user.username
                )));
            }
            tx.execute(
                "UPDATE users SET username = ?1, password_hash = ?2 WHERE id = ?3",
                params![user.username, user.password_hash, user.id.0],
            )
            .map_err(to_storage_err)?;
            Ok(user)
        })
    }

    fn find_user(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, role FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()
            .map_err(to_storage_err)
        })
    }

    fn fetch_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, role FROM users WHERE id = ?1",
                params![id.0],
                user_from_row,
            )
            .optional()
            .map_err(to_storage_err)
        })
    }

    fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT id, username, password_hash, role FROM users ORDER BY id",
                user_from_row,
            )
        })
    }

    fn delete_user(&self, id: UserId) -> Result<(), RepositoryError> {
        self.with_transaction(|tx| {
            delete_by_id(tx, "users", "user", id.0)?;
            tx.execute(
                "UPDATE students SET user_id = NULL WHERE user_id = ?1",
                params![id.0],
            )
            .map_err(to_storage_err)?;
            Ok(())
        })
    }
}

impl EnrollmentRepository for SqliteRegistrarStore {
    fn submit_enrollment(
        &self,
        draft: EnrollmentDraft,
    ) -> Result<EnrollmentRecord, RepositoryError> {
        self.with_transaction(|tx| {
            if !exists(tx, "students", draft.student_id.0)? {
                return Err(RepositoryError::missing("student", draft.student_id.0));
            }
            if !exists(tx, "programs", draft.program_id.0)? {
                return Err(RepositoryError::missing("program", draft.program_id.0));
            }
            let mut seen = HashSet::new();
            for subject_id in &draft.subject_ids {
                if !exists(tx, "subjects", subject_id.0)? {
                    return Err(RepositoryError::missing("subject", subject_id.0));
                }
                if !seen.insert(*subject_id) {
                    return Err(RepositoryError::DuplicateKey(format!(
                        "subject {subject_id} selected more than once"
                    )));
                }
            }

            tx.execute(
                "UPDATE students SET program_id = ?1, year_level = ?2 WHERE id = ?3",
                params![draft.program_id.0, draft.year_level, draft.student_id.0],
            )
            .map_err(to_storage_err)?;

            tx.execute(
                "INSERT INTO enrollments (student_id, semester, school_year, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    draft.student_id.0,
                    draft.semester,
                    draft.school_year,
                    EnrollmentStatus::Pending.label(),
                    timestamp(&draft.created_at),
                ],
            )
            .map_err(to_storage_err)?;
            let enrollment_id = EnrollmentId(tx.last_insert_rowid());

            {
                let mut insert = tx
                    .prepare_cached(
                        "INSERT INTO enrollment_subjects (enrollment_id, subject_id, position)
                         VALUES (?1, ?2, ?3)",
                    )
                    .map_err(to_storage_err)?;
                for (position, subject_id) in draft.subject_ids.iter().enumerate() {
                    insert
                        .execute(params![enrollment_id.0, subject_id.0, position as i64])
                        .map_err(to_storage_err)?;
                }
            }

            load_enrollment(tx, enrollment_id)?
                .ok_or(RepositoryError::not_found("enrollment", enrollment_id.0))
        })
    }

    fn fetch_enrollment(
        &self,
        id: EnrollmentId,
    ) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        self.with_conn(|conn| load_enrollment(conn, id))
    }

    fn pending_enrollments(&self) -> Result<Vec<PendingEnrollment>, RepositoryError> {
        self.with_conn(|conn| {
            let mut statement = conn
                .prepare(
                    "SELECT e.id, s.first_name, s.last_name, e.semester, e.school_year,
                            e.status, e.created_at
                     FROM enrollments e
                     JOIN students s ON e.student_id = s.id
                     WHERE e.status = ?1
                     ORDER BY e.created_at, e.id",
                )
                .map_err(to_storage_err)?;
            let rows = statement
                .query_map(params![EnrollmentStatus::Pending.label()], |row| {
                    let first_name: String = row.get(1)?;
                    let last_name: String = row.get(2)?;
                    Ok(PendingEnrollment {
                        enrollment_id: EnrollmentId(row.get(0)?),
                        student_name: format!("{first_name} {last_name}"),
                        semester: row.get(3)?,
                        school_year: row.get(4)?,
                        status: parse_status(row, 5)?,
                        created_at: parse_timestamp(row, 6)?,
                    })
                })
                .map_err(to_storage_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(to_storage_err)?;
            Ok(rows)
        })
    }

    fn transition_status(
        &self,
        id: EnrollmentId,
        expected: Option<EnrollmentStatus>,
        next: EnrollmentStatus,
    ) -> Result<Enrollment, RepositoryError> {
        self.with_transaction(|tx| {
            let current = tx
                .query_row(
                    "SELECT status FROM enrollments WHERE id = ?1",
                    params![id.0],
                    |row| parse_status(row, 0),
                )
                .optional()
                .map_err(to_storage_err)?
                .ok_or(RepositoryError::not_found("enrollment", id.0))?;

            if let Some(expected) = expected {
                if current != expected {
                    return Err(RepositoryError::StatusConflict {
                        id,
                        actual: current,
                        requested: next,
                    });
                }
            }

            tx.execute(
                "UPDATE enrollments SET status = ?1 WHERE id = ?2",
                params![next.label(), id.0],
            )
            .map_err(to_storage_err)?;

            load_enrollment(tx, id)?
                .map(|record| record.enrollment)
                .ok_or(RepositoryError::not_found("enrollment", id.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first_name: &str) -> StudentProfile {
        StudentProfile {
            first_name: first_name.to_string(),
            last_name: "Reyes".to_string(),
            ..StudentProfile::default()
        }
    }

    fn new_user(username: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            role,
        }
    }

    fn store_with_program() -> (SqliteRegistrarStore, Program) {
        let store = SqliteRegistrarStore::open_in_memory().expect("open store");
        let program = store
            .insert_program(NewProgram {
                code: "BSCS".to_string(),
                name: "Computer Science".to_string(),
            })
            .expect("program");
        (store, program)
    }

    fn new_subject(
        code: &str,
        program_id: ProgramId,
        prerequisite: Option<SubjectId>,
    ) -> NewSubject {
        NewSubject {
            code: code.to_string(),
            title: format!("{code} title"),
            units: 3,
            program_id,
            year_level: 1,
            semester: "1st".to_string(),
            prerequisite_id: prerequisite,
        }
    }

    #[test]
    fn duplicate_program_code_is_rejected() {
        let (store, _) = store_with_program();
        let err = store
            .insert_program(NewProgram {
                code: "bscs".to_string(),
                name: "Another".to_string(),
            })
            .expect_err("duplicate");
        assert_eq!(
            err,
            RepositoryError::DuplicateKey("program code 'bscs' already exists".to_string())
        );
    }

    #[test]
    fn editing_a_subject_into_a_loop_is_rolled_back() {
        let (store, program) = store_with_program();
        let intro = store
            .insert_subject(new_subject("CS101", program.id, None))
            .expect("intro");
        let data = store
            .insert_subject(new_subject("CS102", program.id, Some(intro.id)))
            .expect("data structures");

        let mut looped = intro.clone();
        looped.prerequisite_id = Some(data.id);
        looped.title = "renamed".to_string();
        let err = store.update_subject(looped).expect_err("cycle");
        assert!(matches!(err, RepositoryError::PrerequisiteCycle { .. }));

        let stored = store.fetch_subject(intro.id).expect("fetch").expect("row");
        assert_eq!(stored, intro);
    }

    #[test]
    fn submit_writes_every_subject_row_in_order() {
        let (store, program) = store_with_program();
        let first = store
            .insert_subject(new_subject("CS101", program.id, None))
            .expect("subject");
        let second = store
            .insert_subject(new_subject("MATH1", program.id, None))
            .expect("subject");
        let student = store
            .insert_student(StudentProfile {
                first_name: "Ana".to_string(),
                last_name: "Reyes".to_string(),
                ..StudentProfile::default()
            })
            .expect("student");

        let record = store
            .submit_enrollment(EnrollmentDraft {
                student_id: student.id,
                program_id: program.id,
                year_level: 1,
                semester: "1st".to_string(),
                school_year: "2024-2025".to_string(),
                subject_ids: vec![second.id, first.id],
                created_at: Utc::now(),
            })
            .expect("submitted");

        assert_eq!(record.enrollment.status, EnrollmentStatus::Pending);
        assert_eq!(record.subject_ids, vec![second.id, first.id]);
        let fetched = store
            .fetch_enrollment(record.enrollment.id)
            .expect("fetch")
            .expect("row");
        assert_eq!(fetched, record);

        let updated = store.fetch_student(student.id).expect("fetch").expect("row");
        assert_eq!(updated.program_id, Some(program.id));
        assert_eq!(updated.year_level, Some(1));
    }

    #[test]
    fn duplicate_selection_rolls_back_the_submission() {
        let (store, program) = store_with_program();
        let subject = store
            .insert_subject(new_subject("CS101", program.id, None))
            .expect("subject");
        let student = store
            .insert_student(StudentProfile {
                first_name: "Ana".to_string(),
                last_name: "Reyes".to_string(),
                ..StudentProfile::default()
            })
            .expect("student");

        let err = store
            .submit_enrollment(EnrollmentDraft {
                student_id: student.id,
                program_id: program.id,
                year_level: 1,
                semester: "1st".to_string(),
                school_year: "2024-2025".to_string(),
                subject_ids: vec![subject.id, subject.id],
                created_at: Utc::now(),
            })
            .expect_err("duplicate selection");
        assert!(matches!(err, RepositoryError::DuplicateKey(_)));
        assert!(store.pending_enrollments().expect("pending").is_empty());
        let untouched = store.fetch_student(student.id).expect("fetch").expect("row");
        assert_eq!(untouched.program_id, None);
    }

    #[test]
    fn schedules_round_trip_times() {
        let (store, program) = store_with_program();
        let subject = store
            .insert_subject(new_subject("CS101", program.id, None))
            .expect("subject");
        let stored = store
            .insert_schedule(NewClassSchedule {
                subject_id: subject.id,
                semester: "1st".to_string(),
                day: "Monday".to_string(),
                time_start: NaiveTime::from_hms_opt(8, 30, 0).expect("time"),
                time_end: NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
                room: "R-204".to_string(),
                instructor: Some("Prof. Cruz".to_string()),
                section: Some("A".to_string()),
            })
            .expect("schedule");
        let fetched = store
            .fetch_schedule(stored.id)
            .expect("fetch")
            .expect("row");
        assert_eq!(fetched, stored);
    }

    #[test]
    fn deletes_leave_referencing_rows_in_place() {
        let (store, program) = store_with_program();
        let intro = store
            .insert_subject(new_subject("CS101", program.id, None))
            .expect("intro");
        let data = store
            .insert_subject(new_subject("CS102", program.id, Some(intro.id)))
            .expect("data structures");
        let (user, student) = store
            .insert_user(new_user("ana", Role::Student), Some(profile("Ana")))
            .expect("student account");
        let student = student.expect("student row");

        store.delete_subject(intro.id).expect("prerequisite deleted");
        store.delete_program(program.id).expect("program deleted");
        store.delete_user(user.id).expect("user deleted");

        let orphan = store.fetch_subject(data.id).expect("fetch").expect("row");
        assert_eq!(orphan.prerequisite_id, Some(intro.id));
        assert_eq!(orphan.program_id, program.id);
        let unlinked = store.fetch_student(student.id).expect("fetch").expect("row");
        assert_eq!(unlinked.user_id, None);
    }

    #[test]
    fn constraint_failures_keep_their_kind() {
        let conn = Connection::open_in_memory().expect("open");
        schema::apply(&conn).expect("schema");
        conn.execute("INSERT INTO programs (code, name) VALUES ('BSCS', 'CS')", [])
            .expect("program");

        let unique = conn
            .execute("INSERT INTO programs (code, name) VALUES ('bscs', 'Other')", [])
            .expect_err("duplicate code");
        assert!(matches!(
            to_storage_err(unique),
            RepositoryError::DuplicateKey(_)
        ));

        let check = conn
            .execute(
                "INSERT INTO users (username, password_hash, role) VALUES ('x', 'h', 'janitor')",
                [],
            )
            .expect_err("unknown role");
        assert!(matches!(
            to_storage_err(check),
            RepositoryError::ConstraintViolation(_)
        ));

        conn.pragma_update(None, "foreign_keys", true)
            .expect("enable");
        let dangling = conn
            .execute(
                "INSERT INTO class_schedules (subject_id, semester, day, time_start, time_end)
                 VALUES (99, '1st', 'Monday', '08:00:00', '09:00:00')",
                [],
            )
            .expect_err("missing subject");
        assert!(matches!(
            to_storage_err(dangling),
            RepositoryError::DanglingReference(_)
        ));
    }

    #[test]
    fn failed_program_batch_stores_nothing() {
        let store = SqliteRegistrarStore::open_in_memory().expect("open store");
        let batch = ["BSCS", "BSIT", "bscs"]
            .into_iter()
            .map(|code| NewProgram {
                code: code.to_string(),
                name: format!("{code} program {}", code.len()),
            })
            .collect();

        let err = store.insert_programs(batch).expect_err("duplicate in batch");
        assert_eq!(err.row, 2);
        assert!(matches!(err.source, RepositoryError::DuplicateKey(_)));
        assert!(store.list_programs().expect("list").is_empty());
    }

    #[test]
    fn subject_batch_links_earlier_rows() {
        let (store, program) = store_with_program();
        let stored = store
            .insert_subjects(vec![
                SubjectBatchRow {
                    subject: new_subject("CS101", program.id, None),
                    prerequisite_row: None,
                },
                SubjectBatchRow {
                    subject: new_subject("CS102", program.id, None),
                    prerequisite_row: Some(0),
                },
            ])
            .expect("batch");
        assert_eq!(stored[1].prerequisite_id, Some(stored[0].id));

        let err = store
            .insert_subjects(vec![
                SubjectBatchRow {
                    subject: new_subject("CS201", program.id, None),
                    prerequisite_row: None,
                },
                SubjectBatchRow {
                    subject: new_subject("CS202", ProgramId(404), None),
                    prerequisite_row: Some(0),
                },
            ])
            .expect_err("missing program");
        assert_eq!(err.row, 1);
        assert_eq!(store.list_subjects().expect("list").len(), 2);
    }

    #[test]
    fn first_admin_is_inserted_once() {
        let store = SqliteRegistrarStore::open_in_memory().expect("open store");
        let first = store
            .insert_first_admin(new_user("admin", Role::Admin))
            .expect("bootstrap");
        assert!(first.is_some());
        let second = store
            .insert_first_admin(new_user("root", Role::Admin))
            .expect("bootstrap");
        assert!(second.is_none());
        assert_eq!(store.list_users().expect("users").len(), 1);
    }

    #[test]
    fn account_and_student_edits_are_saved() {
        let store = SqliteRegistrarStore::open_in_memory().expect("open store");
        let (ana, student) = store
            .insert_user(new_user("ana", Role::Student), Some(profile("Ana")))
            .expect("ana");
        store
            .insert_user(new_user("ben", Role::Registrar), None)
            .expect("ben");

        let taken = store
            .update_user(User {
                username: "BEN".to_string(),
                ..ana.clone()
            })
            .expect_err("username taken");
        assert!(matches!(taken, RepositoryError::DuplicateKey(_)));

        let renamed = store
            .update_user(User {
                username: "ana.reyes".to_string(),
                password_hash: "new-hash".to_string(),
                ..ana
            })
            .expect("renamed");
        let fetched = store.fetch_user(renamed.id).expect("fetch").expect("row");
        assert_eq!(fetched, renamed);

        let student = student.expect("student row");
        let edited = store
            .update_student(
                student.id,
                StudentProfile {
                    middle_name: "Santos".to_string(),
                    contact: Some("0917".to_string()),
                    ..profile("Ana")
                },
            )
            .expect("edited");
        assert_eq!(edited.middle_name, "Santos");
        assert_eq!(edited.user_id, student.user_id);
        assert_eq!(edited.created_at, student.created_at);
        assert!(matches!(
            store.update_student(StudentId(404), profile("Ghost")),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
