//! Repository seams between the services and the relational store.
//!
//! Each write method is atomic inside the implementation: reference checks, uniqueness
//! checks, and every row the call produces either all commit or none do.

pub mod memory;
pub mod schema;
pub mod sqlite;

use crate::domain::{
    ClassSchedule, Enrollment, EnrollmentDraft, EnrollmentId, EnrollmentRecord, EnrollmentStatus,
    NewClassSchedule, NewProgram, NewSubject, NewUser, PendingEnrollment, Program, ProgramId,
    ScheduleId, Student, StudentId, StudentProfile, Subject, SubjectId, User, UserId,
};

pub use memory::InMemoryRegistrarStore;
pub use sqlite::SqliteRegistrarStore;

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{entity} {id} referenced but missing")]
    InvalidReference { entity: &'static str, id: i64 },
    #[error("prerequisite {prerequisite_id} would create a cycle through subject {subject_id}")]
    PrerequisiteCycle {
        subject_id: i64,
        prerequisite_id: i64,
    },
    #[error("enrollment {id} is {actual}, refusing to set {requested}")]
    StatusConflict {
        id: EnrollmentId,
        actual: EnrollmentStatus,
        requested: EnrollmentStatus,
    },
    /// A foreign key named a row that does not exist.
    #[error("dangling reference: {0}")]
    DanglingReference(String),
    /// CHECK or NOT NULL rule rejected the row.
    #[error("constraint violated: {0}")]
    ConstraintViolation(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub(crate) fn missing(entity: &'static str, id: i64) -> Self {
        Self::InvalidReference { entity, id }
    }
}

/// Failure of a bulk insert. `row` is the zero-based position of the entry that failed;
/// nothing from the batch is stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row}: {source}")]
pub struct BatchError {
    pub row: usize,
    pub source: RepositoryError,
}

/// One subject of a bulk insert. `prerequisite_row`, when set, points at an earlier entry
/// of the same batch and replaces `subject.prerequisite_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectBatchRow {
    pub subject: NewSubject,
    pub prerequisite_row: Option<usize>,
}

pub trait ProgramRepository: Send + Sync {
    /// Fails with `DuplicateKey` when the code or the name is taken.
    fn insert_program(&self, program: NewProgram) -> Result<Program, RepositoryError>;
    /// All programs or none: the first failing entry aborts the batch.
    fn insert_programs(&self, programs: Vec<NewProgram>) -> Result<Vec<Program>, BatchError>;
    /// Fails with `DuplicateKey` when another program holds the code or name.
    fn update_program(&self, program: Program) -> Result<Program, RepositoryError>;
    /// Removes the row without checking subjects or students that still reference it.
    fn delete_program(&self, id: ProgramId) -> Result<(), RepositoryError>;
    fn fetch_program(&self, id: ProgramId) -> Result<Option<Program>, RepositoryError>;
    fn list_programs(&self) -> Result<Vec<Program>, RepositoryError>;
}

pub trait SubjectRepository: Send + Sync {
    /// Checks code uniqueness, the program reference, and the prerequisite reference.
    fn insert_subject(&self, subject: NewSubject) -> Result<Subject, RepositoryError>;
    /// Same checks as `insert_subject` for every row, applied in order inside one unit.
    fn insert_subjects(&self, subjects: Vec<SubjectBatchRow>) -> Result<Vec<Subject>, BatchError>;
    /// Same checks as insert plus prerequisite cycle detection.
    fn update_subject(&self, subject: Subject) -> Result<Subject, RepositoryError>;
    fn delete_subject(&self, id: SubjectId) -> Result<(), RepositoryError>;
    fn fetch_subject(&self, id: SubjectId) -> Result<Option<Subject>, RepositoryError>;
    fn list_subjects(&self) -> Result<Vec<Subject>, RepositoryError>;
}

pub trait ScheduleRepository: Send + Sync {
    fn insert_schedule(&self, schedule: NewClassSchedule)
        -> Result<ClassSchedule, RepositoryError>;
    fn update_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule, RepositoryError>;
    fn delete_schedule(&self, id: ScheduleId) -> Result<(), RepositoryError>;
    fn fetch_schedule(&self, id: ScheduleId) -> Result<Option<ClassSchedule>, RepositoryError>;
    fn list_schedules(&self) -> Result<Vec<ClassSchedule>, RepositoryError>;
}

pub trait StudentRepository: Send + Sync {
    fn fetch_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError>;
    fn student_for_user(&self, user_id: UserId) -> Result<Option<Student>, RepositoryError>;
    /// Newest first.
    fn list_students(&self) -> Result<Vec<Student>, RepositoryError>;
    /// Replaces the personal details. Program, year level, and the account link stay.
    fn update_student(
        &self,
        id: StudentId,
        profile: StudentProfile,
    ) -> Result<Student, RepositoryError>;
}

pub trait UserRepository: Send + Sync {
    /// Inserts the account and, when a profile is given, its linked student row in the
    /// same transaction.
    fn insert_user(
        &self,
        user: NewUser,
        profile: Option<StudentProfile>,
    ) -> Result<(User, Option<Student>), RepositoryError>;
    /// Inserts the account only when no admin exists yet; `None` otherwise. The check and
    /// the insert happen under one lock or transaction.
    fn insert_first_admin(&self, user: NewUser) -> Result<Option<User>, RepositoryError>;
    /// Saves username and password hash. Fails with `DuplicateKey` when another account
    /// holds the username.
    fn update_user(&self, user: User) -> Result<User, RepositoryError>;
    fn find_user(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    fn fetch_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn list_users(&self) -> Result<Vec<User>, RepositoryError>;
    fn delete_user(&self, id: UserId) -> Result<(), RepositoryError>;
}

pub trait EnrollmentRepository: Send + Sync {
    /// Writes the student update, the pending enrollment, and every subject row as one
    /// unit.
    fn submit_enrollment(&self, draft: EnrollmentDraft)
        -> Result<EnrollmentRecord, RepositoryError>;
    fn fetch_enrollment(&self, id: EnrollmentId)
        -> Result<Option<EnrollmentRecord>, RepositoryError>;
    /// Pending enrollments joined with the student name, oldest first.
    fn pending_enrollments(&self) -> Result<Vec<PendingEnrollment>, RepositoryError>;
    /// Sets the status. With `expected`, the write only happens when the stored status
    /// still equals it; otherwise `StatusConflict` reports what was found.
    fn transition_status(
        &self,
        id: EnrollmentId,
        expected: Option<EnrollmentStatus>,
        next: EnrollmentStatus,
    ) -> Result<Enrollment, RepositoryError>;
}

/// Everything the registrar services need from one backing store.
pub trait RegistrarStore:
    ProgramRepository
    + SubjectRepository
    + ScheduleRepository
    + StudentRepository
    + UserRepository
    + EnrollmentRepository
{
}

impl<T> RegistrarStore for T where
    T: ProgramRepository
        + SubjectRepository
        + ScheduleRepository
        + StudentRepository
        + UserRepository
        + EnrollmentRepository
{
}
