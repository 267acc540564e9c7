use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::Role;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Primary key of a degree program.
    ProgramId
);
row_id!(
    /// Primary key of a catalog subject.
    SubjectId
);
row_id!(ScheduleId);
row_id!(StudentId);
row_id!(UserId);
row_id!(
    /// Primary key of a single enrollment submission.
    EnrollmentId
);

/// Degree program such as "BSCS". Code and name are each unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProgram {
    pub code: String,
    pub name: String,
}

/// Catalog subject with an optional prerequisite pointing at another subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub code: String,
    pub title: String,
    pub units: u8,
    pub program_id: ProgramId,
    pub year_level: u8,
    pub semester: String,
    pub prerequisite_id: Option<SubjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubject {
    pub code: String,
    pub title: String,
    pub units: u8,
    pub program_id: ProgramId,
    pub year_level: u8,
    pub semester: String,
    #[serde(default)]
    pub prerequisite_id: Option<SubjectId>,
}

impl NewSubject {
    pub fn with_id(self, id: SubjectId) -> Subject {
        Subject {
            id,
            code: self.code,
            title: self.title,
            units: self.units,
            program_id: self.program_id,
            year_level: self.year_level,
            semester: self.semester,
            prerequisite_id: self.prerequisite_id,
        }
    }
}

/// Weekly meeting slot for a subject section. Overlaps are not detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchedule {
    pub id: ScheduleId,
    pub subject_id: SubjectId,
    pub semester: String,
    pub day: String,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub room: String,
    pub instructor: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClassSchedule {
    pub subject_id: SubjectId,
    pub semester: String,
    pub day: String,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

impl NewClassSchedule {
    pub fn with_id(self, id: ScheduleId) -> ClassSchedule {
        ClassSchedule {
            id,
            subject_id: self.subject_id,
            semester: self.semester,
            day: self.day,
            time_start: self.time_start,
            time_end: self.time_end,
            room: self.room,
            instructor: self.instructor,
            section: self.section,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub user_id: Option<UserId>,
    /// Institution-issued student number, assigned outside this system.
    pub student_number: Option<String>,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub program_id: Option<ProgramId>,
    pub year_level: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Personal details captured when a student account is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    #[serde(default)]
    pub student_number: Option<String>,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    pub last_name: String,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

/// Approval status of an enrollment. Every enrollment starts as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registrar decision applied to a pending enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    Approve,
    Reject,
}

impl ValidationAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    pub const fn target_status(self) -> EnrollmentStatus {
        match self {
            ValidationAction::Approve => EnrollmentStatus::Approved,
            ValidationAction::Reject => EnrollmentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub semester: String,
    pub school_year: String,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

/// Junction row linking an enrollment to one selected subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentSubject {
    pub enrollment_id: EnrollmentId,
    pub subject_id: SubjectId,
}

/// Everything a single submission writes: the student's program/year update, the
/// pending enrollment, and one subject row per selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentDraft {
    pub student_id: StudentId,
    pub program_id: ProgramId,
    pub year_level: u8,
    pub semester: String,
    pub school_year: String,
    pub subject_ids: Vec<SubjectId>,
    pub created_at: DateTime<Utc>,
}

/// Enrollment together with the subject rows stored for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub subject_ids: Vec<SubjectId>,
}

/// Row of the registrar review queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEnrollment {
    pub enrollment_id: EnrollmentId,
    pub student_name: String,
    pub semester: String,
    pub school_year: String,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}
