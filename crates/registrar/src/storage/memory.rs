use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{
    BatchError, EnrollmentRepository, ProgramRepository, RepositoryError, ScheduleRepository,
    StudentRepository, SubjectBatchRow, SubjectRepository, UserRepository,
};
use crate::access::Role;
use crate::catalog::prerequisites::check_prerequisite;
use crate::domain::{
    ClassSchedule, Enrollment, EnrollmentDraft, EnrollmentId, EnrollmentRecord, EnrollmentStatus,
    EnrollmentSubject, NewClassSchedule, NewProgram, NewSubject, NewUser, PendingEnrollment,
    Program, ProgramId, ScheduleId, Student, StudentId, StudentProfile, Subject, SubjectId, User,
    UserId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    programs: BTreeMap<ProgramId, Program>,
    subjects: BTreeMap<SubjectId, Subject>,
    schedules: BTreeMap<ScheduleId, ClassSchedule>,
    students: BTreeMap<StudentId, Student>,
    users: BTreeMap<UserId, User>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    enrollment_subjects: Vec<EnrollmentSubject>,
    last_id: i64,
}

impl Tables {
    // One sequence shared by every table keeps ids unique across the store.
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn program_conflict(
        &self,
        code: &str,
        name: &str,
        except: Option<ProgramId>,
    ) -> Option<String> {
        self.programs
            .values()
            .filter(|program| Some(program.id) != except)
            .find_map(|program| {
                if program.code.eq_ignore_ascii_case(code) {
                    Some(format!("program code '{code}' already exists"))
                } else if program.name.eq_ignore_ascii_case(name) {
                    Some(format!("program name '{name}' already exists"))
                } else {
                    None
                }
            })
    }

    fn check_subject(
        &self,
        id: Option<SubjectId>,
        code: &str,
        program_id: ProgramId,
        prerequisite_id: Option<SubjectId>,
    ) -> Result<(), RepositoryError> {
        let duplicate = self
            .subjects
            .values()
            .any(|subject| Some(subject.id) != id && subject.code.eq_ignore_ascii_case(code));
        if duplicate {
            return Err(RepositoryError::DuplicateKey(format!(
                "subject code '{code}' already exists"
            )));
        }
        if !self.programs.contains_key(&program_id) {
            return Err(RepositoryError::missing("program", program_id.0));
        }
        if let Some(prerequisite) = prerequisite_id {
            check_prerequisite(id, prerequisite, |subject_id| {
                Ok(self
                    .subjects
                    .get(&subject_id)
                    .map(|subject| subject.prerequisite_id))
            })?;
        }
        Ok(())
    }

    fn add_program(&mut self, program: NewProgram) -> Result<Program, RepositoryError> {
        if let Some(conflict) = self.program_conflict(&program.code, &program.name, None) {
            return Err(RepositoryError::DuplicateKey(conflict));
        }
        let stored = Program {
            id: ProgramId(self.next_id()),
            code: program.code,
            name: program.name,
        };
        self.programs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn add_subject(&mut self, subject: NewSubject) -> Result<Subject, RepositoryError> {
        self.check_subject(
            None,
            &subject.code,
            subject.program_id,
            subject.prerequisite_id,
        )?;
        let stored = subject.with_id(SubjectId(self.next_id()));
        self.subjects.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn username_taken(&self, username: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|user| Some(user.id) != except && user.username.eq_ignore_ascii_case(username))
    }

    fn add_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        if self.username_taken(&user.username, None) {
            return Err(RepositoryError::DuplicateKey(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        let stored = User {
            id: UserId(self.next_id()),
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
        };
        self.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn subject_ids_for(&self, enrollment_id: EnrollmentId) -> Vec<SubjectId> {
        self.enrollment_subjects
            .iter()
            .filter(|row| row.enrollment_id == enrollment_id)
            .map(|row| row.subject_id)
            .collect()
    }

    fn new_student(&mut self, user_id: Option<UserId>, profile: StudentProfile) -> Student {
        let id = StudentId(self.next_id());
        let student = Student {
            id,
            user_id,
            student_number: profile.student_number,
            first_name: profile.first_name,
            middle_name: profile.middle_name,
            last_name: profile.last_name,
            birthdate: profile.birthdate,
            address: profile.address,
            contact: profile.contact,
            program_id: None,
            year_level: None,
            created_at: Utc::now(),
        };
        self.students.insert(id, student.clone());
        student
    }
}

/// Store keeping every table behind one mutex. Each call validates first and mutates
/// only once every check has passed, so a failed call leaves no partial rows.
#[derive(Debug, Default)]
pub struct InMemoryRegistrarStore {
    tables: Mutex<Tables>,
}

impl InMemoryRegistrarStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Apply every entry to a copy of the tables and swap the copy in only when all of
    /// them succeed.
    fn apply_batch<I, T, F>(&self, entries: Vec<I>, mut apply: F) -> Result<Vec<T>, BatchError>
    where
        F: FnMut(&mut Tables, &[T], I) -> Result<T, RepositoryError>,
    {
        let unavailable = |source| BatchError { row: 0, source };
        let mut tables = self.tables().map_err(unavailable)?;
        let mut staged = tables.clone();
        let mut stored = Vec::with_capacity(entries.len());
        for (row, entry) in entries.into_iter().enumerate() {
            let value =
                apply(&mut staged, &stored, entry).map_err(|source| BatchError { row, source })?;
            stored.push(value);
        }
        *tables = staged;
        Ok(stored)
    }

    /// Number of subject rows stored across all enrollments.
    pub fn enrollment_subject_rows(&self) -> Result<usize, RepositoryError> {
        Ok(self.tables()?.enrollment_subjects.len())
    }

    /// Seed a student row that is not linked to any account.
    pub fn insert_student(&self, profile: StudentProfile) -> Result<Student, RepositoryError> {
        let mut tables = self.tables()?;
        Ok(tables.new_student(None, profile))
    }
}

impl ProgramRepository for InMemoryRegistrarStore {
    fn insert_program(&self, program: NewProgram) -> Result<Program, RepositoryError> {
        self.tables()?.add_program(program)
    }

    fn insert_programs(&self, programs: Vec<NewProgram>) -> Result<Vec<Program>, BatchError> {
        self.apply_batch(programs, |tables, _, program| tables.add_program(program))
    }

    fn update_program(&self, program: Program) -> Result<Program, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.programs.contains_key(&program.id) {
            return Err(RepositoryError::not_found("program", program.id.0));
        }
        if let Some(conflict) =
            tables.program_conflict(&program.code, &program.name, Some(program.id))
        {
            return Err(RepositoryError::DuplicateKey(conflict));
        }
        tables.programs.insert(program.id, program.clone());
        Ok(program)
    }

    fn delete_program(&self, id: ProgramId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables
            .programs
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::not_found("program", id.0))
    }

    fn fetch_program(&self, id: ProgramId) -> Result<Option<Program>, RepositoryError> {
        Ok(self.tables()?.programs.get(&id).cloned())
    }

    fn list_programs(&self) -> Result<Vec<Program>, RepositoryError> {
        let mut programs: Vec<Program> = self.tables()?.programs.values().cloned().collect();
        programs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(programs)
    }
}

impl SubjectRepository for InMemoryRegistrarStore {
    fn insert_subject(&self, subject: NewSubject) -> Result<Subject, RepositoryError> {
        self.tables()?.add_subject(subject)
    }

    fn insert_subjects(&self, subjects: Vec<SubjectBatchRow>) -> Result<Vec<Subject>, BatchError> {
        self.apply_batch(subjects, |tables, stored: &[Subject], row| {
            let mut subject = row.subject;
            if let Some(earlier) = row.prerequisite_row {
                let prerequisite = stored
                    .get(earlier)
                    .ok_or(RepositoryError::missing("batch row", earlier as i64))?;
                subject.prerequisite_id = Some(prerequisite.id);
            }
            tables.add_subject(subject)
        })
    }

    fn update_subject(&self, subject: Subject) -> Result<Subject, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.subjects.contains_key(&subject.id) {
            return Err(RepositoryError::not_found("subject", subject.id.0));
        }
        tables.check_subject(
            Some(subject.id),
            &subject.code,
            subject.program_id,
            subject.prerequisite_id,
        )?;
        tables.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    fn delete_subject(&self, id: SubjectId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables
            .subjects
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::not_found("subject", id.0))
    }

    fn fetch_subject(&self, id: SubjectId) -> Result<Option<Subject>, RepositoryError> {
        Ok(self.tables()?.subjects.get(&id).cloned())
    }

    fn list_subjects(&self) -> Result<Vec<Subject>, RepositoryError> {
        let mut subjects: Vec<Subject> = self.tables()?.subjects.values().cloned().collect();
        subjects.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(subjects)
    }
}

impl ScheduleRepository for InMemoryRegistrarStore {
    fn insert_schedule(
        &self,
        schedule: NewClassSchedule,
    ) -> Result<ClassSchedule, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.subjects.contains_key(&schedule.subject_id) {
            return Err(RepositoryError::missing("subject", schedule.subject_id.0));
        }
        let stored = schedule.with_id(ScheduleId(tables.next_id()));
        tables.schedules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.schedules.contains_key(&schedule.id) {
            return Err(RepositoryError::not_found("class schedule", schedule.id.0));
        }
        if !tables.subjects.contains_key(&schedule.subject_id) {
            return Err(RepositoryError::missing("subject", schedule.subject_id.0));
        }
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables
            .schedules
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::not_found("class schedule", id.0))
    }

    fn fetch_schedule(&self, id: ScheduleId) -> Result<Option<ClassSchedule>, RepositoryError> {
        Ok(self.tables()?.schedules.get(&id).cloned())
    }

    fn list_schedules(&self) -> Result<Vec<ClassSchedule>, RepositoryError> {
        let tables = self.tables()?;
        let mut schedules: Vec<ClassSchedule> = tables.schedules.values().cloned().collect();
        let subject_code = |id: SubjectId| {
            tables
                .subjects
                .get(&id)
                .map(|subject| subject.code.clone())
                .unwrap_or_default()
        };
        schedules.sort_by(|a, b| {
            (subject_code(a.subject_id), &a.semester, &a.day).cmp(&(
                subject_code(b.subject_id),
                &b.semester,
                &b.day,
            ))
        });
        Ok(schedules)
    }
}

impl StudentRepository for InMemoryRegistrarStore {
    fn fetch_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.tables()?.students.get(&id).cloned())
    }

    fn student_for_user(&self, user_id: UserId) -> Result<Option<Student>, RepositoryError> {
        Ok(self
            .tables()?
            .students
            .values()
            .find(|student| student.user_id == Some(user_id))
            .cloned())
    }

    fn list_students(&self) -> Result<Vec<Student>, RepositoryError> {
        Ok(self.tables()?.students.values().rev().cloned().collect())
    }

    fn update_student(
        &self,
        id: StudentId,
        profile: StudentProfile,
    ) -> Result<Student, RepositoryError> {
        let mut tables = self.tables()?;
        let student = tables
            .students
            .get_mut(&id)
            .ok_or(RepositoryError::not_found("student", id.0))?;
        student.student_number = profile.student_number;
        student.first_name = profile.first_name;
        student.middle_name = profile.middle_name;
        student.last_name = profile.last_name;
        student.birthdate = profile.birthdate;
        student.address = profile.address;
        student.contact = profile.contact;
        Ok(student.clone())
    }
}

impl UserRepository for InMemoryRegistrarStore {
    fn insert_user(
        &self,
        user: NewUser,
        profile: Option<StudentProfile>,
    ) -> Result<(User, Option<Student>), RepositoryError> {
        let mut tables = self.tables()?;
        let stored = tables.add_user(user)?;
        let student = profile.map(|profile| tables.new_student(Some(stored.id), profile));
        Ok((stored, student))
    }

    fn insert_first_admin(&self, user: NewUser) -> Result<Option<User>, RepositoryError> {
        let mut tables = self.tables()?;
        if tables.users.values().any(|existing| existing.role == Role::Admin) {
            return Ok(None);
        }
        tables.add_user(user).map(Some)
    }

    fn update_user(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.users.contains_key(&user.id) {
            return Err(RepositoryError::not_found("user", user.id.0));
        }
        if tables.username_taken(&user.username, Some(user.id)) {
            return Err(RepositoryError::DuplicateKey(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn find_user(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables()?
            .users
            .values()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    fn fetch_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.tables()?.users.values().cloned().collect())
    }

    fn delete_user(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if tables.users.remove(&id).is_none() {
            return Err(RepositoryError::not_found("user", id.0));
        }
        for student in tables.students.values_mut() {
            if student.user_id == Some(id) {
                student.user_id = None;
            }
        }
        Ok(())
    }
}

impl EnrollmentRepository for InMemoryRegistrarStore {
    fn submit_enrollment(
        &self,
        draft: EnrollmentDraft,
    ) -> Result<EnrollmentRecord, RepositoryError> {
        let mut tables = self.tables()?;

        if !tables.students.contains_key(&draft.student_id) {
            return Err(RepositoryError::missing("student", draft.student_id.0));
        }
        if !tables.programs.contains_key(&draft.program_id) {
            return Err(RepositoryError::missing("program", draft.program_id.0));
        }
        let mut seen = HashSet::new();
        for subject_id in &draft.subject_ids {
            if !tables.subjects.contains_key(subject_id) {
                return Err(RepositoryError::missing("subject", subject_id.0));
            }
            if !seen.insert(*subject_id) {
                return Err(RepositoryError::DuplicateKey(format!(
                    "subject {subject_id} selected more than once"
                )));
            }
        }

        if let Some(student) = tables.students.get_mut(&draft.student_id) {
            student.program_id = Some(draft.program_id);
            student.year_level = Some(draft.year_level);
        }

        let enrollment = Enrollment {
            id: EnrollmentId(tables.next_id()),
            student_id: draft.student_id,
            semester: draft.semester,
            school_year: draft.school_year,
            status: EnrollmentStatus::Pending,
            created_at: draft.created_at,
        };
        tables.enrollments.insert(enrollment.id, enrollment.clone());
        tables
            .enrollment_subjects
            .extend(draft.subject_ids.iter().map(|subject_id| EnrollmentSubject {
                enrollment_id: enrollment.id,
                subject_id: *subject_id,
            }));

        Ok(EnrollmentRecord {
            enrollment,
            subject_ids: draft.subject_ids,
        })
    }

    fn fetch_enrollment(
        &self,
        id: EnrollmentId,
    ) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables.enrollments.get(&id).map(|enrollment| EnrollmentRecord {
            enrollment: enrollment.clone(),
            subject_ids: tables.subject_ids_for(id),
        }))
    }

    fn pending_enrollments(&self) -> Result<Vec<PendingEnrollment>, RepositoryError> {
        let tables = self.tables()?;
        let mut pending: Vec<PendingEnrollment> = tables
            .enrollments
            .values()
            .filter(|enrollment| enrollment.status == EnrollmentStatus::Pending)
            .filter_map(|enrollment| {
                // Inner join: enrollments whose student row is gone are skipped.
                let student = tables.students.get(&enrollment.student_id)?;
                Some(PendingEnrollment {
                    enrollment_id: enrollment.id,
                    student_name: student.display_name(),
                    semester: enrollment.semester.clone(),
                    school_year: enrollment.school_year.clone(),
                    status: enrollment.status,
                    created_at: enrollment.created_at,
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.enrollment_id.cmp(&b.enrollment_id))
        });
        Ok(pending)
    }

    fn transition_status(
        &self,
        id: EnrollmentId,
        expected: Option<EnrollmentStatus>,
        next: EnrollmentStatus,
    ) -> Result<Enrollment, RepositoryError> {
        let mut tables = self.tables()?;
        let enrollment = tables
            .enrollments
            .get_mut(&id)
            .ok_or(RepositoryError::not_found("enrollment", id.0))?;
        if let Some(expected) = expected {
            if enrollment.status != expected {
                return Err(RepositoryError::StatusConflict {
                    id,
                    actual: enrollment.status,
                    requested: next,
                });
            }
        }
        enrollment.status = next;
        Ok(enrollment.clone())
    }
}
