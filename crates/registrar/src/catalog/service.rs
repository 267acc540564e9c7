use std::sync::Arc;

use crate::access::{require, require_any, AccessContext, Role};
use crate::catalog::prerequisites::prerequisite_chain;
use crate::domain::{
    ClassSchedule, NewClassSchedule, NewProgram, NewSubject, Program, ProgramId, ScheduleId,
    Subject, SubjectId,
};
use crate::error::RegistrarError;
use crate::storage::{BatchError, RegistrarStore, SubjectBatchRow};

/// Bulk catalog write refused as a whole or at one entry. Nothing is stored either way.
#[derive(Debug, thiserror::Error)]
pub enum BulkInsertError {
    #[error(transparent)]
    Refused(#[from] RegistrarError),
    #[error("entry {row}: {source}")]
    Row { row: usize, source: RegistrarError },
}

impl From<BatchError> for BulkInsertError {
    fn from(err: BatchError) -> Self {
        Self::Row {
            row: err.row,
            source: err.source.into(),
        }
    }
}

/// Administrative CRUD over programs, subjects, and class schedules.
pub struct CatalogService<R> {
    repository: Arc<R>,
}

impl<R> CatalogService<R>
where
    R: RegistrarStore + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn add_program(
        &self,
        context: Option<&AccessContext>,
        program: NewProgram,
    ) -> Result<Program, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let program = NewProgram {
            code: required_text("program code", &program.code)?,
            name: required_text("program name", &program.name)?,
        };

        let stored = self.repository.insert_program(program)?;
        tracing::info!(
            program = %stored.id,
            code = %stored.code,
            by = %caller.username,
            "program added"
        );
        Ok(stored)
    }

    /// Add every program or none of them.
    pub fn add_programs(
        &self,
        context: Option<&AccessContext>,
        programs: Vec<NewProgram>,
    ) -> Result<Vec<Program>, BulkInsertError> {
        let caller = require(context, Role::Admin).map_err(RegistrarError::from)?;
        let programs = programs
            .into_iter()
            .enumerate()
            .map(|(row, program)| {
                let at_row = |source| BulkInsertError::Row { row, source };
                Ok(NewProgram {
                    code: required_text("program code", &program.code).map_err(at_row)?,
                    name: required_text("program name", &program.name).map_err(at_row)?,
                })
            })
            .collect::<Result<Vec<_>, BulkInsertError>>()?;

        let stored = self.repository.insert_programs(programs)?;
        tracing::info!(count = stored.len(), by = %caller.username, "programs added");
        Ok(stored)
    }

    pub fn edit_program(
        &self,
        context: Option<&AccessContext>,
        program: Program,
    ) -> Result<Program, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let program = Program {
            id: program.id,
            code: required_text("program code", &program.code)?,
            name: required_text("program name", &program.name)?,
        };

        let stored = self.repository.update_program(program)?;
        tracing::info!(program = %stored.id, by = %caller.username, "program updated");
        Ok(stored)
    }

    /// Subjects and students that still point at the program are left as they are.
    pub fn delete_program(
        &self,
        context: Option<&AccessContext>,
        id: ProgramId,
    ) -> Result<(), RegistrarError> {
        let caller = require(context, Role::Admin)?;
        self.repository.delete_program(id)?;
        tracing::info!(program = %id, by = %caller.username, "program deleted");
        Ok(())
    }

    pub fn get_program(
        &self,
        context: Option<&AccessContext>,
        id: ProgramId,
    ) -> Result<Program, RegistrarError> {
        require_any(context)?;
        self.repository
            .fetch_program(id)?
            .ok_or(RegistrarError::NotFound {
                entity: "program",
                id: id.0,
            })
    }

    pub fn list_programs(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<Vec<Program>, RegistrarError> {
        require_any(context)?;
        Ok(self.repository.list_programs()?)
    }

    pub fn add_subject(
        &self,
        context: Option<&AccessContext>,
        subject: NewSubject,
    ) -> Result<Subject, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let subject = validate_subject(subject)?;

        let stored = self.repository.insert_subject(subject)?;
        tracing::info!(
            subject = %stored.id,
            code = %stored.code,
            prerequisite = ?stored.prerequisite_id.map(|id| id.0),
            by = %caller.username,
            "subject added"
        );
        Ok(stored)
    }

    /// Add every subject or none of them. Rows may name an earlier row as prerequisite.
    pub fn add_subjects(
        &self,
        context: Option<&AccessContext>,
        subjects: Vec<SubjectBatchRow>,
    ) -> Result<Vec<Subject>, BulkInsertError> {
        let caller = require(context, Role::Admin).map_err(RegistrarError::from)?;
        let subjects = subjects
            .into_iter()
            .enumerate()
            .map(|(row, entry)| {
                let at_row = |source| BulkInsertError::Row { row, source };
                let prerequisite_row = entry.prerequisite_row;
                if prerequisite_row.is_some_and(|earlier| earlier >= row) {
                    return Err(at_row(RegistrarError::invalid_input(
                        "prerequisite must be an earlier entry",
                    )));
                }
                Ok(SubjectBatchRow {
                    subject: validate_subject(entry.subject).map_err(at_row)?,
                    prerequisite_row,
                })
            })
            .collect::<Result<Vec<_>, BulkInsertError>>()?;

        let stored = self.repository.insert_subjects(subjects)?;
        tracing::info!(count = stored.len(), by = %caller.username, "subjects added");
        Ok(stored)
    }

    pub fn edit_subject(
        &self,
        context: Option<&AccessContext>,
        subject: Subject,
    ) -> Result<Subject, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let id = subject.id;
        let subject = validate_subject(NewSubject {
            code: subject.code,
            title: subject.title,
            units: subject.units,
            program_id: subject.program_id,
            year_level: subject.year_level,
            semester: subject.semester,
            prerequisite_id: subject.prerequisite_id,
        })?
        .with_id(id);

        let stored = self.repository.update_subject(subject)?;
        tracing::info!(subject = %stored.id, by = %caller.username, "subject updated");
        Ok(stored)
    }

    /// Prerequisite links and schedules naming the subject are not cleared.
    pub fn delete_subject(
        &self,
        context: Option<&AccessContext>,
        id: SubjectId,
    ) -> Result<(), RegistrarError> {
        let caller = require(context, Role::Admin)?;
        self.repository.delete_subject(id)?;
        tracing::info!(subject = %id, by = %caller.username, "subject deleted");
        Ok(())
    }

    pub fn get_subject(
        &self,
        context: Option<&AccessContext>,
        id: SubjectId,
    ) -> Result<Subject, RegistrarError> {
        require_any(context)?;
        self.fetch_subject(id)
    }

    pub fn list_subjects(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<Vec<Subject>, RegistrarError> {
        require_any(context)?;
        Ok(self.repository.list_subjects()?)
    }

    /// Subjects that must be completed before `id`, nearest first.
    pub fn prerequisites_of(
        &self,
        context: Option<&AccessContext>,
        id: SubjectId,
    ) -> Result<Vec<Subject>, RegistrarError> {
        require_any(context)?;
        self.fetch_subject(id)?;

        let chain = prerequisite_chain(id, |subject_id| {
            self.repository
                .fetch_subject(subject_id)
                .map(|found| found.map(|subject| subject.prerequisite_id))
        })?;

        chain
            .into_iter()
            .map(|subject_id| self.fetch_subject(subject_id))
            .collect()
    }

    pub fn add_schedule(
        &self,
        context: Option<&AccessContext>,
        schedule: NewClassSchedule,
    ) -> Result<ClassSchedule, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let schedule = validate_schedule(schedule)?;

        let stored = self.repository.insert_schedule(schedule)?;
        tracing::info!(
            schedule = %stored.id,
            subject = %stored.subject_id,
            day = %stored.day,
            by = %caller.username,
            "class schedule added"
        );
        Ok(stored)
    }

    pub fn edit_schedule(
        &self,
        context: Option<&AccessContext>,
        schedule: ClassSchedule,
    ) -> Result<ClassSchedule, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let id = schedule.id;
        let schedule = validate_schedule(NewClassSchedule {
            subject_id: schedule.subject_id,
            semester: schedule.semester,
            day: schedule.day,
            time_start: schedule.time_start,
            time_end: schedule.time_end,
            room: schedule.room,
            instructor: schedule.instructor,
            section: schedule.section,
        })?
        .with_id(id);

        let stored = self.repository.update_schedule(schedule)?;
        tracing::info!(schedule = %stored.id, by = %caller.username, "class schedule updated");
        Ok(stored)
    }

    pub fn delete_schedule(
        &self,
        context: Option<&AccessContext>,
        id: ScheduleId,
    ) -> Result<(), RegistrarError> {
        let caller = require(context, Role::Admin)?;
        self.repository.delete_schedule(id)?;
        tracing::info!(schedule = %id, by = %caller.username, "class schedule deleted");
        Ok(())
    }

    pub fn get_schedule(
        &self,
        context: Option<&AccessContext>,
        id: ScheduleId,
    ) -> Result<ClassSchedule, RegistrarError> {
        require_any(context)?;
        self.repository
            .fetch_schedule(id)?
            .ok_or(RegistrarError::NotFound {
                entity: "class schedule",
                id: id.0,
            })
    }

    pub fn list_schedules(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<Vec<ClassSchedule>, RegistrarError> {
        require_any(context)?;
        Ok(self.repository.list_schedules()?)
    }

    fn fetch_subject(&self, id: SubjectId) -> Result<Subject, RegistrarError> {
        self.repository
            .fetch_subject(id)?
            .ok_or(RegistrarError::NotFound {
                entity: "subject",
                id: id.0,
            })
    }
}

fn required_text(field: &str, value: &str) -> Result<String, RegistrarError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistrarError::invalid_input(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_subject(subject: NewSubject) -> Result<NewSubject, RegistrarError> {
    if subject.units == 0 {
        return Err(RegistrarError::invalid_input("units must be at least 1"));
    }
    if subject.year_level == 0 {
        return Err(RegistrarError::invalid_input("year level must be at least 1"));
    }

    Ok(NewSubject {
        code: required_text("subject code", &subject.code)?,
        title: required_text("subject title", &subject.title)?,
        semester: required_text("semester", &subject.semester)?,
        ..subject
    })
}

fn validate_schedule(schedule: NewClassSchedule) -> Result<NewClassSchedule, RegistrarError> {
    if schedule.time_end <= schedule.time_start {
        return Err(RegistrarError::invalid_input(format!(
            "schedule ends at {} but starts at {}",
            schedule.time_end.format("%H:%M"),
            schedule.time_start.format("%H:%M")
        )));
    }

    Ok(NewClassSchedule {
        semester: required_text("semester", &schedule.semester)?,
        day: required_text("day", &schedule.day)?,
        room: schedule.room.trim().to_string(),
        ..schedule
    })
}
