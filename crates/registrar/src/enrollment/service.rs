use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::access::{require, require_any, require_student, AccessContext, AccessDenied, Role};
use crate::config::TransitionPolicy;
use crate::domain::{
    Enrollment, EnrollmentDraft, EnrollmentId, EnrollmentRecord, EnrollmentStatus,
    PendingEnrollment, ProgramId, SubjectId, ValidationAction,
};
use crate::error::RegistrarError;
use crate::storage::RegistrarStore;

/// Subject selection a student submits for one semester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub program_id: ProgramId,
    pub year_level: u8,
    pub semester: String,
    pub school_year: String,
    pub subject_ids: Vec<SubjectId>,
}

/// Registrar decision as received over the wire; `action` is `approve` or `reject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub action: String,
}

/// Drives the pending → approved/rejected lifecycle.
pub struct EnrollmentWorkflow<R> {
    repository: Arc<R>,
    policy: TransitionPolicy,
}

impl<R> EnrollmentWorkflow<R>
where
    R: RegistrarStore + 'static,
{
    pub fn new(repository: Arc<R>, policy: TransitionPolicy) -> Self {
        Self { repository, policy }
    }

    /// Record a pending enrollment for the calling student. The student's program and
    /// year level, the enrollment, and every subject row are written together.
    pub fn submit(
        &self,
        context: Option<&AccessContext>,
        request: EnrollmentRequest,
    ) -> Result<EnrollmentRecord, RegistrarError> {
        let (caller, student_id) = require_student(context)?;

        let semester = request.semester.trim();
        let school_year = request.school_year.trim();
        if semester.is_empty() || school_year.is_empty() {
            return Err(RegistrarError::invalid_input(
                "semester and school year are required",
            ));
        }
        if request.year_level == 0 {
            return Err(RegistrarError::invalid_input("year level must be at least 1"));
        }
        if request.subject_ids.is_empty() {
            return Err(RegistrarError::invalid_input(
                "select at least one subject to enroll",
            ));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = request.subject_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(RegistrarError::DuplicateKey(format!(
                "subject {repeated} selected more than once"
            )));
        }

        let draft = EnrollmentDraft {
            student_id,
            program_id: request.program_id,
            year_level: request.year_level,
            semester: semester.to_string(),
            school_year: school_year.to_string(),
            subject_ids: request.subject_ids,
            created_at: Utc::now(),
        };

        let record = self.repository.submit_enrollment(draft)?;
        tracing::info!(
            enrollment = %record.enrollment.id,
            student = %student_id,
            subjects = record.subject_ids.len(),
            by = %caller.username,
            "enrollment submitted"
        );
        Ok(record)
    }

    /// Apply a registrar decision to an enrollment.
    pub fn validate(
        &self,
        context: Option<&AccessContext>,
        id: EnrollmentId,
        action: ValidationAction,
    ) -> Result<Enrollment, RegistrarError> {
        let caller = require(context, Role::Registrar)?;
        let next = action.target_status();
        let expected = match self.policy {
            TransitionPolicy::Strict => Some(EnrollmentStatus::Pending),
            TransitionPolicy::Permissive => None,
        };

        let enrollment = self.repository.transition_status(id, expected, next)?;
        tracing::info!(
            enrollment = %id,
            status = %enrollment.status,
            by = %caller.username,
            "enrollment validated"
        );
        Ok(enrollment)
    }

    /// [`validate`](Self::validate) with the action given as text.
    pub fn validate_action(
        &self,
        context: Option<&AccessContext>,
        id: EnrollmentId,
        action: &str,
    ) -> Result<Enrollment, RegistrarError> {
        require(context, Role::Registrar)?;
        let action = ValidationAction::parse(action).ok_or_else(|| {
            RegistrarError::invalid_input(format!(
                "unknown action '{}', expected approve or reject",
                action.trim()
            ))
        })?;
        self.validate(context, id, action)
    }

    /// Pending enrollments, oldest first.
    pub fn list_pending(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<Vec<PendingEnrollment>, RegistrarError> {
        require(context, Role::Registrar)?;
        Ok(self.repository.pending_enrollments()?)
    }

    /// Registrars may read any enrollment; students only their own.
    pub fn get(
        &self,
        context: Option<&AccessContext>,
        id: EnrollmentId,
    ) -> Result<EnrollmentRecord, RegistrarError> {
        let caller = require_any(context)?;
        let owner = match caller.role {
            Role::Registrar => None,
            Role::Student => Some(require_student(context)?.1),
            other => {
                return Err(AccessDenied::RoleMismatch {
                    required: Role::Registrar,
                    actual: other,
                }
                .into())
            }
        };

        let record = self
            .repository
            .fetch_enrollment(id)?
            .ok_or(RegistrarError::NotFound {
                entity: "enrollment",
                id: id.0,
            })?;

        if let Some(student_id) = owner {
            if record.enrollment.student_id != student_id {
                tracing::warn!(
                    enrollment = %id,
                    caller = %caller.username,
                    "enrollment read refused"
                );
                return Err(AccessDenied::NotOwner {
                    username: caller.username.clone(),
                }
                .into());
            }
        }
        Ok(record)
    }
}
