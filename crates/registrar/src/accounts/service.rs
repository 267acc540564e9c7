use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::{require, require_any, require_student, AccessContext, AccessDenied, Role};
use crate::domain::{NewUser, Program, Student, StudentId, StudentProfile, User, UserId};
use crate::error::RegistrarError;
use crate::storage::RegistrarStore;

/// Password hashing lives outside the registrar core.
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, RegistrarError>;
    /// Malformed stored hashes verify as `false`.
    fn verify(&self, secret: &str, stored_hash: &str) -> bool;
}

/// Public sign-up form for a new student.
#[derive(Debug, Clone, Deserialize)]
pub struct StudentRegistration {
    pub username: String,
    pub password: String,
    #[serde(flatten)]
    pub profile: StudentProfile,
}

/// Account created by an administrator. Student accounts need a profile.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub profile: Option<StudentProfile>,
}

/// Account edit. A missing or empty password keeps the current one.
#[derive(Debug, Clone, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// A student's own record with the program it is enrolled under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentDashboard {
    pub student: Student,
    pub program: Option<Program>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredAccount {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<Student>,
}

pub struct AccountService<R, V> {
    repository: Arc<R>,
    verifier: Arc<V>,
}

impl<R, V> AccountService<R, V>
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    pub fn new(repository: Arc<R>, verifier: Arc<V>) -> Self {
        Self {
            repository,
            verifier,
        }
    }

    /// Resolve the caller's context. Unknown users and wrong passwords fail alike.
    pub fn authenticate(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<AccessContext, RegistrarError> {
        let user = match self.repository.find_user(username.trim())? {
            Some(user) if self.verifier.verify(secret, &user.password_hash) => user,
            _ => {
                tracing::warn!(username = %username.trim(), "sign-in failed");
                return Err(AccessDenied::InvalidCredentials.into());
            }
        };

        let mut context = AccessContext::new(user.role, user.username.clone(), user.id);
        if user.role == Role::Student {
            if let Some(student) = self.repository.student_for_user(user.id)? {
                context = context.with_student(student.id);
            }
        }
        tracing::debug!(username = %context.username, role = %context.role, "signed in");
        Ok(context)
    }

    /// Self-service sign-up. Creates the user and its student record together.
    pub fn register_student(
        &self,
        registration: StudentRegistration,
    ) -> Result<RegisteredAccount, RegistrarError> {
        let profile = validate_profile(registration.profile)?;
        let user = self.new_user(
            &registration.username,
            &registration.password,
            Role::Student,
        )?;

        let (user, student) = self.repository.insert_user(user, Some(profile))?;
        tracing::info!(user = %user.id, username = %user.username, "student registered");
        Ok(RegisteredAccount { user, student })
    }

    pub fn create_user(
        &self,
        context: Option<&AccessContext>,
        account: NewAccount,
    ) -> Result<RegisteredAccount, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let profile = match (account.role, account.profile) {
            (Role::Student, Some(profile)) => Some(validate_profile(profile)?),
            (Role::Student, None) => {
                return Err(RegistrarError::invalid_input(
                    "student accounts need a student profile",
                ))
            }
            (_, _) => None,
        };
        let user = self.new_user(&account.username, &account.password, account.role)?;

        let (user, student) = self.repository.insert_user(user, profile)?;
        tracing::info!(
            user = %user.id,
            username = %user.username,
            role = %user.role,
            by = %caller.username,
            "user created"
        );
        Ok(RegisteredAccount { user, student })
    }

    pub fn list_users(&self, context: Option<&AccessContext>) -> Result<Vec<User>, RegistrarError> {
        require(context, Role::Admin)?;
        Ok(self.repository.list_users()?)
    }

    /// Remove an account. A linked student record stays, unlinked.
    pub fn delete_user(
        &self,
        context: Option<&AccessContext>,
        id: UserId,
    ) -> Result<(), RegistrarError> {
        let caller = require(context, Role::Admin)?;
        if caller.user_id == id {
            return Err(RegistrarError::invalid_input(
                "administrators cannot delete their own account",
            ));
        }
        self.repository.delete_user(id)?;
        tracing::info!(user = %id, by = %caller.username, "user deleted");
        Ok(())
    }

    /// Change another account's username and, optionally, its password.
    pub fn edit_user(
        &self,
        context: Option<&AccessContext>,
        id: UserId,
        update: UserUpdate,
    ) -> Result<User, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let user = self.apply_update(id, update)?;
        tracing::info!(
            user = %user.id,
            username = %user.username,
            by = %caller.username,
            "user edited"
        );
        Ok(user)
    }

    /// Any signed-in caller may change its own username and password.
    pub fn update_own_account(
        &self,
        context: Option<&AccessContext>,
        update: UserUpdate,
    ) -> Result<User, RegistrarError> {
        let caller = require_any(context)?;
        let user = self.apply_update(caller.user_id, update)?;
        tracing::info!(user = %user.id, username = %user.username, "own account updated");
        Ok(user)
    }

    /// Newest first.
    pub fn list_students(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<Vec<Student>, RegistrarError> {
        require(context, Role::Admin)?;
        Ok(self.repository.list_students()?)
    }

    /// Replace a student's personal details. Program and year level are left to enrollment.
    pub fn edit_student(
        &self,
        context: Option<&AccessContext>,
        id: StudentId,
        profile: StudentProfile,
    ) -> Result<Student, RegistrarError> {
        let caller = require(context, Role::Admin)?;
        let profile = validate_profile(profile)?;
        let student = self.repository.update_student(id, profile)?;
        tracing::info!(student = %student.id, by = %caller.username, "student edited");
        Ok(student)
    }

    /// The signed-in student's record and program.
    pub fn my_profile(
        &self,
        context: Option<&AccessContext>,
    ) -> Result<StudentDashboard, RegistrarError> {
        let (_, student_id) = require_student(context)?;
        let student = self
            .repository
            .fetch_student(student_id)?
            .ok_or(RegistrarError::NotFound {
                entity: "student",
                id: student_id.0,
            })?;
        let program = match student.program_id {
            Some(program_id) => self.repository.fetch_program(program_id)?,
            None => None,
        };
        Ok(StudentDashboard { student, program })
    }

    /// Create the first administrator. Returns `None` when an admin already exists.
    pub fn bootstrap_admin(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Option<User>, RegistrarError> {
        let user = self.new_user(username, secret, Role::Admin)?;
        match self.repository.insert_first_admin(user)? {
            Some(user) => {
                tracing::info!(
                    user = %user.id,
                    username = %user.username,
                    "bootstrap administrator created"
                );
                Ok(Some(user))
            }
            None => {
                tracing::debug!("administrator already present, bootstrap skipped");
                Ok(None)
            }
        }
    }

    fn apply_update(&self, id: UserId, update: UserUpdate) -> Result<User, RegistrarError> {
        let current = self
            .repository
            .fetch_user(id)?
            .ok_or(RegistrarError::NotFound {
                entity: "user",
                id: id.0,
            })?;
        let username = update.username.trim();
        if username.is_empty() {
            return Err(RegistrarError::invalid_input("username must not be empty"));
        }
        let password_hash = match update.password.as_deref() {
            Some(secret) if !secret.is_empty() => self.verifier.hash(secret)?,
            _ => current.password_hash,
        };

        Ok(self.repository.update_user(User {
            id,
            username: username.to_string(),
            password_hash,
            role: current.role,
        })?)
    }

    fn new_user(
        &self,
        username: &str,
        secret: &str,
        role: Role,
    ) -> Result<NewUser, RegistrarError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(RegistrarError::invalid_input("username must not be empty"));
        }
        if secret.is_empty() {
            return Err(RegistrarError::invalid_input("password must not be empty"));
        }
        Ok(NewUser {
            username: username.to_string(),
            password_hash: self.verifier.hash(secret)?,
            role,
        })
    }
}

fn validate_profile(profile: StudentProfile) -> Result<StudentProfile, RegistrarError> {
    let first_name = profile.first_name.trim().to_string();
    let last_name = profile.last_name.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(RegistrarError::invalid_input(
            "first and last name are required",
        ));
    }
    Ok(StudentProfile {
        first_name,
        last_name,
        middle_name: profile.middle_name.trim().to_string(),
        ..profile
    })
}
