//! Prerequisite graph checks over `Subject.prerequisite_id`.
//!
//! Each subject names at most one prerequisite, so the graph is a set of chains and a
//! cycle check is a walk from the proposed prerequisite back towards the subject.

use std::collections::HashSet;

use crate::domain::SubjectId;
use crate::storage::RepositoryError;

/// Verify that `subject` (None for a subject not yet stored) may require `prerequisite`.
///
/// `lookup` returns `None` for an unknown subject and `Some(prerequisite)` otherwise.
/// A prerequisite that does not exist is an `InvalidReference`; naming the subject
/// itself, or any chain that leads back to it, is a `PrerequisiteCycle`.
pub fn check_prerequisite<F>(
    subject: Option<SubjectId>,
    prerequisite: SubjectId,
    mut lookup: F,
) -> Result<(), RepositoryError>
where
    F: FnMut(SubjectId) -> Result<Option<Option<SubjectId>>, RepositoryError>,
{
    let cycle = |subject_id: SubjectId| RepositoryError::PrerequisiteCycle {
        subject_id: subject_id.0,
        prerequisite_id: prerequisite.0,
    };

    if subject == Some(prerequisite) {
        return Err(cycle(prerequisite));
    }

    let mut next = match lookup(prerequisite)? {
        Some(next) => next,
        None => return Err(RepositoryError::missing("subject", prerequisite.0)),
    };

    // A subject that is not stored yet has no dependents, so it cannot close a loop.
    let Some(subject_id) = subject else {
        return Ok(());
    };

    let mut visited = HashSet::from([prerequisite]);
    while let Some(current) = next {
        if current == subject_id {
            return Err(cycle(subject_id));
        }
        if !visited.insert(current) {
            // Loop that does not pass through `subject_id`; already stored, not ours.
            tracing::warn!(subject = %current, "existing prerequisite loop detected");
            return Ok(());
        }
        next = match lookup(current)? {
            Some(next) => next,
            // Dangling reference left behind by a delete.
            None => return Ok(()),
        };
    }

    Ok(())
}

/// Follow the chain starting at `start`'s prerequisite, stopping at dangling
/// references and at any repeated subject.
pub fn prerequisite_chain<F>(
    start: SubjectId,
    mut lookup: F,
) -> Result<Vec<SubjectId>, RepositoryError>
where
    F: FnMut(SubjectId) -> Result<Option<Option<SubjectId>>, RepositoryError>,
{
    let mut chain = Vec::new();
    let mut visited = HashSet::from([start]);
    let mut next = lookup(start)?.flatten();

    while let Some(current) = next {
        if !visited.insert(current) {
            break;
        }
        match lookup(current)? {
            Some(prerequisite) => {
                chain.push(current);
                next = prerequisite;
            }
            None => break,
        }
    }

    Ok(chain)
}
