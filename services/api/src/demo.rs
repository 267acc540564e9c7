use std::io::Cursor;
use std::sync::Arc;

use crate::infra::BcryptCredentialVerifier;
use clap::Args;
use registrar::access::Role;
use registrar::accounts::{AccountService, NewAccount, StudentRegistration};
use registrar::catalog::{CatalogImporter, CatalogService};
use registrar::config::TransitionPolicy;
use registrar::domain::{StudentProfile, ValidationAction};
use registrar::enrollment::{EnrollmentRequest, EnrollmentWorkflow};
use registrar::error::AppError;
use registrar::storage::InMemoryRegistrarStore;

const DEMO_PROGRAMS: &str = include_str!("../../../crates/registrar/data/programs.csv");
const DEMO_SUBJECTS: &str = include_str!("../../../crates/registrar/data/subjects.csv");

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Let a second registrar decision overwrite the first.
    #[arg(long)]
    pub(crate) permissive: bool,
    /// Reject the submission instead of approving it.
    #[arg(long)]
    pub(crate) reject: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let policy = if args.permissive {
        TransitionPolicy::Permissive
    } else {
        TransitionPolicy::Strict
    };
    let (first, second) = if args.reject {
        (ValidationAction::Reject, ValidationAction::Approve)
    } else {
        (ValidationAction::Approve, ValidationAction::Reject)
    };

    let store = Arc::new(InMemoryRegistrarStore::new());
    let accounts = AccountService::new(
        store.clone(),
        Arc::new(BcryptCredentialVerifier::default()),
    );
    let catalog = CatalogService::new(store.clone());
    let workflow = EnrollmentWorkflow::new(store, policy);

    println!("Registrar workflow demo ({policy:?} transitions)");

    accounts.bootstrap_admin("admin", "admin-demo")?;
    let admin = accounts.authenticate("admin", "admin-demo")?;
    let programs =
        CatalogImporter::programs_from_reader(&catalog, Some(&admin), Cursor::new(DEMO_PROGRAMS))?;
    let subjects =
        CatalogImporter::subjects_from_reader(&catalog, Some(&admin), Cursor::new(DEMO_SUBJECTS))?;
    println!(
        "- Catalog loaded: {} programs, {} subjects",
        programs.len(),
        subjects.len()
    );

    accounts.create_user(
        Some(&admin),
        NewAccount {
            username: "registrar".to_string(),
            password: "registrar-demo".to_string(),
            role: Role::Registrar,
            profile: None,
        },
    )?;
    let registrar = accounts.authenticate("registrar", "registrar-demo")?;

    accounts.register_student(StudentRegistration {
        username: "juan".to_string(),
        password: "student-demo".to_string(),
        profile: StudentProfile {
            first_name: "Juan".to_string(),
            last_name: "Dela Cruz".to_string(),
            ..StudentProfile::default()
        },
    })?;
    let student = accounts.authenticate("juan", "student-demo")?;

    let program = programs
        .iter()
        .find(|program| program.code == "BSCS")
        .or_else(|| programs.first())
        .ok_or_else(|| registrar::RegistrarError::invalid_input("demo catalog has no programs"))?;
    let selection: Vec<_> = subjects
        .iter()
        .filter(|subject| {
            subject.program_id == program.id && subject.year_level == 1 && subject.semester == "1st"
        })
        .collect();

    let record = workflow.submit(
        Some(&student),
        EnrollmentRequest {
            program_id: program.id,
            year_level: 1,
            semester: "1st".to_string(),
            school_year: "2024-2025".to_string(),
            subject_ids: selection.iter().map(|subject| subject.id).collect(),
        },
    )?;
    println!(
        "- {} submitted enrollment {} for {} ({} subjects) -> {}",
        student.username,
        record.enrollment.id,
        program.code,
        record.subject_ids.len(),
        record.enrollment.status
    );
    for subject in &selection {
        println!("    {} {} ({} units)", subject.code, subject.title, subject.units);
    }

    let queue = workflow.list_pending(Some(&registrar))?;
    println!("- Registrar queue holds {} pending enrollment(s)", queue.len());
    for entry in &queue {
        println!(
            "    #{} {} | {} {}",
            entry.enrollment_id, entry.student_name, entry.semester, entry.school_year
        );
    }

    let decided = workflow.validate(Some(&registrar), record.enrollment.id, first)?;
    println!("- Registrar decision: {}", decided.status);
    println!(
        "- Pending after decision: {}",
        workflow.list_pending(Some(&registrar))?.len()
    );

    match workflow.validate(Some(&registrar), record.enrollment.id, second) {
        Ok(enrollment) => println!("- Second decision overwrote status to {}", enrollment.status),
        Err(err) => println!("- Second decision refused: {err}"),
    }

    Ok(())
}
