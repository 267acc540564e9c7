//! CSV bulk loading for programs and subjects.
//!
//! A file is parsed completely before anything is written, then handed to
//! [`CatalogService`] as one batch, so the same role gate and validation rules apply as for
//! interactive edits. A failing row leaves the catalog exactly as it was.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::access::AccessContext;
use crate::catalog::service::{BulkInsertError, CatalogService};
use crate::domain::{NewProgram, NewSubject, Program, ProgramId, Subject, SubjectId};
use crate::error::RegistrarError;
use crate::storage::{RegistrarStore, SubjectBatchRow};

#[derive(Debug)]
pub enum CatalogImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Refused(RegistrarError),
    UnknownCode {
        line: u64,
        entity: &'static str,
        code: String,
    },
    Row {
        line: u64,
        source: RegistrarError,
    },
}

impl std::fmt::Display for CatalogImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogImportError::Io(err) => write!(f, "failed to read catalog file: {}", err),
            CatalogImportError::Csv(err) => write!(f, "invalid catalog CSV data: {}", err),
            CatalogImportError::Refused(err) => write!(f, "import refused: {}", err),
            CatalogImportError::UnknownCode { line, entity, code } => {
                write!(f, "line {}: unknown {} code '{}'", line, entity, code)
            }
            CatalogImportError::Row { line, source } => {
                write!(f, "line {}: could not apply row: {}", line, source)
            }
        }
    }
}

impl std::error::Error for CatalogImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogImportError::Io(err) => Some(err),
            CatalogImportError::Csv(err) => Some(err),
            CatalogImportError::Refused(err) => Some(err),
            CatalogImportError::UnknownCode { .. } => None,
            CatalogImportError::Row { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for CatalogImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for CatalogImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

#[derive(Debug, Deserialize)]
struct ProgramRow {
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SubjectRow {
    code: String,
    title: String,
    units: u8,
    program_code: String,
    year_level: u8,
    semester: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    prerequisite_code: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.trim().is_empty()))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|position| position.line()).unwrap_or(0)
}

/// Point a batch failure back at the file line the entry came from.
fn at_line(lines: &[u64], err: BulkInsertError) -> CatalogImportError {
    match err {
        BulkInsertError::Refused(source) => CatalogImportError::Refused(source),
        BulkInsertError::Row { row, source } => CatalogImportError::Row {
            line: lines.get(row).copied().unwrap_or(0),
            source,
        },
    }
}

/// Loads `code,name` program files and
/// `code,title,units,program_code,year_level,semester,prerequisite_code` subject files.
pub struct CatalogImporter;

impl CatalogImporter {
    pub fn programs_from_path<S, P>(
        service: &CatalogService<S>,
        context: Option<&AccessContext>,
        path: P,
    ) -> Result<Vec<Program>, CatalogImportError>
    where
        S: RegistrarStore + 'static,
        P: AsRef<Path>,
    {
        let file = std::fs::File::open(path)?;
        Self::programs_from_reader(service, context, file)
    }

    pub fn programs_from_reader<S, R>(
        service: &CatalogService<S>,
        context: Option<&AccessContext>,
        reader: R,
    ) -> Result<Vec<Program>, CatalogImportError>
    where
        S: RegistrarStore + 'static,
        R: Read,
    {
        let mut csv_reader = csv_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let mut lines = Vec::new();
        let mut programs = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            let row: ProgramRow = record.deserialize(Some(&headers))?;
            lines.push(line_of(&record));
            programs.push(NewProgram {
                code: row.code,
                name: row.name,
            });
        }

        let imported = service
            .add_programs(context, programs)
            .map_err(|err| at_line(&lines, err))?;
        tracing::info!(count = imported.len(), "programs imported");
        Ok(imported)
    }

    pub fn subjects_from_path<S, P>(
        service: &CatalogService<S>,
        context: Option<&AccessContext>,
        path: P,
    ) -> Result<Vec<Subject>, CatalogImportError>
    where
        S: RegistrarStore + 'static,
        P: AsRef<Path>,
    {
        let file = std::fs::File::open(path)?;
        Self::subjects_from_reader(service, context, file)
    }

    /// Prerequisite codes may name subjects already in the catalog or rows earlier in
    /// the same file.
    pub fn subjects_from_reader<S, R>(
        service: &CatalogService<S>,
        context: Option<&AccessContext>,
        reader: R,
    ) -> Result<Vec<Subject>, CatalogImportError>
    where
        S: RegistrarStore + 'static,
        R: Read,
    {
        let programs = service
            .list_programs(context)
            .map_err(CatalogImportError::Refused)?;
        let stored_subjects: Vec<(String, SubjectId)> = service
            .list_subjects(context)
            .map_err(CatalogImportError::Refused)?
            .into_iter()
            .map(|subject| (subject.code, subject.id))
            .collect();

        let mut csv_reader = csv_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let mut lines = Vec::new();
        let mut batch: Vec<SubjectBatchRow> = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            let line = line_of(&record);
            let row: SubjectRow = record.deserialize(Some(&headers))?;

            let program_id = resolve_program(&programs, &row.program_code).ok_or_else(|| {
                CatalogImportError::UnknownCode {
                    line,
                    entity: "program",
                    code: row.program_code.clone(),
                }
            })?;

            let mut prerequisite_id = None;
            let mut prerequisite_row = None;
            if let Some(code) = row.prerequisite_code.as_deref() {
                if let Some(earlier) = batch
                    .iter()
                    .position(|entry| entry.subject.code.eq_ignore_ascii_case(code))
                {
                    prerequisite_row = Some(earlier);
                } else {
                    let stored = resolve_subject(&stored_subjects, code).ok_or_else(|| {
                        CatalogImportError::UnknownCode {
                            line,
                            entity: "subject",
                            code: code.to_string(),
                        }
                    })?;
                    prerequisite_id = Some(stored);
                }
            }

            lines.push(line);
            batch.push(SubjectBatchRow {
                subject: NewSubject {
                    code: row.code,
                    title: row.title,
                    units: row.units,
                    program_id,
                    year_level: row.year_level,
                    semester: row.semester,
                    prerequisite_id,
                },
                prerequisite_row,
            });
        }

        let imported = service
            .add_subjects(context, batch)
            .map_err(|err| at_line(&lines, err))?;
        tracing::info!(count = imported.len(), "subjects imported");
        Ok(imported)
    }
}

fn resolve_program(programs: &[Program], code: &str) -> Option<ProgramId> {
    programs
        .iter()
        .find(|program| program.code.eq_ignore_ascii_case(code))
        .map(|program| program.id)
}

fn resolve_subject(subjects: &[(String, SubjectId)], code: &str) -> Option<SubjectId> {
    subjects
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, id)| *id)
}
