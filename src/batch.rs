use jwalk::WalkDir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::transformation_engine::{TranslationEngine, TranslationError, TranslationResult};

/// Document errors tolerated before a batch gives up
pub const MAX_ERRORS: usize = 10;

/// Errors logged with their full detail; later ones get one line each.
const VERBOSE_ERRORS: usize = 2;

/// Extension of translatable files in a folder batch
pub const SCENARIO_EXTENSION: &str = "xml";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Aborting after {errors} errors ({attempted} documents attempted)")]
    TooManyErrors { errors: usize, attempted: usize },

    #[error("Aborting batch at {document}: {source}")]
    Fatal {
        document: String,
        #[source]
        source: TranslationError,
    },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record store {path} is corrupt at line {line}: {message}")]
    CorruptRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("No record with id {0}")]
    UnknownRecord(String),
}

/// Counts per-document failures across a batch.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    errors: usize,
    max_errors: usize,
}

impl ErrorBudget {
    pub fn new(max_errors: usize) -> Self {
        Self {
            errors: 0,
            max_errors,
        }
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Logs a failed document. Fails once more than `max_errors` documents
    /// have failed.
    pub fn record(&mut self, document: &str, err: &TranslationError, attempted: usize) -> Result<(), BatchError> {
        if self.errors < VERBOSE_ERRORS {
            error!(document, error = ?err, "translation failed: {}", err);
        } else {
            error!(document, "translation failed: {}", err);
        }
        self.errors += 1;
        if self.errors > self.max_errors {
            return Err(BatchError::TooManyErrors {
                errors: self.errors,
                attempted,
            });
        }
        Ok(())
    }
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(MAX_ERRORS)
    }
}

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: String,
    pub result: TranslationResult,
}

/// Totals for a completed batch
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub translated: Vec<DocumentOutcome>,
    pub failed: usize,
}

impl BatchSummary {
    pub fn attempted(&self) -> usize {
        self.translated.len() + self.failed
    }

    pub fn warnings(&self) -> usize {
        self.translated.iter().map(|o| o.result.warnings.len()).sum()
    }
}

/// Translates every scenario file under `input`, mirroring the tree into `output`.
pub fn translate_folder(
    engine: &TranslationEngine,
    input: &Path,
    output: &Path,
) -> Result<BatchSummary, BatchError> {
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == SCENARIO_EXTENSION))
        .collect();
    files.sort();
    info!(folder = %input.display(), files = files.len(), "translating folder");

    let mut summary = BatchSummary::default();
    let mut budget = ErrorBudget::default();
    for path in files {
        let relative = path.strip_prefix(input).unwrap_or(path.as_path());
        let document = relative.display().to_string();
        match translate_file(engine, &path, &output.join(relative)) {
            Ok(result) => summary.translated.push(DocumentOutcome { document, result }),
            Err(err) if err.is_recoverable() => {
                summary.failed += 1;
                budget.record(&document, &err, summary.attempted())?;
            }
            Err(source) => return Err(BatchError::Fatal { document, source }),
        }
    }
    Ok(summary)
}

fn translate_file(
    engine: &TranslationEngine,
    source: &Path,
    target: &Path,
) -> Result<TranslationResult, TranslationError> {
    debug!(file = %source.display(), "translating");
    let xml = fs::read_to_string(source).map_err(|e| TranslationError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let (translated, result) = engine.translate_str(&xml)?;

    if engine.options().write_output {
        let io_error = |e| TranslationError::Io {
            path: target.to_path_buf(),
            source: e,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(target, translated).map_err(io_error)?;
    }
    Ok(result)
}

/// One stored scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub xml: String,
}

/// Keyed scenario storage that can be translated in place.
pub trait RecordStore {
    fn records(&self) -> Result<Vec<Record>, BatchError>;

    fn update(&mut self, id: &str, xml: &str) -> Result<(), BatchError>;
}

/// Records kept one JSON object per line
pub struct JsonLinesRecordStore {
    path: PathBuf,
    records: Vec<Record>,
}

impl JsonLinesRecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BatchError> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|source| BatchError::Io {
            path: path.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| BatchError::CorruptRecord {
                path: path.clone(),
                line: index + 1,
                message: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(Self { path, records })
    }

    fn save(&self) -> Result<(), BatchError> {
        let io_error = |source| BatchError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = fs::File::create(&self.path).map_err(io_error)?;
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|e| BatchError::CorruptRecord {
                path: self.path.clone(),
                line: 0,
                message: e.to_string(),
            })?;
            writeln!(file, "{}", line).map_err(io_error)?;
        }
        Ok(())
    }
}

impl RecordStore for JsonLinesRecordStore {
    fn records(&self) -> Result<Vec<Record>, BatchError> {
        Ok(self.records.clone())
    }

    fn update(&mut self, id: &str, xml: &str) -> Result<(), BatchError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| BatchError::UnknownRecord(id.to_string()))?;
        record.xml = xml.to_string();
        self.save()
    }
}

/// Translates every record of `store`, writing results back when output is enabled.
pub fn translate_records(
    engine: &TranslationEngine,
    store: &mut dyn RecordStore,
) -> Result<BatchSummary, BatchError> {
    let records = store.records()?;
    info!(records = records.len(), "translating records");

    let mut summary = BatchSummary::default();
    let mut budget = ErrorBudget::default();
    for record in records {
        let document = format!("record {}", record.id);
        match engine.translate_str(&record.xml) {
            Ok((translated, result)) => {
                if engine.options().write_output {
                    store.update(&record.id, &translated)?;
                }
                summary.translated.push(DocumentOutcome { document, result });
            }
            Err(err) if err.is_recoverable() => {
                summary.failed += 1;
                budget.record(&document, &err, summary.attempted())?;
            }
            Err(source) => return Err(BatchError::Fatal { document, source }),
        }
    }
    Ok(summary)
}
