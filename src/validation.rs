use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    document::{Document, DocumentError, Element},
    schema_version::SchemaVersion,
    serializer::{self, SerializerOptions},
};

/// Text marking a parameters block still to be filled in by a template
pub const PARAMETERS_PLACEHOLDER: &str = "@parameters@";

/// Outcome of validating one translated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub schema_file: String,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new(schema_file: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            schema_file: schema_file.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// First error that stops validation outright
    pub fn fatal_error(&self) -> Option<&ValidationError> {
        self.errors
            .iter()
            .find(|e| e.error_type == ValidationErrorType::Fatal)
    }
}

/// Schema violation reported by the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub line: Option<u32>,
    pub error_type: ValidationErrorType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationErrorType {
    /// The document or schema could not be read at all
    Fatal,
    /// The document does not satisfy the schema
    SchemaViolation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub line: Option<u32>,
    pub message: String,
}

impl ValidationError {
    pub fn new(line: Option<u32>, error_type: ValidationErrorType, message: impl Into<String>) -> Self {
        Self {
            line,
            error_type,
            message: message.into(),
        }
    }
}

/// Failure to run validation at all
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("Schema file {0} not found")]
    SchemaNotFound(PathBuf),

    #[error("Invalid diagnostic pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to run {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Black-box check of a serialized document against a schema file.
pub trait SchemaValidator {
    fn validate(&self, xml: &str, schema_file: &str) -> Result<ValidationReport, ValidatorError>;
}

/// Reads `xmllint` diagnostics; parser errors are fatal, validity errors are not.
pub struct DiagnosticParser {
    pattern: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Result<Self, regex::Error> {
        let pattern = Regex::new(
            r"^[^:]*:(?P<line>\d+): (?P<domain>.*?)\s*(?P<level>error|warning) : (?P<message>.*)$",
        )?;
        Ok(Self { pattern })
    }

    pub fn parse(&self, schema_file: &str, output: &str) -> ValidationReport {
        let mut report = ValidationReport::new(schema_file);
        for line in output.lines() {
            let Some(caps) = self.pattern.captures(line) else {
                continue;
            };
            let line_number = caps["line"].parse().ok();
            let message = caps["message"].trim().to_string();
            if &caps["level"] == "warning" {
                report.add_warning(ValidationWarning {
                    line: line_number,
                    message,
                });
            } else if caps["domain"].contains("parser") {
                report.add_error(ValidationError::new(line_number, ValidationErrorType::Fatal, message));
            } else {
                report.add_error(ValidationError::new(
                    line_number,
                    ValidationErrorType::SchemaViolation,
                    message,
                ));
            }
        }
        report
    }
}

/// Validates by piping documents through `xmllint --schema`.
pub struct XmllintValidator {
    program: String,
    schema_folder: PathBuf,
    parser: DiagnosticParser,
    resolved: RefCell<HashMap<String, PathBuf>>,
}

impl XmllintValidator {
    pub fn new(schema_folder: impl Into<PathBuf>) -> Result<Self, ValidatorError> {
        Ok(Self {
            program: "xmllint".to_string(),
            schema_folder: schema_folder.into(),
            parser: DiagnosticParser::new()?,
            resolved: RefCell::new(HashMap::new()),
        })
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Schema path for a file name, looked up once per validator.
    fn schema_path(&self, schema_file: &str) -> Result<PathBuf, ValidatorError> {
        if let Some(path) = self.resolved.borrow().get(schema_file) {
            return Ok(path.clone());
        }
        let path = self.schema_folder.join(schema_file);
        if !path.is_file() {
            return Err(ValidatorError::SchemaNotFound(path));
        }
        debug!(schema = %path.display(), "resolved schema");
        self.resolved
            .borrow_mut()
            .insert(schema_file.to_string(), path.clone());
        Ok(path)
    }

    fn run(&self, xml: &str, schema: &Path) -> Result<(i32, String), ValidatorError> {
        let launch = |source| ValidatorError::Launch {
            program: self.program.clone(),
            source,
        };
        let mut child = Command::new(&self.program)
            .arg("--noout")
            .arg("--schema")
            .arg(schema)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch)?;
        let stdin = child.stdin.take();
        // stdin is fed from its own thread so a full stderr pipe cannot stall
        // the write, and the child is reaped even when the write fails
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(xml.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked")));
            (written, output)
        });
        let output = output.map_err(launch)?;
        match written {
            // the exit status reports why the program stopped reading
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(program = %self.program, "program closed stdin early")
            }
            Err(e) => return Err(launch(e)),
            Ok(()) => {}
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok((output.status.code().unwrap_or(-1), stderr))
    }
}

impl SchemaValidator for XmllintValidator {
    fn validate(&self, xml: &str, schema_file: &str) -> Result<ValidationReport, ValidatorError> {
        let schema = self.schema_path(schema_file)?;
        let (status, stderr) = self.run(xml, &schema)?;
        let mut report = self.parser.parse(schema_file, &stderr);
        // 0 is valid, 3 and 4 are schema violations; anything else means
        // the document or schema could not be processed.
        if !matches!(status, 0 | 3 | 4) && report.fatal_error().is_none() {
            report.add_error(ValidationError::new(
                None,
                ValidationErrorType::Fatal,
                format!("{} exited with status {}", self.program, status),
            ));
        }
        if status != 0 && !report.has_errors() {
            report.add_error(ValidationError::new(
                None,
                ValidationErrorType::SchemaViolation,
                "document fails to validate",
            ));
        }
        Ok(report)
    }
}

/// Copy of `root` with artifacts known to upset validation patched out.
pub fn prepare_for_validation(root: &Element, target: SchemaVersion) -> Element {
    let mut copy = root.clone();
    copy.remove_attr("xsi:noNamespaceSchemaLocation");
    if target.value() <= 23 {
        copy.set_attr("assimMode", "0");
    }
    copy.set_attr("wuID", "123");

    if let Some(parameters) = copy.find_descendant_mut("parameters") {
        if parameters.text().contains(PARAMETERS_PLACEHOLDER) {
            parameters.clear_text();
            let mut placeholder = placeholder_parameters();
            parameters.take_attributes_from(&mut placeholder);
            for child in placeholder.take_children() {
                parameters.append_node(child);
            }
        }
    }
    copy
}

/// Smallest parameters block the schemas accept
fn placeholder_parameters() -> Element {
    Element::new("parameters")
        .with_attr("latentp", "0")
        .with_attr("delta", "0")
        .with_attr("interval", "0")
        .with_attr("iseed", "0")
        .with_child(
            Element::new("parameter")
                .with_attr("value", "0")
                .with_attr("name", "0")
                .with_attr("number", "0"),
        )
}

/// Validates a private copy of `root`. A fatal error becomes a document
/// error; anything else is returned in the report.
pub fn validate_document(
    validator: &dyn SchemaValidator,
    root: &Element,
    target: SchemaVersion,
    schema_file: &str,
) -> Result<ValidationReport, DocumentError> {
    let prepared = Document::new(prepare_for_validation(root, target));
    let xml = serializer::to_string(&prepared, &SerializerOptions::new())?;
    let report = validator
        .validate(&xml, schema_file)
        .map_err(|e| DocumentError::Validation(e.to_string()))?;

    if let Some(fatal) = report.fatal_error() {
        return Err(DocumentError::Validation(match fatal.line {
            Some(line) => format!("line {}: {}", line, fatal.message),
            None => fatal.message.clone(),
        }));
    }
    for error in &report.errors {
        warn!(line = ?error.line, "{}", error.message);
    }
    for warning in &report.warnings {
        debug!(line = ?warning.line, "{}", warning.message);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedValidator(&'static str);

    impl SchemaValidator for CannedValidator {
        fn validate(&self, xml: &str, schema_file: &str) -> Result<ValidationReport, ValidatorError> {
            assert!(xml.contains("wuID=\"123\""));
            Ok(DiagnosticParser::new().unwrap().parse(schema_file, self.0))
        }
    }

    #[test]
    fn test_parse_diagnostics() {
        let report = DiagnosticParser::new().unwrap().parse(
            "scenario_30.xsd",
            "-:12: element interventions: Schemas validity error : Element 'foo': This element is not expected.\n\
             -:3: element x: Schemas validity warning : something odd\n\
             - fails to validate\n",
        );
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, Some(12));
        assert_eq!(report.errors[0].error_type, ValidationErrorType::SchemaViolation);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.fatal_error().is_none());
    }

    #[test]
    fn test_parser_errors_are_fatal() {
        let report = DiagnosticParser::new()
            .unwrap()
            .parse("scenario_30.xsd", "-:1: parser error : Document is empty\n");
        assert_eq!(report.fatal_error().map(|e| e.line), Some(Some(1)));
    }

    #[test]
    fn test_prepare_for_validation_patches_copy() {
        let root = Element::new("scenario")
            .with_attr("xsi:noNamespaceSchemaLocation", "scenario_20.xsd")
            .with_child(
                Element::new("model")
                    .with_child(Element::new("parameters").with_text(PARAMETERS_PLACEHOLDER)),
            );
        let prepared = prepare_for_validation(&root, SchemaVersion::new(20));

        assert!(!prepared.has_attr("xsi:noNamespaceSchemaLocation"));
        assert_eq!(prepared.attr("assimMode"), Some("0"));
        assert_eq!(prepared.attr("wuID"), Some("123"));
        let parameters = prepared.find_descendant("parameters").unwrap();
        assert_eq!(parameters.text(), "");
        assert_eq!(parameters.attr("interval"), Some("0"));
        assert_eq!(parameters.count_named("parameter"), 1);

        // the caller's tree is untouched
        assert!(root.has_attr("xsi:noNamespaceSchemaLocation"));
        assert_eq!(root.find_descendant("parameters").unwrap().text(), PARAMETERS_PLACEHOLDER);
    }

    #[test]
    fn test_assim_mode_only_for_old_targets() {
        let prepared = prepare_for_validation(&Element::new("scenario"), SchemaVersion::new(24));
        assert!(!prepared.has_attr("assimMode"));
    }

    #[test]
    fn test_validate_document_reports_and_fails() {
        let root = Element::new("scenario");
        let report = validate_document(
            &CannedValidator("-:2: element a: Schemas validity error : bad\n"),
            &root,
            SchemaVersion::new(30),
            "scenario_30.xsd",
        )
        .unwrap();
        assert_eq!(report.errors.len(), 1);

        let err = validate_document(
            &CannedValidator("-:1: parser error : Start tag expected\n"),
            &root,
            SchemaVersion::new(30),
            "scenario_30.xsd",
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }

    #[test]
    fn test_missing_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let validator = XmllintValidator::new(dir.path()).unwrap();
        let err = validator.validate("<scenario/>", "scenario_32.xsd").unwrap_err();
        assert!(matches!(err, ValidatorError::SchemaNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_program_exiting_without_reading_stdin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scenario_32.xsd"), "<xs:schema/>").unwrap();
        let validator = XmllintValidator::new(dir.path()).unwrap().with_program("false");
        // larger than a pipe buffer, so the write cannot finish before the exit
        let xml = format!("<scenario>{}</scenario>", "<x/>".repeat(100_000));
        let report = validator.validate(&xml, "scenario_32.xsd").unwrap();
        assert!(!report.is_valid);
        assert!(report.fatal_error().unwrap().message.contains("exited with status 1"));
    }
}
