use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::{
    config::TranslatorOptions,
    document::{DocumentError, Element},
    identifier::IdentifierError,
    schema_version::SchemaVersion,
};

/// Failure of a single step
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

pub type StepResult = Result<(), StepError>;

/// Signature shared by every registered step
pub type StepFn = fn(&mut Element, &mut StepContext<'_>) -> StepResult;

/// One `N -> N+1` rewrite of the scenario tree
#[derive(Clone, Copy)]
pub struct TransformationStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub name: &'static str,
    apply: StepFn,
}

impl TransformationStep {
    pub fn new(from: u32, name: &'static str, apply: StepFn) -> Self {
        let from = SchemaVersion::new(from);
        Self {
            from,
            to: from.next(),
            name,
            apply,
        }
    }

    pub fn apply(&self, root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
        (self.apply)(root, ctx)
    }
}

impl fmt::Debug for TransformationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("name", &self.name)
            .finish()
    }
}

/// State handed to a step: the read-only options plus the warnings it raised.
pub struct StepContext<'a> {
    pub options: &'a TranslatorOptions,
    pub version: SchemaVersion,
    warnings: Vec<TranslationWarning>,
}

impl<'a> StepContext<'a> {
    pub fn new(options: &'a TranslatorOptions, version: SchemaVersion) -> Self {
        Self {
            options,
            version,
            warnings: Vec::new(),
        }
    }

    /// Logs a warning and keeps it for the translation report.
    pub fn warn(&mut self, warning_type: WarningType, message: impl Into<String>) {
        let message = message.into();
        warn!(version = %self.version, kind = ?warning_type, "{}", message);
        self.warnings
            .push(TranslationWarning::new(message, self.version, warning_type));
    }

    pub fn warn_at(&mut self, warning_type: WarningType, path: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(version = %self.version, kind = ?warning_type, path, "{}", message);
        self.warnings.push(
            TranslationWarning::new(message, self.version, warning_type).with_element_path(path),
        );
    }

    pub fn into_warnings(self) -> Vec<TranslationWarning> {
        self.warnings
    }
}

/// Warning raised while translating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationWarning {
    pub message: String,
    pub version: SchemaVersion,
    pub element_path: Option<String>,
    pub warning_type: WarningType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningType {
    /// Data was removed because the new schema cannot express it
    DataDropped,
    /// A value was filled in from a historical default
    DefaultAssumed,
    /// The output needs a manual check
    ManualReview,
    /// A requested conversion did not apply to this document
    Skipped,
}

impl TranslationWarning {
    pub fn new(message: String, version: SchemaVersion, warning_type: WarningType) -> Self {
        Self {
            message,
            version,
            element_path: None,
            warning_type,
        }
    }

    pub fn with_element_path(mut self, path: &str) -> Self {
        self.element_path = Some(path.to_string());
        self
    }
}

/// Record of a step the engine ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub name: String,
    pub warnings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_marker(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
        root.set_attr("marker", "1");
        ctx.warn(WarningType::ManualReview, "check marker");
        Ok(())
    }

    #[test]
    fn test_step_targets_next_version() {
        let step = TransformationStep::new(7, "drop emergence file", add_marker);
        assert_eq!(step.from, SchemaVersion::new(7));
        assert_eq!(step.to, SchemaVersion::new(8));
    }

    #[test]
    fn test_step_records_warnings() {
        let options = TranslatorOptions::new();
        let step = TransformationStep::new(3, "marker", add_marker);
        let mut root = Element::new("scenario");
        let mut ctx = StepContext::new(&options, step.to);
        step.apply(&mut root, &mut ctx).unwrap();

        assert_eq!(root.attr("marker"), Some("1"));
        let warnings = ctx.into_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].version, SchemaVersion::new(4));
        assert_eq!(warnings[0].warning_type, WarningType::ManualReview);
    }

    #[test]
    fn test_warning_with_element_path() {
        let warning = TranslationWarning::new(
            "removed".to_string(),
            SchemaVersion::new(8),
            WarningType::DataDropped,
        )
        .with_element_path("entoData/vector/anopheles/mosq");
        assert_eq!(warning.element_path.as_deref(), Some("entoData/vector/anopheles/mosq"));
    }
}
