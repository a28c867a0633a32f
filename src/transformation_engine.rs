use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{SetupError, TranslatorOptions},
    document::{Document, DocumentError, Element},
    identifier::IdentifierError,
    one_day_timestep::{convert_to_one_day_timesteps, ONE_DAY_TIMESTEP_VERSION},
    schema_registry::{RegistryError, StepRegistry},
    schema_version::{SchemaNaming, SchemaVersion},
    serializer::{self, SerializerOptions},
    transformation_step::{AppliedStep, StepContext, StepError, TranslationWarning, WarningType},
    validation::{validate_document, SchemaValidator, ValidationReport, ValidatorError, XmllintValidator},
};

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Runs documents through the version chain
pub struct TranslationEngine {
    registry: StepRegistry,
    options: TranslatorOptions,
    validator: Option<Box<dyn SchemaValidator>>,
}

/// Result of translating one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub source_version: SchemaVersion,
    pub target_version: SchemaVersion,
    pub visited_versions: Vec<SchemaVersion>,
    pub schema_file: String,
    pub applied_steps: Vec<AppliedStep>,
    pub warnings: Vec<TranslationWarning>,
    pub validation: Option<ValidationReport>,
}

/// Errors that can occur during translation
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Step registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Identifier allocation failed: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Schema validator could not be set up: {0}")]
    Validator(#[from] ValidatorError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TranslationError {
    /// Whether a batch may log this error and carry on with the next document.
    /// A switch left unset would fail every later document the same way.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TranslationError::Document(DocumentError::MissingOption { .. }) => false,
            TranslationError::Document(_) | TranslationError::Io { .. } => true,
            _ => false,
        }
    }
}

impl From<StepError> for TranslationError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Document(e) => TranslationError::Document(e),
            StepError::Identifier(e) => TranslationError::Identifier(e),
        }
    }
}

impl TranslationEngine {
    /// Engine with the built-in step chain. Validation, when enabled, uses
    /// `xmllint` against the configured schema folder.
    pub fn new(options: TranslatorOptions) -> Result<Self, TranslationError> {
        options.check()?;
        let registry = StepRegistry::with_default_steps()?;
        let validator: Option<Box<dyn SchemaValidator>> = if options.validate {
            Some(Box::new(XmllintValidator::new(&options.schema_folder)?))
        } else {
            None
        };
        Ok(Self {
            registry,
            options,
            validator,
        })
    }

    /// Engine with a caller-provided registry and no validator.
    pub fn with_registry(registry: StepRegistry, options: TranslatorOptions) -> Result<Self, TranslationError> {
        options.check()?;
        Ok(Self {
            registry,
            options,
            validator: None,
        })
    }

    pub fn with_validator(mut self, validator: Box<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn options(&self) -> &TranslatorOptions {
        &self.options
    }

    /// Translates `document` in place up to the configured target.
    pub fn translate(&self, document: &mut Document) -> Result<TranslationResult, TranslationError> {
        let root = &mut document.root;
        let source = SchemaVersion::from_attribute(root.attr("schemaVersion"));
        let target = self.options.target();
        if source > target {
            return Err(DocumentError::NewerThanTarget {
                found: source.value(),
                target: target.value(),
            }
            .into());
        }

        let naming = self.options.schema_naming;
        let mut current = source;
        let mut schema_file = naming.schema_file(current);
        let mut visited = vec![source];
        let mut applied_steps = Vec::new();
        let mut warnings = Vec::new();

        while current < target {
            let next = current.next();
            schema_file = naming.schema_file(next);
            declare_version(root, next, naming);

            let step = self.registry.get_step(current, next)?;
            debug!(from = %current, to = %next, step = step.name, "applying step");
            let mut ctx = StepContext::new(&self.options, next);
            step.apply(root, &mut ctx)?;

            let step_warnings = ctx.into_warnings();
            applied_steps.push(AppliedStep {
                from: current,
                to: next,
                name: step.name.to_string(),
                warnings: step_warnings.len(),
            });
            warnings.extend(step_warnings);
            visited.push(next);
            current = next;
        }

        if self.options.one_day_timesteps {
            let mut ctx = StepContext::new(&self.options, current);
            if current == ONE_DAY_TIMESTEP_VERSION {
                convert_to_one_day_timesteps(root, &mut ctx)?;
            } else {
                ctx.warn(
                    WarningType::Skipped,
                    format!(
                        "one-day timestep conversion only applies when translating to version {}",
                        ONE_DAY_TIMESTEP_VERSION
                    ),
                );
            }
            warnings.extend(ctx.into_warnings());
        }

        let validation = match &self.validator {
            Some(validator) if self.options.validate => {
                let report = validate_document(validator.as_ref(), root, current, &schema_file)?;
                if report.has_errors() {
                    warn!(
                        schema = %schema_file,
                        errors = report.errors.len(),
                        "translated document does not match its schema"
                    );
                }
                Some(report)
            }
            _ => None,
        };

        info!(from = %source, to = %current, schema = %schema_file, "translated");
        Ok(TranslationResult {
            source_version: source,
            target_version: current,
            visited_versions: visited,
            schema_file,
            applied_steps,
            warnings,
            validation,
        })
    }

    /// Parses, translates and re-serializes one document.
    pub fn translate_str(&self, xml: &str) -> Result<(String, TranslationResult), TranslationError> {
        let mut document = Document::parse(xml)?;
        let result = self.translate(&mut document)?;
        let output = serializer::to_string(
            &document,
            &SerializerOptions::new().with_indent(self.options.indent),
        )?;
        Ok((output, result))
    }
}

/// Stamps the root with `version` and its schema reference.
///
/// From version 32 the root moves into the scenario namespace and the
/// reference becomes a namespaced schema location.
pub fn declare_version(root: &mut Element, version: SchemaVersion, naming: SchemaNaming) {
    let schema_file = naming.schema_file(version);
    root.set_attr("schemaVersion", version.to_string());
    root.set_attr_if_absent("xmlns:xsi", XSI_NAMESPACE);

    if version.uses_namespace() {
        let namespace = version.namespace_uri();
        root.rename("om:scenario");
        root.remove_attr("xsi:noNamespaceSchemaLocation");
        root.set_attr("xsi:schemaLocation", format!("{} {}", namespace, schema_file));
        root.set_attr("xmlns:om", namespace);
    } else {
        root.set_attr("xsi:noNamespaceSchemaLocation", schema_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation_step::{StepContext, StepResult, TransformationStep};
    use std::cell::Cell;
    use std::rc::Rc;

    fn mark(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
        root.append_child(Element::new("step").with_attr("to", ctx.version.to_string()));
        Ok(())
    }

    fn fail(_root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
        Err(DocumentError::unsupported("broken input").into())
    }

    fn marking_registry(until: u32) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for from in 0..until {
            registry.register(TransformationStep::new(from, "mark", mark)).unwrap();
        }
        registry
    }

    fn engine(registry: StepRegistry, target: u32) -> TranslationEngine {
        let options = TranslatorOptions::new()
            .with_validation(false)
            .with_target_version(target);
        TranslationEngine::with_registry(registry, options).unwrap()
    }

    #[test]
    fn test_versions_visited_in_order() {
        let engine = engine(marking_registry(10), 10);
        let mut doc = Document::parse(r#"<scenario schemaVersion="6"/>"#).unwrap();
        let result = engine.translate(&mut doc).unwrap();

        let visited: Vec<u32> = result.visited_versions.iter().map(|v| v.value()).collect();
        assert_eq!(visited, vec![6, 7, 8, 9, 10]);
        assert_eq!(result.applied_steps.len(), 4);
        assert_eq!(doc.root.attr("schemaVersion"), Some("10"));
        assert_eq!(doc.root.attr("xsi:noNamespaceSchemaLocation"), Some("scenario_10.xsd"));
        let stamps: Vec<_> = doc.root.child_elements().map(|e| e.attr("to").unwrap()).collect();
        assert_eq!(stamps, vec!["7", "8", "9", "10"]);
    }

    #[test]
    fn test_missing_version_is_zero() {
        let engine = engine(marking_registry(3), 3);
        let mut doc = Document::parse("<scenario/>").unwrap();
        let result = engine.translate(&mut doc).unwrap();
        assert_eq!(result.source_version, SchemaVersion::new(0));
        assert_eq!(result.visited_versions.len(), 4);
    }

    #[test]
    fn test_newer_document_is_rejected() {
        let engine = engine(marking_registry(10), 10);
        let mut doc = Document::parse(r#"<scenario schemaVersion="12"/>"#).unwrap();
        let err = engine.translate(&mut doc).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            TranslationError::Document(DocumentError::NewerThanTarget { found: 12, target: 10 })
        ));
    }

    #[test]
    fn test_missing_step_is_fatal() {
        let mut registry = marking_registry(4);
        registry.register(TransformationStep::new(5, "mark", mark)).unwrap();
        let engine = engine(registry, 6);
        let mut doc = Document::parse(r#"<scenario schemaVersion="2"/>"#).unwrap();
        let err = engine.translate(&mut doc).unwrap_err();
        assert!(matches!(err, TranslationError::Registry(RegistryError::StepNotFound(_, _))));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_failing_step_aborts_document() {
        let mut registry = StepRegistry::new();
        registry.register(TransformationStep::new(0, "mark", mark)).unwrap();
        registry.register(TransformationStep::new(1, "fail", fail)).unwrap();
        registry.register(TransformationStep::new(2, "mark", mark)).unwrap();
        let engine = engine(registry, 3);
        let err = engine.translate_str("<scenario/>").unwrap_err();
        assert!(err.to_string().contains("broken input"));
    }

    #[test]
    fn test_missing_switch_is_not_recoverable() {
        let err = TranslationError::from(StepError::Document(DocumentError::missing_option(
            "treatment_actions",
            "ImmediateOutcomes drugs need treatment actions",
        )));
        assert!(!err.is_recoverable());
        let err = TranslationError::from(StepError::Document(DocumentError::unsupported("odd")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_target_one_is_a_setup_error() {
        let options = TranslatorOptions::new().with_validation(false).with_target_version(1);
        let err = TranslationEngine::with_registry(StepRegistry::new(), options)
            .err()
            .unwrap();
        assert!(matches!(err, TranslationError::Setup(SetupError::UnsupportedTarget(_))));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_namespace_switch_at_32() {
        let mut root = Element::new("scenario")
            .with_attr("schemaVersion", "30")
            .with_attr("xsi:noNamespaceSchemaLocation", "scenario_30.xsd");
        declare_version(&mut root, SchemaVersion::new(31), SchemaNaming::Exact);
        assert_eq!(root.name(), "scenario");
        assert_eq!(root.attr("xsi:noNamespaceSchemaLocation"), Some("scenario_31.xsd"));
        assert_eq!(root.attr("xmlns:xsi"), Some(XSI_NAMESPACE));

        declare_version(&mut root, SchemaVersion::new(32), SchemaNaming::Current);
        assert_eq!(root.name(), "om:scenario");
        assert!(!root.has_attr("xsi:noNamespaceSchemaLocation"));
        assert_eq!(
            root.attr("xsi:schemaLocation"),
            Some("http://openmalaria.org/schema/scenario_32 scenario_current.xsd")
        );
        assert_eq!(root.attr("xmlns:om"), Some("http://openmalaria.org/schema/scenario_32"));
    }

    struct CountingValidator(Rc<Cell<usize>>);

    impl SchemaValidator for CountingValidator {
        fn validate(&self, _xml: &str, schema_file: &str) -> Result<ValidationReport, ValidatorError> {
            self.0.set(self.0.get() + 1);
            Ok(ValidationReport::new(schema_file))
        }
    }

    #[test]
    fn test_validation_uses_final_schema() {
        let calls = Rc::new(Cell::new(0));
        let options = TranslatorOptions::new().with_target_version(2);
        let engine = TranslationEngine::with_registry(marking_registry(2), options)
            .unwrap()
            .with_validator(Box::new(CountingValidator(calls.clone())));
        let mut doc = Document::parse("<scenario/>").unwrap();
        let result = engine.translate(&mut doc).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(result.validation.unwrap().schema_file, "scenario_2.xsd");
    }

    #[test]
    fn test_one_day_timesteps_skipped_off_version_18() {
        let options = TranslatorOptions::new()
            .with_target_version(3)
            .with_one_day_timesteps(true);
        let engine = TranslationEngine::with_registry(marking_registry(3), options).unwrap();
        let mut doc = Document::parse("<scenario/>").unwrap();
        let result = engine.translate(&mut doc).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].warning_type, WarningType::Skipped);
    }
}
