// Scenario schema translation
pub mod batch;
pub mod config;
pub mod document;
pub mod identifier;
pub mod one_day_timestep;
pub mod reporter;
pub mod schema_registry;
pub mod schema_version;
pub mod serializer;
pub mod steps;
pub mod transformation_engine;
pub mod transformation_step;
pub mod validation;

// Re-export core types for convenience
pub use config::{SetupError, TranslatorOptions};
pub use document::{Document, DocumentError, Element};
pub use schema_version::{SchemaNaming, SchemaVersion};
pub use validation::{SchemaValidator, ValidationReport, ValidationError, ValidationWarning};
pub use transformation_engine::{declare_version, TranslationEngine, TranslationError, TranslationResult};
pub use schema_registry::StepRegistry;
pub use reporter::{TranslationReporter, TranslationReport};
