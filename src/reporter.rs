use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use crate::{
    schema_version::SchemaVersion,
    transformation_engine::TranslationResult,
    transformation_step::{AppliedStep, TranslationWarning, WarningType},
    validation::ValidationReport,
};

/// Reporter for rendering per-document translation reports
pub struct TranslationReporter {
    output_format: ReportFormat,
}

/// Available output formats for translation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Console,
    Json,
    Yaml,
}

/// Report for one translated document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationReport {
    pub document: String,
    pub source_version: SchemaVersion,
    pub target_version: SchemaVersion,
    pub visited_versions: Vec<SchemaVersion>,
    pub schema_file: String,
    pub applied_steps: Vec<AppliedStep>,
    pub warnings: Vec<TranslationWarning>,
    pub validation_summary: Option<ValidationSummary>,
    pub recommendations: Vec<String>,
}

/// Summary of validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub is_valid: bool,
}

impl TranslationReporter {
    pub fn new() -> Self {
        Self {
            output_format: ReportFormat::Console,
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Build the report for `document` from its translation result
    pub fn generate_report(&self, document: &str, result: &TranslationResult) -> TranslationReport {
        let validation_summary = result.validation.as_ref().map(create_validation_summary);
        let recommendations = generate_recommendations(result);

        TranslationReport {
            document: document.to_string(),
            source_version: result.source_version,
            target_version: result.target_version,
            visited_versions: result.visited_versions.clone(),
            schema_file: result.schema_file.clone(),
            applied_steps: result.applied_steps.clone(),
            warnings: result.warnings.clone(),
            validation_summary,
            recommendations,
        }
    }

    /// Format the report according to the configured output format
    pub fn format_report(&self, report: &TranslationReport) -> Result<String, ReportError> {
        match self.output_format {
            ReportFormat::Console => Ok(self.format_console_report(report)),
            ReportFormat::Json => serde_json::to_string_pretty(report)
                .map_err(|e| ReportError::SerializationError(e.to_string())),
            ReportFormat::Yaml => serde_yaml::to_string(report)
                .map_err(|e| ReportError::SerializationError(e.to_string())),
        }
    }

    fn format_console_report(&self, report: &TranslationReport) -> String {
        let mut output = String::new();

        output.push_str(&format!("=== Translation Report: {} ===\n\n", report.document));
        output.push_str(&format!("Source Version: {}\n", report.source_version));
        output.push_str(&format!("Target Version: {}\n", report.target_version));
        output.push_str(&format!("Schema: {}\n\n", report.schema_file));

        let path: Vec<String> = report.visited_versions.iter().map(|v| v.to_string()).collect();
        output.push_str(&format!("Steps Applied: {} ({})\n", report.applied_steps.len(), path.join(" -> ")));
        match &report.validation_summary {
            Some(summary) => output.push_str(&format!(
                "Validation Status: {} ({} errors, {} warnings)\n",
                if summary.is_valid { "VALID" } else { "INVALID" },
                summary.total_errors,
                summary.total_warnings
            )),
            None => output.push_str("Validation Status: SKIPPED\n"),
        }

        if !report.warnings.is_empty() {
            output.push_str("\nWarnings:\n");
            for warning in &report.warnings {
                output.push_str(&format!("  [{}] {}\n", warning.version, warning.message));
            }
        }

        if !report.recommendations.is_empty() {
            output.push_str("\nRecommendations:\n");
            for rec in &report.recommendations {
                output.push_str(&format!("  • {}\n", rec));
            }
        }

        output
    }
}

impl Default for TranslationReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn create_validation_summary(report: &ValidationReport) -> ValidationSummary {
    ValidationSummary {
        total_errors: report.errors.len(),
        total_warnings: report.warnings.len(),
        is_valid: report.is_valid,
    }
}

fn generate_recommendations(result: &TranslationResult) -> Vec<String> {
    let mut recommendations = Vec::new();
    let count = |kind: WarningType| result.warnings.iter().filter(|w| w.warning_type == kind).count();

    if count(WarningType::ManualReview) > 0 {
        recommendations.push("Review the flagged elements by hand before running the scenario".to_string());
    }
    if count(WarningType::DataDropped) > 0 {
        recommendations.push("Check that no dropped data was needed by the scenario".to_string());
    }
    if count(WarningType::DefaultAssumed) > 0 {
        recommendations.push("Confirm the historical defaults filled in during translation".to_string());
    }
    if result.validation.as_ref().is_some_and(|v| v.has_errors()) {
        recommendations.push(format!("Fix the schema violations against {}", result.schema_file));
    }

    recommendations
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
