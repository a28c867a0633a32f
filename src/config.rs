use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::schema_version::{SchemaNaming, SchemaVersion};

/// Misconfiguration detected before any document is touched
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Translating to schema version {0} is not supported: version 1 documents cannot be distinguished from version 0")]
    UnsupportedTarget(SchemaVersion),

    #[error("Target version {requested} is newer than the latest known version {latest}")]
    TargetTooNew {
        requested: SchemaVersion,
        latest: SchemaVersion,
    },

    #[error("Required folder {0} does not exist")]
    MissingFolder(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration file does not match its schema:\n{}", .0.join("\n"))]
    ConfigSchema(Vec<String>),
}

/// Whether to keep the historical maximum-density calculation defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxDensCorrection {
    #[default]
    Unset,
    Correct,
    DontCorrect,
}

impl From<bool> for MaxDensCorrection {
    fn from(correct: bool) -> Self {
        if correct {
            MaxDensCorrection::Correct
        } else {
            MaxDensCorrection::DontCorrect
        }
    }
}

/// How to read an IPTI_SP option set without any IPTI intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IptiSpOption {
    #[default]
    Unset,
    AssumeIntended,
    AssumeUnintended,
}

impl From<bool> for IptiSpOption {
    fn from(intended: bool) -> Self {
        if intended {
            IptiSpOption::AssumeIntended
        } else {
            IptiSpOption::AssumeUnintended
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IptiReportOnlyAtRisk {
    #[default]
    Unset,
    On,
    Off,
}

impl From<bool> for IptiReportOnlyAtRisk {
    fn from(on: bool) -> Self {
        if on {
            IptiReportOnlyAtRisk::On
        } else {
            IptiReportOnlyAtRisk::Off
        }
    }
}

/// Re-description of ITN parameters when moving to schema 29
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ItnDescription {
    #[default]
    #[value(skip)]
    Unset,
    /// Replace with the default parameterisation
    Replace,
    /// Leave for manual editing
    Manual,
}

/// Content synthesised for each drug of an ImmediateOutcomes health system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentActions {
    #[default]
    #[value(skip)]
    Unset,
    /// Clear blood-stage parasites for one timestep
    Simple,
    /// Clear all stages for the whole of the treatment
    Legacy,
    /// Leave a comment to be filled in by hand
    Placeholder,
}

/// Resolved translator configuration, read-only to every step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TranslatorOptions {
    pub target_version: Option<SchemaVersion>,
    pub schema_naming: SchemaNaming,
    pub validate: bool,
    pub write_output: bool,
    pub one_day_timesteps: bool,
    pub update_records: Option<PathBuf>,
    pub max_dens_correction: MaxDensCorrection,
    pub ipti_sp_option: IptiSpOption,
    pub ipti_report_only_at_risk: IptiReportOnlyAtRisk,
    pub itn_description: ItnDescription,
    pub treatment_actions: TreatmentActions,
    pub schema_folder: PathBuf,
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub indent: usize,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            target_version: None,
            schema_naming: SchemaNaming::Exact,
            validate: true,
            write_output: true,
            one_day_timesteps: false,
            update_records: None,
            max_dens_correction: MaxDensCorrection::Unset,
            ipti_sp_option: IptiSpOption::Unset,
            ipti_report_only_at_risk: IptiReportOnlyAtRisk::Unset,
            itn_description: ItnDescription::Unset,
            treatment_actions: TreatmentActions::Unset,
            schema_folder: PathBuf::from("../../schema"),
            input_folder: PathBuf::from("scenarios"),
            output_folder: PathBuf::from("translatedScenarios"),
            indent: 2,
        }
    }
}

/// JSON Schema for the YAML configuration file
const CONFIG_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "additionalProperties": false,
  "properties": {
    "target_version": { "type": ["integer", "null"], "minimum": 0 },
    "schema_naming": { "enum": ["exact", "latest", "current"] },
    "validate": { "type": "boolean" },
    "write_output": { "type": "boolean" },
    "one_day_timesteps": { "type": "boolean" },
    "update_records": { "type": ["string", "null"] },
    "max_dens_correction": { "enum": ["unset", "correct", "dont_correct"] },
    "ipti_sp_option": { "enum": ["unset", "assume_intended", "assume_unintended"] },
    "ipti_report_only_at_risk": { "enum": ["unset", "on", "off"] },
    "itn_description": { "enum": ["unset", "replace", "manual"] },
    "treatment_actions": { "enum": ["unset", "simple", "legacy", "placeholder"] },
    "schema_folder": { "type": "string" },
    "input_folder": { "type": "string" },
    "output_folder": { "type": "string" },
    "indent": { "type": "integer", "minimum": 0, "maximum": 16 }
  }
}"#;

impl TranslatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_version(mut self, version: impl Into<SchemaVersion>) -> Self {
        self.target_version = Some(version.into());
        self
    }

    pub fn with_schema_naming(mut self, naming: SchemaNaming) -> Self {
        self.schema_naming = naming;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_output(mut self, write_output: bool) -> Self {
        self.write_output = write_output;
        self
    }

    /// One-day timestep conversion cannot be validated against the old schema.
    pub fn with_one_day_timesteps(mut self, enabled: bool) -> Self {
        self.one_day_timesteps = enabled;
        if enabled {
            self.validate = false;
        }
        self
    }

    pub fn with_max_dens_correction(mut self, value: MaxDensCorrection) -> Self {
        self.max_dens_correction = value;
        self
    }

    pub fn with_ipti_sp_option(mut self, value: IptiSpOption) -> Self {
        self.ipti_sp_option = value;
        self
    }

    pub fn with_ipti_report_only_at_risk(mut self, value: IptiReportOnlyAtRisk) -> Self {
        self.ipti_report_only_at_risk = value;
        self
    }

    pub fn with_itn_description(mut self, value: ItnDescription) -> Self {
        self.itn_description = value;
        self
    }

    pub fn with_treatment_actions(mut self, value: TreatmentActions) -> Self {
        self.treatment_actions = value;
        self
    }

    pub fn with_folders(
        mut self,
        schema: impl Into<PathBuf>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        self.schema_folder = schema.into();
        self.input_folder = input.into();
        self.output_folder = output.into();
        self
    }

    /// Requested target, defaulting to the latest supported version
    pub fn target(&self) -> SchemaVersion {
        self.target_version
            .unwrap_or(SchemaVersion::LATEST_SUPPORTED)
    }

    /// Rejects option combinations that can never translate anything.
    pub fn check(&self) -> Result<(), SetupError> {
        let target = self.target();
        if target == SchemaVersion::UNSUPPORTED {
            return Err(SetupError::UnsupportedTarget(target));
        }
        if target > SchemaVersion::LATEST_KNOWN {
            return Err(SetupError::TargetTooNew {
                requested: target,
                latest: SchemaVersion::LATEST_KNOWN,
            });
        }
        Ok(())
    }

    /// Creates input and output folders when missing; the schema folder must exist
    /// when validating. Record updates read and write the store, so no folders
    /// are created for them.
    pub fn prepare_folders(&self) -> Result<(), SetupError> {
        if self.validate && !self.schema_folder.is_dir() {
            return Err(SetupError::MissingFolder(self.schema_folder.clone()));
        }
        if self.update_records.is_some() {
            return Ok(());
        }
        for folder in [&self.input_folder, &self.output_folder] {
            if !folder.is_dir() {
                info!(folder = %folder.display(), "creating folder");
                fs::create_dir_all(folder).map_err(|source| SetupError::Io {
                    path: folder.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Loads options from a YAML file checked against [`CONFIG_SCHEMA`].
    pub fn from_yaml_file(path: &Path) -> Result<Self, SetupError> {
        let text = fs::read_to_string(path).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading configuration file");
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SetupError> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| SetupError::InvalidConfig(e.to_string()))?;
        if yaml.is_null() {
            return Ok(Self::default());
        }

        let instance = serde_json::to_value(&yaml)
            .map_err(|e| SetupError::InvalidConfig(e.to_string()))?;
        let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA)
            .map_err(|e| SetupError::InvalidConfig(format!("embedded schema: {}", e)))?;
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| SetupError::InvalidConfig(format!("embedded schema: {}", e)))?;

        if let Err(errors) = compiled.validate(&instance) {
            let messages: Vec<String> = errors
                .map(|error| format!("  - {}: {}", error.instance_path, error))
                .collect();
            return Err(SetupError::ConfigSchema(messages));
        }

        serde_yaml::from_value(yaml).map_err(|e| SetupError::InvalidConfig(e.to_string()))
    }
}
