use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scenario_translator::{
    batch::{translate_folder, translate_records, BatchError, BatchSummary, JsonLinesRecordStore},
    config::{ItnDescription, SetupError, TranslatorOptions, TreatmentActions},
    document::DocumentError,
    reporter::{ReportFormat, TranslationReporter},
    schema_version::SchemaNaming,
    transformation_engine::{TranslationEngine, TranslationError},
};

#[derive(Parser, Debug)]
#[command(name = "scenario-translator")]
#[command(about = "Translate scenario documents to a newer schema version")]
struct Args {
    /// Schema version to translate to (defaults to the latest supported)
    #[arg(long, value_name = "VERSION")]
    required_version: Option<u32>,

    /// Reference the unversioned scenario.xsd
    #[arg(long, conflicts_with = "current_schema")]
    latest_schema: bool,

    /// Reference scenario_current.xsd
    #[arg(long)]
    current_schema: bool,

    /// Skip schema validation of translated documents
    #[arg(long)]
    no_validation: bool,

    /// Translate and validate without writing any output
    #[arg(long)]
    no_translation: bool,

    /// Translate records of a JSON-lines store in place instead of a folder
    #[arg(long, value_name = "FILE")]
    update_records: Option<PathBuf>,

    /// Correct the historical maximum-density calculation
    #[arg(long, value_name = "BOOL")]
    max_dens_correction: Option<bool>,

    /// Whether IPTI_SP_MODEL without IPTI interventions was intended
    #[arg(long, value_name = "BOOL")]
    ipti_sp_option_without_interventions: Option<bool>,

    /// Value of REPORT_ONLY_AT_RISK for IPTI scenarios
    #[arg(long, value_name = "BOOL")]
    ipti_report_only_at_risk: Option<bool>,

    /// Replace ITN parameters with the default description or leave them for manual editing
    #[arg(long, value_enum, value_name = "MODE")]
    itn_description: Option<ItnDescription>,

    /// Treatment actions to add for ImmediateOutcomes drug regimens
    #[arg(long, value_enum, value_name = "MODE")]
    treatment_actions: Option<TreatmentActions>,

    /// Convert version 18 scenarios to one-day timesteps (disables validation)
    #[arg(long)]
    one_day_timesteps: bool,

    /// Folder holding the scenario_N.xsd schema files
    #[arg(long, value_name = "DIR")]
    schema_folder: Option<PathBuf>,

    /// Folder scanned for scenario documents to translate
    #[arg(long, value_name = "DIR")]
    input_folder: Option<PathBuf>,

    /// Folder translated documents are written to
    #[arg(long, value_name = "DIR")]
    output_folder: Option<PathBuf>,

    /// YAML file with default options; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print a report for every translated document
    #[arg(long, value_enum, value_name = "FORMAT")]
    report: Option<ReportFormat>,

    /// Log at debug level
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = match build_options(&args) {
        Ok(options) => options,
        Err(e) => setup_failure(&e.to_string()),
    };
    if let Err(e) = options.prepare_folders() {
        setup_failure(&e.to_string());
    }

    let engine = match TranslationEngine::new(options) {
        Ok(engine) => engine,
        Err(e) => setup_failure(&e.to_string()),
    };

    let outcome = match &engine.options().update_records {
        Some(path) => JsonLinesRecordStore::open(path)
            .and_then(|mut store| translate_records(&engine, &mut store)),
        None => translate_folder(
            &engine,
            &engine.options().input_folder,
            &engine.options().output_folder,
        ),
    };

    match outcome {
        Ok(summary) => {
            if let Some(format) = args.report {
                print_reports(&summary, format);
            }
            print_summary(&engine, &summary);
        }
        Err(BatchError::Fatal {
            document,
            source: TranslationError::Document(e @ DocumentError::MissingOption { .. }),
        }) => setup_failure(&format!("{} ({})", e, document)),
        Err(e) => {
            error!("{}", e);
            eprintln!("\n❌ Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Options from `--config` (or defaults) with command-line flags applied on top.
fn build_options(args: &Args) -> Result<TranslatorOptions, SetupError> {
    let mut options = match &args.config {
        Some(path) => TranslatorOptions::from_yaml_file(path)?,
        None => TranslatorOptions::new(),
    };

    if let Some(version) = args.required_version {
        options = options.with_target_version(version);
    }
    if args.latest_schema {
        options = options.with_schema_naming(SchemaNaming::Latest);
    } else if args.current_schema {
        options = options.with_schema_naming(SchemaNaming::Current);
    }
    if args.no_validation {
        options = options.with_validation(false);
    }
    if args.no_translation {
        options = options.with_output(false);
    }
    if let Some(path) = &args.update_records {
        options.update_records = Some(path.clone());
    }
    if let Some(value) = args.max_dens_correction {
        options = options.with_max_dens_correction(value.into());
    }
    if let Some(value) = args.ipti_sp_option_without_interventions {
        options = options.with_ipti_sp_option(value.into());
    }
    if let Some(value) = args.ipti_report_only_at_risk {
        options = options.with_ipti_report_only_at_risk(value.into());
    }
    if let Some(value) = args.itn_description {
        options = options.with_itn_description(value);
    }
    if let Some(value) = args.treatment_actions {
        options = options.with_treatment_actions(value);
    }
    if args.one_day_timesteps || options.one_day_timesteps {
        options = options.with_one_day_timesteps(true);
    }
    if let Some(folder) = &args.schema_folder {
        options.schema_folder = folder.clone();
    }
    if let Some(folder) = &args.input_folder {
        options.input_folder = folder.clone();
    }
    if let Some(folder) = &args.output_folder {
        options.output_folder = folder.clone();
    }

    options.check()?;
    Ok(options)
}

fn setup_failure(message: &str) -> ! {
    eprintln!("\n❌ Error: {}", message);
    eprintln!("\n{}", Args::command().render_usage());
    eprintln!("Example: scenario-translator --required-version 32 --treatment-actions simple");
    eprintln!("Run with --help for the full list of options.");
    process::exit(1);
}

fn print_reports(summary: &BatchSummary, format: ReportFormat) {
    let reporter = TranslationReporter::new().with_format(format);
    for outcome in &summary.translated {
        let report = reporter.generate_report(&outcome.document, &outcome.result);
        match reporter.format_report(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!(document = %outcome.document, "failed to render report: {}", e),
        }
    }
}

fn print_summary(engine: &TranslationEngine, summary: &BatchSummary) {
    let options = engine.options();
    info!(
        translated = summary.translated.len(),
        failed = summary.failed,
        "batch finished"
    );

    println!("\n=== Translation Complete ===");
    println!("  ✓ Target version: {}", options.target());
    println!("  ✓ Translated: {}", summary.translated.len());
    if summary.failed > 0 {
        println!("  ✗ Failed: {}", summary.failed);
    }
    if summary.warnings() > 0 {
        println!("  ⚠ Warnings: {}", summary.warnings());
    }
    if !options.write_output {
        println!("  ℹ Output not written (--no-translation)");
    } else if let Some(path) = &options.update_records {
        println!("  ✓ Records updated: {}", path.display());
    } else {
        println!("  ✓ Output folder: {}", options.output_folder.display());
    }
}
