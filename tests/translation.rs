use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use scenario_translator::{
    batch::translate_folder,
    config::{MaxDensCorrection, TreatmentActions},
    reporter::{ReportFormat, TranslationReporter},
    transformation_step::WarningType,
    validation::ValidatorError,
    Document, DocumentError, SchemaValidator, SchemaVersion, StepRegistry, TranslationEngine,
    TranslationError, TranslatorOptions, ValidationReport,
};

const SCENARIO_29: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" name="fixture" schemaVersion="29" xsi:noNamespaceSchemaLocation="scenario_29.xsd">
  <monitoring name="monthly">
    <SurveyOptions>
      <option name="nHost" value="true"/>
      <option name="Vector_EIR_Input" value="true"/>
      <option name="Vector_EIR_Simulated" value="true"/>
    </SurveyOptions>
  </monitoring>
  <interventions name="none"/>
  <healthSystem>
    <ImmediateOutcomes name="Tanzania ACT">
      <drugRegimen firstLine="ACT" inpatient="QN" secondLine="ACT"/>
    </ImmediateOutcomes>
  </healthSystem>
  <entomology mode="4" annualEIR="16" name="Namawala"/>
  <model>
    <ModelOptions>
      <option name="LOGNORMAL_MASS_ACTION" value="true"/>
    </ModelOptions>
    <parameters interval="5" iseed="1" latentp="3"/>
  </model>
</scenario>
"#;

/// Unversioned document in the layout of the earliest schema.
const SCENARIO_UNVERSIONED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario name="legacy" modelVersion="0" analysisNo="1" popSize="1000" maximumAgeYrs="90" mode="2" simulationDuration="1460">
  <monitoring>
    <continuous period="5"/>
    <surveys summaryOption="1"><surveyTime>73</surveyTime></surveys>
  </monitoring>
  <interventions name="none"/>
  <healthSystem healthSystemMemory="6" name="Tanzania">
    <drugRegimen firstLine="CQ" secondLine="SP" inpatient="QN"/>
    <pSequelaeInpatient>
      <item maxAgeYrs="5" best="0.0132"/>
      <item maxAgeYrs="99" best="0.005"/>
    </pSequelaeInpatient>
    <CFR><group lowerbound="0" cfr="0.09"/></CFR>
  </healthSystem>
  <entoData inputType="EIR" name="Namawala">
    <EIRDaily origin="0">0.1</EIRDaily>
    <EIRDaily origin="0">0.2</EIRDaily>
  </entoData>
  <demography name="Ifakara"/>
  <parameters nspore="2" interval="5" delta="5" useIseed="1"/>
</scenario>
"#;

const SCENARIO_18: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" name="vector" schemaVersion="18" assimMode="0" xsi:noNamespaceSchemaLocation="scenario_18.xsd">
  <monitoring>
    <SurveyOptions>
      <option name="imr_summary" value="true"/>
      <option name="Vector_EIR_Input" value="true"/>
    </SurveyOptions>
    <surveys><surveyTime>73</surveyTime></surveys>
  </monitoring>
  <interventions name="none"/>
  <healthSystem>
    <EventScheduler>
      <ClinicalOutcomes><pImmediateUC>0.5</pImmediateUC></ClinicalOutcomes>
    </EventScheduler>
    <CFR><group lowerbound="0" cfr="0.1"/></CFR>
  </healthSystem>
  <entoData mode="4" name="Namawala">
    <vector>
      <anopheles mosquito="gambiae_ss" propInfected="0.078" propInfectious="0.021">
        <eir a0="-9.0" a1="0.1" b1="0.2" a2="0.3" b2="0.4" EIRRotateAngle="0"/>
        <mosq mosqRestDuration="3" mosqHumanBloodIndex="0.9"/>
      </anopheles>
    </vector>
  </entoData>
  <demography popSize="1000" maximumAgeYrs="90"/>
  <model>
    <ModelOptions><option name="MAX_DENS_CORRECTION" value="true"/></ModelOptions>
    <clinical healthSystemMemory="6"/>
    <parameters interval="5" delta="1"/>
  </model>
</scenario>
"#;

/// Five-day-timestep fitting scenario in the version 16 layout.
const FITTING_16: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario name="fitting" schemaVersion="16" popSize="1000" maximumAgeYrs="90" mode="4">
  <monitoring>
    <SurveyOptions><option name="nHost" value="true"/></SurveyOptions>
    <surveys><surveyTime>1</surveyTime><surveyTime>74</surveyTime></surveys>
  </monitoring>
  <interventions name="A2 Intervention">
    <timed>
      <intervention time="3"><changeHS><ImmediateOutcomes name="Do Monitoring HS"/><CFR/></changeHS></intervention>
    </timed>
  </interventions>
  <healthSystem><ImmediateOutcomes name="Ironmal"/><CFR/></healthSystem>
  <entoData name="Namawala"/>
  <demography/>
  <model><ModelOptions/><clinical healthSystemMemory="6"/><parameters interval="5"/></model>
</scenario>
"#;

fn options() -> TranslatorOptions {
    TranslatorOptions::new()
        .with_validation(false)
        .with_treatment_actions(TreatmentActions::Simple)
}

#[test]
fn test_translates_to_latest_supported() {
    let engine = TranslationEngine::new(options()).unwrap();
    let mut doc = Document::parse(SCENARIO_29).unwrap();
    let result = engine.translate(&mut doc).unwrap();

    let visited: Vec<u32> = result.visited_versions.iter().map(|v| v.value()).collect();
    assert_eq!(visited, vec![29, 30, 31, 32]);
    assert_eq!(result.target_version, SchemaVersion::LATEST_SUPPORTED);
    assert_eq!(result.schema_file, "scenario_32.xsd");

    let root = &doc.root;
    assert_eq!(root.name(), "om:scenario");
    assert_eq!(root.attr("schemaVersion"), Some("32"));
    assert_eq!(root.attr("xmlns:om"), Some("http://openmalaria.org/schema/scenario_32"));
    assert_eq!(
        root.attr("xsi:schemaLocation"),
        Some("http://openmalaria.org/schema/scenario_32 scenario_32.xsd")
    );
    assert!(!root.has_attr("xsi:noNamespaceSchemaLocation"));

    let survey_options: Vec<&str> = root
        .find_descendant("SurveyOptions")
        .unwrap()
        .elements_named("option")
        .map(|o| o.attr("name").unwrap())
        .collect();
    assert_eq!(survey_options, vec!["nHost", "inputEIR", "simulatedEIR"]);

    let ento = root.child("entomology").unwrap();
    assert_eq!(ento.attr("mode"), Some("dynamic"));
    assert_eq!(ento.attr("scaledAnnualEIR"), Some("16"));

    let model_options: Vec<&str> = root
        .find_descendant("ModelOptions")
        .unwrap()
        .elements_named("option")
        .map(|o| o.attr("name").unwrap())
        .collect();
    assert_eq!(model_options, vec!["LOGNORMAL_MASS_ACTION", "INNATE_MAX_DENS"]);

    let actions = root.find_descendant("treatmentActions").unwrap();
    let drugs: Vec<&str> = actions
        .elements_named("treatment")
        .map(|t| t.attr("name").unwrap())
        .collect();
    assert_eq!(drugs, vec!["ACT", "QN"]);
}

#[test]
fn test_output_is_namespaced_xml() {
    let engine = TranslationEngine::new(options()).unwrap();
    let (xml, _) = engine.translate_str(SCENARIO_29).unwrap();
    assert!(xml.contains("<om:scenario"));
    assert!(xml.contains("</om:scenario>"));

    let reparsed = Document::parse(&xml).unwrap();
    assert_eq!(reparsed.root.attr("schemaVersion"), Some("32"));
}

#[test]
fn test_missing_treatment_switch_aborts() {
    let options = TranslatorOptions::new().with_validation(false);
    let engine = TranslationEngine::new(options).unwrap();
    let err = engine.translate_str(SCENARIO_29).unwrap_err();
    assert!(matches!(
        err,
        TranslationError::Document(DocumentError::MissingOption { .. })
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn test_translating_to_33_is_refused() {
    let engine = TranslationEngine::new(options().with_target_version(33)).unwrap();
    let err = engine.translate_str(SCENARIO_29).unwrap_err();
    assert!(err.to_string().contains("not implemented"));
}

#[test]
fn test_intermediate_target_keeps_plain_root() {
    let engine = TranslationEngine::new(options().with_target_version(30)).unwrap();
    let mut doc = Document::parse(SCENARIO_29).unwrap();
    let result = engine.translate(&mut doc).unwrap();
    assert_eq!(result.applied_steps.len(), 1);
    assert_eq!(doc.root.name(), "scenario");
    assert_eq!(doc.root.attr("xsi:noNamespaceSchemaLocation"), Some("scenario_30.xsd"));
    assert!(doc.root.find_descendant("treatmentActions").is_none());
}

#[test]
fn test_newer_document_is_rejected() {
    let engine = TranslationEngine::new(options().with_target_version(20)).unwrap();
    let err = engine.translate_str(SCENARIO_29).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Document version 29 is newer than the target version 20"
    );
}

struct RecordingValidator(Rc<RefCell<Vec<String>>>);

impl SchemaValidator for RecordingValidator {
    fn validate(&self, xml: &str, schema_file: &str) -> Result<ValidationReport, ValidatorError> {
        self.0.borrow_mut().push(xml.to_string());
        Ok(ValidationReport::new(schema_file))
    }
}

#[test]
fn test_validator_sees_prepared_copy() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let options = options().with_validation(true).with_target_version(30);
    let engine = TranslationEngine::with_registry(StepRegistry::with_default_steps().unwrap(), options)
        .unwrap()
        .with_validator(Box::new(RecordingValidator(seen.clone())));

    let (xml, result) = engine.translate_str(SCENARIO_29).unwrap();
    assert!(result.validation.unwrap().is_valid);
    assert!(xml.contains("xsi:noNamespaceSchemaLocation"));
    assert!(!xml.contains("wuID"));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(r#"wuID="123""#));
    assert!(!seen[0].contains("xsi:noNamespaceSchemaLocation"));
}

#[test]
fn test_folder_batch_with_reports() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    fs::write(input.path().join("fixture.xml"), SCENARIO_29).unwrap();

    let engine = TranslationEngine::new(options()).unwrap();
    let summary = translate_folder(&engine, input.path(), output.path()).unwrap();
    assert_eq!(summary.translated.len(), 1);
    assert!(output.path().join("fixture.xml").is_file());

    let reporter = TranslationReporter::new().with_format(ReportFormat::Json);
    let outcome = &summary.translated[0];
    let report = reporter.generate_report(&outcome.document, &outcome.result);
    let json: serde_json::Value = serde_json::from_str(&reporter.format_report(&report).unwrap()).unwrap();
    assert_eq!(json["document"], "fixture.xml");
    assert_eq!(json["visited_versions"], serde_json::json!([29, 30, 31, 32]));
}

fn option_names(root: &scenario_translator::Element, parent: &str) -> Vec<String> {
    root.find_descendant(parent)
        .unwrap()
        .elements_named("option")
        .map(|o| o.attr("name").unwrap().to_string())
        .collect()
}

#[test]
fn test_unversioned_document_runs_every_step() {
    let options = options().with_max_dens_correction(MaxDensCorrection::DontCorrect);
    let engine = TranslationEngine::new(options).unwrap();
    let mut doc = Document::parse(SCENARIO_UNVERSIONED).unwrap();
    let result = engine.translate(&mut doc).unwrap();

    let visited: Vec<u32> = result.visited_versions.iter().map(|v| v.value()).collect();
    assert_eq!(visited, (0..=32).collect::<Vec<u32>>());
    assert_eq!(result.source_version, SchemaVersion::new(0));
    assert_eq!(result.applied_steps.len(), 32);

    let root = &doc.root;
    assert_eq!(root.name(), "om:scenario");
    assert_eq!(root.attr("schemaVersion"), Some("32"));
    for attribute in ["modelVersion", "wuID", "assimMode", "popSize", "mode", "simulationDuration"] {
        assert!(!root.has_attr(attribute), "{} should be gone", attribute);
    }

    let demography = root.child("demography").unwrap();
    assert_eq!(demography.attr("popSize"), Some("1000"));
    assert_eq!(demography.attr("maximumAgeYrs"), Some("90"));

    let ento = root.child("entomology").unwrap();
    assert_eq!(ento.attr("mode"), Some("forced"));
    assert!(!ento.has_attr("inputType"));
    let non_vector = ento.child("nonVector").unwrap();
    assert_eq!(non_vector.attr("eipDuration"), Some("10"));
    assert_eq!(non_vector.count_named("EIRDaily"), 2);

    let monitoring = root.child("monitoring").unwrap();
    assert_eq!(monitoring.child("continuous").unwrap().attr("period"), Some("1"));
    assert_eq!(option_names(root, "SurveyOptions"), vec!["nHost"]);

    let hs = root.child("healthSystem").unwrap();
    let parts: Vec<_> = hs.child_elements().map(|e| e.name()).collect();
    assert_eq!(parts, vec!["ImmediateOutcomes", "CFR", "pSequelaeInpatient"]);
    assert_eq!(hs.child("CFR").unwrap().child("group").unwrap().attr("value"), Some("0.09"));
    let sequelae: Vec<_> = hs
        .child("pSequelaeInpatient")
        .unwrap()
        .elements_named("group")
        .map(|g| g.attr("value").unwrap())
        .collect();
    assert_eq!(sequelae, vec!["0.0132", "0.005"]);
    let drugs: Vec<_> = hs
        .find_descendant("treatmentActions")
        .unwrap()
        .elements_named("treatment")
        .map(|t| t.attr("name").unwrap())
        .collect();
    assert_eq!(drugs, vec!["CQ", "SP", "QN"]);

    let model = root.child("model").unwrap();
    let parts: Vec<_> = model.child_elements().map(|e| e.name()).collect();
    assert_eq!(parts, vec!["ModelOptions", "clinical", "human", "parameters"]);
    assert_eq!(model.child("clinical").unwrap().attr("healthSystemMemory"), Some("6"));
    let parameters = model.child("parameters").unwrap();
    assert_eq!(parameters.attr("interval"), Some("5"));
    for attribute in ["nspore", "eipDuration", "delta", "useIseed"] {
        assert!(!parameters.has_attr(attribute), "{} should be gone", attribute);
    }
    assert_eq!(
        option_names(root, "ModelOptions"),
        vec!["MAX_DENS_CORRECTION", "INNATE_MAX_DENS"]
    );

    let interventions = root.child("interventions").unwrap();
    assert!(interventions.child_elements().next().is_none());
}

#[test]
fn test_vector_document_from_18() {
    let engine = TranslationEngine::new(options()).unwrap();
    let mut doc = Document::parse(SCENARIO_18).unwrap();
    let result = engine.translate(&mut doc).unwrap();

    let visited: Vec<u32> = result.visited_versions.iter().map(|v| v.value()).collect();
    assert_eq!(visited, (18..=32).collect::<Vec<u32>>());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.warning_type == WarningType::DefaultAssumed));

    let root = &doc.root;
    assert_eq!(root.attr("schemaVersion"), Some("32"));
    assert!(!root.has_attr("assimMode"));
    assert_eq!(option_names(root, "SurveyOptions"), vec!["allCauseIMR", "inputEIR"]);

    let ento = root.child("entomology").unwrap();
    assert_eq!(ento.attr("mode"), Some("dynamic"));
    let anopheles = ento.find_descendant("anopheles").unwrap();
    let seasonality = anopheles.child_elements().next().unwrap();
    assert_eq!(seasonality.name(), "seasonality");
    assert_eq!(seasonality.attr("input"), Some("EIR"));
    assert!(seasonality.has_attr("annualEIR"));
    assert_eq!(seasonality.child("fourierSeries").unwrap().count_named("coeffic"), 2);
    let mosq = anopheles.child("mosq").unwrap();
    assert_eq!(mosq.attr("minInfectedThreshold"), Some("0.01"));
    assert_eq!(mosq.child("mosqRestDuration").unwrap().attr("value"), Some("3"));
    assert_eq!(mosq.child("mosqHumanBloodIndex").unwrap().attr("value"), Some("0.9"));

    let hs = root.child("healthSystem").unwrap();
    let outcomes = hs.find_descendant("ClinicalOutcomes").unwrap();
    assert!(outcomes.optional_child("pImmediateUC").unwrap().is_none());
    assert_eq!(outcomes.count_named("dailyPrImmUCTS"), 3);
    assert_eq!(hs.child("pSequelaeInpatient").unwrap().count_named("group"), 2);
    assert_eq!(hs.child("CFR").unwrap().child("group").unwrap().attr("value"), Some("0.1"));

    let model = root.child("model").unwrap();
    assert!(model.child("human").is_ok());
    assert!(!model.child("parameters").unwrap().has_attr("delta"));
    assert_eq!(
        option_names(root, "ModelOptions"),
        vec!["MAX_DENS_CORRECTION", "INNATE_MAX_DENS"]
    );
}

#[test]
fn test_one_day_timesteps_at_18() {
    let options = options().with_target_version(18).with_one_day_timesteps(true);
    assert!(!options.validate);
    let engine = TranslationEngine::new(options).unwrap();
    let mut doc = Document::parse(FITTING_16).unwrap();
    let result = engine.translate(&mut doc).unwrap();

    let visited: Vec<u32> = result.visited_versions.iter().map(|v| v.value()).collect();
    assert_eq!(visited, vec![16, 17, 18]);
    assert!(result.validation.is_none());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.warning_type == WarningType::ManualReview));

    let root = &doc.root;
    assert_eq!(root.attr("schemaVersion"), Some("18"));
    assert_eq!(root.child("demography").unwrap().attr("popSize"), Some("1000"));
    assert_eq!(root.child("entoData").unwrap().attr("mode"), Some("4"));

    let times: Vec<_> = root
        .find_descendant("surveys")
        .unwrap()
        .elements_named("surveyTime")
        .map(|t| t.text())
        .collect();
    assert_eq!(times, vec!["1", "366"]);
    assert_eq!(root.find_descendant("intervention").unwrap().attr("time"), Some("11"));

    assert_eq!(
        option_names(root, "ModelOptions"),
        vec!["MOLINEAUX_WITHIN_HOST_MODEL", "INCLUDES_PK_PD", "CLINICAL_EVENT_SCHEDULER"]
    );
    assert_eq!(
        root.find_descendant("clinical").unwrap().attr("healthSystemMemory"),
        Some("28")
    );
    let hs = root.child("healthSystem").unwrap();
    let parts: Vec<_> = hs.child_elements().map(|e| e.name()).collect();
    assert_eq!(parts, vec!["EventScheduler", "CFR"]);
    assert!(root.child("drugDescription").is_ok());
    assert!(root.find_descendant("MDADescription").is_some());
}

#[test]
fn test_one_day_timesteps_skipped_past_18() {
    let options = options().with_one_day_timesteps(true);
    let engine = TranslationEngine::new(options).unwrap();
    let mut doc = Document::parse(SCENARIO_29).unwrap();
    let result = engine.translate(&mut doc).unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.warning_type == WarningType::Skipped));
    assert!(doc.root.find_descendant("drugDescription").is_none());
}
