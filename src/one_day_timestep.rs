//! Conversion of version-18 five-day-timestep fitting scenarios to one-day
//! timesteps.
//!
//! Only the simple case-management setups used by the fitting scenarios are
//! recognised; any other health system is rejected.

use tracing::info;

use crate::document::{DocumentError, Element};
use crate::schema_version::SchemaVersion;
use crate::steps::{model_options_mut, option};
use crate::transformation_step::{StepContext, StepResult, WarningType};

/// The only version the conversion applies to.
pub const ONE_DAY_TIMESTEP_VERSION: SchemaVersion = SchemaVersion::new(18);

const OLD_STEP_DAYS: i64 = 5;
const HEALTH_SYSTEM_MEMORY_DAYS: &str = "28";

/// Named case-management setups with a known event-scheduler equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseManagement {
    Monitoring,
    NoTreatment,
    Ironmal,
}

impl CaseManagement {
    fn for_change_hs(name: &str) -> Option<Self> {
        match name {
            "Do Monitoring HS" | "Np Monitoring HS" => Some(Self::Monitoring),
            _ => None,
        }
    }

    fn for_health_system(name: &str) -> Option<Self> {
        match name {
            "no Treatment" | "Mortality Fitting" | "no Treatment no Mortality" => {
                Some(Self::NoTreatment)
            }
            "Ironmal" => Some(Self::Ironmal),
            _ => None,
        }
    }

    fn uncomplicated_decisions(self) -> Vec<Element> {
        match self {
            Self::Monitoring => vec![treatment_decision("", "effective_treat"), test_decision()],
            Self::NoTreatment => vec![treatment_decision("", "none"), test_decision()],
            Self::Ironmal => vec![
                official_care_decision("p(.64): yes p(.36): no"),
                treatment_decision("official_care,p", OFFICIAL_CARE_TREATMENT),
                test_decision(),
            ],
        }
    }

    fn complicated_decisions(self) -> Vec<Element> {
        match self {
            Self::Monitoring => vec![
                treatment_decision("", "effective_treat"),
                hospitalisation_decision("", "immediate"),
                test_decision(),
            ],
            Self::NoTreatment => vec![
                treatment_decision("", "none"),
                hospitalisation_decision("", "none"),
                test_decision(),
            ],
            Self::Ironmal => vec![
                official_care_decision("p(.48): yes p(.52): no"),
                treatment_decision("official_care,p", OFFICIAL_CARE_TREATMENT),
                hospitalisation_decision(
                    "official_care",
                    "official_care(yes): immediate official_care(no): none",
                ),
                test_decision(),
            ],
        }
    }

    fn event_scheduler(self) -> Element {
        Element::new("EventScheduler")
            .with_child(case_tree("uncomplicated", self.uncomplicated_decisions()))
            .with_child(case_tree("complicated", self.complicated_decisions()))
            .with_child(
                Element::new("ClinicalOutcomes")
                    .with_child(Element::new("maxUCSeekingMemory").with_text("3"))
                    .with_child(Element::new("uncomplicatedCaseDuration").with_text("3"))
                    .with_child(Element::new("complicatedCaseDuration").with_text("5"))
                    .with_child(Element::new("complicatedRiskDuration").with_text("5"))
                    .with_child(Element::new("pImmediateUC").with_text("1")),
            )
    }
}

const OFFICIAL_CARE_TREATMENT: &str =
    "official_care(yes){p(.6): effective_treat p(.4): none} official_care(no): none";

fn decision(name: &str, depends: &str, values: &str, text: &str) -> Element {
    Element::new("decision")
        .with_attr("name", name)
        .with_attr("depends", depends)
        .with_attr("values", values)
        .with_text(text)
}

fn treatment_decision(depends: &str, text: &str) -> Element {
    decision("treatment", depends, "effective_treat,none", text)
}

fn test_decision() -> Element {
    decision("test", "", "none,microscopy,RDT", "none")
}

fn hospitalisation_decision(depends: &str, text: &str) -> Element {
    decision("hospitalisation", depends, "none,delayed,immediate", text)
}

fn official_care_decision(text: &str) -> Element {
    decision("official_care", "p", "yes,no", text)
}

fn effective_medication() -> Element {
    Element::new("medicate")
        .with_attr("drug", "effective")
        .with_attr("mg", "1")
        .with_attr("hour", "0")
}

fn case_tree(name: &str, decisions: Vec<Element>) -> Element {
    let mut decision_list = Element::new("decisions");
    for decision in decisions {
        decision_list.append_child(decision);
    }
    Element::new(name).with_child(decision_list).with_child(
        Element::new("treatments")
            .with_child(
                Element::new("treatment")
                    .with_attr("name", "effective_treat")
                    .with_child(Element::new("schedule").with_child(effective_medication())),
            )
            .with_child(
                Element::new("treatment")
                    .with_attr("name", "none")
                    .with_child(Element::new("schedule")),
            ),
    )
}

/// A drug that clears every infection almost immediately.
fn effective_drug_description() -> Element {
    Element::new("drugDescription").with_child(
        Element::new("drug")
            .with_attr("abbrev", "effective")
            .with_child(
                Element::new("PD").with_child(
                    Element::new("allele")
                        .with_attr("name", "sensitive")
                        .with_child(Element::new("initial_frequency").with_text("1"))
                        .with_child(Element::new("max_killing_rate").with_text("1e7"))
                        .with_child(Element::new("IC50").with_text("1"))
                        .with_child(Element::new("slope").with_text("1")),
                ),
            )
            .with_child(
                Element::new("PK")
                    .with_child(Element::new("negligible_concentration").with_text("1e-5"))
                    .with_child(Element::new("half_life").with_text("0.00069"))
                    .with_child(Element::new("vol_dist").with_text("0.01667")),
            ),
    )
}

fn one_day_step(element: &Element, five_day_step: &str) -> Result<String, DocumentError> {
    let step: i64 = five_day_step
        .trim()
        .parse()
        .map_err(|_| DocumentError::invalid(element, "time", five_day_step))?;
    Ok(((step - 1) * OLD_STEP_DAYS + 1).to_string())
}

/// Swaps the named `ImmediateOutcomes` of `parent` for its event-scheduler
/// equivalent, placed before `CFR`.
fn replace_immediate_outcomes(
    parent: &mut Element,
    lookup: fn(&str) -> Option<CaseManagement>,
) -> Result<(), DocumentError> {
    let outcomes = parent.take_required_child("ImmediateOutcomes")?;
    let name = outcomes.attr("name").unwrap_or_default();
    let case_management = lookup(name).ok_or_else(|| {
        DocumentError::unsupported(format!(
            "health system \"{}\" has no one-day timestep equivalent",
            name
        ))
    })?;
    parent.insert_before("CFR", case_management.event_scheduler());
    Ok(())
}

/// Rescales a version-18 five-day-timestep document to one-day timesteps.
pub fn convert_to_one_day_timesteps(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    info!("converting scenario to one-day timesteps");

    root.for_each_named_mut("surveyTime", &mut |survey_time| {
        let converted = one_day_step(survey_time, &survey_time.text())?;
        survey_time.set_text(converted);
        Ok(())
    })?;

    let model_options = model_options_mut(root)?;
    for name in ["MOLINEAUX_WITHIN_HOST_MODEL", "INCLUDES_PK_PD", "CLINICAL_EVENT_SCHEDULER"] {
        model_options.append_child(option(name, "true"));
    }

    let clinical = root
        .find_descendant_mut("clinical")
        .ok_or_else(|| DocumentError::MissingElement {
            parent: "model".to_string(),
            name: "clinical".to_string(),
        })?;
    clinical.set_attr("healthSystemMemory", HEALTH_SYSTEM_MEMORY_DAYS);

    root.for_each_named_mut("intervention", &mut |intervention| {
        if let Some(time) = intervention.attr("time").map(str::to_string) {
            let converted = one_day_step(intervention, &time)?;
            intervention.set_attr("time", converted);
        }
        Ok(())
    })?;

    root.for_each_named_mut("changeHS", &mut |change_hs| {
        replace_immediate_outcomes(change_hs, CaseManagement::for_change_hs)
    })?;
    replace_immediate_outcomes(root.child_mut("healthSystem")?, CaseManagement::for_health_system)?;

    root.insert_before("model", effective_drug_description());

    if let Some(interventions) = root.optional_child_mut("interventions")? {
        if interventions.attr("name") == Some("A2 Intervention") {
            interventions.prepend_child(
                Element::new("MDADescription")
                    .with_child(Element::new("schedule").with_child(effective_medication())),
            );
        }
    }

    ctx.warn(
        WarningType::ManualReview,
        "one-day timestep conversion only covers the simple fitting scenarios; check the result",
    );
    Ok(())
}
