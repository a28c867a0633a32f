//! Rewrites shared by the health-system steps.

use crate::config::TreatmentActions;
use crate::document::{DocumentError, Element};
use crate::transformation_step::{StepContext, WarningType};

use super::fmt_num;

const SEQUELAE_UPPER_BOUNDS: [f64; 2] = [5.0, 99.0];
const SEQUELAE_LOWER_BOUNDS: [f64; 2] = [0.0, 5.0];
const DEFAULT_SEQUELAE: [f64; 2] = [0.0132, 0.005];

/// Version 20 moved `pSequelaeInpatient` up to the health system as age
/// groups and renamed the CFR `cfr` attribute to `value`.
pub fn regroup_sequelae(hs: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), DocumentError> {
    let values = match hs.optional_child_mut("ImmediateOutcomes")? {
        Some(outcomes) => {
            let old = outcomes.take_required_child("pSequelaeInpatient")?;
            read_sequelae(&old).ok_or_else(|| {
                DocumentError::unsupported(
                    "expected pSequelaeInpatient to have two age-groups: 0-5 and 5-99",
                )
            })?
        }
        None => {
            ctx.warn(
                WarningType::DefaultAssumed,
                "pSequelaeInpatient element with default data added",
            );
            DEFAULT_SEQUELAE
        }
    };

    let mut groups = Element::new("pSequelaeInpatient");
    for (value, lower) in values.iter().zip(SEQUELAE_LOWER_BOUNDS) {
        groups.append_child(
            Element::new("group")
                .with_attr("value", fmt_num(*value))
                .with_attr("lowerbound", fmt_num(lower)),
        );
    }
    hs.append_child(groups);

    hs.child_mut("CFR")?.for_each_named_mut("group", &mut |group| {
        group.rename_attr("cfr", "value");
        Ok(())
    })
}

fn read_sequelae(old: &Element) -> Option<[f64; 2]> {
    let items = old.descendants_named("item");
    if items.len() != SEQUELAE_UPPER_BOUNDS.len() {
        return None;
    }
    let mut values = [0.0; 2];
    for (i, item) in items.iter().enumerate() {
        let upper: f64 = item.parse_attr("maxAgeYrs").ok()??;
        if upper != SEQUELAE_UPPER_BOUNDS[i] {
            return None;
        }
        values[i] = item.parse_attr("value").ok()??;
    }
    Some(values)
}

/// Gives every drug named by the `drugRegimen` of an `ImmediateOutcomes`
/// block an explicit `treatmentActions` entry.
pub fn add_treatment_actions(
    outcomes: &mut Element,
    ctx: &mut StepContext<'_>,
) -> Result<(), DocumentError> {
    let drugs = regimen_drugs(outcomes.child("drugRegimen")?);
    if drugs.is_empty() {
        return Ok(());
    }
    if ctx.options.treatment_actions == TreatmentActions::Unset {
        return Err(DocumentError::missing_option(
            "treatment-actions",
            "ImmediateOutcomes needs a treatment action for each drug regimen entry",
        ));
    }

    let mut actions = Element::new("treatmentActions");
    for drug in drugs {
        actions.append_child(treatment_action(&drug, ctx.options.treatment_actions));
    }
    outcomes.append_child(actions);
    if ctx.options.treatment_actions == TreatmentActions::Placeholder {
        ctx.warn(
            WarningType::ManualReview,
            "treatment actions were left as placeholders; fill them in by hand",
        );
    }
    Ok(())
}

/// Distinct first-line, second-line and inpatient drugs, in that order.
fn regimen_drugs(regimen: &Element) -> Vec<String> {
    let mut drugs: Vec<String> = Vec::new();
    for key in ["firstLine", "secondLine", "inpatient"] {
        if let Some(drug) = regimen.attr(key) {
            if !drugs.iter().any(|d| d == drug) {
                drugs.push(drug.to_string());
            }
        }
    }
    drugs
}

fn treatment_action(drug: &str, mode: TreatmentActions) -> Element {
    let treatment = Element::new("treatment").with_attr("name", drug);
    match mode {
        TreatmentActions::Legacy => treatment.with_child(
            Element::new("clearInfections")
                .with_attr("stage", "both")
                .with_attr("timesteps", "-1"),
        ),
        TreatmentActions::Simple => treatment.with_child(
            Element::new("clearInfections")
                .with_attr("stage", "blood")
                .with_attr("timesteps", "1"),
        ),
        TreatmentActions::Placeholder | TreatmentActions::Unset => {
            treatment.with_comment(format!(" actions for drug {} ", drug))
        }
    }
}
