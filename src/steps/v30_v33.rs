use crate::document::{DocumentError, Element};
use crate::transformation_step::{StepContext, StepResult};

use super::health_system::add_treatment_actions;
use super::interventions::restructure_human_interventions;
use super::{contains_option, fmt_num, model_options_mut, option, steps_per_year};

/// INNATE_MAX_DENS now defaults to on, so older documents pin it off;
/// larviciding becomes a generic vector population intervention.
pub fn translate_30_to_31(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let model_options = model_options_mut(root)?;
    if !contains_option(model_options, "INNATE_MAX_DENS") {
        model_options.append_child(option("INNATE_MAX_DENS", "false"));
    }

    let interventions = root.child("interventions")?;
    if interventions.optional_child("larviciding")?.is_none() {
        return Ok(());
    }
    let steps_per_year = steps_per_year(root)?;

    let interventions = root.child_mut("interventions")?;
    let mut larviciding = interventions.take_required_child("larviciding")?;
    let name = larviciding
        .remove_attr("name")
        .unwrap_or_else(|| "simple larviciding".to_string());
    larviciding.set_attr("name", format!("{} translated from schema 30", name));

    let description = larviciding.child_mut("description")?;
    for anopheles in description.elements_named_mut("anopheles") {
        let duration: f64 = anopheles.take_required_child("duration")?.required_parse("value")?;
        let effectiveness = anopheles
            .take_required_child("effectiveness")?
            .required_attr("value")?
            .to_string();
        anopheles.append_child(
            Element::new("emergenceReduction")
                .with_attr("initial", effectiveness)
                .with_child(
                    Element::new("decay")
                        .with_attr("function", "step")
                        .with_attr("L", fmt_num(duration / steps_per_year)),
                ),
        );
    }
    larviciding.rename("intervention");
    interventions.append_child(Element::new("vectorPop").with_child(larviciding));
    Ok(())
}

/// Human interventions become effects plus deployments, and every drug
/// regimen gets explicit treatment actions.
pub fn translate_31_to_32(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    restructure_human_interventions(root, ctx)?;

    if let Some(hs) = root.optional_child_mut("healthSystem")? {
        if let Some(outcomes) = hs.optional_child_mut("ImmediateOutcomes")? {
            add_treatment_actions(outcomes, ctx)?;
        }
    }
    if let Some(change_hs) = root.child_mut("interventions")?.optional_child_mut("changeHS")? {
        for deployment in change_hs.elements_named_mut("timedDeployment") {
            if let Some(outcomes) = deployment.optional_child_mut("ImmediateOutcomes")? {
                add_treatment_actions(outcomes, ctx)?;
            }
        }
    }
    Ok(())
}

/// Not translated here; documents must go through the external tool.
pub fn translate_32_to_33(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    if root.has_descendant("EventScheduler") {
        return Err(DocumentError::unsupported(
            "Cowardly refusing to update an XML using <EventScheduler>",
        )
        .into());
    }
    Err(DocumentError::unsupported(
        "translation from schema 32 to 33 is not implemented; use the external translateXML tool",
    )
    .into())
}
