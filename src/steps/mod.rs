//! Per-version rewrites of the scenario tree.
//!
//! Every `translate_N_to_M` function takes the document in its version-N shape
//! and leaves it in version-M shape, or fails without the engine writing any
//! output.

mod health_system;
mod interventions;
mod v00_v10;
mod v10_v20;
mod v20_v30;
mod v30_v33;

pub use interventions::{TimedListKey, HUMAN_BEFORE};

use crate::document::{DocumentError, Element};
use crate::transformation_step::{StepContext, StepResult, TransformationStep};

/// The complete `0 -> 33` chain, in version order.
pub fn default_steps() -> Vec<TransformationStep> {
    vec![
        TransformationStep::new(0, "unversioned to 1", v00_v10::translate_0_to_1),
        TransformationStep::new(1, "xsi namespace, best to value", v00_v10::translate_1_to_2),
        TransformationStep::new(2, "no changes", v00_v10::translate_2_to_3),
        TransformationStep::new(3, "vector and non-vector entomology", v00_v10::translate_3_to_4),
        TransformationStep::new(4, "incidence model flags", v00_v10::translate_4_to_5),
        TransformationStep::new(5, "case management nmf split", v00_v10::translate_5_to_6),
        TransformationStep::new(6, "ITN and IRS descriptions", v00_v10::translate_6_to_7),
        TransformationStep::new(7, "emergence rates in document", v00_v10::translate_7_to_8),
        TransformationStep::new(8, "non-human hosts", v00_v10::translate_8_to_9),
        TransformationStep::new(9, "PKPD descriptions", v00_v10::translate_9_to_10),
        TransformationStep::new(10, "cached emergence removed", v10_v20::translate_10_to_11),
        TransformationStep::new(11, "simulationDuration removed", v10_v20::translate_11_to_12),
        TransformationStep::new(12, "model and survey options", v10_v20::translate_12_to_13),
        TransformationStep::new(13, "drug description changed", v10_v20::translate_13_to_14),
        TransformationStep::new(14, "MDA drug information", v10_v20::translate_14_to_15),
        TransformationStep::new(15, "model element, health system wrapper", v10_v20::translate_15_to_16),
        TransformationStep::new(16, "mosquito feeding parameters", v10_v20::translate_16_to_17),
        TransformationStep::new(17, "population attributes moved", v10_v20::translate_17_to_18),
        TransformationStep::new(18, "entomology mode 3 removed", v10_v20::translate_18_to_19),
        TransformationStep::new(19, "sequelae groups, IPTI option", v10_v20::translate_19_to_20),
        TransformationStep::new(20, "intervention descriptions", v20_v30::translate_20_to_21),
        TransformationStep::new(21, "EIR entry options", v20_v30::translate_21_to_22),
        TransformationStep::new(22, "report only at risk", v20_v30::translate_22_to_23),
        TransformationStep::new(23, "human availability and weight", v20_v30::translate_23_to_24),
        TransformationStep::new(24, "decay functions, MDA decisions", v20_v30::translate_24_to_25),
        TransformationStep::new(25, "vector intervention decay", v20_v30::translate_25_to_26),
        TransformationStep::new(26, "no changes", v20_v30::translate_26_to_27),
        TransformationStep::new(27, "interventions grouped by kind", v20_v30::translate_27_to_28),
        TransformationStep::new(28, "ITN parameterisation", v20_v30::translate_28_to_29),
        TransformationStep::new(29, "vector attributes to elements", v20_v30::translate_29_to_30),
        TransformationStep::new(30, "larviciding to vectorPop", v30_v33::translate_30_to_31),
        TransformationStep::new(31, "human intervention effects", v30_v33::translate_31_to_32),
        TransformationStep::new(32, "unsupported", v30_v33::translate_32_to_33),
    ]
}

/// Formats a computed number the way historical documents wrote doubles:
/// whole numbers keep a trailing `.0`.
pub(crate) fn fmt_num(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e7 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

pub(crate) fn option(name: &str, value: &str) -> Element {
    Element::new("option")
        .with_attr("name", name)
        .with_attr("value", value)
}

/// `model/ModelOptions`, which must exist from version 16 on.
pub(crate) fn model_options_mut(root: &mut Element) -> Result<&mut Element, DocumentError> {
    root.child_mut("model")?.child_mut("ModelOptions")
}

pub(crate) fn contains_option(options: &Element, name: &str) -> bool {
    options
        .elements_named("option")
        .any(|o| o.attr("name") == Some(name))
}

/// Whether a model option is switched on; MAX_DENS_CORRECTION defaults to on.
pub(crate) fn uses_option(root: &Element, name: &str) -> bool {
    let explicit = root.find_descendant("ModelOptions").and_then(|opts| {
        opts.elements_named("option")
            .find(|o| o.attr("name") == Some(name))
            .map(|o| o.attr("value") == Some("true"))
    });
    explicit.unwrap_or(name == "MAX_DENS_CORRECTION")
}

/// Timesteps per year according to `model/parameters@interval` (days).
pub(crate) fn steps_per_year(root: &Element) -> Result<f64, DocumentError> {
    let parameters = root.child("model")?.child("parameters")?;
    let interval: u32 = parameters.required_parse("interval")?;
    if interval == 0 {
        return Err(DocumentError::InvalidAttribute {
            element: "parameters".to_string(),
            attribute: "interval".to_string(),
            value: "0".to_string(),
        });
    }
    Ok(365.0 / f64::from(interval))
}

/// Moves `<parent name="x">` into a `<name value="x"/>` child.
pub(crate) fn attr_to_element(parent: &mut Element, name: &str) {
    if let Some(value) = parent.remove_attr(name) {
        parent.append_child(Element::new(name).with_attr("value", value));
    }
}

/// Like [`attr_to_element`], for beta-distributed quantities.
pub(crate) fn attr_to_beta_mean(parent: &mut Element, name: &str) {
    if let Some(value) = parent.remove_attr(name) {
        parent.append_child(
            Element::new(name)
                .with_attr("mean", value)
                .with_attr("variance", "0"),
        );
    }
}

pub(crate) fn noop(_root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    Ok(())
}
