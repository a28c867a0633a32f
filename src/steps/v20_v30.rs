use std::f64::consts::PI;

use crate::config::{IptiReportOnlyAtRisk, ItnDescription};
use crate::document::{DocumentError, Element, Node};
use crate::transformation_step::{StepContext, StepResult, WarningType};

use super::{attr_to_beta_mean, attr_to_element, fmt_num, model_options_mut, noop, option, steps_per_year, uses_option};

/// Tanzanian survey data, formerly compiled into the simulator
const AGE_GROUP_LOWER_BOUNDS: [f64; 18] = [
    0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 20.0, 20.0,
];
const AVAILABILITY_TO_MOSQUITOES: [f64; 18] = [
    0.225940909648,
    0.286173633441,
    0.336898395722,
    0.370989854675,
    0.403114915112,
    0.442585112522,
    0.473839351511,
    0.512630464378,
    0.54487872702,
    0.581527755812,
    0.630257580698,
    0.663063362714,
    0.702417432755,
    0.734605377277,
    0.788908765653,
    0.839587932303,
    1.0,
    1.0,
];
const WEIGHT: [f64; 18] = [
    13.9856718,
    18.30372108,
    21.745749,
    24.25753512,
    26.06595444,
    28.48868784,
    30.84202788,
    33.48638244,
    35.20335432,
    37.19394024,
    40.1368962,
    42.00539916,
    44.53731348,
    46.77769728,
    49.48396092,
    54.36,
    60.0,
    60.0,
];

const WEIBULL_DECAYED: [&str; 4] = [
    "preprandialKillingEffect",
    "postprandialKillingEffect",
    "killingEffect",
    "deterrency",
];

/// Per-species vector intervention descriptions and the decay element that
/// replaces their individual decay parameters.
const VECTOR_DECAYS: [(&str, &str); 3] = [
    ("ITNDescription", "ITNDecay"),
    ("IRSDescription", "IRSDecay"),
    ("VADescription", "VADecay"),
];

/// Timed intervention kinds and the intervention they now belong to
const TIMED_KINDS: [(&str, &str); 12] = [
    ("changeHS", "changeHS"),
    ("changeEIR", "changeEIR"),
    ("MDA", "MDA"),
    ("vaccinate", "vaccine"),
    ("ITN", "ITN"),
    ("IRS", "IRS"),
    ("VectorAvailability", "vectorDeterrent"),
    ("ipti", "IPT"),
    ("cohort", "cohort"),
    ("uninfectVectors", "uninfectVectors"),
    ("immuneSuppression", "immuneSuppression"),
    ("insertR_0Case", "insertR_0Case"),
];

const CONTINUOUS_KINDS: [(&str, &str); 4] = [
    ("ipti", "IPT"),
    ("vaccine", "vaccine"),
    ("cohort", "cohort"),
    ("ITN", "ITN"),
];

/// Interventions whose deployments are wrapped in lists, with the lists they use
const DEPLOYMENT_LISTS: [(&str, &[&str]); 8] = [
    ("MDA", &["timed"]),
    ("vaccine", &["continuous", "timed"]),
    ("IPT", &["continuous", "timed"]),
    ("ITN", &["continuous", "timed"]),
    ("IRS", &["timed"]),
    ("vectorDeterrent", &["timed"]),
    ("cohort", &["continuous", "timed"]),
    ("immuneSuppression", &["timed"]),
];

const TIMED_DEPLOYMENT_KINDS: [&str; 4] = ["changeHS", "changeEIR", "insertR_0Case", "uninfectVectors"];

/// Descriptions move into their own sub-element.
pub fn translate_20_to_21(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let interventions = root.child_mut("interventions")?;
    let mut descriptions = Element::new("descriptions");
    let mut kept = Vec::new();
    for node in interventions.take_children() {
        match node {
            Node::Element(e) if e.name() != "continuous" && e.name() != "timed" => {
                descriptions.append_child(e)
            }
            other => kept.push(other),
        }
    }
    interventions.append_child(descriptions);
    for node in kept {
        interventions.append_node(node);
    }
    Ok(())
}

pub fn translate_21_to_22(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

pub fn translate_22_to_23(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    if !uses_option(root, "IPTI_SP_MODEL") {
        return Ok(());
    }
    match ctx.options.ipti_report_only_at_risk {
        IptiReportOnlyAtRisk::Off => Ok(()),
        IptiReportOnlyAtRisk::On => {
            model_options_mut(root)?.append_child(option("REPORT_ONLY_AT_RISK", "true"));
            Ok(())
        }
        IptiReportOnlyAtRisk::Unset => Err(DocumentError::missing_option(
            "ipti-report-only-at-risk",
            "scenario uses IPTI_SP_MODEL",
        )
        .into()),
    }
}

/// `assimMode` goes; human availability and weight tables enter the document.
pub fn translate_23_to_24(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    if root.attr("assimMode").unwrap_or("0") != "0" {
        return Err(DocumentError::unsupported("assimMode is no longer supported").into());
    }
    root.remove_attr("assimMode");

    if let Some(ento) = root.optional_child("entoData")? {
        if ento.first_child("vector").is_some() {
            ctx.warn(
                WarningType::ManualReview,
                "units of EIR for vector model changed from inoculations per averaged person \
                 to inoculations per average adult",
            );
        }
    }

    let model = root.child_mut("model")?;
    let interval: i64 = model.child("parameters")?.required_parse("interval")?;
    let mut human = Element::new("human").with_child(age_groups(
        "availabilityToMosquitoes",
        &AVAILABILITY_TO_MOSQUITOES,
    ));
    if interval == 1 {
        // only used by the PK/PD model
        human.append_child(age_groups("weight", &WEIGHT).with_attr("multStdDev", "0.14"));
    }
    model.insert_before("parameters", human);
    Ok(())
}

fn age_groups(name: &str, values: &[f64; 18]) -> Element {
    let mut groups = Element::new(name);
    for (lower, value) in AGE_GROUP_LOWER_BOUNDS.iter().zip(values) {
        groups.append_child(
            Element::new("group")
                .with_attr("lowerbound", fmt_num(*lower))
                .with_attr("value", fmt_num(*value)),
        );
    }
    groups
}

/// Vaccine types become names, Weibull-decayed values become decay
/// functions, and the MDA description becomes a decision tree.
pub fn translate_24_to_25(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    root.for_each_named_mut("vaccineDescription", &mut |vd| {
        let kind: i64 = vd.required_parse("vaccineType")?;
        let name = match kind {
            1 => "PEV",
            2 => "BSV",
            3 => "TBV",
            other => return Err(DocumentError::invalid(vd, "vaccineType", &other.to_string())),
        };
        vd.set_attr("vaccineType", name);

        let index = vd.position_of("halfLifeYrs").ok_or_else(|| vd.missing("halfLifeYrs"))?;
        let half_life: f64 = vd.take_required_child("halfLifeYrs")?.required_parse("value")?;
        let function = if half_life == 0.0 { "constant" } else { "exponential" };
        vd.insert_child(
            index,
            Element::new("decay")
                .with_attr("L", fmt_num(half_life))
                .with_attr("function", function),
        );
        Ok(())
    })?;

    for name in WEIBULL_DECAYED {
        root.for_each_named_mut(name, &mut |effect| {
            let Some(half_life) = effect.remove_attr("halflife") else {
                return Ok(());
            };
            effect.set_attr("L", half_life);
            match effect.remove_attr("Weibullk") {
                Some(k) => {
                    effect.set_attr("function", "weibull");
                    effect.set_attr("k", k);
                }
                None => effect.set_attr("function", "exponential"),
            }
            Ok(())
        })?;
    }

    if let Some(mda) = root.find_descendant_mut("MDADescription") {
        let schedule = mda.take_required_child("schedule")?;
        mda.append_child(
            Element::new("decisions")
                .with_child(
                    Element::new("decision")
                        .with_attr("name", "test")
                        .with_attr("depends", "")
                        .with_attr("values", "none,microscopy,RDT")
                        .with_text("none"),
                )
                .with_child(
                    Element::new("decision")
                        .with_attr("name", "treatment")
                        .with_attr("depends", "")
                        .with_attr("values", "1")
                        .with_text("1"),
                ),
        );
        mda.append_child(
            Element::new("treatments")
                .with_child(Element::new("treatment").with_attr("name", "1").with_child(schedule)),
        );
    }
    Ok(())
}

/// `pImmediateUC` becomes a daily series; vector intervention effects share
/// one decay per intervention.
pub fn translate_25_to_26(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    root.for_each_named_mut("ClinicalOutcomes", &mut |outcomes| {
        let p: f64 = outcomes.take_required_child("pImmediateUC")?.parse_text()?;
        if p == 1.0 {
            outcomes.append_child(Element::new("dailyPrImmUCTS").with_text("1"));
            return Ok(());
        }
        ctx.warn(
            WarningType::ManualReview,
            "pImmediateUC element replaced with dailyPrImmUCTS: not an exact equivalent",
        );
        let miss = 1.0 - p;
        let daily = [p, miss * p, miss * miss * p];
        let total: f64 = daily.iter().sum();
        for value in daily {
            outcomes.append_child(Element::new("dailyPrImmUCTS").with_text(fmt_num(value / total)));
        }
        Ok(())
    })?;

    let interventions = root.child_mut("interventions")?;
    if let Some(descriptions) = interventions.optional_child_mut("descriptions")? {
        for (description, decay) in VECTOR_DECAYS {
            merge_vector_decay(descriptions, description, decay)?;
        }
    }
    Ok(())
}

struct SharedDecay {
    function: String,
    l: String,
    k: String,
}

fn merge_vector_decay(
    descriptions: &mut Element,
    description: &str,
    decay_name: &str,
) -> Result<(), DocumentError> {
    let number = |attribute: &str, value: &str| -> Result<f64, DocumentError> {
        value.trim().parse().map_err(|_| DocumentError::InvalidAttribute {
            element: description.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        })
    };

    let mut shared: Option<SharedDecay> = None;
    for anopheles in descriptions.elements_named_mut("anopheles") {
        let Some(intervention) = anopheles.optional_child_mut(description)? else {
            continue;
        };
        for effect in intervention.child_elements_mut() {
            let decay = SharedDecay {
                function: effect.attr("function").unwrap_or_default().to_string(),
                l: effect.attr("L").unwrap_or_default().to_string(),
                k: effect.attr("k").unwrap_or("1").to_string(),
            };
            if let Some(first) = &shared {
                let differing = if first.function != decay.function {
                    Some(("function", &first.function, &decay.function))
                } else if number("L", &first.l)? != number("L", &decay.l)? {
                    Some(("L", &first.l, &decay.l))
                } else if number("k", &first.k)? != number("k", &decay.k)? {
                    Some(("k", &first.k, &decay.k))
                } else {
                    None
                };
                if let Some((what, a, b)) = differing {
                    return Err(DocumentError::unsupported(format!(
                        "{}: differing decay functions no longer supported. {}: {} and {}",
                        description, what, a, b
                    )));
                }
            } else {
                shared = Some(decay);
            }
            effect.remove_attr("function");
            effect.remove_attr("L");
            effect.remove_attr("k");
            let initial = effect.remove_attr("initial").unwrap_or_default();
            effect.set_attr("value", initial);
        }
    }

    if let Some(shared) = shared {
        let mut decay = Element::new(decay_name)
            .with_attr("function", shared.function)
            .with_attr("L", shared.l.as_str());
        if number("k", &shared.k)? != 1.0 {
            decay.set_attr("k", shared.k);
        }
        descriptions.insert_before("anopheles", decay);
    }
    Ok(())
}

pub fn translate_26_to_27(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

/// Renames, and interventions regrouped by kind instead of by descriptions,
/// continuous and timed deployments.
pub fn translate_27_to_28(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let ento = root.child_mut("entoData")?;
    ento.rename("entomology");
    if let Some(vector) = ento.optional_child_mut("vector")? {
        for anopheles in vector.elements_named_mut("anopheles") {
            for child in anopheles.child_elements_mut() {
                if child.name() == "eir" {
                    child.rename("EIR");
                } else if child.name() == "monthlyEir" {
                    child.rename("monthlyEIR");
                }
            }
        }
    }
    for drugs in root.elements_named_mut("drugDescription") {
        drugs.rename("pharmacology");
    }

    let steps_per_year = if root.has_descendant("importedInfectionsPerThousandHosts") {
        steps_per_year(root)?
    } else {
        0.0
    };

    let interventions = root.child_mut("interventions")?;
    let descriptions = interventions.take_required_child("descriptions")?;
    regroup_descriptions(interventions, descriptions)?;

    if let Some(continuous) = interventions.take_child("continuous")? {
        for mut deployment in continuous.into_child_elements() {
            let kind = CONTINUOUS_KINDS
                .iter()
                .find(|(old, _)| *old == deployment.name())
                .map(|(_, kind)| *kind)
                .ok_or_else(|| unexpected("interventions.continuous", &deployment))?;
            deployment.rename("continuous");
            interventions.get_or_create_child(kind)?.append_child(deployment);
        }
    }

    let mut warned_imported = false;
    if let Some(timed) = interventions.take_child("timed")? {
        for time_point in timed.into_child_elements() {
            if time_point.name() != "intervention" {
                continue;
            }
            let time = time_point.attr("time").unwrap_or_default().to_string();
            for mut deployment in time_point.into_child_elements() {
                match deployment.name() {
                    "larviciding" => {
                        return Err(DocumentError::unsupported(
                            "larviciding intervention model has changed significantly; \
                             please remove and re-add",
                        )
                        .into())
                    }
                    "importedInfectionsPerThousandHosts" => {
                        if !warned_imported {
                            ctx.warn(
                                WarningType::ManualReview,
                                "doing an exact conversion from old imported infections \
                                 representation to new; this is probably not what you want \
                                 unless you need to replicate results",
                            );
                            warned_imported = true;
                        }
                        let per_step: f64 = deployment.parse_text()?;
                        add_imported_rate(interventions, &time, per_step * steps_per_year)?;
                    }
                    name => {
                        let kind = TIMED_KINDS
                            .iter()
                            .find(|(old, _)| *old == name)
                            .map(|(_, kind)| *kind)
                            .ok_or_else(|| {
                                unexpected("interventions.timed.intervention", &deployment)
                            })?;
                        deployment.rename("timed");
                        deployment.set_attr("time", time.as_str());
                        interventions.get_or_create_child(kind)?.append_child(deployment);
                    }
                }
            }
        }
    }
    Ok(())
}

fn regroup_descriptions(
    interventions: &mut Element,
    mut descriptions: Element,
) -> Result<(), DocumentError> {
    for mut desc in descriptions.take_child_elements() {
        let (kind, new_name) = match desc.name() {
            "iptiDescription" => ("IPT", "description"),
            "vaccineDescription" => ("vaccine", "description"),
            "MDADescription" => ("MDA", "description"),
            "ITNDecay" => ("ITN", "decay"),
            "IRSDecay" => ("IRS", "decay"),
            "VADecay" => ("vectorDeterrent", "decay"),
            "anopheles" => {
                let mosquito = desc.attr("mosquito").unwrap_or_default().to_string();
                for mut params in desc.take_child_elements() {
                    let kind = match params.name() {
                        "ITNDescription" => "ITN",
                        "IRSDescription" => "IRS",
                        "VADescription" => "vectorDeterrent",
                        _ => return Err(unexpected("interventions.descriptions.anopheles", &params)),
                    };
                    params.rename("anophelesParams");
                    params.set_attr("mosquito", mosquito.as_str());
                    let name = params.remove_attr("name");
                    let parent = interventions.get_or_create_child(kind)?;
                    if let Some(name) = name {
                        parent.set_attr_if_absent("name", name);
                    }
                    parent.append_child(params);
                }
                continue;
            }
            _ => return Err(unexpected("interventions.descriptions", &desc)),
        };
        desc.rename(new_name);
        interventions.get_or_create_child(kind)?.append_child(desc);
    }
    Ok(())
}

/// Appends a rate at `time`, or overwrites the reset rate already there,
/// then resets the rate to zero on the following step.
fn add_imported_rate(interventions: &mut Element, time: &str, value: f64) -> Result<(), DocumentError> {
    let step: i64 = time.trim().parse().map_err(|_| DocumentError::InvalidAttribute {
        element: "intervention".to_string(),
        attribute: "time".to_string(),
        value: time.to_string(),
    })?;
    let timed = interventions
        .get_or_create_child("importedInfections")?
        .get_or_create_child("timed")?;

    let last_time = match timed.elements_named("rate").last() {
        Some(rate) => rate.parse_attr::<i64>("time")?,
        None => None,
    };
    if last_time == Some(step) {
        if let Some(rate) = timed.elements_named_mut("rate").last() {
            rate.set_attr("value", fmt_num(value));
        }
    } else {
        timed.append_child(
            Element::new("rate")
                .with_attr("time", time)
                .with_attr("value", fmt_num(value)),
        );
    }
    timed.append_child(
        Element::new("rate")
            .with_attr("time", (step + 1).to_string())
            .with_attr("value", "0"),
    );
    Ok(())
}

fn unexpected(path: &str, element: &Element) -> DocumentError {
    DocumentError::unsupported(format!("Unexpected element {}.{}", path, element.name()))
}

/// ITN descriptions move to the new net-usage parameterisation.
pub fn translate_28_to_29(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let interventions = root.child_mut("interventions")?;
    let Some(itn) = interventions.optional_child_mut("ITN")? else {
        return Ok(());
    };
    match ctx.options.itn_description {
        ItnDescription::Unset => Err(DocumentError::missing_option(
            "itn-description",
            "ITN description changed; choose replace or manual",
        )
        .into()),
        ItnDescription::Manual => {
            ctx.warn_at(
                WarningType::ManualReview,
                "interventions/ITN",
                "leaving ITN description unchanged as requested",
            );
            Ok(())
        }
        ItnDescription::Replace => {
            itn.take_child("decay")?;
            itn.remove_children_named("anophelesParams");
            itn.prepend_child(default_itn_description());
            Ok(())
        }
    }
}

fn default_itn_description() -> Element {
    let mut description = Element::new("description")
        .with_child(Element::new("usage").with_attr("value", "0.8"))
        .with_child(Element::new("holeRate").with_attr("mean", "0.9").with_attr("sigma", "0.8"))
        .with_child(Element::new("ripRate").with_attr("mean", "0.7").with_attr("sigma", "0.8"))
        .with_child(Element::new("ripFactor").with_attr("value", "0.4"))
        .with_child(Element::new("initialInsecticide").with_attr("mu", "70").with_attr("sigma", "20"))
        .with_child(
            Element::new("insecticideDecay")
                .with_attr("L", "2.2")
                .with_attr("function", "exponential")
                .with_attr("mu", "-0.32")
                .with_attr("sigma", "0.8"),
        )
        .with_child(
            Element::new("attritionOfNets")
                .with_attr("L", "12")
                .with_attr("k", "2")
                .with_attr("function", "smooth-compact"),
        );
    for (mosquito, deterrency_insecticide, preprandial_scaling) in [
        ("gambiae_ss", "0.67", "1"),
        ("funestus", "0.67", "1"),
        ("arabiensis", "0.1", "0.1"),
    ] {
        description.append_child(itn_anopheles_params(mosquito, deterrency_insecticide, preprandial_scaling));
    }
    description
}

fn itn_anopheles_params(mosquito: &str, deterrency_insecticide: &str, preprandial_scaling: &str) -> Element {
    Element::new("anophelesParams")
        .with_attr("mosquito", mosquito)
        .with_child(
            Element::new("deterrency")
                .with_attr("holeFactor", "0.5")
                .with_attr("insecticideFactor", deterrency_insecticide)
                .with_attr("interactionFactor", "1.492537")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", "0.1"),
        )
        .with_child(
            Element::new("preprandialKillingEffect")
                .with_attr("baseFactor", "0.09")
                .with_attr("holeFactor", "0.57")
                .with_attr("insecticideFactor", "0.604")
                .with_attr("interactionFactor", "-0.424")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", preprandial_scaling),
        )
        .with_child(
            Element::new("postprandialKillingEffect")
                .with_attr("baseFactor", "0.10")
                .with_attr("holeFactor", "0")
                .with_attr("insecticideFactor", "0.55")
                .with_attr("interactionFactor", "0")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", "0.1"),
        )
}

/// Vector parameters become elements, EIR input becomes a seasonality
/// description, and deployments are wrapped in lists.
pub fn translate_29_to_30(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    root.child_mut("monitoring")?
        .child_mut("SurveyOptions")?
        .for_each_named_mut("option", &mut |opt| {
            match opt.attr("name") {
                Some("Vector_EIR_Input") => opt.set_attr("name", "inputEIR"),
                Some("Vector_EIR_Simulated") => opt.set_attr("name", "simulatedEIR"),
                _ => {}
            }
            Ok(())
        })?;

    let ento = root.child_mut("entomology")?;
    let mode: i64 = ento.required_parse("mode")?;
    ento.set_attr("mode", if mode == 2 { "forced" } else { "dynamic" });
    if let Some(annual) = ento.remove_attr("annualEIR") {
        ento.set_attr("scaledAnnualEIR", annual);
    }
    if let Some(vector) = ento.optional_child_mut("vector")? {
        for anopheles in vector.elements_named_mut("anopheles") {
            vector_attributes_to_elements(anopheles)?;
            let seasonality = seasonality(anopheles)?;
            anopheles.prepend_child(seasonality);
        }
    }

    let interventions = root.child_mut("interventions")?;
    for kind in TIMED_DEPLOYMENT_KINDS {
        if let Some(intervention) = interventions.optional_child_mut(kind)? {
            for timed in intervention.elements_named_mut("timed") {
                timed.rename("timedDeployment");
            }
        }
    }
    for (kind, lists) in DEPLOYMENT_LISTS {
        let Some(intervention) = interventions.optional_child_mut(kind)? else {
            continue;
        };
        if kind == "IRS" {
            restructure_irs(intervention)?;
        }
        for list in lists {
            wrap_deployments(intervention, list);
        }
    }
    Ok(())
}

fn vector_attributes_to_elements(anopheles: &mut Element) -> Result<(), DocumentError> {
    let mosq = anopheles.child_mut("mosq")?;
    for name in [
        "mosqRestDuration",
        "extrinsicIncubationPeriod",
        "mosqLaidEggsSameDayProportion",
        "mosqSeekingDuration",
        "mosqSurvivalFeedingCycleProbability",
    ] {
        attr_to_element(mosq, name);
    }
    mosq.append_child(Element::new("availabilityVariance").with_attr("value", "0"));
    for name in ["mosqProbBiting", "mosqProbFindRestSite", "mosqProbResting"] {
        attr_to_beta_mean(mosq, name);
    }
    attr_to_element(mosq, "mosqProbOvipositing");
    attr_to_element(mosq, "mosqHumanBloodIndex");

    for host in anopheles.elements_named_mut("nonHumanHosts") {
        for name in [
            "mosqRelativeEntoAvailability",
            "mosqProbBiting",
            "mosqProbFindRestSite",
            "mosqProbResting",
        ] {
            attr_to_element(host, name);
        }
    }
    Ok(())
}

fn seasonality(anopheles: &mut Element) -> Result<Element, DocumentError> {
    let mut seasonality = Element::new("seasonality").with_attr("input", "EIR");

    if let Some(eir) = anopheles.take_child("EIR")? {
        let angle = eir.required_attr("EIRRotateAngle")?;
        let series = Element::new("fourierSeries")
            .with_child(
                Element::new("coeffic")
                    .with_attr("a", eir.required_attr("a1")?)
                    .with_attr("b", eir.required_attr("b1")?),
            )
            .with_child(
                Element::new("coeffic")
                    .with_attr("a", eir.required_attr("a2")?)
                    .with_attr("b", eir.required_attr("b2")?),
            )
            .with_attr("EIRRotateAngle", angle);
        seasonality.set_attr("annualEIR", fmt_num(fourier_annual_eir(&eir)?));
        seasonality.append_child(series);
    }

    if let Some(monthly) = anopheles.take_child("monthlyEIR")? {
        seasonality.set_attr("annualEIR", monthly.attr("annualEIR").unwrap_or_default());
        let mut values = Element::new("monthlyValues").with_attr("smoothing", "fourier");
        for item in monthly.elements_named("item") {
            values.append_child(Element::new("value").with_text(item.text()));
        }
        seasonality.append_child(values);
    }
    Ok(seasonality)
}

/// Sum over one year of daily EIR given by a two-term Fourier series.
pub(crate) fn fourier_annual_eir(eir: &Element) -> Result<f64, DocumentError> {
    let a0: f64 = eir.required_parse("a0")?;
    let a1: f64 = eir.required_parse("a1")?;
    let b1: f64 = eir.required_parse("b1")?;
    let a2: f64 = eir.required_parse("a2")?;
    let b2: f64 = eir.required_parse("b2")?;
    let angle: f64 = eir.required_parse("EIRRotateAngle")?;
    let w = 2.0 * PI / 365.0;

    let annual = (0..365)
        .map(|t| {
            let wt = w * f64::from(t) - angle;
            (a0 + a1 * wt.cos() + b1 * wt.sin() + a2 * (2.0 * wt).cos() + b2 * (2.0 * wt).sin())
                .exp()
        })
        .sum();
    Ok(annual)
}

fn restructure_irs(irs: &mut Element) -> Result<(), DocumentError> {
    let mut description = Element::new("description");
    if let Some(decay) = irs.take_child("decay")? {
        description.append_child(decay);
    }
    for mut params in irs.remove_children_named("anophelesParams") {
        let index = params
            .position_of("killingEffect")
            .ok_or_else(|| params.missing("killingEffect"))?;
        params.child_mut("killingEffect")?.rename("postprandialKillingEffect");
        params.insert_child(index, Element::new("preprandialKillingEffect").with_attr("value", "0"));
        description.append_child(params);
    }
    irs.append_child(description);
    Ok(())
}

fn wrap_deployments(intervention: &mut Element, list: &str) {
    let deployments = intervention.remove_children_named(list);
    if deployments.is_empty() {
        return;
    }
    let mut wrapper = Element::new(list);
    for mut deployment in deployments {
        deployment.rename("deploy");
        wrapper.append_child(deployment);
    }
    intervention.append_child(wrapper);
}
