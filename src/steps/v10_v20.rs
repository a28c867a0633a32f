use crate::config::{IptiSpOption, MaxDensCorrection};
use crate::document::{DocumentError, Element};
use crate::transformation_step::{StepContext, StepResult, WarningType};

use super::health_system::regroup_sequelae;
use super::{noop, option};

const MODEL_OPTION_BITS: [(u32, &str); 22] = [
    (1, "PENALISATION_EPISODES"),
    (2, "NEGATIVE_BINOMIAL_MASS_ACTION"),
    (3, "ATTENUATION_ASEXUAL_DENSITY"),
    (4, "LOGNORMAL_MASS_ACTION"),
    (5, "NO_PRE_ERYTHROCYTIC"),
    (6, "MAX_DENS_CORRECTION"),
    (7, "INNATE_MAX_DENS"),
    (8, "MAX_DENS_RESET"),
    (9, "DUMMY_WITHIN_HOST_MODEL"),
    (10, "PREDETERMINED_EPISODES"),
    (11, "NON_MALARIA_FEVERS"),
    (12, "INCLUDES_PK_PD"),
    (13, "CLINICAL_EVENT_SCHEDULER"),
    (14, "MUELLER_PRESENTATION_MODEL"),
    (15, "TRANS_HET"),
    (16, "COMORB_HET"),
    (17, "TREAT_HET"),
    (18, "COMORB_TRANS_HET"),
    (19, "TRANS_TREAT_HET"),
    (20, "COMORB_TREAT_HET"),
    (21, "TRIPLE_HET"),
    (22, "EMPIRICAL_WITHIN_HOST_MODEL"),
];

const SURVEY_OPTION_BITS: [&str; 31] = [
    "nHost",
    "nInfect",
    "nExpectd",
    "nPatent",
    "sumLogPyrogenThres",
    "sumlogDens",
    "totalInfs",
    "nTransmit",
    "totalPatentInf",
    "contrib",
    "sumPyrogenThresh",
    "nTreatments1",
    "nTreatments2",
    "nTreatments3",
    "nUncomp",
    "nSevere",
    "nSeq",
    "nHospitalDeaths",
    "nIndDeaths",
    "nDirDeaths",
    "nEPIVaccinations",
    "imr_summary",
    "nMassVaccinations",
    "nHospitalRecovs",
    "nHospitalSeqs",
    "nIPTDoses",
    "annAvgK",
    "nNMFever",
    "innoculationsPerDayOfYear",
    "kappaPerDayOfYear",
    "innoculationsPerAgeGroup",
];

/// Analysis numbers once reserved for Garki scenarios
const GARKI_ANALYSES: std::ops::RangeInclusive<i64> = 22..=30;

/// Mosquito defaults per species: laid eggs same day, feeding cycle survival,
/// human blood index with non-human hosts.
const SPECIES_DEFAULTS: [(&str, [&str; 3]); 3] = [
    ("gambiae_ss", ["0.313", "0.623", "0.939"]),
    ("funestus", ["0.616", "0.611", "0.98"]),
    ("arabiensis", ["0.313", "0.623", "0.871"]),
];

/// Cached emergence rates are dropped; infection proportions get defaults.
pub fn translate_10_to_11(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let ento = root.child_mut("entoData")?;
    let Some(vector) = ento.optional_child_mut("vector")? else {
        return Ok(());
    };
    vector.for_each_named_mut("anopheles", &mut |anopheles| {
        anopheles.take_child("emergence")?;
        // Anopheles gambiae, Namawala
        anopheles.set_attr("propInfected", "0.078");
        anopheles.set_attr("propInfectious", "0.021");
        Ok(())
    })?;
    ctx.warn(
        WarningType::DefaultAssumed,
        "New attributes propInfected and propInfectious created with default values; \
         please correct them for each anopheles section",
    );
    Ok(())
}

pub fn translate_11_to_12(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    if root.has_descendant("caseManagements") {
        return Err(DocumentError::unsupported(
            "Please replace the caseManagements element with an EventScheduler element \
             (automatic update not implemented)",
        )
        .into());
    }
    root.remove_attr("simulationDuration");
    Ok(())
}

/// `modelVersion` and `summaryOption` bit lists become option lists.
pub fn translate_12_to_13(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let flags: u32 = root.required_parse("modelVersion")?;
    let mut model_options = Element::new("ModelOptions");
    for (bit, name) in MODEL_OPTION_BITS {
        if flags & (1 << bit) != 0 {
            model_options.append_child(option(name, "true"));
        }
    }
    let density_model_bits = (1 << 6) | (1 << 9) | (1 << 22);
    if flags & density_model_bits == 0 {
        match ctx.options.max_dens_correction {
            MaxDensCorrection::Correct => {}
            MaxDensCorrection::DontCorrect => {
                model_options.append_child(option("MAX_DENS_CORRECTION", "false"))
            }
            MaxDensCorrection::Unset => {
                return Err(DocumentError::missing_option(
                    "max-dens-correction",
                    "scenario doesn't include MAX_DENS_CORRECTION",
                )
                .into())
            }
        }
    }

    let analysis: i64 = root.required_parse("analysisNo")?;
    if GARKI_ANALYSES.contains(&analysis) {
        model_options.append_child(option("GARKI_DENSITY_BIAS", "true"));
    }

    let monitoring = root.child_mut("monitoring")?;
    let surveys = monitoring.child_mut("surveys")?;
    let survey_flags: u32 = surveys.required_parse("summaryOption")?;
    surveys.remove_attr("summaryOption");
    let mut survey_options = Element::new("SurveyOptions");
    for (bit, name) in SURVEY_OPTION_BITS.iter().enumerate() {
        if survey_flags & (1 << bit) != 0 {
            survey_options.append_child(option(name, "true"));
        }
    }
    monitoring.insert_before("surveys", survey_options);

    root.prepend_child(model_options);
    root.remove_attr("modelVersion");
    Ok(())
}

pub fn translate_13_to_14(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    if root.has_descendant("drugDescription") {
        ctx.warn(
            WarningType::ManualReview,
            "drugDescription element has changed; please rewrite manually",
        );
    }
    Ok(())
}

pub fn translate_14_to_15(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

/// Options, clinical data and parameters move under `model`; the health
/// system gains a wrapper around either `ImmediateOutcomes` or the event
/// scheduler.
pub fn translate_15_to_16(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let model_options = root
        .take_first_descendant("ModelOptions")
        .ok_or_else(|| root.missing("ModelOptions"))?;
    let parameters = root.take_required_child("parameters")?;

    let (health_system, memory) = match root.take_child("healthSystem")? {
        Some(mut outcomes) => {
            let memory = outcomes.remove_attr("healthSystemMemory");
            outcomes.rename("ImmediateOutcomes");
            let cfr = outcomes.take_required_child("CFR")?;
            let hs = Element::new("healthSystem").with_child(outcomes).with_child(cfr);
            (hs, memory)
        }
        None => {
            let mut scheduler = root
                .take_first_descendant("EventScheduler")
                .ok_or_else(|| root.missing("healthSystem"))?;
            let memory = scheduler.remove_attr("healthSystemMemory");
            let cfr = Element::new("CFR").with_child(
                Element::new("group").with_attr("cfr", "0").with_attr("lowerbound", "0"),
            );
            let hs = Element::new("healthSystem").with_child(scheduler).with_child(cfr);
            (hs, memory)
        }
    };

    if let Some(intervention) = root.find_descendant_mut("intervention") {
        if let Some(mut outcomes) = intervention.take_child("changeHS")? {
            outcomes.remove_attr("healthSystemMemory");
            outcomes.rename("ImmediateOutcomes");
            let cfr = outcomes.take_required_child("CFR")?;
            intervention.append_child(
                Element::new("changeHS").with_child(outcomes).with_child(cfr),
            );
        }
    }

    let memory = memory.ok_or_else(|| DocumentError::MissingAttribute {
        element: "healthSystem".to_string(),
        attribute: "healthSystemMemory".to_string(),
    })?;
    let clinical = Element::new("clinical").with_attr("healthSystemMemory", memory);
    root.append_child(
        Element::new("model")
            .with_child(model_options)
            .with_child(clinical)
            .with_child(parameters),
    );
    root.insert_before("entoData", health_system);
    Ok(())
}

/// Mosquito feeding-cycle parameters receive per-species defaults.
pub fn translate_16_to_17(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let Some(vector) = root.find_descendant_mut("vector") else {
        return Ok(());
    };

    let first_host = vector
        .find_descendant("anopheles")
        .and_then(|anopheles| anopheles.find_descendant("nonHumanHosts"))
        .map(|nhh| nhh.attr("name").unwrap_or_default().to_string());

    let mut many_hosts = false;
    vector.for_each_named_mut("anopheles", &mut |anopheles| {
        let species = anopheles.attr("mosquito").unwrap_or_default().to_string();
        let Some(&(_, [eggs, survival, blood_index])) =
            SPECIES_DEFAULTS.iter().find(|defaults| defaults.0 == species)
        else {
            return Err(DocumentError::unsupported(format!(
                "There are no standard values for mosquito species \"{}\"; \
                 please edit those values by hand",
                species
            )));
        };

        let hosts = anopheles.descendants_named("nonHumanHosts").len();
        let blood_index = match hosts {
            0 => "1.0",
            1 => {
                anopheles.for_each_named_mut("nonHumanHosts", &mut |nhh| {
                    nhh.set_attr("mosqRelativeEntoAvailability", "1.0");
                    nhh.remove_attr("mosqEntoAvailability");
                    Ok(())
                })?;
                blood_index
            }
            _ => {
                many_hosts = true;
                blood_index
            }
        };

        let mosq = anopheles
            .find_descendant_mut("mosq")
            .ok_or_else(|| DocumentError::MissingElement {
                parent: "anopheles".to_string(),
                name: "mosq".to_string(),
            })?;
        mosq.set_attr("mosqHumanBloodIndex", blood_index);
        mosq.set_attr("mosqLaidEggsSameDayProportion", eggs);
        mosq.set_attr("mosqSurvivalFeedingCycleProbability", survival);
        mosq.remove_attr("mosqEntoAvailability");
        mosq.remove_attr("mosqSeekingDeathRate");
        Ok(())
    })?;

    if let Some(name) = first_host {
        vector.append_child(
            Element::new("nonHumanHosts")
                .with_attr("name", name)
                .with_attr("number", "1.0"),
        );
    }
    if many_hosts {
        ctx.warn(
            WarningType::ManualReview,
            "There is more than one type of non-human host; please edit the relative \
             entomological availability of each by hand",
        );
    }
    Ok(())
}

/// Population attributes move to `demography`, the EIR mode to `entoData`.
pub fn translate_17_to_18(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let pop_size = root.remove_attr("popSize");
    let max_age = root.remove_attr("maximumAgeYrs");
    let mode = root.remove_attr("mode");

    let demography = root.child_mut("demography")?;
    if let Some(pop_size) = pop_size {
        demography.set_attr("popSize", pop_size);
    }
    if let Some(max_age) = max_age {
        demography.set_attr("maximumAgeYrs", max_age);
    }
    let ento = root.child_mut("entoData")?;
    if let Some(mode) = mode {
        ento.set_attr("mode", mode);
    }
    Ok(())
}

/// Mode 3 (transient EIR) is only valid with a `changeEIR` at time 0 and
/// becomes mode 4.
pub fn translate_18_to_19(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let mode: i64 = root.child("entoData")?.required_parse("mode")?;
    if mode == 3 {
        let mut has_eir_at_zero = false;
        if let Some(timed) = root
            .optional_child("interventions")?
            .and_then(|interventions| interventions.first_child("timed"))
        {
            for intervention in timed.descendants_named("intervention") {
                let time: i64 = intervention.required_parse("time")?;
                if time == 0 && intervention.first_child("changeEIR").is_some() {
                    has_eir_at_zero = true;
                }
            }
        }
        if !has_eir_at_zero {
            return Err(DocumentError::unsupported(
                "entoData has mode=\"3\", but no changeEIR intervention found at time 0",
            )
            .into());
        }
        root.child_mut("entoData")?.set_attr("mode", "4");
    }

    if let Some(model) = root.optional_child_mut("model")? {
        if let Some(parameters) = model.optional_child_mut("parameters")? {
            parameters.remove_attr("delta");
        }
    }
    Ok(())
}

/// Monitoring period units, IPTI model option, sequelae age groups.
pub fn translate_19_to_20(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let monitoring = root.child_mut("monitoring")?;
    if let Some(continuous) = monitoring.optional_child_mut("continuous")? {
        if continuous.attr("period") == Some("5") {
            continuous.set_attr("period", "1");
        } else {
            ctx.warn_at(
                WarningType::ManualReview,
                "monitoring/continuous",
                "period changed unit from days to timesteps; please update accordingly",
            );
        }
    }
    monitoring
        .child_mut("SurveyOptions")?
        .for_each_named_mut("option", &mut |opt| {
            if opt.attr("name") == Some("imr_summary") {
                opt.set_attr("name", "allCauseIMR");
            }
            Ok(())
        })?;

    if let Some(vector) = root.child_mut("entoData")?.optional_child_mut("vector")? {
        vector.for_each_named_mut("anopheles", &mut |anopheles| {
            anopheles
                .child_mut("mosq")?
                .set_attr("minInfectedThreshold", "0.01");
            Ok(())
        })?;
        ctx.warn(
            WarningType::DefaultAssumed,
            "New attribute minInfectedThreshold created with default 0.01 mosquito; \
             please correct it for each anopheles section",
        );
    }

    if let Some(ipti_option) = ipti_model_option(root, ctx)? {
        super::model_options_mut(root)?.append_child(ipti_option);
    }

    regroup_sequelae(root.child_mut("healthSystem")?, ctx)?;

    if let Some(timed) = root
        .optional_child_mut("interventions")?
        .and_then(|interventions| interventions.first_child_mut("timed"))
    {
        timed.for_each_named_mut("changeHS", &mut |hs| regroup_sequelae(hs, ctx))?;
    }
    Ok(())
}

/// Decides whether IPTI_SP_MODEL must be switched on now that it is explicit.
fn ipti_model_option(
    root: &Element,
    ctx: &mut StepContext<'_>,
) -> Result<Option<Element>, DocumentError> {
    let Some(interventions) = root.optional_child("interventions")? else {
        return Ok(None);
    };
    if interventions.optional_child("iptiDescription")?.is_none() {
        return Ok(None);
    }

    let mut deployments = 0;
    if let Some(continuous) = interventions.optional_child("continuous")? {
        deployments += continuous.descendants_named("ipti").len();
    }
    if let Some(timed) = interventions.optional_child("timed")? {
        for intervention in timed.descendants_named("intervention") {
            deployments += intervention.descendants_named("ipti").len();
        }
    }
    if deployments > 0 {
        return Ok(Some(option("IPTI_SP_MODEL", "true")));
    }

    ctx.warn(WarningType::ManualReview, "iptiDescription without IPT interventions");
    match ctx.options.ipti_sp_option {
        IptiSpOption::AssumeIntended => Ok(Some(option("IPTI_SP_MODEL", "true"))),
        IptiSpOption::AssumeUnintended => Ok(Some(option("IPTI_SP_MODEL", "false"))),
        IptiSpOption::Unset => Err(DocumentError::missing_option(
            "ipti-sp-option-without-interventions",
            "iptiDescription present without IPT interventions",
        )),
    }
}
