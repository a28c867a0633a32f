//! The version-32 regrouping of human interventions into effects and
//! deployments.
//!
//! Each legacy intervention kind becomes one or more `effect` elements with a
//! unique `id`, plus at most one `intervention` element that references those
//! ids and carries the deployment lists. Both end up in a new `human` section.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::document::{DocumentError, Element};
use crate::identifier::IdentifierAllocator;
use crate::transformation_step::{StepContext, StepResult, WarningType};

/// Legacy kinds in processing order; `cohort` first so later kinds can
/// restrict deployments to it.
const HUMAN_KINDS: [&str; 8] = [
    "cohort",
    "MDA",
    "vaccine",
    "IPT",
    "ITN",
    "IRS",
    "vectorDeterrent",
    "immuneSuppression",
];

/// Sections that must follow the new `human` section.
pub const HUMAN_BEFORE: [&str; 4] = ["importedInfections", "insertR_0Case", "uninfectVectors", "vectorPop"];

const COHORT_ID: &str = "cohort";
const COHORT_MONITORING_ATTRIBUTES: [&str; 3] = ["firstBoutOnly", "firstTreatmentOnly", "firstInfectionOnly"];

/// Which timed list a legacy deployment is merged into.
///
/// Orders non-cohort before cohort, then unbounded age before bounded ages,
/// then bounded ages ascending.
#[derive(Debug, Clone, Copy)]
pub struct TimedListKey {
    pub cohort: bool,
    pub max_age: Option<f64>,
}

impl TimedListKey {
    pub fn new(cohort: bool, max_age: Option<f64>) -> Self {
        Self { cohort, max_age }
    }

    /// Reads and strips the grouping attributes of a legacy `deploy`.
    fn take_from(deploy: &mut Element) -> Result<Self, DocumentError> {
        let cohort = take_cohort_flag(deploy)?;
        let max_age = match deploy.remove_attr("cumulativeWithMaxAge") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| DocumentError::invalid(deploy, "cumulativeWithMaxAge", &value))?,
            ),
            None => None,
        };
        Ok(Self { cohort, max_age })
    }
}

impl PartialEq for TimedListKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimedListKey {}

impl PartialOrd for TimedListKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedListKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cohort
            .cmp(&other.cohort)
            .then_with(|| match (self.max_age, other.max_age) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.total_cmp(&b),
            })
    }
}

fn take_cohort_flag(deploy: &mut Element) -> Result<bool, DocumentError> {
    match deploy.remove_attr("cohort").as_deref() {
        None | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(DocumentError::invalid(deploy, "cohort", other)),
    }
}

struct TimedPartition {
    max_age_text: Option<String>,
    deploys: Vec<Element>,
}

/// Replaces the legacy human intervention kinds under `interventions` with a
/// `human` section of effects and deployments.
pub(crate) fn restructure_human_interventions(
    root: &mut Element,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let monitoring_cohort = take_monitoring_cohort_attributes(root)?;

    let interventions = root.child_mut("interventions")?;
    let mut ids = IdentifierAllocator::new();
    let mut effects: Vec<Element> = Vec::new();
    let mut deployments: Vec<Element> = Vec::new();
    let mut rename_irs_report = false;

    for kind in HUMAN_KINDS {
        let Some(mut legacy) = interventions.take_child(kind)? else {
            continue;
        };
        let name = legacy.remove_attr("name");
        let continuous = legacy.take_child("continuous")?;
        let timed = legacy.take_child("timed")?;

        let bodies = match kind {
            "cohort" => vec![cohort_body(&monitoring_cohort)],
            "MDA" => vec![mda_body(&mut legacy, ctx)?],
            "vaccine" => vaccine_bodies(&mut legacy)?,
            "IRS" => {
                let (body, is_gvi) = irs_body(&mut legacy)?;
                rename_irs_report |= is_gvi;
                vec![body]
            }
            "immuneSuppression" => vec![Element::new("clearImmunity")],
            _ => vec![generic_body(kind, &mut legacy)?],
        };

        let mut effect_ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            let id = if kind == "cohort" {
                ids.claim(COHORT_ID)?;
                COHORT_ID.to_string()
            } else {
                ids.allocate(kind)
            };
            let mut effect = Element::new("effect").with_attr("id", id.as_str());
            if let Some(name) = &name {
                effect.set_attr("name", name.as_str());
            }
            effect.append_child(body);
            effects.push(effect);
            effect_ids.push(id);
        }

        let has_cohort = ids.contains(COHORT_ID);
        let mut lists = Vec::new();
        if let Some(continuous) = continuous {
            lists.extend(continuous_lists(continuous, has_cohort)?);
        }
        if let Some(timed) = timed {
            lists.extend(timed_lists(timed, &effect_ids[0], has_cohort)?);
        }
        if lists.is_empty() {
            continue;
        }
        let mut deployment = Element::new("intervention");
        if let Some(name) = name {
            deployment.set_attr("name", name);
        }
        for id in &effect_ids {
            deployment.append_child(Element::new("effect").with_attr("id", id.as_str()));
        }
        for list in lists {
            deployment.append_child(list);
        }
        deployments.push(deployment);
    }

    if effects.is_empty() {
        return Ok(());
    }
    let mut human = Element::new("human");
    for effect in effects.into_iter().chain(deployments) {
        human.append_child(effect);
    }
    interventions.insert_before_any(&HUMAN_BEFORE, human);

    if rename_irs_report {
        rename_report_option(root, "nMassIRS", "nMassGVI")?;
    }
    Ok(())
}

/// Removes the cohort reporting switches from `monitoring`, returning them.
fn take_monitoring_cohort_attributes(root: &mut Element) -> Result<Vec<(String, String)>, DocumentError> {
    let mut taken = Vec::new();
    if let Some(monitoring) = root.optional_child_mut("monitoring")? {
        for name in COHORT_MONITORING_ATTRIBUTES {
            if let Some(value) = monitoring.remove_attr(name) {
                taken.push((name.to_string(), value));
            }
        }
    }
    Ok(taken)
}

fn cohort_body(attributes: &[(String, String)]) -> Element {
    let mut cohort = Element::new("cohort");
    for (name, value) in attributes {
        cohort.set_attr(name, value.as_str());
    }
    cohort
}

fn mda_body(legacy: &mut Element, ctx: &mut StepContext<'_>) -> Result<Element, DocumentError> {
    if let Some(mut description) = legacy.take_child("description")? {
        description.rename("MDA1D");
        return Ok(description);
    }
    ctx.warn_at(
        WarningType::DefaultAssumed,
        "interventions/MDA",
        "MDA without a description now assumes full compliance and clearance in one timestep",
    );
    Ok(Element::new("MDA").with_child(
        Element::new("drugEffect")
            .with_child(
                Element::new("compliance")
                    .with_attr("pCompliance", "1")
                    .with_attr("nonCompliersMultiplier", "0"),
            )
            .with_child(
                Element::new("compliersEffective")
                    .with_child(Element::new("timestep").with_attr("pClearance", "1")),
            ),
    ))
}

/// One effect per vaccine description, named after its vaccine type.
fn vaccine_bodies(legacy: &mut Element) -> Result<Vec<Element>, DocumentError> {
    let mut bodies = Vec::new();
    for mut description in legacy.remove_children_named("description") {
        let kind = description.required_attr("vaccineType")?.to_string();
        if !matches!(kind.as_str(), "PEV" | "BSV" | "TBV") {
            return Err(DocumentError::invalid(&description, "vaccineType", &kind));
        }
        description.remove_attr("vaccineType");
        let mut body = Element::new(kind);
        body.take_attributes_from(&mut description);
        for child in description.take_children() {
            body.append_node(child);
        }
        bodies.push(body);
    }
    if bodies.is_empty() {
        return Err(legacy.missing("description"));
    }
    Ok(bodies)
}

/// `description` is the generic vector intervention; `description_v2` stays IRS.
fn irs_body(legacy: &mut Element) -> Result<(Element, bool), DocumentError> {
    if let Some(mut description) = legacy.take_child("description")? {
        description.rename("GVI");
        return Ok((description, true));
    }
    if let Some(mut description) = legacy.take_child("description_v2")? {
        description.rename("IRS");
        return Ok((description, false));
    }
    Err(legacy.missing("description"))
}

/// The description's content under the kind's name, or the legacy
/// element's remaining content when it has no description.
fn generic_body(kind: &str, legacy: &mut Element) -> Result<Element, DocumentError> {
    let mut body = Element::new(kind);
    let mut source = legacy.take_child("description")?.unwrap_or_else(|| legacy.clone());
    body.take_attributes_from(&mut source);
    for child in source.take_children() {
        body.append_node(child);
    }
    Ok(body)
}

fn continuous_lists(mut continuous: Element, has_cohort: bool) -> Result<Vec<Element>, DocumentError> {
    let mut everyone = Vec::new();
    let mut cohort_only = Vec::new();
    for mut deploy in continuous.take_child_elements() {
        if take_cohort_flag(&mut deploy)? {
            cohort_only.push(deploy);
        } else {
            everyone.push(deploy);
        }
    }

    let mut lists = Vec::new();
    if !everyone.is_empty() {
        lists.push(list_with("continuous", everyone));
    }
    if !cohort_only.is_empty() {
        require_cohort(has_cohort)?;
        let mut list = list_with("continuous", cohort_only);
        list.prepend_child(restrict_to_cohort());
        lists.push(list);
    }
    Ok(lists)
}

fn timed_lists(mut timed: Element, first_id: &str, has_cohort: bool) -> Result<Vec<Element>, DocumentError> {
    let mut partitions: BTreeMap<TimedListKey, TimedPartition> = BTreeMap::new();
    for mut deploy in timed.take_child_elements() {
        let max_age_text = deploy.attr("cumulativeWithMaxAge").map(str::to_string);
        let key = TimedListKey::take_from(&mut deploy)?;
        partitions
            .entry(key)
            .or_insert_with(|| TimedPartition {
                max_age_text,
                deploys: Vec::new(),
            })
            .deploys
            .push(deploy);
    }

    let mut lists = Vec::with_capacity(partitions.len());
    for (key, partition) in partitions {
        let mut list = list_with("timed", partition.deploys);
        if let Some(max_age) = partition.max_age_text {
            list.prepend_child(
                Element::new("cumulativeCoverage")
                    .with_attr("effect", first_id)
                    .with_attr("maxAgeYears", max_age),
            );
        }
        if key.cohort {
            require_cohort(has_cohort)?;
            list.prepend_child(restrict_to_cohort());
        }
        lists.push(list);
    }
    Ok(lists)
}

fn list_with(name: &str, deploys: Vec<Element>) -> Element {
    let mut list = Element::new(name);
    for deploy in deploys {
        list.append_child(deploy);
    }
    list
}

fn restrict_to_cohort() -> Element {
    Element::new("restrictToSubPop").with_attr("id", COHORT_ID)
}

fn require_cohort(has_cohort: bool) -> Result<(), DocumentError> {
    if has_cohort {
        Ok(())
    } else {
        Err(DocumentError::unsupported(
            "deployment restricted to the cohort, but no cohort intervention is defined",
        ))
    }
}

fn rename_report_option(root: &mut Element, from: &str, to: &str) -> Result<(), DocumentError> {
    let Some(monitoring) = root.optional_child_mut("monitoring")? else {
        return Ok(());
    };
    let Some(survey_options) = monitoring.optional_child_mut("SurveyOptions")? else {
        return Ok(());
    };
    for option in survey_options.elements_named_mut("option") {
        if option.attr("name") == Some(from) {
            option.set_attr("name", to);
        }
    }
    Ok(())
}
