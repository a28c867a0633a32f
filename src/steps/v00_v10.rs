use crate::document::{DocumentError, Element};
use crate::transformation_step::{StepContext, StepResult, WarningType};

use super::noop;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const DEFAULT_EIP_DURATION: &str = "10";

pub fn translate_0_to_1(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

/// Namespace declaration, work-unit defaults, `best` renamed to `value`.
pub fn translate_1_to_2(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    root.set_attr("xmlns:xsi", XSI_NAMESPACE);
    root.set_attr_if_absent("wuID", "0");
    root.set_attr_if_absent("assimMode", "0");

    if let Some(ento) = root.optional_child_mut("entoData")? {
        if ento.remove_attr("firstDay").is_some() {
            ctx.warn_at(WarningType::DataDropped, "entoData", "Removed firstDay attribute");
        }
    }
    if let Some(change_eir) = root.find_descendant_mut("changeEIR") {
        if change_eir.remove_attr("firstDay").is_some() {
            ctx.warn_at(WarningType::DataDropped, "changeEIR", "Removed firstDay attribute");
        }
    }
    if let Some(params) = root.find_descendant_mut("parameters") {
        params.remove_attr("useIseed");
    }

    root.remove_descendants_named("sources");
    root.for_each_named_mut("item", &mut |item| {
        item.take_children();
        Ok(())
    })?;

    if let Some(params) = root.find_descendant_mut("parameters") {
        let nspore: i64 = params.required_parse("nspore")?;
        params.set_attr("eipDuration", (nspore * 5).to_string());
        params.remove_attr("nspore");
    }

    root.for_each_named_mut("MDA", &mut |mda| {
        mda.set_attr("minAge", "0");
        mda.set_attr("maxAge", "99");
        mda.set_attr("coverage", "1");
        Ok(())
    })?;

    root.visit_mut(&mut |el| {
        if let Some(best) = el.remove_attr("best") {
            el.set_attr("value", best);
        }
    });
    Ok(())
}

pub fn translate_2_to_3(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

/// Entomology splits into `nonVector` and `vector`; the EIP duration moves
/// from the parameters onto both of those and onto `changeEIR`.
pub fn translate_3_to_4(root: &mut Element, _ctx: &mut StepContext<'_>) -> StepResult {
    let eip = match root.optional_child_mut("parameters")? {
        Some(params) => params.remove_attr("eipDuration"),
        None => None,
    };
    let eip_value = eip.as_deref().unwrap_or(DEFAULT_EIP_DURATION).to_string();

    if let Some(ento) = root.optional_child_mut("entoData")? {
        let eirs = ento.take_descendants_named("EIRDaily");
        if !eirs.is_empty() {
            let mut non_vector = Element::new("nonVector").with_attr("eipDuration", eip_value.as_str());
            for eir in eirs {
                non_vector.append_child(eir);
            }
            ento.append_child(non_vector);
        }

        let species = ento.take_descendants_named("anopheles");
        if !species.is_empty() {
            let mut vector = Element::new("vector");
            for mut anopheles in species {
                anopheles.remove_attr("useNv0Guess");
                vector.append_child(anopheles);
            }
            ento.append_child(vector);
        }
        ento.remove_attr("inputType");
    }

    let change_eir = root
        .optional_child_mut("interventions")?
        .and_then(|interventions| interventions.first_child_mut("timed"))
        .and_then(|timed| timed.find_descendant_mut("intervention"))
        .and_then(|intervention| intervention.first_child_mut("changeEIR"));
    if let Some(change_eir) = change_eir {
        change_eir.remove_attr("inputType");
        change_eir.remove_attr("name");
        change_eir.set_attr("eipDuration", eip_value);
    }
    Ok(())
}

/// The incidence-model flags changed meaning. The rewritten `modelVersion`
/// was never stored historically, so only the diagnostics remain.
pub fn translate_4_to_5(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let version: u32 = root.required_parse("modelVersion")?;
    if version & 0x68 == 0 || version & (1 << 5) == 0 {
        return Ok(());
    }
    if version & 0x68 == 1 << 5 {
        ctx.warn(
            WarningType::ManualReview,
            "Scenario uses LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM which has had a bug fixed",
        );
        Ok(())
    } else {
        Err(DocumentError::unsupported(
            "Scenario had a combination of InfectionIncidenceModel flags; this was invalid",
        )
        .into())
    }
}

/// `nmf` splits into separate parasitological and non-parasitological entries.
pub fn translate_5_to_6(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let version: u32 = root.required_parse("modelVersion")?;
    root.remove_attr("wuID");

    let has_case_managements = root.has_descendant("caseManagements");
    if version & 8192 != 0 {
        if root.has_descendant("healthSystem") {
            ctx.warn(WarningType::ManualReview, "healthSystem element present but not used");
        }
    } else if has_case_managements {
        ctx.warn(
            WarningType::ManualReview,
            "caseManagement element present but not used (updating anyway)",
        );
    }

    let Some(case_managements) = root.find_descendant_mut("caseManagements") else {
        return Ok(());
    };
    case_managements.for_each_named_mut("caseManagement", &mut |cm| {
        cm.remove_attr("minAgeYrs");
        let index = cm.position_of("nmf").ok_or_else(|| cm.missing("nmf"))?;
        let nmf = cm.child_mut("nmf")?;
        nmf.rename("nmfNP");
        let mut nmf_p = nmf.clone();
        nmf_p.rename("nmfP");
        cm.insert_child(index, nmf_p);
        Ok(())
    })?;
    Ok(())
}

pub fn translate_6_to_7(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

/// Emergence rates are now stored in the document instead of a side file.
pub fn translate_7_to_8(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    let ento = root.child_mut("entoData")?;
    if let Some(vector) = ento.optional_child_mut("vector")? {
        let mosq = vector.child_mut("anopheles")?.child_mut("mosq")?;
        if mosq.remove_attr("emergenceRateFilename").is_some() {
            ctx.warn_at(
                WarningType::ManualReview,
                "entoData/vector/anopheles/mosq",
                "emergence rate data is now stored in the scenario document; \
                 update by hand or run with \"openMalaria --enableERC\"",
            );
        }
    }
    Ok(())
}

pub fn translate_8_to_9(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

pub fn translate_9_to_10(root: &mut Element, ctx: &mut StepContext<'_>) -> StepResult {
    noop(root, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorOptions;
    use crate::document::Document;
    use crate::schema_version::SchemaVersion;
    use crate::transformation_step::StepError;

    fn run(
        step: fn(&mut Element, &mut StepContext<'_>) -> StepResult,
        xml: &str,
    ) -> (Result<Element, StepError>, usize) {
        let options = TranslatorOptions::new();
        let mut ctx = StepContext::new(&options, SchemaVersion::new(1));
        let mut root = Document::parse(xml).unwrap().root;
        let result = step(&mut root, &mut ctx).map(|_| root);
        (result, ctx.into_warnings().len())
    }

    #[test]
    fn test_1_to_2_renames_best_and_converts_nspore() {
        let (root, warnings) = run(
            translate_1_to_2,
            r#"<scenario>
                 <entoData firstDay="3"><sources/></entoData>
                 <parameters nspore="2" useIseed="1"><parameter best="0.5"/></parameters>
                 <item>1.2</item>
                 <MDA/>
               </scenario>"#,
        );
        let root = root.unwrap();
        assert_eq!(warnings, 1);
        assert_eq!(root.attr("wuID"), Some("0"));
        assert_eq!(root.attr("assimMode"), Some("0"));
        assert!(!root.has_descendant("sources"));

        let params = root.child("parameters").unwrap();
        assert_eq!(params.attr("eipDuration"), Some("10"));
        assert!(!params.has_attr("nspore"));
        assert!(!params.has_attr("useIseed"));
        assert_eq!(params.child("parameter").unwrap().attr("value"), Some("0.5"));

        assert_eq!(root.child("item").unwrap().text(), "");
        assert_eq!(root.child("MDA").unwrap().attr("maxAge"), Some("99"));
    }

    #[test]
    fn test_1_to_2_requires_nspore() {
        let (root, _) = run(translate_1_to_2, "<scenario><parameters/></scenario>");
        assert!(matches!(
            root,
            Err(StepError::Document(DocumentError::MissingAttribute { .. }))
        ));
    }

    #[test]
    fn test_3_to_4_splits_entomology() {
        let (root, _) = run(
            translate_3_to_4,
            r#"<scenario>
                 <parameters eipDuration="12"/>
                 <entoData inputType="EIR"><EIRDaily>1</EIRDaily><EIRDaily>2</EIRDaily></entoData>
                 <interventions><timed><intervention time="1"><changeEIR name="x" inputType="EIR"/></intervention></timed></interventions>
               </scenario>"#,
        );
        let root = root.unwrap();
        let ento = root.child("entoData").unwrap();
        assert!(!ento.has_attr("inputType"));
        let non_vector = ento.child("nonVector").unwrap();
        assert_eq!(non_vector.attr("eipDuration"), Some("12"));
        let daily: Vec<String> = non_vector.elements_named("EIRDaily").map(Element::text).collect();
        assert_eq!(daily, vec!["1", "2"]);
        assert!(ento.optional_child("vector").unwrap().is_none());

        let change_eir = root.find_descendant("changeEIR").unwrap();
        assert_eq!(change_eir.attr("eipDuration"), Some("12"));
        assert!(!change_eir.has_attr("name"));
        assert!(!root.child("parameters").unwrap().has_attr("eipDuration"));
    }

    #[test]
    fn test_3_to_4_moves_anopheles() {
        let (root, _) = run(
            translate_3_to_4,
            r#"<scenario><entoData><anopheles mosquito="a" useNv0Guess="1"/><anopheles mosquito="b"/></entoData></scenario>"#,
        );
        let root = root.unwrap();
        let vector = root.find_descendant("vector").unwrap();
        let names: Vec<_> = vector
            .elements_named("anopheles")
            .map(|a| a.attr("mosquito").unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!vector.child_elements().any(|a| a.has_attr("useNv0Guess")));
    }

    #[test]
    fn test_4_to_5_flags() {
        let (ok, warnings) = run(translate_4_to_5, r#"<scenario modelVersion="8"/>"#);
        assert!(ok.is_ok());
        assert_eq!(warnings, 0);

        let (ok, warnings) = run(translate_4_to_5, r#"<scenario modelVersion="32"/>"#);
        assert_eq!(ok.unwrap().attr("modelVersion"), Some("32"));
        assert_eq!(warnings, 1);

        let (err, _) = run(translate_4_to_5, r#"<scenario modelVersion="40"/>"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_5_to_6_splits_nmf() {
        let (root, warnings) = run(
            translate_5_to_6,
            r#"<scenario modelVersion="0" wuID="4">
                 <caseManagements><caseManagement minAgeYrs="0"><endPoints/><nmf value="1"/></caseManagement></caseManagements>
               </scenario>"#,
        );
        let root = root.unwrap();
        assert_eq!(warnings, 1);
        assert!(!root.has_attr("wuID"));
        let cm = root.find_descendant("caseManagement").unwrap();
        let names: Vec<_> = cm.child_elements().map(Element::name).collect();
        assert_eq!(names, vec!["endPoints", "nmfP", "nmfNP"]);
        assert_eq!(cm.child("nmfP").unwrap().attr("value"), Some("1"));
        assert!(!cm.has_attr("minAgeYrs"));
    }

    #[test]
    fn test_7_to_8_drops_emergence_file() {
        let (root, warnings) = run(
            translate_7_to_8,
            r#"<scenario><entoData><vector><anopheles><mosq emergenceRateFilename="f.txt"/></anopheles></vector></entoData></scenario>"#,
        );
        assert_eq!(warnings, 1);
        assert!(!root.unwrap().find_descendant("mosq").unwrap().has_attr("emergenceRateFilename"));

        let (err, _) = run(translate_7_to_8, "<scenario/>");
        assert!(err.is_err());
    }
}
