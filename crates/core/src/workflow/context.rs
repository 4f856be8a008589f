use crate::types::{AgentOutput, WorkflowStep};
use std::collections::BTreeMap;

const CONTEXT_HEADER: &str = "Context:";
const PRIOR_RESULTS_HEADER: &str = "Results from previous steps:";

/// `prompt` followed by a context section when `context` is not blank
pub fn compose_prompt(prompt: &str, context: Option<&str>) -> String {
    let mut input = prompt.to_string();
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        input.push_str("\n\n");
        input.push_str(CONTEXT_HEADER);
        input.push('\n');
        input.push_str(context);
    }
    input
}

/// Compose the effective input for `step` from its own prompt, its declared
/// context and the stored results of its dependencies.
///
/// Dependencies are listed in declaration order. A dependency whose result is
/// absent or blank is left out, and the section is omitted when nothing
/// remains. The step itself is never modified.
pub fn compose_input(step: &WorkflowStep, results: &BTreeMap<String, AgentOutput>) -> String {
    let mut input = compose_prompt(&step.prompt, step.context.as_deref());

    let prior: Vec<(&str, &str)> = step
        .depends_on
        .iter()
        .filter_map(|dep| {
            results
                .get(dep)
                .map(|output| output.result.as_str())
                .filter(|r| !r.trim().is_empty())
                .map(|r| (dep.as_str(), r))
        })
        .collect();

    if !prior.is_empty() {
        input.push_str("\n\n");
        input.push_str(PRIOR_RESULTS_HEADER);
        for (name, result) in prior {
            input.push_str("\n- ");
            input.push_str(name);
            input.push_str(": ");
            input.push_str(result);
        }
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepDefinition;

    fn step(prompt: &str, context: Option<&str>, deps: &[&str]) -> WorkflowStep {
        let mut def = StepDefinition::new("target", "zero_shot", prompt).depends_on(deps.to_vec());
        def.context = context.map(str::to_string);
        WorkflowStep::from_definition(def)
    }

    fn output(text: &str) -> AgentOutput {
        AgentOutput {
            result: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_only() {
        let s = step("Summarize the report", None, &[]);
        assert_eq!(compose_input(&s, &BTreeMap::new()), "Summarize the report");
    }

    #[test]
    fn test_context_section() {
        let s = step("Summarize", Some("Audience: executives"), &[]);
        assert_eq!(
            compose_input(&s, &BTreeMap::new()),
            "Summarize\n\nContext:\nAudience: executives"
        );
    }

    #[test]
    fn test_blank_context_dropped() {
        assert_eq!(compose_prompt("Explain", Some("  \n")), "Explain");
        assert_eq!(compose_prompt("Explain", Some("tests")), "Explain\n\nContext:\ntests");
    }

    #[test]
    fn test_results_in_declared_order() {
        let s = step("Combine", None, &["zeta", "alpha"]);
        let mut results = BTreeMap::new();
        results.insert("alpha".to_string(), output("first"));
        results.insert("zeta".to_string(), output("second"));

        assert_eq!(
            compose_input(&s, &results),
            "Combine\n\nResults from previous steps:\n- zeta: second\n- alpha: first"
        );
    }

    #[test]
    fn test_absent_and_empty_results_omitted() {
        let s = step("Combine", Some("ctx"), &["missing", "blank", "present"]);
        let mut results = BTreeMap::new();
        results.insert("blank".to_string(), output("  "));
        results.insert("present".to_string(), output("value"));

        let input = compose_input(&s, &results);
        assert!(!input.contains("missing"));
        assert!(!input.contains("blank"));
        assert!(input.ends_with("Results from previous steps:\n- present: value"));
    }

    #[test]
    fn test_section_dropped_when_no_results() {
        let s = step("Combine", None, &["a"]);
        assert_eq!(compose_input(&s, &BTreeMap::new()), "Combine");
    }

    #[test]
    fn test_composition_is_idempotent_and_pure() {
        let s = step("Combine", Some("ctx"), &["a"]);
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), output("done"));

        let first = compose_input(&s, &results);
        let second = compose_input(&s, &results);
        assert_eq!(first, second);
        assert_eq!(s.prompt, "Combine");
    }
}
