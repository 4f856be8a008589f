//! Ready-made workflow templates.

use crate::types::{StepDefinition, WorkflowDefinition};
use serde::{Deserialize, Serialize};

/// A reusable workflow shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<StepDefinition>,
}

/// Caller overrides applied when a template is instantiated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateInstance {
    /// Workflow name; defaults to the template name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Provider for every step; each step keeps its own when absent
    #[serde(default)]
    pub provider: Option<String>,
    /// Appended as context to every step
    #[serde(default)]
    pub context: Option<String>,
}

impl WorkflowTemplate {
    /// Turn the template into a definition ready for validation
    pub fn instantiate(&self, instance: TemplateInstance) -> WorkflowDefinition {
        let steps = self
            .steps
            .iter()
            .cloned()
            .map(|mut step| {
                if let Some(provider) = &instance.provider {
                    step = step.with_provider(provider.as_str());
                }
                if let Some(extra) = &instance.context {
                    let context = match step.context.take() {
                        Some(own) => format!("{}\n{}", own, extra),
                        None => extra.clone(),
                    };
                    step = step.with_context(context);
                }
                step
            })
            .collect();

        WorkflowDefinition {
            name: instance.name.unwrap_or_else(|| self.name.clone()),
            description: Some(self.description.clone()),
            steps,
            session_id: instance.session_id,
        }
    }
}

/// The built-in templates
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![research_report(), code_review(), content_pipeline()]
}

/// Look up a built-in template by id
pub fn find_template(id: &str) -> Option<WorkflowTemplate> {
    builtin_templates().into_iter().find(|t| t.id == id)
}

fn research_report() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "research_report".to_string(),
        name: "Research Report".to_string(),
        description: "Research a topic from several angles and combine the findings into a report"
            .to_string(),
        steps: vec![
            StepDefinition::new(
                "research",
                "chain_of_thought",
                "Research the topic and list the key facts and open questions",
            ),
            StepDefinition::new(
                "analysis",
                "tree_of_thoughts",
                "Analyze the research findings and weigh competing interpretations",
            )
            .depends_on(["research"]),
            StepDefinition::new(
                "fact_check",
                "self_consistency",
                "Check the research findings for claims that do not hold up",
            )
            .depends_on(["research"]),
            StepDefinition::new(
                "report",
                "zero_shot",
                "Write a structured report from the analysis and the fact check",
            )
            .depends_on(["analysis", "fact_check"]),
        ],
    }
}

fn code_review() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "code_review".to_string(),
        name: "Code Review".to_string(),
        description: "Review code for correctness and security, then summarize the findings"
            .to_string(),
        steps: vec![
            StepDefinition::new(
                "understand",
                "chain_of_thought",
                "Explain what the code does and how it is structured",
            ),
            StepDefinition::new(
                "correctness",
                "react",
                "Look for bugs, unhandled edge cases and broken invariants",
            )
            .depends_on(["understand"]),
            StepDefinition::new(
                "security",
                "chain_of_thought",
                "Look for security problems such as injection or unsafe input handling",
            )
            .depends_on(["understand"]),
            StepDefinition::new(
                "summary",
                "zero_shot",
                "Summarize the review as a prioritized list of requested changes",
            )
            .depends_on(["correctness", "security"]),
        ],
    }
}

fn content_pipeline() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "content_pipeline".to_string(),
        name: "Content Pipeline".to_string(),
        description: "Outline, draft and polish a piece of written content".to_string(),
        steps: vec![
            StepDefinition::new(
                "outline",
                "tree_of_thoughts",
                "Propose an outline for the piece",
            ),
            StepDefinition::new("draft", "few_shot", "Write a first draft following the outline")
                .depends_on(["outline"]),
            StepDefinition::new(
                "edit",
                "chain_of_thought",
                "Edit the draft for clarity, tone and flow",
            )
            .with_context("Keep the author's voice")
            .depends_on(["draft"]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::validate;

    #[test]
    fn test_every_template_validates() {
        let templates = builtin_templates();
        assert_eq!(templates.len(), 3);
        for template in templates {
            let definition = template.instantiate(TemplateInstance::default());
            assert!(
                validate(definition).is_ok(),
                "template {} failed validation",
                template.id
            );
        }
    }

    #[test]
    fn test_instantiate_applies_overrides() {
        let template = find_template("code_review").unwrap();
        let definition = template.instantiate(TemplateInstance {
            name: Some("Review PR 42".to_string()),
            session_id: Some("session-1".to_string()),
            provider: Some("local".to_string()),
            context: Some("fn main() {}".to_string()),
        });

        assert_eq!(definition.name, "Review PR 42");
        assert_eq!(definition.session_id.as_deref(), Some("session-1"));
        assert!(definition.steps.iter().all(|s| s.provider == "local"));
        assert!(definition
            .steps
            .iter()
            .all(|s| s.context.as_deref() == Some("fn main() {}")));
    }

    #[test]
    fn test_instance_context_follows_step_context() {
        let template = find_template("content_pipeline").unwrap();
        let definition = template.instantiate(TemplateInstance {
            context: Some("Audience: beginners".to_string()),
            ..Default::default()
        });

        let edit = definition.steps.iter().find(|s| s.name == "edit").unwrap();
        assert_eq!(
            edit.context.as_deref(),
            Some("Keep the author's voice\nAudience: beginners")
        );
        assert_eq!(edit.provider, "openai");
        assert_eq!(definition.steps[0].context.as_deref(), Some("Audience: beginners"));
    }

    #[test]
    fn test_unknown_template() {
        assert!(find_template("haiku").is_none());
        assert_eq!(
            find_template("content_pipeline").unwrap().instantiate(Default::default()).name,
            "Content Pipeline"
        );
    }
}
