//! Built-in prompting techniques.

use super::{Generation, GenerationOptions, InvocationRequest, LlmProvider, Technique};
use crate::error::AgentError;
use crate::types::AgentOutput;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const ANSWER_MARKER: &str = "Answer:";
const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Every built-in technique
pub fn builtin() -> Vec<Arc<dyn Technique>> {
    vec![
        Arc::new(ZeroShot),
        Arc::new(FewShot),
        Arc::new(ChainOfThought),
        Arc::new(SelfConsistency),
        Arc::new(TreeOfThoughts),
        Arc::new(React),
    ]
}

fn metadata(technique: &str, prompt: &str, generation: &Generation) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("technique".to_string(), json!(technique));
    meta.insert("prompt_length".to_string(), json!(prompt.len()));
    meta.insert("model".to_string(), json!(generation.model));
    if let Some(usage) = generation.usage {
        meta.insert("usage".to_string(), json!(usage));
    }
    meta
}

/// Split `text` at the last line starting with `marker`: the lines before
/// become reasoning, the remainder the answer. Without a marker the whole
/// text is the answer.
fn split_answer(text: &str, marker: &str) -> (Vec<String>, String) {
    let lines: Vec<&str> = text.lines().collect();
    match lines.iter().rposition(|l| l.trim_start().starts_with(marker)) {
        Some(idx) => {
            let reasoning = lines[..idx]
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            let first = lines[idx].trim_start()[marker.len()..].trim();
            let mut answer = first.to_string();
            for rest in &lines[idx + 1..] {
                answer.push('\n');
                answer.push_str(rest);
            }
            (reasoning, answer.trim().to_string())
        }
        None => (Vec::new(), text.trim().to_string()),
    }
}

fn positive_parameter(request: &InvocationRequest, key: &str, default: usize, max: usize) -> usize {
    request
        .parameters
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
        .clamp(1, max)
}

/// Direct prompt, no examples
pub struct ZeroShot;

#[async_trait::async_trait]
impl Technique for ZeroShot {
    fn name(&self) -> &'static str {
        "zero_shot"
    }

    fn description(&self) -> &'static str {
        "Performs tasks without examples, relying on the model's pre-trained knowledge"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let prompt = format!(
            "Task: {}\n\nPlease provide a direct and accurate response to the task above.",
            request.input
        );
        let options = GenerationOptions::from_parameters(&request.parameters);
        let generation = provider.generate(&prompt, &options).await?;

        Ok(AgentOutput {
            result: generation.text.trim().to_string(),
            reasoning: vec!["Applied zero-shot prompting".to_string()],
            metadata: metadata(self.name(), &prompt, &generation),
        })
    }
}

/// Prompt preceded by worked input/output examples
pub struct FewShot;

#[async_trait::async_trait]
impl Technique for FewShot {
    fn name(&self) -> &'static str {
        "few_shot"
    }

    fn description(&self) -> &'static str {
        "Uses provided examples to guide the model's response generation"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let mut prompt = String::from("Follow the pattern shown in the examples.\n");
        for (i, example) in request.examples.iter().enumerate() {
            prompt.push_str(&format!(
                "\nExample {}:\nInput: {}\nOutput: {}\n",
                i + 1,
                example.input,
                example.output
            ));
        }
        prompt.push_str(&format!("\nInput: {}\nOutput:", request.input));

        let options = GenerationOptions::from_parameters(&request.parameters);
        let generation = provider.generate(&prompt, &options).await?;

        let mut meta = metadata(self.name(), &prompt, &generation);
        meta.insert("example_count".to_string(), json!(request.examples.len()));

        Ok(AgentOutput {
            result: generation.text.trim().to_string(),
            reasoning: vec![format!(
                "Guided by {} example(s)",
                request.examples.len()
            )],
            metadata: meta,
        })
    }
}

fn chain_of_thought_prompt(input: &str) -> String {
    format!(
        "{}\n\nThink through this step by step. Number each step, then give the final answer on a line starting with '{}'",
        input, ANSWER_MARKER
    )
}

/// Step-by-step reasoning before the answer
pub struct ChainOfThought;

#[async_trait::async_trait]
impl Technique for ChainOfThought {
    fn name(&self) -> &'static str {
        "chain_of_thought"
    }

    fn description(&self) -> &'static str {
        "Breaks down complex problems into step-by-step reasoning"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let prompt = chain_of_thought_prompt(&request.input);
        let options = GenerationOptions::from_parameters(&request.parameters);
        let generation = provider.generate(&prompt, &options).await?;
        let (reasoning, result) = split_answer(&generation.text, ANSWER_MARKER);

        Ok(AgentOutput {
            result,
            reasoning,
            metadata: metadata(self.name(), &prompt, &generation),
        })
    }
}

/// Several reasoning samples; the most frequent answer wins
pub struct SelfConsistency;

#[async_trait::async_trait]
impl Technique for SelfConsistency {
    fn name(&self) -> &'static str {
        "self_consistency"
    }

    fn description(&self) -> &'static str {
        "Generates multiple reasoning paths and selects the most consistent answer"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let samples = positive_parameter(request, "samples", 3, 10);
        let prompt = chain_of_thought_prompt(&request.input);
        let options = GenerationOptions::from_parameters(&request.parameters);

        let mut answers: Vec<String> = Vec::with_capacity(samples);
        let mut last = None;
        for _ in 0..samples {
            let generation = provider.generate(&prompt, &options).await?;
            let (_, answer) = split_answer(&generation.text, ANSWER_MARKER);
            answers.push(answer);
            last = Some(generation);
        }
        let generation =
            last.ok_or_else(|| AgentError::InvalidResponse("no samples generated".to_string()))?;

        let mut votes: HashMap<&str, usize> = HashMap::new();
        for answer in &answers {
            *votes.entry(answer.as_str()).or_default() += 1;
        }
        // Ties go to the answer seen first.
        let mut best = answers[0].as_str();
        for answer in &answers {
            if votes[answer.as_str()] > votes[best] {
                best = answer.as_str();
            }
        }
        let agreement = votes[best];

        let mut meta = metadata(self.name(), &prompt, &generation);
        meta.insert("samples".to_string(), json!(samples));
        meta.insert("agreement".to_string(), json!(agreement));

        Ok(AgentOutput {
            result: best.to_string(),
            reasoning: answers
                .iter()
                .enumerate()
                .map(|(i, a)| format!("Sample {}: {}", i + 1, a))
                .collect(),
            metadata: meta,
        })
    }
}

/// Propose branches, then develop the most promising one
pub struct TreeOfThoughts;

#[async_trait::async_trait]
impl Technique for TreeOfThoughts {
    fn name(&self) -> &'static str {
        "tree_of_thoughts"
    }

    fn description(&self) -> &'static str {
        "Explores multiple reasoning branches like a search tree"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let branches = positive_parameter(request, "branches", 3, 8);
        let options = GenerationOptions::from_parameters(&request.parameters);

        let propose = format!(
            "Problem: {}\n\nPropose {} distinct approaches to this problem, one per line.",
            request.input, branches
        );
        let proposals = provider.generate(&propose, &options).await?;
        let approaches: Vec<String> = proposals
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(branches)
            .map(str::to_string)
            .collect();

        let develop = format!(
            "Problem: {}\n\nCandidate approaches:\n{}\n\nEvaluate the approaches, choose the most promising one and develop it into a complete answer.",
            request.input,
            approaches
                .iter()
                .enumerate()
                .map(|(i, a)| format!("{}. {}", i + 1, a))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let generation = provider.generate(&develop, &options).await?;

        let mut meta = metadata(self.name(), &develop, &generation);
        meta.insert("branches".to_string(), json!(approaches.len()));

        Ok(AgentOutput {
            result: generation.text.trim().to_string(),
            reasoning: approaches,
            metadata: meta,
        })
    }
}

/// Interleaved thought, action and observation
pub struct React;

#[async_trait::async_trait]
impl Technique for React {
    fn name(&self) -> &'static str {
        "react"
    }

    fn description(&self) -> &'static str {
        "Combines reasoning and action-taking capabilities"
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError> {
        let prompt = format!(
            "Question: {}\n\nAnswer using repeated Thought:, Action: and Observation: lines. \
             When you are done, finish with a line starting with '{}'",
            request.input, FINAL_ANSWER_MARKER
        );
        let options = GenerationOptions::from_parameters(&request.parameters);
        let generation = provider.generate(&prompt, &options).await?;
        let (reasoning, result) = split_answer(&generation.text, FINAL_ANSWER_MARKER);

        Ok(AgentOutput {
            result,
            reasoning,
            metadata: metadata(self.name(), &prompt, &generation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FewShotExample;
    use std::sync::Mutex;

    /// Replies with canned texts in order, recording prompts
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Generation, AgentError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let text = self.replies.lock().unwrap().pop().unwrap_or_default();
            Ok(Generation {
                text,
                model: "scripted-1".to_string(),
                usage: None,
            })
        }
    }

    fn request(input: &str) -> InvocationRequest {
        InvocationRequest {
            step: "test".to_string(),
            technique: String::new(),
            input: input.to_string(),
            provider: "scripted".to_string(),
            parameters: Map::new(),
            examples: vec![],
        }
    }

    #[test]
    fn test_split_answer() {
        let (reasoning, answer) = split_answer("1. think\n\n2. more\nAnswer: 42", ANSWER_MARKER);
        assert_eq!(reasoning, vec!["1. think", "2. more"]);
        assert_eq!(answer, "42");

        let (reasoning, answer) = split_answer("just text", ANSWER_MARKER);
        assert!(reasoning.is_empty());
        assert_eq!(answer, "just text");
    }

    #[tokio::test]
    async fn test_chain_of_thought_extracts_answer() {
        let provider = Scripted::new(&["1. Add two and two\nAnswer: 4"]);
        let output = ChainOfThought.run(&request("2+2?"), &provider).await.unwrap();
        assert_eq!(output.result, "4");
        assert_eq!(output.reasoning, vec!["1. Add two and two"]);
        assert_eq!(output.metadata["model"], "scripted-1");
    }

    #[tokio::test]
    async fn test_few_shot_includes_examples() {
        let provider = Scripted::new(&["positive"]);
        let mut req = request("I love it");
        req.examples = vec![FewShotExample {
            input: "Terrible".to_string(),
            output: "negative".to_string(),
        }];

        let output = FewShot.run(&req, &provider).await.unwrap();
        assert_eq!(output.result, "positive");
        assert_eq!(output.metadata["example_count"], 1);
        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Input: Terrible\nOutput: negative"));
        assert!(prompt.ends_with("Input: I love it\nOutput:"));
    }

    #[tokio::test]
    async fn test_self_consistency_majority_vote() {
        let provider = Scripted::new(&["Answer: 5", "Answer: 4", "Answer: 4"]);
        let output = SelfConsistency.run(&request("2+2?"), &provider).await.unwrap();
        assert_eq!(output.result, "4");
        assert_eq!(output.metadata["agreement"], 2);
        assert_eq!(output.reasoning.len(), 3);
    }

    #[tokio::test]
    async fn test_tree_of_thoughts_two_rounds() {
        let provider = Scripted::new(&["brute force\n\ndivide and conquer", "Use divide and conquer."]);
        let mut req = request("Sort a list");
        req.parameters.insert("branches".to_string(), json!(2));

        let output = TreeOfThoughts.run(&req, &provider).await.unwrap();
        assert_eq!(output.reasoning, vec!["brute force", "divide and conquer"]);
        assert_eq!(output.result, "Use divide and conquer.");
        assert!(provider.prompts.lock().unwrap()[1].contains("2. divide and conquer"));
    }

    #[tokio::test]
    async fn test_react_final_answer() {
        let provider = Scripted::new(&[
            "Thought: look it up\nAction: search\nObservation: Paris\nFinal Answer: Paris",
        ]);
        let output = React.run(&request("Capital of France?"), &provider).await.unwrap();
        assert_eq!(output.result, "Paris");
        assert_eq!(output.reasoning.len(), 3);
    }
}
