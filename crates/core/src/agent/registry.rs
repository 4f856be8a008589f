use super::provider::LocalProvider;
use super::techniques;
use super::{AgentInvoker, GenerationOptions, InvocationRequest, LlmProvider, Technique};
use crate::error::AgentError;
use crate::types::AgentOutput;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const FEEDBACK_INSTRUCTIONS: &str = "You are a helpful prompt engineer. Given the following prompt, \
provide suggestions and improvement tips to make it clearer and more effective.";

const FEEDBACK_OPTIONS: GenerationOptions = GenerationOptions {
    max_tokens: 300,
    temperature: 0.5,
};

/// Public description of a registered technique
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueInfo {
    pub name: String,
    pub description: String,
}

/// Registry of techniques and providers; the engine's agent invoker
pub struct TechniqueRegistry {
    techniques: HashMap<String, Arc<dyn Technique>>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    timeout: Option<Duration>,
}

impl TechniqueRegistry {
    pub fn new() -> Self {
        Self {
            techniques: HashMap::new(),
            providers: HashMap::new(),
            timeout: None,
        }
    }

    /// Registry with the built-in techniques and the local provider
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for technique in techniques::builtin() {
            registry.register_technique(technique);
        }
        registry.register_provider(Arc::new(LocalProvider));
        registry
    }

    /// Fail any invocation that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a technique, replacing any with the same name
    pub fn register_technique(&mut self, technique: Arc<dyn Technique>) {
        self.techniques.insert(technique.name().to_string(), technique);
    }

    /// Register a provider, replacing any with the same name
    pub fn register_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn technique(&self, name: &str) -> Option<TechniqueInfo> {
        self.techniques.get(name).map(|t| info(t.as_ref()))
    }

    /// All techniques, sorted by name
    pub fn list_techniques(&self) -> Vec<TechniqueInfo> {
        let mut list: Vec<_> = self.techniques.values().map(|t| info(t.as_ref())).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// All provider names, sorted
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    /// Ask `provider` for suggestions that would make `prompt` clearer.
    ///
    /// A blank answer is reported as an invalid response.
    pub async fn prompt_feedback(&self, prompt: &str, provider: &str) -> Result<String, AgentError> {
        let llm = self
            .provider(provider)
            .ok_or_else(|| AgentError::UnknownProvider(provider.to_string()))?;
        let evaluation = format!("{}\n\nPrompt:\n{}", FEEDBACK_INSTRUCTIONS, prompt);

        tracing::debug!("Requesting prompt feedback from provider {}", provider);
        let generation = self
            .within_limit("Prompt feedback", llm.generate(&evaluation, &FEEDBACK_OPTIONS))
            .await?;

        let feedback = generation.text.trim();
        if feedback.is_empty() {
            tracing::warn!("Provider {} returned empty feedback", provider);
            return Err(AgentError::InvalidResponse("empty feedback".to_string()));
        }
        Ok(feedback.to_string())
    }

    async fn within_limit<T, F>(&self, label: &str, work: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("{} timed out after {:?}", label, limit);
                    Err(AgentError::Timeout {
                        secs: limit.as_secs(),
                    })
                }
            },
            None => work.await,
        }
    }
}

impl Default for TechniqueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn info(technique: &dyn Technique) -> TechniqueInfo {
    TechniqueInfo {
        name: technique.name().to_string(),
        description: technique.description().to_string(),
    }
}

#[async_trait::async_trait]
impl AgentInvoker for TechniqueRegistry {
    async fn invoke(&self, request: InvocationRequest) -> Result<AgentOutput, AgentError> {
        let technique = self
            .techniques
            .get(&request.technique)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTechnique(request.technique.clone()))?;
        let provider = self
            .providers
            .get(&request.provider)
            .cloned()
            .ok_or_else(|| AgentError::UnknownProvider(request.provider.clone()))?;

        tracing::debug!(
            "Invoking technique {} on provider {} for step {}",
            request.technique,
            request.provider,
            request.step
        );

        let label = format!("Technique {}", request.technique);
        self.within_limit(&label, technique.run(&request, provider.as_ref()))
            .await
    }
}
