//! Seam between the scheduler and the techniques that do the actual work.
//!
//! The scheduler only knows [`AgentInvoker`]. [`TechniqueRegistry`] is the
//! stock implementation: it maps technique names to [`Technique`]s and
//! provider names to [`LlmProvider`]s, both registered explicitly at startup.

pub mod provider;
pub mod registry;
pub mod techniques;

pub use provider::LocalProvider;
pub use registry::{TechniqueInfo, TechniqueRegistry};

use crate::error::AgentError;
use crate::types::{AgentOutput, FewShotExample};
use serde::{Deserialize, Serialize};

/// Everything the invoker needs to run one step
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Name of the step being run
    pub step: String,
    pub technique: String,
    /// Prompt enriched with context and upstream results
    pub input: String,
    pub provider: String,
    /// Passed through untouched from the step definition
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub examples: Vec<FewShotExample>,
}

/// Runs a step's technique against its provider
#[async_trait::async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<AgentOutput, AgentError>;
}

/// A prompting strategy
#[async_trait::async_trait]
pub trait Technique: Send + Sync {
    /// Identifier steps use to select this technique
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn run(
        &self,
        request: &InvocationRequest,
        provider: &dyn LlmProvider,
    ) -> Result<AgentOutput, AgentError>;
}

/// A text-generation backend
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, AgentError>;
}

/// Sampling options for one generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

impl GenerationOptions {
    /// Read `max_tokens` and `temperature` from step parameters, falling back
    /// to the defaults for anything missing or mistyped.
    pub fn from_parameters(parameters: &serde_json::Map<String, serde_json::Value>) -> Self {
        let defaults = Self::default();
        Self {
            max_tokens: parameters
                .get("max_tokens")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_tokens),
            temperature: parameters
                .get("temperature")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32)
                .unwrap_or(defaults.temperature),
        }
    }
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Text produced by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}
