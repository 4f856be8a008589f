use super::{Generation, GenerationOptions, LlmProvider, TokenUsage};
use crate::error::AgentError;

/// Offline provider that echoes the prompt back.
///
/// Always available, so workflows can be exercised without API keys.
#[derive(Debug, Clone, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub const NAME: &'static str = "local";
}

#[async_trait::async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, AgentError> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        let budget = options.max_tokens as usize;
        let text = if words.len() > budget {
            words[..budget].join(" ")
        } else {
            words.join(" ")
        };

        Ok(Generation {
            usage: Some(TokenUsage {
                prompt_tokens: words.len() as u64,
                completion_tokens: text.split_whitespace().count() as u64,
            }),
            text: format!("[local] {}", text),
            model: "local-echo".to_string(),
        })
    }
}
