use crate::providers::{AnthropicProvider, OpenAiProvider};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use weft_core::agent::TechniqueRegistry;
use weft_core::events::EventBus;
use weft_core::storage::{MemoryWorkflowStore, RedbWorkflowStore, WorkflowStore};
use weft_core::workflow::WorkflowEngine;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_index_file() -> String {
    "workflows.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            index_file: default_index_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-invocation limit; unlimited when absent
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default = "default_true")]
    pub recover_on_start: bool,
}

fn default_event_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_secs: None,
            event_buffer: default_event_buffer(),
            recover_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,

    #[serde(default)]
    pub anthropic: ProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Upper bound on tokens requested per call
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    fn api_key(&self, default_env: &str) -> Option<String> {
        let var = self.api_key_env.as_deref().unwrap_or(default_env);
        std::env::var(var).ok().filter(|key| !key.trim().is_empty())
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            Self::parse(&content)?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration file")
    }

    /// Get the index file path
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.index_file)
    }

    fn open_store(&self) -> Result<Arc<dyn WorkflowStore>> {
        Ok(match self.storage.backend {
            StorageBackend::Redb => Arc::new(
                RedbWorkflowStore::new(self.index_path())
                    .context("Failed to create workflow store")?,
            ),
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; workflows are lost on exit");
                Arc::new(MemoryWorkflowStore::new())
            }
        })
    }

    /// Registry with the built-in techniques and every provider whose key is set
    pub fn build_registry(&self) -> TechniqueRegistry {
        let mut registry = TechniqueRegistry::with_defaults();

        match self.providers.openai.api_key("OPENAI_API_KEY") {
            Some(key) => registry.register_provider(Arc::new(OpenAiProvider::new(
                key,
                &self.providers.openai,
            ))),
            None => tracing::info!("OpenAI API key not set; provider openai unavailable"),
        }
        match self.providers.anthropic.api_key("ANTHROPIC_API_KEY") {
            Some(key) => registry.register_provider(Arc::new(AnthropicProvider::new(
                key,
                &self.providers.anthropic,
            ))),
            None => tracing::info!("Anthropic API key not set; provider anthropic unavailable"),
        }

        match self.engine.invocation_timeout_secs {
            Some(secs) => registry.with_timeout(Duration::from_secs(secs)),
            None => registry,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<TechniqueRegistry>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let store = config.open_store()?;
        let registry = Arc::new(config.build_registry());
        tracing::info!("Providers available: {:?}", registry.provider_names());

        Ok(Self::with_store(
            store,
            registry,
            EventBus::new(config.engine.event_buffer),
        ))
    }

    pub fn with_store(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<TechniqueRegistry>,
        events: EventBus,
    ) -> Self {
        let engine = Arc::new(WorkflowEngine::new(store, registry.clone(), events));
        Self { engine, registry }
    }
}
