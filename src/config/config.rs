//! Focal configuration management
//! Handles loading and saving the YAML config file

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Focal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database path
    #[serde(default = "default_db_path")]
    pub database_path: String,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Provider endpoints and default models
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Streaming and title policy
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding augmentation
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

fn default_db_path() -> String {
    "~/.focal/focal.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            generation: GenerationConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    25696
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Provider endpoints and per-provider default models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_url: String,
    #[serde(default = "default_gemini_url")]
    pub gemini_url: String,

    /// Local model used when no variant is given
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Completion budget for providers that require one (Anthropic)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Connect timeout for provider HTTP calls
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_local_model() -> String {
    "llama3.2".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            openai_url: default_openai_url(),
            anthropic_url: default_anthropic_url(),
            gemini_url: default_gemini_url(),
            local_model: default_local_model(),
            openai_model: default_openai_model(),
            anthropic_model: default_anthropic_model(),
            gemini_model: default_gemini_model(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Streaming and title policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Longest wait for the next fragment before the stream counts as interrupted
    #[serde(default = "default_fragment_timeout")]
    pub fragment_timeout_secs: u64,

    /// Conversations shorter than this get a heuristic title instead of a generated one
    #[serde(default = "default_title_threshold")]
    pub title_threshold: usize,
}

fn default_fragment_timeout() -> u64 {
    120
}

fn default_title_threshold() -> usize {
    3
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            fragment_timeout_secs: default_fragment_timeout(),
            title_threshold: default_title_threshold(),
        }
    }
}

/// Embedding augmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embed assistant replies after each completed stream
    #[serde(default)]
    pub enabled: bool,

    /// Provider tag: local, openai or gemini
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Credential for cloud embedding providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Config {
    /// Load config from the default location or specified path
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&raw).context("Failed to parse config file")?;

        debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = Self::config_path(path)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(&self)?;
        fs::write(&config_path, content).context("Failed to write config file")?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the config file path
    fn config_path(path: Option<&str>) -> Result<PathBuf> {
        // Check env override first
        if let Ok(env_path) = std::env::var("FOCAL_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        let home = dirs::home_dir().context("Cannot find home directory")?;
        Ok(home.join(".focal").join("config.yml"))
    }

    /// Resolve database path (expand ~)
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if !self.database_path.starts_with('~') {
            return Ok(PathBuf::from(&self.database_path));
        }
        let home = dirs::home_dir().context("Cannot find home directory")?;
        let path = self.database_path.replacen('~', &home.to_string_lossy(), 1);
        Ok(PathBuf::from(path))
    }
}
