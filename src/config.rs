//! Service configuration
//!
//! Loads configuration from config.yml file, with `.env` support and
//! environment variable overrides.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::context::DEFAULT_CONTEXT_ENTITIES;
use crate::integrations::gemini::{GenerationSettings, DEFAULT_GEMINI_MODEL};
use crate::search::SearchConfig;
use crate::session::DEFAULT_EXPIRY_SECS;
use crate::synthesizer::{RetryPolicy, SynthesizerConfig};
use crate::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_NEO4J_URI: &str = "bolt://localhost:7687";
pub const DEFAULT_NEO4J_USER: &str = "neo4j";
pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_THRESHOLD: f64 = 0.3;
pub const DEFAULT_HISTORY_TURNS: usize = 10;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    server: Option<YamlServer>,
    neo4j: Option<YamlNeo4j>,
    gemini: Option<YamlGemini>,
    search: Option<YamlSearch>,
    sessions: Option<YamlSessions>,
    retry: Option<YamlRetry>,
    debug: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlServer {
    addr: Option<String>,
    expose_conversations: Option<bool>,
    cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlNeo4j {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlGemini {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    temperature: Option<f32>,
    top_k: Option<u32>,
    top_p: Option<f32>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlSearch {
    fulltext_index: Option<String>,
    max_results: Option<usize>,
    threshold: Option<f64>,
    relationship_seeds: Option<usize>,
    relationship_limit: Option<usize>,
    context_entities: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlSessions {
    expiry_secs: Option<i64>,
    history_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlRetry {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub addr: String,
    /// Serve `GET /conversations`
    pub expose_conversations: bool,
    pub cors_origins: Vec<String>,
}

/// Neo4j connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Gemini settings. An empty `api_key` disables generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub generation: GenerationSettings,
}

impl GeminiSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Search tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub fulltext_index: String,
    pub max_results: usize,
    pub threshold: f64,
    pub relationship_seeds: usize,
    pub relationship_limit: usize,
    pub context_entities: usize,
}

impl SearchSettings {
    pub fn engine_config(&self) -> SearchConfig {
        SearchConfig {
            fulltext_index: self.fulltext_index.clone(),
            relationship_seeds: self.relationship_seeds,
            relationship_limit: self.relationship_limit,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server: ServerSettings,
    pub neo4j: Neo4jSettings,
    pub gemini: GeminiSettings,
    pub search: SearchSettings,
    pub session_expiry_secs: i64,
    pub history_turns: usize,
    pub retry: RetryPolicy,
    /// Append debug information to generated answers
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::from_yaml(YamlConfig::default()))
    }

    /// Resolve `${VAR}` placeholders, then let `env_key` override.
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Ok(env_val) = std::env::var(env_key) {
            return Some(env_val);
        }
        value.map(|v| Self::expand_placeholder(&v))
    }

    /// `${VAR}` becomes the value of VAR (empty when unset); other strings
    /// pass through.
    fn expand_placeholder(value: &str) -> String {
        match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
            Some(var_name) => std::env::var(var_name).unwrap_or_default(),
            None => value.to_string(),
        }
    }

    fn resolve_env_bool(value: Option<bool>, env_key: &str) -> bool {
        match std::env::var(env_key) {
            Ok(env_val) => env_val.eq_ignore_ascii_case("true") || env_val == "1",
            Err(_) => value.unwrap_or(false),
        }
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&content)?;

        Ok(Self::from_yaml(yaml))
    }

    /// Build from parsed YAML, applying environment overrides.
    fn from_yaml(yaml: YamlConfig) -> Self {
        let server = yaml.server.unwrap_or_default();
        let neo4j = yaml.neo4j.unwrap_or_default();
        let gemini = yaml.gemini.unwrap_or_default();
        let search = yaml.search.unwrap_or_default();
        let sessions = yaml.sessions.unwrap_or_default();
        let retry = yaml.retry.unwrap_or_default();

        let defaults = GenerationSettings::default();
        let default_retry = RetryPolicy::default();
        let default_search = SearchConfig::default();

        let api_key = Self::resolve_env_string(gemini.api_key, "GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            server: ServerSettings {
                addr: Self::resolve_env_string(server.addr, "SERVER_ADDR")
                    .unwrap_or_else(|| DEFAULT_ADDR.to_string()),
                expose_conversations: server.expose_conversations.unwrap_or(false),
                cors_origins: server
                    .cors_origins
                    .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]),
            },
            neo4j: Neo4jSettings {
                uri: Self::resolve_env_string(neo4j.uri, "NEO4J_URI")
                    .unwrap_or_else(|| DEFAULT_NEO4J_URI.to_string()),
                user: Self::resolve_env_string(neo4j.user, "NEO4J_USER")
                    .unwrap_or_else(|| DEFAULT_NEO4J_USER.to_string()),
                password: Self::resolve_env_string(neo4j.password, "NEO4J_PASSWORD")
                    .unwrap_or_default(),
            },
            gemini: GeminiSettings {
                api_key,
                model: Self::resolve_env_string(gemini.model, "GEMINI_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: gemini.base_url.map(|u| Self::expand_placeholder(&u)),
                generation: GenerationSettings {
                    temperature: gemini.temperature.unwrap_or(defaults.temperature),
                    top_k: gemini.top_k.unwrap_or(defaults.top_k),
                    top_p: gemini.top_p.unwrap_or(defaults.top_p),
                    max_output_tokens: gemini
                        .max_output_tokens
                        .unwrap_or(defaults.max_output_tokens),
                },
            },
            search: SearchSettings {
                fulltext_index: search
                    .fulltext_index
                    .unwrap_or(default_search.fulltext_index),
                max_results: search.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
                threshold: search.threshold.unwrap_or(DEFAULT_THRESHOLD),
                relationship_seeds: search
                    .relationship_seeds
                    .unwrap_or(default_search.relationship_seeds),
                relationship_limit: search
                    .relationship_limit
                    .unwrap_or(default_search.relationship_limit),
                context_entities: search.context_entities.unwrap_or(DEFAULT_CONTEXT_ENTITIES),
            },
            session_expiry_secs: sessions.expiry_secs.unwrap_or(DEFAULT_EXPIRY_SECS),
            history_turns: sessions.history_turns.unwrap_or(DEFAULT_HISTORY_TURNS),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.unwrap_or(default_retry.max_attempts),
                base_delay: retry
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_retry.base_delay),
            },
            debug: Self::resolve_env_bool(yaml.debug, "DEBUG_KG"),
        }
    }

    /// Synthesizer settings derived from this config.
    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            retry: self.retry,
            history_turns: self.history_turns,
            debug: self.debug,
        }
    }
}
