//! Request orchestration: one `ask` runs session bookkeeping, graph search,
//! context formatting and answer synthesis, then records the turn.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, GeminiSettings};
use crate::context::{format_context, DEFAULT_CONTEXT_ENTITIES};
use crate::error::{Error, Result};
use crate::graph::GraphBackend;
use crate::integrations::GeminiClient;
use crate::metrics;
use crate::model::{AskRequest, AskResponse, ConversationTurn, ExploreResponse, QueryDetails};
use crate::search::GraphSearchEngine;
use crate::session::{InMemorySessionStore, SessionStore};
use crate::synthesizer::{AnswerSource, AnswerSynthesizer, GenerationCheck, RetryPolicy, TextGenerator};

pub const SERVICE_NAME: &str = "Knowledge Graph API";
pub const DEFAULT_EXPLORE_LIMIT: usize = 20;
/// Prompt sent once at startup.
pub const STARTUP_CHECK_PROMPT: &str = "Hello, this is a test";
/// Prompt sent by `GET /test-gemini`.
pub const HEALTH_CHECK_PROMPT: &str = "What is ISO 14001?";

/// Per-request defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSettings {
    pub max_results: usize,
    pub threshold: f64,
    /// Entities rendered into the prompt and returned as `context`
    pub context_entities: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            threshold: 0.3,
            context_entities: DEFAULT_CONTEXT_ENTITIES,
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub service: String,
    pub graph_backend: String,
    pub gemini_status: GenerationStatus,
}

/// Generation backend state reported by `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    /// An API key is set
    pub configured: bool,
    /// The most recent direct call to the backend succeeded
    pub model_api_working: bool,
    pub model: Option<String>,
}

/// Body of `DELETE /conversations/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

pub struct KnowledgeService {
    sessions: Arc<dyn SessionStore>,
    search: GraphSearchEngine,
    synthesizer: AnswerSynthesizer,
    settings: ServiceSettings,
    model_api_working: AtomicBool,
}

impl KnowledgeService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        search: GraphSearchEngine,
        synthesizer: AnswerSynthesizer,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            sessions,
            search,
            synthesizer,
            settings,
            model_api_working: AtomicBool::new(false),
        }
    }

    /// Wire an in-memory session store, the search engine and the configured
    /// generator around `backend`.
    pub fn from_config(config: &Config, backend: Arc<dyn GraphBackend>) -> Result<Self> {
        let sessions = InMemorySessionStore::new(chrono::Duration::seconds(config.session_expiry_secs));
        let search = GraphSearchEngine::new(backend, config.search.engine_config());
        let synthesizer =
            AnswerSynthesizer::new(generator_from_config(&config.gemini)?, config.synthesizer_config());

        Ok(Self::new(
            Arc::new(sessions),
            search,
            synthesizer,
            ServiceSettings {
                max_results: config.search.max_results,
                threshold: config.search.threshold,
                context_entities: config.search.context_entities,
            },
        ))
    }

    /// Answer one question within a (possibly new) session.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidArgument("query must not be empty".to_string()));
        }

        let (session_id, history) = self.sessions.get_or_create(request.session_id.as_deref());
        let now = Utc::now();
        self.sessions.touch(&session_id, now);
        self.sessions.sweep(now);

        info!(
            "Processing query in session {}: '{}'",
            session_id,
            request.query.to_lowercase()
        );

        let max_results = request.max_results.unwrap_or(self.settings.max_results);
        let threshold = request.threshold.unwrap_or(self.settings.threshold);
        let outcome = self.search.search(&request.query, max_results, threshold).await;
        metrics::record_search_tier(outcome.tier);

        let context = format_context(
            &outcome.entities,
            &outcome.relationships,
            self.settings.context_entities,
        );

        let synthesis = self
            .synthesizer
            .synthesize(&request.query, &context, &history, &outcome.entities)
            .await?;
        if synthesis.source == AnswerSource::Fallback {
            metrics::record_fallback_answer();
        }

        self.sessions.append(
            &session_id,
            ConversationTurn::new(request.query.as_str(), synthesis.answer.as_str()),
        );
        info!("Final response length: {}", synthesis.answer.len());

        let total_results = outcome.entities.len();
        let relationships_found = outcome.relationships.len();
        let context_entities = if outcome.entities.is_empty() {
            None
        } else {
            let mut shown = outcome.entities;
            shown.truncate(self.settings.context_entities);
            Some(shown)
        };

        Ok(AskResponse {
            answer: synthesis.answer,
            context: context_entities,
            query_details: QueryDetails {
                total_results,
                relationships_found,
                session_id,
            },
        })
    }

    /// Entity-type histogram (optionally keyword-filtered) and relationship
    /// types.
    pub async fn explore(&self, keyword: Option<&str>, limit: usize) -> Result<ExploreResponse> {
        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());
        let backend = self.search.backend();
        let entity_types = backend.entity_types(keyword, limit).await?;
        let relationship_types = backend.relationship_types(limit).await?;

        Ok(ExploreResponse {
            entity_types,
            relationship_types,
            keyword: keyword.map(str::to_string),
        })
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "online".to_string(),
            service: SERVICE_NAME.to_string(),
            graph_backend: self.search.backend().name().to_string(),
            gemini_status: GenerationStatus {
                configured: self.synthesizer.is_generation_configured(),
                model_api_working: self.model_api_working.load(Ordering::Relaxed),
                model: self.synthesizer.generator_name().map(str::to_string),
            },
        }
    }

    /// One unretried call to the backend; the result feeds `status()`.
    pub async fn verify_generation(&self) -> bool {
        if !self.synthesizer.is_generation_configured() {
            return false;
        }
        let single = RetryPolicy {
            max_attempts: 1,
            ..self.synthesizer.retry_policy()
        };
        let check = self.synthesizer.check_generation(STARTUP_CHECK_PROMPT, single).await;
        self.record_generation_check(&check);
        if check.is_success() {
            info!("Generation backend test successful");
        }
        check.is_success()
    }

    /// Sample question through the backend with the configured retry policy.
    pub async fn test_generation(&self) -> GenerationCheck {
        let check = self
            .synthesizer
            .check_generation(HEALTH_CHECK_PROMPT, self.synthesizer.retry_policy())
            .await;
        self.record_generation_check(&check);
        check
    }

    fn record_generation_check(&self, check: &GenerationCheck) {
        self.model_api_working
            .store(check.is_success(), Ordering::Relaxed);
    }

    pub fn list_conversations(&self) -> BTreeMap<String, Vec<ConversationTurn>> {
        self.sessions.list_all()
    }

    pub fn delete_conversation(&self, session_id: &str) -> Result<DeleteResponse> {
        self.sessions.delete(session_id)?;
        info!("Deleted conversation {}", session_id);
        Ok(DeleteResponse {
            status: "success".to_string(),
            message: format!("Conversation {} deleted", session_id),
        })
    }
}

/// Gemini client when an API key is configured, `None` otherwise.
pub fn generator_from_config(settings: &GeminiSettings) -> Result<Option<Arc<dyn TextGenerator>>> {
    if !settings.is_configured() {
        warn!("No Gemini API key configured; answers will use the fallback template");
        return Ok(None);
    }

    let mut client =
        GeminiClient::new(settings.api_key.as_str(), &settings.model)?.with_settings(settings.generation);
    if let Some(base_url) = &settings.base_url {
        client = client.with_base_url(base_url);
    }
    info!("Text generation via Gemini model {}", settings.model);
    Ok(Some(Arc::new(client)))
}
