//! Answer synthesis: prompt assembly, bounded retries against the generation
//! backend, and a deterministic fallback built from retrieved entities.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::KnowledgeContext;
use crate::error::{Error, Result};
use crate::model::{ConversationTurn, Entity};
use crate::prompts::{render_template, Prompt};

/// Entities listed in the fallback answer.
const FALLBACK_ENTITIES: usize = 5;
/// Context characters included in the debug block.
const DEBUG_CONTEXT_SAMPLE: usize = 500;

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend/model name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Bounded retry with exponential backoff: the wait after failed attempt `n`
/// (0-based) is `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// How the answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Generated { attempts: u32 },
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub answer: String,
    pub source: AnswerSource,
}

/// Outcome of a direct call to the generation backend, outside any question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationCheck {
    Success {
        model: String,
        response: String,
        response_length: usize,
        attempts: u32,
    },
    Error {
        message: String,
        attempts: u32,
    },
}

impl GenerationCheck {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationCheck::Success { .. })
    }
}

/// Synthesizer settings.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub retry: RetryPolicy,
    /// Most recent turns replayed into the prompt
    pub history_turns: usize,
    /// Append a debug block to generated answers
    pub debug: bool,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            history_turns: 10,
            debug: false,
        }
    }
}

pub struct AnswerSynthesizer {
    generator: Option<Arc<dyn TextGenerator>>,
    config: SynthesizerConfig,
    template: String,
    fallback_preamble: String,
}

impl AnswerSynthesizer {
    /// `generator = None` means generation is unconfigured; every answer is
    /// the fallback.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: SynthesizerConfig) -> Self {
        Self {
            generator,
            config,
            template: Prompt::KnowledgeGraphAnswer.load_or_builtin(),
            fallback_preamble: Prompt::FallbackPreamble.load_or_builtin(),
        }
    }

    /// Replace the prompt template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn is_generation_configured(&self) -> bool {
        self.generator.is_some()
    }

    pub fn generator_name(&self) -> Option<&str> {
        self.generator.as_deref().map(|g| g.name())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry
    }

    /// Send `prompt` straight to the backend under `policy`.
    pub async fn check_generation(&self, prompt: &str, policy: RetryPolicy) -> GenerationCheck {
        let Some(generator) = &self.generator else {
            return GenerationCheck::Error {
                message: "Text generation is not configured".to_string(),
                attempts: 0,
            };
        };

        match generate_with_retry(generator.as_ref(), prompt, policy).await {
            Ok((response, attempts)) => {
                info!(
                    "Generation check via {} succeeded after {} attempt(s), {} chars",
                    generator.name(),
                    attempts,
                    response.len()
                );
                GenerationCheck::Success {
                    model: generator.name().to_string(),
                    response_length: response.chars().count(),
                    response,
                    attempts,
                }
            }
            Err((err, attempts)) => {
                error!("Generation check via {} failed: {}", generator.name(), err);
                GenerationCheck::Error {
                    message: err.to_string(),
                    attempts,
                }
            }
        }
    }

    /// Answer `query` from the formatted context and prior turns.
    ///
    /// Generation failures never surface: after the retry budget is spent
    /// the fallback answer is returned. Errors only on an empty query.
    pub async fn synthesize(
        &self,
        query: &str,
        context: &KnowledgeContext,
        history: &[ConversationTurn],
        entities: &[Entity],
    ) -> Result<Synthesis> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("query must not be empty".to_string()));
        }

        let fallback = self.fallback_answer(context.has_results(), entities);

        let Some(generator) = &self.generator else {
            info!("Text generation is not configured; using fallback answer");
            return Ok(Synthesis {
                answer: fallback,
                source: AnswerSource::Fallback,
            });
        };

        let prompt = self.build_prompt(query, context, history);
        info!(
            "Sending to {} with context length: {} chars",
            generator.name(),
            context.render().len()
        );

        match generate_with_retry(generator.as_ref(), &prompt, self.config.retry).await {
            Ok((text, attempts)) => {
                info!("Raw response length: {}", text.len());
                let mut answer = text;
                if self.config.debug {
                    answer.push_str(&debug_block(context, entities));
                }
                info!("Final answer length: {}", answer.len());
                Ok(Synthesis {
                    answer,
                    source: AnswerSource::Generated { attempts },
                })
            }
            Err((err, _)) => {
                error!("All generation attempts failed: {}", err);
                info!("Using fallback answer");
                Ok(Synthesis {
                    answer: fallback,
                    source: AnswerSource::Fallback,
                })
            }
        }
    }

    /// Full prompt text for a query.
    pub fn build_prompt(
        &self,
        query: &str,
        context: &KnowledgeContext,
        history: &[ConversationTurn],
    ) -> String {
        let history_block = history_block(history, self.config.history_turns);
        render_template(
            &self.template,
            &[
                ("history", &history_block),
                ("question", query),
                ("context", context.render()),
            ],
        )
    }

    /// Generation-free answer listing the top entities.
    pub fn fallback_answer(&self, has_kg_data: bool, entities: &[Entity]) -> String {
        let mut answer = format!("{}\n\n", self.fallback_preamble.trim_end());
        if has_kg_data && !entities.is_empty() {
            answer.push_str("However, I found these relevant items in the Knowledge Graph:\n\n");
            for (i, entity) in entities.iter().take(FALLBACK_ENTITIES).enumerate() {
                answer.push_str(&format!(
                    "{}. {}: {}\n\n",
                    i + 1,
                    entity.display_title(),
                    entity.summary_text()
                ));
            }
        }
        answer
    }
}

/// "Previous conversation" block replaying the last `max_turns` turns.
/// Numbering is absolute, so a capped replay starts above 1.
pub fn history_block(history: &[ConversationTurn], max_turns: usize) -> String {
    if history.is_empty() || max_turns == 0 {
        return String::new();
    }

    let skip = history.len().saturating_sub(max_turns);
    if skip > 0 {
        info!("Replaying last {} of {} previous Q&A pairs", max_turns, history.len());
    } else {
        info!("Including {} previous Q&A pairs in prompt", history.len());
    }

    let mut block = String::from("Previous conversation:\n\n");
    for (i, turn) in history.iter().enumerate().skip(skip) {
        block.push_str(&format!("Q{}: {}\n", i + 1, turn.question));
        block.push_str(&format!("A{}: {}\n\n", i + 1, turn.answer));
    }
    block
}

fn debug_block(context: &KnowledgeContext, entities: &[Entity]) -> String {
    let mut info = String::from("\n\n---DEBUG INFO---\n");
    info.push_str(&format!("Found {} total nodes in KG query\n", entities.len()));
    let titles: Vec<String> = entities.iter().take(5).map(Entity::display_title).collect();
    info.push_str(&format!("Node titles: {:?}\n", titles));
    if !entities.is_empty() {
        let types: BTreeSet<&str> = entities
            .iter()
            .flat_map(|e| e.labels.iter().map(String::as_str))
            .collect();
        info.push_str(&format!("Entity types: {:?}\n", types));
    }

    let rendered = context.render();
    if rendered.len() > 100 {
        let sample: String = rendered.chars().take(DEBUG_CONTEXT_SAMPLE).collect();
        let ellipsis = if rendered.chars().count() > DEBUG_CONTEXT_SAMPLE { "..." } else { "" };
        info.push_str(&format!("\nSample of context sent to generator:\n{}{}\n", sample, ellipsis));
    }
    info
}

/// Call `generator` until it succeeds or `policy` runs out. Returns the text
/// or the last error, each with the number of attempts made.
async fn generate_with_retry(
    generator: &dyn TextGenerator,
    prompt: &str,
    policy: RetryPolicy,
) -> std::result::Result<(String, u32), (Error, u32)> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        info!("Using {} (attempt {})", generator.name(), attempt + 1);
        match generator.generate(prompt).await {
            Ok(text) => return Ok((text, attempt + 1)),
            Err(err) if attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Generation error (attempt {}): {}; retrying in {:?}",
                    attempt + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err((err, attempt + 1)),
        }
    }
}
