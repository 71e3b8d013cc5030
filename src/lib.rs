//! Knowledge Graph Q&A Service Library
//!
//! This library provides tools to:
//! - Search a property graph with a fulltext → keyword → label fallback chain
//! - Format retrieved entities and relationships into prompt context
//! - Synthesize answers with a text generation backend, retries and a fallback
//! - Keep per-session conversation history with idle expiry
//! - Serve all of the above over HTTP with Prometheus metrics

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod integrations;
pub mod metrics;
pub mod model;
pub mod prompts;
pub mod search;
pub mod server;
pub mod service;
pub mod session;
pub mod synthesizer;

// Re-export common types
pub use config::Config;
pub use context::{format_context, KnowledgeContext, NO_RESULTS_SENTINEL};
pub use error::{Error, Result};
pub use graph::{GraphBackend, InMemoryGraph, Neo4jGraph};
pub use integrations::GeminiClient;
pub use model::{AskRequest, AskResponse, ConversationTurn, Entity, ExploreResponse, Relationship};
pub use prompts::{load_prompt, Prompt};
pub use search::{GraphSearchEngine, SearchOutcome, SearchTier};
pub use service::{GenerationStatus, KnowledgeService};
pub use session::{InMemorySessionStore, SessionStore};
pub use synthesizer::{AnswerSynthesizer, GenerationCheck, RetryPolicy, Synthesis, TextGenerator};
