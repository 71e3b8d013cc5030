//! Integration tests for knowledge_graph_api library
//!
//! These tests verify the public API and module interactions over the
//! in-memory graph fixture, stub generators and a mocked Gemini endpoint.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::io::Write;

use knowledge_graph_api::{
    config::Config,
    error::{Error, Result},
    search::SearchConfig,
    server::{serve_listener, AppState, ServerOptions},
    service::ServiceSettings,
    synthesizer::{AnswerSource, SynthesizerConfig},
    AnswerSynthesizer, AskRequest, ConversationTurn, GeminiClient, GraphSearchEngine,
    InMemoryGraph, InMemorySessionStore, KnowledgeService, RetryPolicy, SearchTier,
    SessionStore, TextGenerator, NO_RESULTS_SENTINEL,
};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/compliance_graph.json")
}

fn fixture_graph() -> Arc<InMemoryGraph> {
    Arc::new(InMemoryGraph::from_json_file(fixture_path()).expect("fixture loads"))
}

/// Records every prompt and answers with a fixed string.
#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Recorded answer".to_string())
    }
}

fn fast_synthesizer(generator: Option<Arc<dyn TextGenerator>>) -> AnswerSynthesizer {
    AnswerSynthesizer::new(
        generator,
        SynthesizerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        },
    )
}

fn service_with(
    sessions: Arc<dyn SessionStore>,
    search: SearchConfig,
    generator: Option<Arc<dyn TextGenerator>>,
) -> KnowledgeService {
    KnowledgeService::new(
        sessions,
        GraphSearchEngine::new(fixture_graph(), search),
        fast_synthesizer(generator),
        ServiceSettings::default(),
    )
}

// ============================================================================
// Search Tests
// ============================================================================

#[tokio::test]
async fn fulltext_tier_answers_when_index_exists() {
    let engine = GraphSearchEngine::new(fixture_graph(), SearchConfig::default());

    let outcome = engine.search("power usage effectiveness", 10, 0.3).await;

    assert_eq!(outcome.tier, Some(SearchTier::Fulltext));
    assert_eq!(outcome.entities.len(), 1);
    assert_eq!(outcome.entities[0].display_title(), "ISO/IEC 30134-2");
    assert!(outcome.entities[0].score > 0.3);

    assert_eq!(outcome.relationships.len(), 1);
    assert_eq!(outcome.relationships[0].source_id, "iso30134-2");
    assert_eq!(outcome.relationships[0].relationship, "REFERENCES");
    assert_eq!(outcome.relationships[0].target_name, "Energy Efficiency Directive");
}

#[tokio::test]
async fn keyword_tier_runs_without_fulltext_index() {
    let config = SearchConfig {
        fulltext_index: "missing_index".to_string(),
        ..Default::default()
    };
    let engine = GraphSearchEngine::new(fixture_graph(), config);

    let outcome = engine.search("cooling", 10, 0.3).await;

    assert_eq!(outcome.tier, Some(SearchTier::Keyword));
    assert_eq!(outcome.entities.len(), 1);
    assert_eq!(outcome.entities[0].display_title(), "Cooling best practices");
    assert_eq!(outcome.entities[0].score, 0.5);
    // Entity has no id, so nothing to expand.
    assert!(outcome.relationships.is_empty());
}

#[tokio::test]
async fn unmatched_query_is_a_valid_empty_outcome() {
    let engine = GraphSearchEngine::new(fixture_graph(), SearchConfig::default());

    let outcome = engine.search("xyz qqq", 10, 0.3).await;

    assert!(outcome.is_empty());
    assert_eq!(outcome.tier, None);
    assert!(outcome.relationships.is_empty());
}

// ============================================================================
// Service Tests
// ============================================================================

#[tokio::test]
async fn second_turn_replays_history_into_prompt() {
    let generator = Arc::new(RecordingGenerator::default());
    let service = service_with(
        Arc::new(InMemorySessionStore::default()),
        SearchConfig::default(),
        Some(generator.clone()),
    );

    let first = service.ask(AskRequest::new("What is PUE?")).await.unwrap();
    let session_id = first.query_details.session_id.clone();
    service
        .ask(AskRequest::new("Which directive references it?").with_session(session_id.clone()))
        .await
        .unwrap();

    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Previous conversation:"));
    assert!(prompts[1].contains("Previous conversation:\n\nQ1: What is PUE?\nA1: Recorded answer\n\n"));
    assert!(prompts[1].contains("Current User Question: Which directive references it?"));

    let turns = &service.list_conversations()[&session_id];
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].question, "Which directive references it?");
}

#[tokio::test]
async fn empty_search_sends_sentinel_to_generator() {
    let generator = Arc::new(RecordingGenerator::default());
    let service = service_with(
        Arc::new(InMemorySessionStore::default()),
        SearchConfig::default(),
        Some(generator.clone()),
    );

    let response = service.ask(AskRequest::new("xyz qqq")).await.unwrap();

    assert!(response.context.is_none());
    assert_eq!(response.query_details.total_results, 0);
    assert!(generator.prompts.lock().unwrap()[0].contains(NO_RESULTS_SENTINEL));
}

#[tokio::test]
async fn stale_sessions_are_swept_on_next_ask() {
    let store = Arc::new(InMemorySessionStore::default());
    store.touch("stale", Utc::now() - chrono::Duration::hours(2));
    store.append("stale", ConversationTurn::new("old", "answer"));
    store.touch("recent", Utc::now() - chrono::Duration::minutes(5));

    let service = service_with(store.clone(), SearchConfig::default(), None);
    let response = service.ask(AskRequest::new("cooling")).await.unwrap();

    let sessions = store.list_all();
    assert!(!sessions.contains_key("stale"));
    assert!(sessions.contains_key("recent"));
    assert!(sessions.contains_key(&response.query_details.session_id));
}

#[tokio::test]
async fn gemini_failures_fall_back_after_three_attempts() {
    let server = MockServer::start_async().await;
    let gemini_mock = server.mock(|when, then| {
        when.method(POST).path("/models/test-model:generateContent");
        then.status(500).body("internal");
    });

    let client = GeminiClient::new("secret", "test-model")
        .unwrap()
        .with_base_url(&server.base_url());
    let synthesizer = fast_synthesizer(Some(Arc::new(client)));
    let engine = GraphSearchEngine::new(fixture_graph(), SearchConfig::default());
    let outcome = engine.search("energy efficiency directive", 10, 0.3).await;
    let context = knowledge_graph_api::format_context(&outcome.entities, &outcome.relationships, 5);

    let synthesis = synthesizer
        .synthesize("energy efficiency directive", &context, &[], &outcome.entities)
        .await
        .unwrap();

    gemini_mock.assert_calls(3);
    assert_eq!(synthesis.source, AnswerSource::Fallback);
    assert!(synthesis
        .answer
        .contains("However, I found these relevant items in the Knowledge Graph:"));
    assert!(synthesis.answer.contains("1. Energy Efficiency Directive: EU directive"));
}

#[tokio::test]
async fn gemini_answer_is_returned_verbatim() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/models/test-model:generateContent");
        then.status(200).json_body(json!({
            "candidates": [{"content": {"parts": [{"text": "EN 50600 covers data centres. (Source: EN 50600)"}]}}]
        }));
    });

    let client = GeminiClient::new("secret", "test-model")
        .unwrap()
        .with_base_url(&server.base_url());
    let service = service_with(
        Arc::new(InMemorySessionStore::default()),
        SearchConfig::default(),
        Some(Arc::new(client)),
    );

    let response = service.ask(AskRequest::new("EN 50600")).await.unwrap();
    assert_eq!(response.answer, "EN 50600 covers data centres. (Source: EN 50600)");
}

#[tokio::test]
async fn generation_health_checks_drive_status() {
    let server = MockServer::start_async().await;
    let startup_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/models/test-model:generateContent")
            .header("x-goog-api-key", "secret")
            .body_includes("Hello, this is a test");
        then.status(200).json_body(json!({
            "candidates": [{"content": {"parts": [{"text": "Hello!"}]}}]
        }));
    });
    let sample_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/models/test-model:generateContent")
            .body_includes("What is ISO 14001?");
        then.status(503).body("overloaded");
    });

    let client = GeminiClient::new("secret", "test-model")
        .unwrap()
        .with_base_url(&server.base_url());
    let service = service_with(
        Arc::new(InMemorySessionStore::default()),
        SearchConfig::default(),
        Some(Arc::new(client)),
    );

    assert!(service.verify_generation().await);
    startup_mock.assert_calls(1);
    let status = service.status().gemini_status;
    assert!(status.configured);
    assert!(status.model_api_working);
    assert_eq!(status.model.as_deref(), Some("test-model"));

    let check = service.test_generation().await;
    sample_mock.assert_calls(3);
    let body = serde_json::to_value(&check).unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["attempts"], 3);
    assert!(body["message"].as_str().unwrap().contains("503"));
    assert!(!service.status().gemini_status.model_api_working);
}

// ============================================================================
// Config Tests
// ============================================================================

#[tokio::test]
async fn service_builds_from_yaml_config() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(
        br#"
gemini:
  base_url: "http://127.0.0.1:9"
search:
  context_entities: 1
sessions:
  expiry_secs: 120
retry:
  max_attempts: 1
  base_delay_ms: 1
"#,
    )
    .unwrap();

    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.session_expiry_secs, 120);

    let service = KnowledgeService::from_config(&config, fixture_graph()).unwrap();
    let response = service.ask(AskRequest::new("data centre")).await.unwrap();

    assert_eq!(response.query_details.total_results, 2);
    assert_eq!(response.context.map(|c| c.len()), Some(1));
}

#[test]
fn fixture_load_errors_are_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();

    let err = InMemoryGraph::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

// ============================================================================
// HTTP Tests
// ============================================================================

#[tokio::test]
async fn http_round_trip_over_tcp() {
    let service = service_with(
        Arc::new(InMemorySessionStore::default()),
        SearchConfig::default(),
        Some(Arc::new(RecordingGenerator::default())),
    );
    let state = Arc::new(AppState::new(
        service,
        ServerOptions {
            expose_conversations: true,
            cors_origins: vec!["*".to_string()],
        },
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve_listener(listener, state, async {
        let _ = stop_rx.await;
    }));

    let base = format!("http://{}", addr);
    let http = reqwest::Client::new();

    let asked: Value = http
        .post(format!("{}/ask", base))
        .json(&json!({"query": "power usage effectiveness", "session_id": "s-1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(asked["answer"], "Recorded answer");
    assert_eq!(asked["query_details"]["session_id"], "s-1");
    assert_eq!(asked["query_details"]["relationships_found"], 1);

    let conversations: Value = http
        .get(format!("{}/conversations", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conversations["s-1"][0]["answer"], "Recorded answer");

    let explored = http
        .get(format!("{}/explore?limit=2", base))
        .header("Origin", "https://frontend.example")
        .send()
        .await
        .unwrap();
    assert_eq!(
        explored.headers()["access-control-allow-origin"],
        "https://frontend.example"
    );
    let explored: Value = explored.json().await.unwrap();
    assert!(explored["entity_types"].as_array().unwrap().len() <= 2);
    assert_eq!(explored["keyword"], Value::Null);

    let deleted = http
        .delete(format!("{}/conversations/s-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let missing = http
        .delete(format!("{}/conversations/s-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["detail"], "Conversation s-1 not found");

    let metrics = http
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("kg_api_request_total"));
    assert!(metrics.contains("kg_api_search_tier_total"));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
