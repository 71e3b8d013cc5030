//! Tiered graph search: fulltext index → keyword match → label match.
//!
//! Each tier runs only when the previous one produced no entities. Tier
//! failures are logged and treated as empty so a broken index never fails
//! the request. After any tier succeeds, first-degree relationships are
//! fetched for the top-ranked entities.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::graph::GraphBackend;
use crate::model::{Entity, Relationship};

/// Score assigned to keyword-tier matches (the tier does not rank).
pub const KEYWORD_SCORE: f64 = 0.5;
/// Score assigned to label-tier matches.
pub const LABEL_SCORE: f64 = 0.3;

/// Domain vocabulary added to the keyword terms when it occurs in the query.
pub const COMPLIANCE_TERMS: [&str; 22] = [
    "iso",
    "standard",
    "regulation",
    "compliance",
    "requirement",
    "directive",
    "law",
    "policy",
    "certification",
    "audit",
    "assessment",
    "cooling",
    "efficiency",
    "energy",
    "sustainability",
    "environment",
    "taxonomy",
    "documentation",
    "esg",
    "carbon",
    "emissions",
    "waste",
];

/// Query substrings mapped to the labels searched by the label tier.
const LABEL_HINTS: [(&[&str], &[&str]); 3] = [
    (&["cooling", "data center"], &["EnergySaving", "Standard", "ISO"]),
    (&["compliance"], &["Compliance", "Standard", "Regulation"]),
    (&["environment", "sustainability"], &["Environment", "ESG", "Standard"]),
];

/// Which tier produced the entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    Fulltext,
    Keyword,
    Label,
}

impl SearchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTier::Fulltext => "fulltext",
            SearchTier::Keyword => "keyword",
            SearchTier::Label => "label",
        }
    }
}

impl fmt::Display for SearchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for the search engine.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Name of the fulltext index probed by the first tier
    pub fulltext_index: String,
    /// Number of top entities whose relationships are expanded
    pub relationship_seeds: usize,
    /// Global cap on relationship records
    pub relationship_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fulltext_index: "entities".to_string(),
            relationship_seeds: 3,
            relationship_limit: 20,
        }
    }
}

/// Result of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Tier that produced the entities; `None` when nothing was found
    pub tier: Option<SearchTier>,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Fallback-chain search over any graph backend.
pub struct GraphSearchEngine {
    backend: Arc<dyn GraphBackend>,
    config: SearchConfig,
}

impl GraphSearchEngine {
    pub fn new(backend: Arc<dyn GraphBackend>, config: SearchConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    /// Run the tier chain and expand relationships for the winners.
    pub async fn search(&self, query_text: &str, max_results: usize, threshold: f64) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();

        let fulltext = self.fulltext_tier(query_text, max_results, threshold).await;
        if !fulltext.is_empty() {
            outcome.tier = Some(SearchTier::Fulltext);
            outcome.entities = fulltext;
        } else {
            info!("Trying enhanced keyword search");
            let keyword = self.keyword_tier(query_text, max_results).await;
            if !keyword.is_empty() {
                outcome.tier = Some(SearchTier::Keyword);
                outcome.entities = keyword;
            } else {
                info!("Trying broader search");
                let label = self.label_tier(query_text, max_results).await;
                if !label.is_empty() {
                    outcome.tier = Some(SearchTier::Label);
                    outcome.entities = label;
                }
            }
        }

        if !outcome.entities.is_empty() {
            outcome.relationships = self.expand_relationships(&outcome.entities).await;
            log_found(&outcome.entities);
        }

        outcome
    }

    async fn fulltext_tier(&self, query_text: &str, max_results: usize, threshold: f64) -> Vec<Entity> {
        let index = &self.config.fulltext_index;
        match self.backend.has_fulltext_index(index).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("No fulltext index named '{}' was found", index);
                return Vec::new();
            }
            Err(err) => {
                warn!("Error in fulltext search: {}. Falling back to keyword search", err);
                return Vec::new();
            }
        }

        match self
            .backend
            .fulltext_search(index, query_text, threshold, max_results)
            .await
        {
            Ok(mut entities) => {
                // Backends already filter and order; enforce the contract anyway.
                entities.retain(|e| e.score > threshold);
                entities.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                entities.truncate(max_results);
                info!("Fulltext search found {} results", entities.len());
                entities
            }
            Err(err) => {
                warn!("Error in fulltext search: {}. Falling back to keyword search", err);
                Vec::new()
            }
        }
    }

    async fn keyword_tier(&self, query_text: &str, max_results: usize) -> Vec<Entity> {
        let terms = keyword_terms(query_text);
        info!("Search terms: {:?}", terms);

        match self.backend.keyword_search(&terms, max_results).await {
            Ok(entities) => {
                let entities = with_flat_score(entities, KEYWORD_SCORE, max_results);
                info!("Enhanced keyword search found {} results", entities.len());
                entities
            }
            Err(err) => {
                warn!("Error in keyword search: {}", err);
                Vec::new()
            }
        }
    }

    async fn label_tier(&self, query_text: &str, max_results: usize) -> Vec<Entity> {
        let labels = label_candidates(query_text);
        if labels.is_empty() {
            debug!("No label hints in query; broader search skipped");
            return Vec::new();
        }

        match self.backend.label_search(&labels, max_results).await {
            Ok(entities) => {
                let entities = with_flat_score(entities, LABEL_SCORE, max_results);
                info!("Broader search found {} results", entities.len());
                entities
            }
            Err(err) => {
                warn!("Error in broader search: {}", err);
                Vec::new()
            }
        }
    }

    async fn expand_relationships(&self, entities: &[Entity]) -> Vec<Relationship> {
        let seed_ids: Vec<String> = entities
            .iter()
            .take(self.config.relationship_seeds)
            .filter_map(Entity::id)
            .collect();
        if seed_ids.is_empty() {
            return Vec::new();
        }

        match self
            .backend
            .relationships(&seed_ids, self.config.relationship_limit)
            .await
        {
            Ok(mut relationships) => {
                relationships.truncate(self.config.relationship_limit);
                info!("Found {} relationships", relationships.len());
                relationships
            }
            Err(err) => {
                warn!("Error fetching relationships: {}", err);
                Vec::new()
            }
        }
    }
}

fn with_flat_score(entities: Vec<Entity>, score: f64, max_results: usize) -> Vec<Entity> {
    entities
        .into_iter()
        .take(max_results)
        .map(|e| Entity { score, ..e })
        .collect()
}

fn log_found(entities: &[Entity]) {
    let titles: Vec<String> = entities.iter().take(5).map(Entity::display_title).collect();
    info!("Found nodes with titles: {:?}", titles);

    let mut types: Vec<&str> = entities
        .iter()
        .flat_map(|e| e.labels.iter().map(String::as_str))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    types.sort_unstable();
    info!("Entity types found: {:?}", types);
}

/// Keyword-tier terms: the full lowercased query, its words longer than three
/// characters, and any compliance vocabulary it contains. Deduplicated in
/// first-seen order.
pub fn keyword_terms(query_text: &str) -> Vec<String> {
    let lowered = query_text.to_lowercase();
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    let candidates = std::iter::once(lowered.clone())
        .chain(
            lowered
                .split_whitespace()
                .filter(|w| w.chars().count() > 3)
                .map(str::to_string),
        )
        .chain(
            COMPLIANCE_TERMS
                .iter()
                .filter(|t| lowered.contains(*t))
                .map(|t| t.to_string()),
        );

    for term in candidates {
        if seen.insert(term.clone()) {
            terms.push(term);
        }
    }
    terms
}

/// Labels searched by the label tier, deduplicated in first-seen order.
pub fn label_candidates(query_text: &str) -> Vec<String> {
    let lowered = query_text.to_lowercase();
    let mut labels: Vec<String> = Vec::new();

    for (hints, mapped) in LABEL_HINTS {
        if hints.iter().any(|h| lowered.contains(h)) {
            for label in mapped {
                if !labels.iter().any(|l| l == label) {
                    labels.push(label.to_string());
                }
            }
        }
    }
    labels
}
