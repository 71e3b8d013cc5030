//! Property-graph backends.
//!
//! The search engine only talks to [`GraphBackend`]; every operation takes
//! its user-derived inputs (query text, term lists, labels, ids) as bound
//! parameters, never as query text.
//!
//! - [`Neo4jGraph`]: Neo4j over Bolt via `neo4rs`
//! - [`InMemoryGraph`]: in-process graph, loadable from a JSON fixture

pub mod memory;
pub mod neo4j;

pub use memory::InMemoryGraph;
pub use neo4j::Neo4jGraph;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Entity, Relationship, TypeCount};

/// Primitive graph operations used by search and exploration.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Short backend name for status output.
    fn name(&self) -> &'static str;

    /// Whether a fulltext index with this name exists.
    async fn has_fulltext_index(&self, index: &str) -> Result<bool>;

    /// Ranked fulltext matches with `score > threshold`, best first.
    async fn fulltext_search(
        &self,
        index: &str,
        query_text: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Nodes where any (lowercase) term is a substring of title, name,
    /// description or content.
    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<Entity>>;

    /// Nodes carrying at least one of the labels.
    async fn label_search(&self, labels: &[String], limit: usize) -> Result<Vec<Entity>>;

    /// Edges touching the given node ids, in either direction.
    async fn relationships(&self, node_ids: &[String], limit: usize) -> Result<Vec<Relationship>>;

    /// Primary-label histogram, optionally restricted by a name/title keyword.
    async fn entity_types(&self, keyword: Option<&str>, limit: usize) -> Result<Vec<TypeCount>>;

    /// Relationship type histogram.
    async fn relationship_types(&self, limit: usize) -> Result<Vec<TypeCount>>;
}
