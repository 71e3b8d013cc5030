use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::GraphBackend;
use crate::error::{Error, Result};
use crate::model::{Entity, Relationship, TypeCount};

/// Properties consulted by keyword matching.
const KEYWORD_FIELDS: [&str; 4] = ["title", "name", "description", "content"];
/// Properties consulted by the fulltext index.
const FULLTEXT_FIELDS: [&str; 6] = ["title", "name", "description", "content", "definition", "code"];

/// Directed edge between two node ids.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub relation: String,
}

/// Lightweight property graph (in-memory).
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraph {
    nodes: Vec<Entity>,
    edges: Vec<Edge>,
    fulltext_index: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    fulltext_index: Option<String>,
    #[serde(default)]
    nodes: Vec<FixtureNode>,
    #[serde(default)]
    edges: Vec<FixtureEdge>,
}

#[derive(Debug, Deserialize)]
struct FixtureNode {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FixtureEdge {
    source: String,
    #[serde(rename = "type")]
    relation: String,
    target: String,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load nodes and edges from a JSON fixture:
    /// `{"fulltext_index": "entities", "nodes": [{"labels": [..], "properties": {..}}],
    ///   "edges": [{"source": id, "type": "REL", "target": id}]}`
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let graph = Self::from_json_str(&content)?;
        info!(
            "Loaded in-memory graph from {}: {} nodes, {} edges",
            path.as_ref().display(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(content)?;
        let mut graph = Self::new();
        graph.fulltext_index = fixture.fulltext_index;
        for node in fixture.nodes {
            graph.add_node(node.labels, node.properties);
        }
        for edge in fixture.edges {
            graph.add_edge(&edge.source, &edge.relation, &edge.target);
        }
        Ok(graph)
    }

    /// Enable a fulltext index under the given name.
    pub fn with_fulltext_index(mut self, name: &str) -> Self {
        self.fulltext_index = Some(name.to_string());
        self
    }

    pub fn add_node(&mut self, labels: Vec<String>, properties: Map<String, Value>) -> &mut Self {
        self.nodes.push(Entity::new(labels, properties, 0.0));
        self
    }

    pub fn add_edge(&mut self, from: &str, relation: &str, to: &str) -> &mut Self {
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            relation: relation.to_string(),
        });
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn node_by_id(&self, id: &str) -> Option<&Entity> {
        self.nodes.iter().find(|n| n.id().as_deref() == Some(id))
    }

    fn lowered(node: &Entity, fields: &[&str]) -> Vec<String> {
        fields
            .iter()
            .filter_map(|f| node.properties.get(*f))
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            })
            .collect()
    }

    /// Share of query tokens found in the node's text fields.
    fn fulltext_score(node: &Entity, tokens: &[String]) -> f64 {
        if tokens.is_empty() {
            return 0.0;
        }
        let haystack = Self::lowered(node, &FULLTEXT_FIELDS);
        let hits = tokens
            .iter()
            .filter(|t| haystack.iter().any(|h| h.contains(t.as_str())))
            .count();
        hits as f64 / tokens.len() as f64
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

fn histogram(keys: impl Iterator<Item = String>, limit: usize) -> Vec<TypeCount> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut buckets: Vec<TypeCount> = counts
        .into_iter()
        .map(|(kind, count)| TypeCount { kind, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));
    buckets.truncate(limit);
    buckets
}

#[async_trait]
impl GraphBackend for InMemoryGraph {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has_fulltext_index(&self, index: &str) -> Result<bool> {
        Ok(self.fulltext_index.as_deref() == Some(index))
    }

    async fn fulltext_search(
        &self,
        index: &str,
        query_text: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        if self.fulltext_index.as_deref() != Some(index) {
            return Err(Error::Graph(format!("There is no such fulltext schema index: {index}")));
        }

        let tokens = tokenize(query_text);
        let mut scored: Vec<Entity> = self
            .nodes
            .iter()
            .filter_map(|node| {
                let score = Self::fulltext_score(node, &tokens);
                (score > threshold).then(|| Entity {
                    score,
                    ..node.clone()
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<Entity>> {
        Ok(self
            .nodes
            .iter()
            .filter(|node| {
                let fields = Self::lowered(node, &KEYWORD_FIELDS);
                terms
                    .iter()
                    .any(|term| fields.iter().any(|f| f.contains(term.as_str())))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn label_search(&self, labels: &[String], limit: usize) -> Result<Vec<Entity>> {
        Ok(self
            .nodes
            .iter()
            .filter(|node| labels.iter().any(|l| node.has_label(l)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn relationships(&self, node_ids: &[String], limit: usize) -> Result<Vec<Relationship>> {
        let wanted: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        let mut relationships = Vec::new();

        for edge in &self.edges {
            // Undirected match: each endpoint in the id set yields one record.
            for (source, neighbour) in [(&edge.from, &edge.to), (&edge.to, &edge.from)] {
                if relationships.len() >= limit {
                    return Ok(relationships);
                }
                if !wanted.contains(source.as_str()) {
                    continue;
                }
                let target = self.node_by_id(neighbour);
                relationships.push(Relationship {
                    source_id: source.clone(),
                    relationship: edge.relation.clone(),
                    target_id: target.and_then(Entity::id),
                    target_name: target
                        .and_then(|t| t.text("name").or_else(|| t.text("title")))
                        .unwrap_or_default(),
                    target_labels: target.map(|t| t.labels.clone()).unwrap_or_default(),
                });
            }
        }

        Ok(relationships)
    }

    async fn entity_types(&self, keyword: Option<&str>, limit: usize) -> Result<Vec<TypeCount>> {
        let keyword = keyword.map(str::to_lowercase);
        let keys = self
            .nodes
            .iter()
            .filter(|node| match &keyword {
                Some(k) => Self::lowered(node, &["name", "title"])
                    .iter()
                    .any(|f| f.contains(k.as_str())),
                None => true,
            })
            .map(|node| node.primary_label().to_string());
        Ok(histogram(keys, limit))
    }

    async fn relationship_types(&self, limit: usize) -> Result<Vec<TypeCount>> {
        Ok(histogram(self.edges.iter().map(|e| e.relation.clone()), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn sample() -> InMemoryGraph {
        let mut graph = InMemoryGraph::new().with_fulltext_index("entities");
        graph
            .add_node(
                vec!["Standard".into()],
                props(json!({"id": "en50600", "name": "EN 50600", "description": "Data centre facilities and infrastructures"})),
            )
            .add_node(
                vec!["ISO".into(), "Standard".into()],
                props(json!({"id": "iso14001", "title": "ISO 14001", "content": "Environmental management systems"})),
            )
            .add_node(vec!["Regulation".into()], props(json!({"name": "EU Taxonomy"})))
            .add_edge("en50600", "REFERENCES", "iso14001");
        graph
    }

    #[tokio::test]
    async fn fulltext_ranks_by_token_overlap() {
        let graph = sample();
        let hits = graph
            .fulltext_search("entities", "environmental management", 0.3, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_title(), "ISO 14001");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fulltext_on_missing_index_errors() {
        let graph = InMemoryGraph::new();
        assert!(!graph.has_fulltext_index("entities").await.unwrap());
        assert!(graph.fulltext_search("entities", "x", 0.0, 5).await.is_err());
    }

    #[tokio::test]
    async fn keyword_search_matches_any_term() {
        let graph = sample();
        let hits = graph
            .keyword_search(&["taxonomy".into(), "nothing".into()], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_title(), "EU Taxonomy");
    }

    #[tokio::test]
    async fn label_search_respects_limit() {
        let graph = sample();
        let hits = graph.label_search(&["Standard".into()], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_title(), "EN 50600");
    }

    #[tokio::test]
    async fn relationships_are_undirected() {
        let graph = sample();
        let rels = graph.relationships(&["iso14001".into()], 20).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].source_id, "iso14001");
        assert_eq!(rels[0].target_name, "EN 50600");
        assert_eq!(rels[0].target_labels, vec!["Standard".to_string()]);
    }

    #[tokio::test]
    async fn histograms_count_primary_labels_and_edges() {
        let graph = sample();
        let types = graph.entity_types(None, 20).await.unwrap();
        assert_eq!(types.len(), 3);

        let filtered = graph.entity_types(Some("iso"), 20).await.unwrap();
        assert_eq!(filtered, vec![TypeCount { kind: "ISO".into(), count: 1 }]);

        let rels = graph.relationship_types(20).await.unwrap();
        assert_eq!(rels, vec![TypeCount { kind: "REFERENCES".into(), count: 1 }]);
    }

    #[test]
    fn loads_fixture_json() {
        let graph = InMemoryGraph::from_json_str(
            r#"{
                "fulltext_index": "entities",
                "nodes": [
                    {"labels": ["Standard"], "properties": {"id": "a", "name": "A"}},
                    {"labels": [], "properties": {"id": "b"}}
                ],
                "edges": [{"source": "a", "type": "RELATES_TO", "target": "b"}]
            }"#,
        )
        .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes[1].primary_label(), "Entity");
    }

    #[test]
    fn loads_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, r#"{"nodes": [{"labels": ["ESG"], "properties": {"name": "x"}}]}"#)
            .unwrap();

        let graph = InMemoryGraph::from_json_file(&path).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.fulltext_index.is_none());
    }

    #[test]
    fn tokenize_dedupes_and_lowercases() {
        assert_eq!(tokenize("PUE, pue and ISO/IEC"), vec!["pue", "and", "iso", "iec"]);
    }
}
