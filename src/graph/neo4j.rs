//! Graph backend on Neo4j

use async_trait::async_trait;
use neo4rs::{query, BoltType, Graph, Query, Row};
use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use super::GraphBackend;
use crate::error::{Error, Result};
use crate::model::{Entity, Relationship, TypeCount, DEFAULT_LABEL};

const INDEX_EXISTS: &str = "SHOW INDEXES YIELD name, type
     WHERE type = 'FULLTEXT' AND name = $index_name
     RETURN count(*) AS index_count";

const FULLTEXT_SEARCH: &str =
    "CALL db.index.fulltext.queryNodes($index_name, $query_text) YIELD node, score
     WHERE score > $threshold
     RETURN properties(node) AS props, labels(node) AS labels, score
     ORDER BY score DESC
     LIMIT $limit";

const KEYWORD_SEARCH: &str = "MATCH (n)
     WHERE ANY(term IN $terms WHERE
         toLower(toString(n.title)) CONTAINS term OR
         toLower(toString(n.name)) CONTAINS term OR
         toLower(toString(n.description)) CONTAINS term OR
         toLower(toString(n.content)) CONTAINS term)
     RETURN properties(n) AS props, labels(n) AS labels
     LIMIT $limit";

const LABEL_SEARCH: &str = "MATCH (n)
     WHERE ANY(label IN labels(n) WHERE label IN $labels)
     RETURN properties(n) AS props, labels(n) AS labels
     LIMIT $limit";

const RELATIONSHIPS: &str = "MATCH (n)-[r]-(m)
     WHERE toString(n.id) IN $node_ids
     RETURN
         toString(n.id) AS source_id,
         type(r) AS relationship,
         toString(m.id) AS target_id,
         toString(COALESCE(m.name, m.title, '')) AS target_name,
         labels(m) AS target_labels
     LIMIT $limit";

const ENTITY_TYPES_ALL: &str = "MATCH (n)
     WITH labels(n)[0] AS entity_type, count(*) AS count
     RETURN entity_type, count
     ORDER BY count DESC
     LIMIT $limit";

const ENTITY_TYPES_BY_KEYWORD: &str = "MATCH (n)
     WHERE toLower(toString(n.name)) CONTAINS toLower($keyword) OR
           toLower(toString(n.title)) CONTAINS toLower($keyword)
     WITH labels(n)[0] AS entity_type, count(*) AS count
     RETURN entity_type, count
     ORDER BY count DESC
     LIMIT $limit";

const RELATIONSHIP_TYPES: &str = "MATCH ()-[r]->()
     RETURN type(r) AS relationship_type, count(*) AS count
     ORDER BY count DESC
     LIMIT $limit";

/// Neo4j-backed graph sharing one connection pool across requests.
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    /// Connect and verify the server answers.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to Neo4j at {uri}: {e}")))?;

        graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| Error::Connection(format!("Neo4j did not answer: {e}")))?;

        info!("Neo4j connection established successfully");
        Ok(Self { graph })
    }

    async fn rows(&self, q: Query) -> Result<Vec<Row>> {
        let mut result = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn entities(&self, q: Query, score: Option<f64>) -> Result<Vec<Entity>> {
        let rows = self.rows(q).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let score = match score {
                Some(s) => s,
                None => row.get::<f64>("score").map_err(decode_err)?,
            };
            entities.push(row_to_entity(&row, score)?);
        }
        Ok(entities)
    }

    async fn type_counts(&self, q: Query, key: &str) -> Result<Vec<TypeCount>> {
        let rows = self.rows(q).await?;
        rows.iter()
            .map(|row| {
                let kind = row
                    .get::<Option<String>>(key)
                    .map_err(decode_err)?
                    .unwrap_or_else(|| DEFAULT_LABEL.to_string());
                let count = row.get::<i64>("count").map_err(decode_err)?;
                Ok(TypeCount { kind, count })
            })
            .collect()
    }
}

#[async_trait]
impl GraphBackend for Neo4jGraph {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn has_fulltext_index(&self, index: &str) -> Result<bool> {
        let rows = self
            .rows(query(INDEX_EXISTS).param("index_name", index))
            .await?;
        let count = match rows.first() {
            Some(row) => row.get::<i64>("index_count").map_err(decode_err)?,
            None => 0,
        };
        Ok(count > 0)
    }

    async fn fulltext_search(
        &self,
        index: &str,
        query_text: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let q = query(FULLTEXT_SEARCH)
            .param("index_name", index)
            .param("query_text", query_text)
            .param("threshold", threshold)
            .param("limit", limit as i64);
        self.entities(q, None).await
    }

    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<Entity>> {
        let q = query(KEYWORD_SEARCH)
            .param("terms", terms.to_vec())
            .param("limit", limit as i64);
        self.entities(q, Some(0.0)).await
    }

    async fn label_search(&self, labels: &[String], limit: usize) -> Result<Vec<Entity>> {
        let q = query(LABEL_SEARCH)
            .param("labels", labels.to_vec())
            .param("limit", limit as i64);
        self.entities(q, Some(0.0)).await
    }

    async fn relationships(&self, node_ids: &[String], limit: usize) -> Result<Vec<Relationship>> {
        let q = query(RELATIONSHIPS)
            .param("node_ids", node_ids.to_vec())
            .param("limit", limit as i64);
        let rows = self.rows(q).await?;

        let mut relationships = Vec::with_capacity(rows.len());
        for row in rows {
            relationships.push(Relationship {
                source_id: row.get::<String>("source_id").map_err(decode_err)?,
                relationship: row.get::<String>("relationship").map_err(decode_err)?,
                target_id: row.get::<Option<String>>("target_id").map_err(decode_err)?,
                target_name: row
                    .get::<Option<String>>("target_name")
                    .map_err(decode_err)?
                    .unwrap_or_default(),
                target_labels: row.get::<Vec<String>>("target_labels").map_err(decode_err)?,
            });
        }
        debug!("Neo4j returned {} relationships", relationships.len());
        Ok(relationships)
    }

    async fn entity_types(&self, keyword: Option<&str>, limit: usize) -> Result<Vec<TypeCount>> {
        let q = match keyword {
            Some(keyword) => query(ENTITY_TYPES_BY_KEYWORD)
                .param("keyword", keyword)
                .param("limit", limit as i64),
            None => query(ENTITY_TYPES_ALL).param("limit", limit as i64),
        };
        self.type_counts(q, "entity_type").await
    }

    async fn relationship_types(&self, limit: usize) -> Result<Vec<TypeCount>> {
        let q = query(RELATIONSHIP_TYPES).param("limit", limit as i64);
        self.type_counts(q, "relationship_type").await
    }
}

fn decode_err(err: impl std::fmt::Display) -> Error {
    Error::Graph(format!("failed to decode row: {err}"))
}

fn row_to_entity(row: &Row, score: f64) -> Result<Entity> {
    let labels = row.get::<Vec<String>>("labels").map_err(decode_err)?;
    let properties = match row.get::<BoltType>("props").map_err(decode_err)? {
        BoltType::Map(map) => map
            .value
            .into_iter()
            .map(|(k, v)| (k.value, bolt_to_json(v)))
            .collect(),
        _ => Map::new(),
    };
    Ok(Entity::new(labels, properties, score))
}

/// Convert a Bolt value into JSON; temporal and spatial values become text.
fn bolt_to_json(value: BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::Number(i.value.into()),
        BoltType::Float(f) => Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::String(s) => Value::String(s.value),
        BoltType::List(list) => Value::Array(list.value.into_iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => Value::Object(
            map.value
                .into_iter()
                .map(|(k, v)| (k.value, bolt_to_json(v)))
                .collect(),
        ),
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bolt_scalars_convert_to_json() {
        assert_eq!(bolt_to_json(BoltType::from("text")), Value::String("text".into()));
        assert_eq!(bolt_to_json(BoltType::from(7_i64)), Value::from(7));
        assert_eq!(bolt_to_json(BoltType::from(true)), Value::Bool(true));
        assert_eq!(bolt_to_json(BoltType::from(1.5_f64)), Value::from(1.5));
    }

    #[test]
    fn bolt_lists_convert_recursively() {
        let list = BoltType::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(bolt_to_json(list), serde_json::json!(["a", "b"]));
    }

    #[test]
    fn keyword_query_binds_terms_instead_of_interpolating() {
        assert!(KEYWORD_SEARCH.contains("$terms"));
        assert!(LABEL_SEARCH.contains("$labels"));
        assert!(RELATIONSHIPS.contains("$node_ids"));
    }

    #[tokio::test]
    #[ignore] // Requires a running Neo4j (NEO4J_URI / NEO4J_USER / NEO4J_PASSWORD)
    async fn connects_to_live_server() {
        let uri = std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".into());
        let user = std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".into());
        let password = std::env::var("NEO4J_PASSWORD").unwrap_or_default();

        let graph = Neo4jGraph::connect(&uri, &user, &password).await.unwrap();
        let _ = graph.has_fulltext_index("entities").await.unwrap();
    }
}
