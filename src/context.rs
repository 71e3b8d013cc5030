//! Renders retrieved entities and relationships into the text block handed to
//! the generation backend.
//!
//! The "nothing found" case is a variant of [`KnowledgeContext`]; the
//! sentinel sentence only appears when that state is rendered.

use std::fmt;

use crate::model::{render_value, Entity, Relationship};

/// Rendered for [`KnowledgeContext::NotFound`]. Consumers match on it verbatim.
pub const NO_RESULTS_SENTINEL: &str = "No relevant information found in the knowledge graph.";

/// Entities rendered into the context by default.
pub const DEFAULT_CONTEXT_ENTITIES: usize = 5;

/// Fields rendered first, in this order.
const PREFERRED_FIELDS: [&str; 4] = ["description", "content", "definition", "code"];
/// Metadata never rendered as a property line.
const METADATA_FIELDS: [&str; 3] = ["id", "labels", "score"];

/// Formatted knowledge for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeContext {
    NotFound,
    Found { text: String, entity_count: usize },
}

impl KnowledgeContext {
    pub fn has_results(&self) -> bool {
        matches!(self, KnowledgeContext::Found { .. })
    }

    pub fn render(&self) -> &str {
        match self {
            KnowledgeContext::NotFound => NO_RESULTS_SENTINEL,
            KnowledgeContext::Found { text, .. } => text,
        }
    }
}

impl fmt::Display for KnowledgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.render())
    }
}

/// Format the first `max_entities` entities with their relationships.
pub fn format_context(
    entities: &[Entity],
    relationships: &[Relationship],
    max_entities: usize,
) -> KnowledgeContext {
    if entities.is_empty() {
        return KnowledgeContext::NotFound;
    }

    let shown = &entities[..entities.len().min(max_entities)];
    let mut text = String::from("Knowledge Graph Information:\n\n");

    for (i, entity) in shown.iter().enumerate() {
        text.push_str(&format!(
            "ENTITY {}: {} - {}\n",
            i + 1,
            entity.primary_label(),
            entity.display_title()
        ));

        for field in PREFERRED_FIELDS {
            if let Some(value) = entity.text(field) {
                text.push_str(&format!("  • {}: {}\n", capitalize(field), value));
            }
        }

        for (key, value) in &entity.properties {
            if PREFERRED_FIELDS.contains(&key.as_str()) || METADATA_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if let Some(value) = render_value(value) {
                text.push_str(&format!("  • {}: {}\n", capitalize(key), value));
            }
        }

        if let Some(id) = entity.id() {
            render_relationships(&mut text, &id, relationships);
        }

        text.push('\n');
    }

    KnowledgeContext::Found {
        text,
        entity_count: shown.len(),
    }
}

fn render_relationships(text: &mut String, entity_id: &str, relationships: &[Relationship]) {
    let own: Vec<&Relationship> = relationships
        .iter()
        .filter(|r| r.source_id == entity_id)
        .collect();
    if own.is_empty() {
        return;
    }

    // Grouped by type in first-seen order, unique non-empty names.
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for rel in own {
        let pos = match groups.iter().position(|(t, _)| *t == rel.relationship) {
            Some(pos) => pos,
            None => {
                groups.push((rel.relationship.as_str(), Vec::new()));
                groups.len() - 1
            }
        };
        let names = &mut groups[pos].1;
        let name = rel.target_name.as_str();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }

    text.push_str("  • Relationships:\n");
    for (rel_type, names) in groups {
        if !names.is_empty() {
            text.push_str(&format!("    - {}: {}\n", rel_type, names.join(", ")));
        }
    }
}

/// First character uppercased, the rest lowercased.
fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
